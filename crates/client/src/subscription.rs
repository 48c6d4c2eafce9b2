use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use dashmap::DashMap;

/// A message delivered to a subscription callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub payload: Bytes,
    pub reply_to: Option<String>,
}

pub type Callback = Arc<dyn Fn(Message) + Send + Sync>;

/// Registry entry as seen from outside the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub id: u64,
    pub subject: String,
    pub queue: Option<String>,
}

struct Subscription {
    subject: String,
    queue: Option<String>,
    callback: Callback,
}

/// Subscriptions keyed by id. Mutated by caller tasks, read by the reader
/// task on every inbound MSG.
pub(crate) struct Registry {
    subs: DashMap<u64, Subscription>,
    next_id: AtomicU64,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            subs: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Ids are never handed out twice, even after removal.
    pub(crate) fn insert(&self, subject: &str, queue: Option<&str>, callback: Callback) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subs.insert(
            id,
            Subscription {
                subject: subject.to_owned(),
                queue: queue.map(str::to_owned),
                callback,
            },
        );
        id
    }

    pub(crate) fn remove(&self, id: u64) -> bool {
        self.subs.remove(&id).is_some()
    }

    /// Clones the callback out so the shard lock is released before it runs.
    pub(crate) fn callback(&self, id: u64) -> Option<Callback> {
        self.subs.get(&id).map(|sub| sub.callback.clone())
    }

    /// Ids subscribed to exactly `subject`, ascending.
    pub(crate) fn ids_for_subject(&self, subject: &str) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .subs
            .iter()
            .filter(|entry| entry.subject == subject)
            .map(|entry| *entry.key())
            .collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn len(&self) -> usize {
        self.subs.len()
    }

    pub(crate) fn snapshot(&self) -> Vec<SubscriptionInfo> {
        let mut subs: Vec<SubscriptionInfo> = self
            .subs
            .iter()
            .map(|entry| SubscriptionInfo {
                id: *entry.key(),
                subject: entry.subject.clone(),
                queue: entry.queue.clone(),
            })
            .collect();
        subs.sort_unstable_by_key(|s| s.id);
        subs
    }
}
