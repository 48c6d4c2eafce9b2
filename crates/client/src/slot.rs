use std::{
    collections::VecDeque,
    future::Future,
    pin::Pin,
    sync::{Mutex, PoisonError},
    task::{Context, Poll},
};

use tokio::sync::oneshot;

/// Rendezvous point for one kind of server reply.
///
/// A caller registers before sending its request; the reader hands the reply
/// to the oldest live waiter. Replies are never buffered: with nobody
/// waiting, `offer` gives the value back to the caller to drop.
///
/// Replies carry no request id, so concurrent callers of the same kind are
/// matched purely by arrival order. A reply that goes missing leaves the
/// last waiter blocked.
pub(crate) struct ReplySlot<T> {
    kind: &'static str,
    waiters: Mutex<VecDeque<oneshot::Sender<T>>>,
}

impl<T> ReplySlot<T> {
    pub(crate) fn new(kind: &'static str) -> Self {
        Self {
            kind,
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        self.kind
    }

    pub(crate) fn register(&self) -> Reply<T> {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.waiters.lock().unwrap_or_else(PoisonError::into_inner);
        waiters.retain(|w| !w.is_closed());
        waiters.push_back(tx);
        Reply(rx)
    }

    /// Non-blocking hand-off. Returns the value when no live waiter took it.
    pub(crate) fn offer(&self, mut value: T) -> Result<(), T> {
        let mut waiters = self.waiters.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(waiter) = waiters.pop_front() {
            match waiter.send(value) {
                Ok(()) => return Ok(()),
                // receiver gone (timed out or aborted)
                Err(v) => value = v,
            }
        }
        Err(value)
    }

    #[cfg(test)]
    fn live_waiters(&self) -> usize {
        let waiters = self.waiters.lock().unwrap_or_else(PoisonError::into_inner);
        waiters.iter().filter(|w| !w.is_closed()).count()
    }
}

/// Resolves with the reply handed to this waiter.
///
/// The sending half lives in the slot, which outlives every caller, so the
/// only way to finish is a reply. If the slot itself is gone the future stays
/// pending like any other unanswered request.
pub(crate) struct Reply<T>(oneshot::Receiver<T>);

impl<T> Future for Reply<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        match Pin::new(&mut self.0).poll(cx) {
            Poll::Ready(Ok(value)) => Poll::Ready(value),
            Poll::Ready(Err(_)) | Poll::Pending => Poll::Pending,
        }
    }
}
