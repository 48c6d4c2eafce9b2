//! Async client for the text-line pub/sub protocol.
//!
//! A [`Client`] owns one stream connection. Two background tasks share it: a
//! writer draining an ordered outbound queue, and a reader that decodes
//! frames, hands PONG / +OK / -ERR replies to waiting callers and invokes
//! subscription callbacks for MSG frames.
//!
//! Replies carry no correlation id. `ping` waits for the next PONG and
//! `connect` for the next `+OK` or `-ERR`, whichever comes first. Concurrent
//! callers share whatever replies arrive, oldest caller first, and a reply
//! that arrives while nobody waits is dropped.
//! A transport failure does not wake pending callers; set
//! [`ClientOptions::reply_timeout`] to bound the wait.

mod diagnostics;
mod engine;
mod slot;
mod subscription;

use std::{future::Future, sync::Arc, time::Duration};

use bytes::Bytes;
use tern_protocol::{
    Connect, LineCodec, Packet, Publish, Subscribe, Unsubscribe,
    frame::{DEFAULT_MAX_LINE_LENGTH, DEFAULT_MAX_PAYLOAD},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    sync::{mpsc, watch},
};
use tokio_util::sync::CancellationToken;

use crate::engine::Shared;

pub use diagnostics::DiagnosticsSnapshot;
pub use subscription::{Callback, Message, SubscriptionInfo};

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("dial failed: {0}")]
    Dial(#[source] std::io::Error),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("no reply within {0:?}")]
    Timeout(Duration),
}

/// Connection lifecycle. `Closed` is reached when either background task
/// stops and is never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connected,
    Authenticated,
    Closed,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Upper bound for `connect` and `ping`. `None` waits forever.
    pub reply_timeout: Option<Duration>,
    /// Longest inbound control line accepted.
    pub max_line_length: usize,
    /// Largest inbound MSG payload accepted, 1 MiB by default.
    ///
    /// The server decides how large a message may be, not the client. A MSG
    /// above this limit is a framing error: the reader stops, the state
    /// moves to [`ClientState::Closed`] and the message is never delivered.
    /// Raise it to match the server's own limit when larger messages are
    /// expected.
    pub max_payload: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            reply_timeout: None,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl ClientOptions {
    pub fn with_reply_timeout(self, reply_timeout: Duration) -> Self {
        Self {
            reply_timeout: Some(reply_timeout),
            ..self
        }
    }

    pub fn with_max_payload(self, max_payload: usize) -> Self {
        Self {
            max_payload,
            ..self
        }
    }
}

pub struct Client {
    outbound: mpsc::UnboundedSender<Packet>,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    reply_timeout: Option<Duration>,
}

impl Drop for Client {
    fn drop(&mut self) {
        // The writer drains whatever is queued once `outbound` is dropped.
        self.shutdown.cancel();
    }
}

impl Client {
    /// Open a TCP connection with default options.
    pub async fn dial(addr: &str) -> Result<Self, ClientError> {
        Self::dial_with(addr, ClientOptions::default()).await
    }

    pub async fn dial_with(addr: &str, opts: ClientOptions) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await.map_err(ClientError::Dial)?;
        stream.set_nodelay(true).map_err(ClientError::Dial)?;
        tracing::debug!(addr, "dialed");
        Ok(Self::from_stream(stream, opts))
    }

    /// Run the client over an already connected stream. Must be called from
    /// within a tokio runtime.
    pub fn from_stream<S>(stream: S, opts: ClientOptions) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let shared = Arc::new(Shared::new());
        let shutdown = CancellationToken::new();
        let codec = LineCodec::with_limits(opts.max_line_length, opts.max_payload);
        let outbound = engine::start(stream, codec, shared.clone(), shutdown.clone());

        Client {
            outbound,
            shared,
            shutdown,
            reply_timeout: opts.reply_timeout,
        }
    }

    /// Send credentials and wait for `+OK` or `-ERR`.
    pub async fn connect(&self, user: &str, pass: &str) -> Result<(), ClientError> {
        let reply = self.shared.auth.register();
        self.enqueue(Packet::Connect(Connect::new(user, pass)));

        match self.await_reply(reply).await? {
            Ok(()) => {
                self.shared.mark_authenticated();
                Ok(())
            }
            Err(message) => {
                tracing::warn!(%message, "server rejected credentials");
                Err(ClientError::Authentication(message))
            }
        }
    }

    /// Round-trip a PING.
    pub async fn ping(&self) -> Result<(), ClientError> {
        let pong = self.shared.pongs.register();
        self.enqueue(Packet::Ping);
        self.await_reply(pong).await
    }

    /// Fire-and-forget publish.
    pub fn publish(&self, subject: &str, payload: impl Into<Bytes>) {
        self.enqueue(Packet::Pub(Publish::new(subject, payload)));
    }

    /// Publish with a reply subject for responders to answer on.
    pub fn publish_request(&self, subject: &str, reply_to: &str, payload: impl Into<Bytes>) {
        self.enqueue(Packet::Pub(
            Publish::new(subject, payload).with_reply_to(reply_to),
        ));
    }

    /// Register `callback` for `subject` and return the subscription id.
    ///
    /// The callback runs on the reader task; a slow callback stalls all
    /// inbound traffic, replies included.
    pub fn subscribe<F>(&self, subject: &str, callback: F) -> u64
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.add_subscription(subject, None, Arc::new(callback))
    }

    /// Like [`Client::subscribe`], joining queue group `queue`.
    pub fn subscribe_queue<F>(&self, subject: &str, queue: &str, callback: F) -> u64
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        // an empty group is not sent on the wire
        let queue = Some(queue).filter(|q| !q.is_empty());
        self.add_subscription(subject, queue, Arc::new(callback))
    }

    pub fn unsubscribe(&self, sid: u64) {
        self.enqueue(Packet::Unsub(Unsubscribe { sid }));
        if !self.shared.registry.remove(sid) {
            tracing::debug!(sid, "unsubscribe for unknown id");
        }
    }

    /// Unsubscribe every subscription on exactly `subject`.
    pub fn unsubscribe_all(&self, subject: &str) {
        for sid in self.shared.registry.ids_for_subject(subject) {
            self.unsubscribe(sid);
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.shared.registry.snapshot()
    }

    pub fn state(&self) -> ClientState {
        *self.shared.state.borrow()
    }

    /// Observe state changes, e.g. to notice the connection going away.
    pub fn watch_state(&self) -> watch::Receiver<ClientState> {
        self.shared.state.subscribe()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.shared.diagnostics.snapshot()
    }

    fn add_subscription(&self, subject: &str, queue: Option<&str>, callback: Callback) -> u64 {
        let sid = self.shared.registry.insert(subject, queue, callback);
        let sub = Subscribe::new(subject, sid);
        self.enqueue(Packet::Sub(match queue {
            Some(queue) => sub.with_queue(queue),
            None => sub,
        }));
        sid
    }

    fn enqueue(&self, packet: Packet) {
        if let Err(mpsc::error::SendError(packet)) = self.outbound.send(packet) {
            self.shared.diagnostics.dropped_outbound();
            tracing::debug!(op = packet.op(), "writer stopped, packet dropped");
        }
    }

    async fn await_reply<T>(&self, reply: impl Future<Output = T>) -> Result<T, ClientError> {
        match self.reply_timeout {
            Some(limit) => tokio::time::timeout(limit, reply)
                .await
                .map_err(|_| ClientError::Timeout(limit)),
            None => Ok(reply.await),
        }
    }
}
