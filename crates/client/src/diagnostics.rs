use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for traffic the client dropped instead of surfacing.
#[derive(Debug, Default)]
pub(crate) struct Diagnostics {
    dropped_replies: AtomicU64,
    unroutable_messages: AtomicU64,
    unexpected_packets: AtomicU64,
    dropped_outbound: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    /// PONG / +OK / -ERR that arrived with no caller waiting.
    pub dropped_replies: u64,
    /// MSG frames for a subscription id not in the registry.
    pub unroutable_messages: u64,
    /// Frames a server has no business sending to a client.
    pub unexpected_packets: u64,
    /// Packets enqueued after the writer task stopped.
    pub dropped_outbound: u64,
}

impl Diagnostics {
    #[inline]
    pub(crate) fn dropped_reply(&self) {
        self.dropped_replies.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn unroutable_message(&self) {
        self.unroutable_messages.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn unexpected_packet(&self) {
        self.unexpected_packets.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn dropped_outbound(&self) {
        self.dropped_outbound.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            dropped_replies: self.dropped_replies.load(Ordering::Relaxed),
            unroutable_messages: self.unroutable_messages.load(Ordering::Relaxed),
            unexpected_packets: self.unexpected_packets.load(Ordering::Relaxed),
            dropped_outbound: self.dropped_outbound.load(Ordering::Relaxed),
        }
    }
}
