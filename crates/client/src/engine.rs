use std::sync::Arc;

use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tern_protocol::{LineCodec, Msg, Packet, ProtocolError};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{mpsc, watch},
};
use tokio_util::{codec::Framed, sync::CancellationToken};

use crate::{
    ClientState,
    diagnostics::Diagnostics,
    slot::ReplySlot,
    subscription::{Message, Registry},
};

/// State shared between the caller-facing client and the reader task.
pub(crate) struct Shared {
    pub(crate) registry: Registry,
    pub(crate) pongs: ReplySlot<()>,
    /// `+OK` and `-ERR` both answer CONNECT, so they share one queue.
    pub(crate) auth: ReplySlot<Result<(), String>>,
    pub(crate) diagnostics: Diagnostics,
    pub(crate) state: watch::Sender<ClientState>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            registry: Registry::new(),
            pongs: ReplySlot::new("PONG"),
            auth: ReplySlot::new("+OK/-ERR"),
            diagnostics: Diagnostics::default(),
            state: watch::Sender::new(ClientState::Connected),
        }
    }

    pub(crate) fn mark_authenticated(&self) {
        self.state.send_if_modified(|state| {
            if *state == ClientState::Connected {
                *state = ClientState::Authenticated;
                true
            } else {
                false
            }
        });
    }

    fn mark_closed(&self) {
        self.state.send_if_modified(|state| {
            if *state == ClientState::Closed {
                false
            } else {
                *state = ClientState::Closed;
                true
            }
        });
    }
}

type Writer<S> = SplitSink<Framed<S, LineCodec>, Packet>;
type Reader<S> = SplitStream<Framed<S, LineCodec>>;

/// Splits `stream` and spawns the writer and reader tasks. Returns the
/// sending half of the outbound queue.
pub(crate) fn start<S>(
    stream: S,
    codec: LineCodec,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
) -> mpsc::UnboundedSender<Packet>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (writer, reader) = Framed::new(stream, codec).split();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(write_loop(writer, rx, shared.clone()));
    tokio::spawn(read_loop(reader, shared, shutdown));

    tx
}

// ---- Writer ----------------------------------------------------------------

async fn write_loop<S>(
    mut writer: Writer<S>,
    mut rx: mpsc::UnboundedReceiver<Packet>,
    shared: Arc<Shared>,
) where
    S: AsyncWrite,
{
    match drain(&mut writer, &mut rx).await {
        Ok(()) => tracing::debug!("outbound queue closed, writer stopping"),
        Err(err) => tracing::error!(error = %err, "write failed, writer stopping"),
    }
    shared.mark_closed();
}

/// Writes packets in queue order, flushing whenever the queue runs dry.
async fn drain<S>(
    writer: &mut Writer<S>,
    rx: &mut mpsc::UnboundedReceiver<Packet>,
) -> Result<(), ProtocolError>
where
    S: AsyncWrite,
{
    while let Some(packet) = rx.recv().await {
        tracing::trace!(op = packet.op(), "send");
        writer.feed(packet).await?;
        while let Ok(packet) = rx.try_recv() {
            tracing::trace!(op = packet.op(), "send");
            writer.feed(packet).await?;
        }
        writer.flush().await?;
    }
    Ok(())
}

// ---- Reader ----------------------------------------------------------------

async fn read_loop<S>(mut reader: Reader<S>, shared: Arc<Shared>, shutdown: CancellationToken)
where
    S: AsyncRead,
{
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = reader.next() => next,
        };

        match next {
            Some(Ok(packet)) => route(&shared, packet),
            Some(Err(err)) => {
                tracing::error!(error = %err, "inbound framing lost, reader stopping");
                break;
            }
            None => {
                tracing::info!("connection closed by peer");
                break;
            }
        }
    }
    shared.mark_closed();
}

pub(crate) fn route(shared: &Shared, packet: Packet) {
    match packet {
        Packet::Pong => hand_off(shared, &shared.pongs, ()),
        Packet::Ok => hand_off(shared, &shared.auth, Ok(())),
        Packet::Err(err) => hand_off(shared, &shared.auth, Err(err.message)),
        Packet::Info(info) => {
            tracing::trace!(info = %info.payload, "server info");
        }
        Packet::Msg(msg) => dispatch(shared, msg),
        unexpected @ (Packet::Ping
        | Packet::Connect(_)
        | Packet::Sub(_)
        | Packet::Unsub(_)
        | Packet::Pub(_)) => {
            shared.diagnostics.unexpected_packet();
            tracing::warn!(op = unexpected.op(), "unexpected packet from server dropped");
        }
    }
}

fn hand_off<T>(shared: &Shared, slot: &ReplySlot<T>, value: T) {
    if slot.offer(value).is_err() {
        shared.diagnostics.dropped_reply();
        tracing::debug!(kind = slot.kind(), "reply with no waiter dropped");
    }
}

fn dispatch(shared: &Shared, msg: Msg) {
    let Some(callback) = shared.registry.callback(msg.sid) else {
        shared.diagnostics.unroutable_message();
        tracing::warn!(
            subject = %msg.subject,
            sid = msg.sid,
            "message for unknown subscription dropped"
        );
        return;
    };

    callback(Message {
        subject: msg.subject,
        payload: msg.payload,
        reply_to: msg.reply_to,
    });
}
