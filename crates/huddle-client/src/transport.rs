use anyhow::{anyhow, Result};
use huddle_protocol::messages::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;

/// Connection-level happenings delivered by the transport implementation
/// alongside server messages. Order is preserved end to end.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Message(ServerMessage),
    /// The link dropped; the transport is re-establishing it.
    Reconnecting,
    /// The link is back. The session re-joins its cached voice channel.
    Reconnected,
    /// The link is gone for good.
    Closed { reason: String },
}

/// Outbound capacity. Small enough that a stalled wire shows up as
/// backpressure (and measurable send latency) instead of unbounded memory.
pub const OUTBOUND_DEPTH: usize = 64;

/// Handle to the signalling transport's outbound side.
///
/// The transport itself — socket, TLS, RPC encoding — lives outside the
/// core. It consumes `ClientMessage`s from the receiver half and delivers
/// inbound traffic as [`TransportEvent`]s, in order and reliably.
#[derive(Clone)]
pub struct Transport {
    outbound: mpsc::Sender<ClientMessage>,
}

impl Transport {
    /// Build the core side of a transport: the handle the session invokes
    /// methods on, and the receiver the concrete transport drains.
    pub fn channel() -> (Self, mpsc::Receiver<ClientMessage>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_DEPTH);
        (Self { outbound: tx }, rx)
    }

    /// Wrap an existing sender (e.g. one half of a duplex test harness).
    pub fn new(outbound: mpsc::Sender<ClientMessage>) -> Self {
        Self { outbound }
    }

    /// Invoke a method on the server, waiting for queue space when the
    /// wire is busy.
    pub async fn invoke(&self, msg: ClientMessage) -> Result<()> {
        self.outbound
            .send(msg)
            .await
            .map_err(|_| anyhow!("transport closed"))
    }

    /// Fire-and-forget invoke for realtime paths: returns immediately,
    /// dropping the message when the wire has no room. The audio send
    /// thread must never block here.
    pub fn invoke_nonblocking(&self, msg: ClientMessage) -> Result<()> {
        self.outbound
            .try_send(msg)
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => anyhow!("transport congested"),
                mpsc::error::TrySendError::Closed(_) => anyhow!("transport closed"),
            })
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}
