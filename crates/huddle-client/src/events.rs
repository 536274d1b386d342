use huddle_protocol::types::{ChannelId, ConnId, VoiceUser};
use tokio::sync::mpsc;
use tracing::warn;

/// Events the core posts for the UI layer.
///
/// The core never calls into a GUI toolkit; it posts into this
/// single-consumer mailbox and the UI drains it on its own thread.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    ConnectionStateChanged { connected: bool, reason: String },
    UserJoined { user: VoiceUser },
    UserLeft { conn_id: ConnId },
    RosterUpdated,
    SpeakingChanged { conn_id: ConnId, speaking: bool, level: f32 },
    /// Our own speaking gate opened or closed.
    LocalSpeakingChanged { speaking: bool, level: f32 },
    ScreenShareStarted { conn_id: ConnId, username: String },
    ScreenShareStopped { conn_id: ConnId },
    ViewerCountUpdated { count: u32 },
    /// A new frame from `sender_id` is ready for display.
    RemoteFrameReady { sender_id: ConnId },
    MovedToChannel { channel_id: ChannelId, moved_by: String },
    DisconnectedByAdmin { reason: String },
    VoiceError { message: String },
}

/// Mailbox depth. A UI that falls this far behind loses events rather
/// than stalling the core.
const MAILBOX_DEPTH: usize = 256;

/// Posting side of the UI mailbox. Cheap to clone; posts never block.
#[derive(Clone)]
pub struct EventMailbox {
    tx: mpsc::Sender<ClientEvent>,
}

impl EventMailbox {
    pub fn new() -> (Self, mpsc::Receiver<ClientEvent>) {
        let (tx, rx) = mpsc::channel(MAILBOX_DEPTH);
        (Self { tx }, rx)
    }

    /// Post an event; drops it (with a warning) when the UI is not keeping
    /// up or has gone away.
    pub fn post(&self, event: ClientEvent) {
        if let Err(e) = self.tx.try_send(event) {
            match e {
                mpsc::error::TrySendError::Full(ev) => {
                    warn!("UI mailbox full, dropping event {ev:?}");
                }
                mpsc::error::TrySendError::Closed(_) => {}
            }
        }
    }
}
