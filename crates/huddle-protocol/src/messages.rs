use serde::{Deserialize, Serialize};

use crate::types::*;

/// Logical invocations sent from client to server over the signalling
/// transport. The transport is assumed ordered and reliable; the concrete
/// wire encoding is up to the transport implementation (see [`crate::codec`]
/// for the default length-prefixed postcard framing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Join a voice channel. Identity fields are echoed back to peers in
    /// their roster updates.
    JoinVoiceChannel {
        channel_id: ChannelId,
        user_id: UserId,
        username: String,
        avatar: String,
    },

    /// Leave the current voice channel.
    LeaveVoiceChannel,

    /// Speaking indicator changed, or a periodic level refresh while
    /// speaking (every 500 ms).
    UpdateSpeakingState { is_speaking: bool, level: f64 },

    /// One 20 ms Opus voice packet.
    SendAudio { opus: Vec<u8> },

    /// One encoded screen-share frame (JPEG or H.264 Annex-B; the receiver
    /// distinguishes them by magic bytes).
    SendScreenFrame {
        bytes: Vec<u8>,
        width: u16,
        height: u16,
    },

    /// Announce that this client started sharing its screen.
    StartScreenShare,

    /// Announce that this client stopped sharing its screen.
    StopScreenShare,
}

/// Notifications delivered from server to client. The core installs a
/// handler for every variant before the transport starts reading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerMessage {
    /// A user joined the voice channel.
    UserJoinedVoice { user: VoiceUser },

    /// A user left the voice channel.
    UserLeftVoice { conn_id: ConnId },

    /// Full roster of the channel (sent on join and after reconnect).
    VoiceChannelUsers { users: Vec<VoiceUser> },

    /// A user's mute/deafen/video state changed.
    VoiceStateUpdated { user: VoiceUser },

    /// A user's speaking indicator changed.
    UserSpeaking {
        conn_id: ConnId,
        is_speaking: bool,
        level: f64,
    },

    /// Opus voice data from another user.
    ReceiveAudio { sender_id: ConnId, opus: Vec<u8> },

    /// An encoded screen-share frame from another user.
    ReceiveScreenFrame {
        sender_id: ConnId,
        bytes: Vec<u8>,
        width: u16,
        height: u16,
    },

    /// A user in the channel started screen sharing.
    ScreenShareStarted {
        conn_id: ConnId,
        username: String,
        channel_id: ChannelId,
    },

    /// A user stopped screen sharing.
    ScreenShareStopped { conn_id: ConnId },

    /// A user's sharing flag changed (roster refresh without a full entry).
    UserScreenShareChanged { conn_id: ConnId, is_sharing: bool },

    /// Number of viewers watching our share changed.
    ViewerCountUpdated { count: u32 },

    /// The server ended our session administratively.
    DisconnectedByAdmin { reason: String },

    /// We were moved to a different channel by a moderator.
    MovedToChannel {
        channel_id: ChannelId,
        moved_by: String,
    },
}
