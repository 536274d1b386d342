use serde::{Deserialize, Serialize};

/// Stable account identifier.
pub type UserId = u32;

/// Voice channel identifier.
pub type ChannelId = u32;

/// Per-connection identifier assigned by the server. A user reconnecting
/// gets a fresh one; media streams are keyed by it.
pub type ConnId = u64;

/// Roster entry for a user present in a voice channel.
///
/// Mutated only by the transport event loop; everyone else reads snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceUser {
    pub conn_id: ConnId,
    pub user_id: UserId,
    pub username: String,
    /// Avatar URL (may be empty).
    #[serde(default)]
    pub avatar: String,
    pub channel_id: ChannelId,
    pub muted: bool,
    pub deafened: bool,
    #[serde(default)]
    pub speaking: bool,
    /// Most recent speech level reported by the sender, 0.0–1.0.
    #[serde(default)]
    pub level: f32,
    #[serde(default)]
    pub is_sharing: bool,
    #[serde(default)]
    pub is_video: bool,
}

/// A capturable display as enumerated by the platform layer. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayDescriptor {
    pub id: u32,
    pub name: String,
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
    pub primary: bool,
}
