use std::collections::HashMap;
use std::sync::RwLock;

use huddle_protocol::types::{ConnId, VoiceUser};

/// Voice channel roster.
///
/// Mutated only by the transport event loop; everything else reads
/// snapshots. Cleared wholesale when the channel is left or the
/// connection closes.
pub struct Roster {
    users: RwLock<HashMap<ConnId, VoiceUser>>,
}

impl Roster {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ConnId, VoiceUser>> {
        self.users.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<ConnId, VoiceUser>> {
        self.users.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert or fully replace a user entry.
    pub fn upsert(&self, user: VoiceUser) {
        self.write().insert(user.conn_id, user);
    }

    /// Replace the whole roster (channel join, reconnect).
    pub fn replace_all(&self, users: Vec<VoiceUser>) {
        let mut map = self.write();
        map.clear();
        for user in users {
            map.insert(user.conn_id, user);
        }
    }

    pub fn remove(&self, conn_id: ConnId) -> Option<VoiceUser> {
        self.write().remove(&conn_id)
    }

    pub fn set_speaking(&self, conn_id: ConnId, speaking: bool, level: f32) {
        if let Some(user) = self.write().get_mut(&conn_id) {
            user.speaking = speaking;
            user.level = level;
        }
    }

    pub fn set_sharing(&self, conn_id: ConnId, is_sharing: bool) {
        if let Some(user) = self.write().get_mut(&conn_id) {
            user.is_sharing = is_sharing;
        }
    }

    pub fn get(&self, conn_id: ConnId) -> Option<VoiceUser> {
        self.read().get(&conn_id).cloned()
    }

    pub fn snapshot(&self) -> Vec<VoiceUser> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn clear(&self) {
        self.write().clear();
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self::new()
    }
}
