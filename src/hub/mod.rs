//! Room Hub: per-room membership and message fan-out.
//!
//! Room-wide events (`files-update`, `file-synced`, `folder-created`,
//! `item-deleted`, `item-renamed`, `item-moved`, `folder-toggled`,
//! `user-joined`, `user-left`) go out on the room's broadcast channel.
//! Per-user events (`file-content-update`, `active-file-changed`,
//! `terminal-output`, `file-error`) are delivered on that user's private
//! mpsc channel so only they see it. Fan-out is fire-and-forget; delivery
//! order within a single client's stream is preserved because each client
//! owns exactly one broadcast subscription and one mpsc receiver, drained
//! by its own send task.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

const ROOM_BROADCAST_CAPACITY: usize = 256;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("member not found: {0}")]
    MemberNotFound(String),
}

/// A member's current view into the room: active file, and whether they
/// have an open PTY.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub user_id: String,
    pub username: String,
    pub active_file: Option<String>,
}

struct MemberState {
    member: Member,
    private_tx: mpsc::UnboundedSender<serde_json::Value>,
}

/// Per-room membership + fan-out. One instance per live room.
pub struct RoomHub {
    room_code: String,
    members: DashMap<String, MemberState>,
    broadcast_tx: broadcast::Sender<serde_json::Value>,
}

impl RoomHub {
    pub fn new(room_code: impl Into<String>) -> Arc<Self> {
        let (broadcast_tx, _) = broadcast::channel(ROOM_BROADCAST_CAPACITY);
        Arc::new(Self { room_code: room_code.into(), members: DashMap::new(), broadcast_tx })
    }

    pub fn room_code(&self) -> &str {
        &self.room_code
    }

    /// Subscribes to room-wide broadcast events.
    pub fn subscribe(&self) -> broadcast::Receiver<serde_json::Value> {
        self.broadcast_tx.subscribe()
    }

    /// Adds a member (re-joins by the same user id collapse: a second join
    /// simply replaces the private channel and keeps the active file).
    pub fn join(&self, user_id: &str, username: &str, private_tx: mpsc::UnboundedSender<serde_json::Value>) {
        let active_file = self.members.get(user_id).and_then(|m| m.member.active_file.clone());
        self.members.insert(
            user_id.to_string(),
            MemberState {
                member: Member { user_id: user_id.to_string(), username: username.to_string(), active_file },
                private_tx,
            },
        );
    }

    /// Removes a member. Returns `true` if membership is now empty —
    /// callers use this to decide whether to tear down the room's runtime.
    pub fn leave(&self, user_id: &str) -> bool {
        self.members.remove(user_id);
        self.members.is_empty()
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.contains_key(user_id)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn members(&self) -> Vec<Member> {
        self.members.iter().map(|e| e.member.clone()).collect()
    }

    pub fn set_active_file(&self, user_id: &str, file: Option<String>) -> Result<(), HubError> {
        let mut entry = self.members.get_mut(user_id).ok_or_else(|| HubError::MemberNotFound(user_id.to_string()))?;
        entry.member.active_file = file;
        Ok(())
    }

    /// Room-wide, fire-and-forget. Errors (no subscribers) are ignored —
    /// matching the spec's fan-out semantics.
    pub fn broadcast(&self, payload: serde_json::Value) {
        let _ = self.broadcast_tx.send(payload);
    }

    /// Delivered only to `user_id`'s private channel.
    pub fn send_to(&self, user_id: &str, payload: serde_json::Value) -> Result<(), HubError> {
        let entry = self.members.get(user_id).ok_or_else(|| HubError::MemberNotFound(user_id.to_string()))?;
        let _ = entry.private_tx.send(payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_and_leave_tracks_membership() {
        let hub = RoomHub::new("ABC123");
        let (tx, _rx) = mpsc::unbounded_channel();
        hub.join("u1", "alice", tx);
        assert!(hub.is_member("u1"));
        assert_eq!(hub.member_count(), 1);

        let emptied = hub.leave("u1");
        assert!(emptied);
        assert!(!hub.is_member("u1"));
    }

    #[test]
    fn test_rejoin_same_user_preserves_active_file() {
        let hub = RoomHub::new("ABC123");
        let (tx1, _rx1) = mpsc::unbounded_channel();
        hub.join("u1", "alice", tx1);
        hub.set_active_file("u1", Some("main.js".to_string())).unwrap();

        let (tx2, _rx2) = mpsc::unbounded_channel();
        hub.join("u1", "alice", tx2);
        assert_eq!(hub.member_count(), 1);
        assert_eq!(hub.members()[0].active_file.as_deref(), Some("main.js"));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_subscribers() {
        let hub = RoomHub::new("ABC123");
        let mut sub1 = hub.subscribe();
        let mut sub2 = hub.subscribe();

        hub.broadcast(json!({"event": "files-update"}));

        assert_eq!(sub1.recv().await.unwrap()["event"], "files-update");
        assert_eq!(sub2.recv().await.unwrap()["event"], "files-update");
    }

    #[tokio::test]
    async fn test_send_to_is_private() {
        let hub = RoomHub::new("ABC123");
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.join("u1", "alice", tx);

        hub.send_to("u1", json!({"event": "terminal-output"})).unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received["event"], "terminal-output");
    }

    #[test]
    fn test_send_to_unknown_member_errors() {
        let hub = RoomHub::new("ABC123");
        let err = hub.send_to("ghost", json!({})).unwrap_err();
        assert!(matches!(err, HubError::MemberNotFound(_)));
    }
}
