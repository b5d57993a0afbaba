//! Sync Arbiter: breaks the editor↔terminal write loop.
//!
//! Owns a set of active sync tokens keyed by `(origin, room, path)`. The
//! contract: no write to side B is performed while a `token-for-side-A` for
//! the same `(room, path)` is active. Tokens auto-clear after 300 ms, which
//! is longer than the FS watcher's write-stabilization window (§4.5) but
//! short enough that a genuine follow-up edit is never lost.

use dashmap::DashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Which side produced a write. Folder variants exist because a folder
/// create/delete/rename from one side must also suppress the watcher echo
/// from the other, even though folders have no content diff of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncOrigin {
    Editor,
    Terminal,
    EditorFolder,
    TerminalFolder,
}

impl SyncOrigin {
    /// The origin whose in-flight token would suppress a write from this one.
    fn opposite(self) -> Self {
        match self {
            SyncOrigin::Editor => SyncOrigin::Terminal,
            SyncOrigin::Terminal => SyncOrigin::Editor,
            SyncOrigin::EditorFolder => SyncOrigin::TerminalFolder,
            SyncOrigin::TerminalFolder => SyncOrigin::EditorFolder,
        }
    }
}

const TOKEN_TTL: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TokenKey {
    origin: SyncOrigin,
    room: String,
    path: String,
}

/// Shared, cloneable handle to the arbiter's token set.
#[derive(Clone, Default)]
pub struct SyncArbiter {
    tokens: Arc<DashSet<TokenKey>>,
}

impl SyncArbiter {
    pub fn new() -> Self {
        Self { tokens: Arc::new(DashSet::new()) }
    }

    /// Attempts to claim a token for `(origin, room, path)`. Returns `false`
    /// (without claiming anything) if the opposite origin already holds a
    /// token for the same room+path — the caller should drop its operation
    /// silently in that case. On success, schedules the token's own removal
    /// after [`TOKEN_TTL`].
    pub fn try_claim(&self, origin: SyncOrigin, room: &str, path: &str) -> bool {
        let opposite_key = TokenKey { origin: origin.opposite(), room: room.to_string(), path: path.to_string() };
        if self.tokens.contains(&opposite_key) {
            trace!(?origin, room, path, "write suppressed by opposite-origin token");
            return false;
        }

        let key = TokenKey { origin, room: room.to_string(), path: path.to_string() };
        self.tokens.insert(key.clone());

        let tokens = self.tokens.clone();
        tokio::spawn(async move {
            tokio::time::sleep(TOKEN_TTL).await;
            tokens.remove(&key);
        });

        true
    }

    /// Runs `op` only if a token can be claimed for `(origin, room, path)`.
    /// Returns `None` if the operation was suppressed.
    pub async fn guarded<F, Fut, T>(&self, origin: SyncOrigin, room: &str, path: &str, op: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        if !self.try_claim(origin, room, path) {
            return None;
        }
        Some(op().await)
    }

    #[cfg(test)]
    fn active_count(&self) -> usize {
        self.tokens.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_claim_succeeds_when_no_opposite_token() {
        let arbiter = SyncArbiter::new();
        assert!(arbiter.try_claim(SyncOrigin::Editor, "ABC123", "main.js"));
    }

    #[tokio::test]
    async fn test_opposite_origin_is_suppressed() {
        let arbiter = SyncArbiter::new();
        assert!(arbiter.try_claim(SyncOrigin::Editor, "ABC123", "main.js"));
        assert!(!arbiter.try_claim(SyncOrigin::Terminal, "ABC123", "main.js"));
    }

    #[tokio::test]
    async fn test_same_origin_can_reclaim() {
        let arbiter = SyncArbiter::new();
        assert!(arbiter.try_claim(SyncOrigin::Editor, "ABC123", "main.js"));
        assert!(arbiter.try_claim(SyncOrigin::Editor, "ABC123", "main.js"));
    }

    #[tokio::test]
    async fn test_distinct_paths_are_independent() {
        let arbiter = SyncArbiter::new();
        assert!(arbiter.try_claim(SyncOrigin::Editor, "ABC123", "main.js"));
        assert!(arbiter.try_claim(SyncOrigin::Terminal, "ABC123", "other.js"));
    }

    #[tokio::test]
    async fn test_token_auto_clears_after_ttl() {
        let arbiter = SyncArbiter::new();
        assert!(arbiter.try_claim(SyncOrigin::Editor, "ABC123", "main.js"));
        assert!(!arbiter.try_claim(SyncOrigin::Terminal, "ABC123", "main.js"));

        tokio::time::sleep(TOKEN_TTL + Duration::from_millis(50)).await;

        assert!(arbiter.try_claim(SyncOrigin::Terminal, "ABC123", "main.js"));
        assert_eq!(arbiter.active_count(), 1);
    }

    #[tokio::test]
    async fn test_guarded_runs_op_only_when_claimed() {
        let arbiter = SyncArbiter::new();
        let ran = arbiter
            .guarded(SyncOrigin::Editor, "ABC123", "main.js", || async { 42 })
            .await;
        assert_eq!(ran, Some(42));

        let suppressed = arbiter
            .guarded(SyncOrigin::Terminal, "ABC123", "main.js", || async { 99 })
            .await;
        assert_eq!(suppressed, None);
    }
}
