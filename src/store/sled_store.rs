//! Sled-backed persistence for [`super::RoomRecord`]s.

use sled::{Db, Tree};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::{AuthOutcome, RoomRecord, ROOM_TTL_SECONDS};

#[derive(Error, Debug)]
pub enum RoomStoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("room code already in use: {0}")]
    RoomCodeCollision(String),

    #[error("room not found: {0}")]
    RoomNotFound(String),

    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("room store initialization failed: {0}")]
    InitFailed(String),
}

pub type RoomStoreResult<T> = Result<T, RoomStoreError>;

const TREE_ROOMS: &str = "rooms";
const BCRYPT_COST: u32 = 10;

/// Persisted room-code → password-hash registry.
#[derive(Clone)]
pub struct RoomStore {
    db: Arc<Db>,
    rooms: Tree,
}

impl RoomStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> RoomStoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RoomStoreError::InitFailed(format!("failed to create directory: {e}")))?;
        }

        let db = sled::open(path)?;
        let rooms = db.open_tree(TREE_ROOMS)?;

        Ok(Self { db: Arc::new(db), rooms })
    }

    /// Allocates a fresh room code, hashes `password`, and persists the record.
    /// Retries internally on a code collision a handful of times before
    /// surfacing [`RoomStoreError::RoomCodeCollision`] to the caller.
    pub fn create_room(&self, password: &str) -> RoomStoreResult<String> {
        let hash = bcrypt::hash(password, BCRYPT_COST)?;

        for _ in 0..8 {
            let code = super::generate_room_code();
            match self.try_insert(&code, &hash) {
                Ok(()) => return Ok(code),
                Err(RoomStoreError::RoomCodeCollision(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(RoomStoreError::RoomCodeCollision(
            "exhausted retries allocating a room code".into(),
        ))
    }

    fn try_insert(&self, code: &str, password_hash: &str) -> RoomStoreResult<()> {
        let existing = self.rooms.get(code.as_bytes())?;
        if existing.is_some() {
            return Err(RoomStoreError::RoomCodeCollision(code.to_string()));
        }

        let record = RoomRecord {
            code: code.to_string(),
            password_hash: password_hash.to_string(),
            created_at: chrono::Utc::now().timestamp(),
        };
        let bytes = serde_json::to_vec(&record)?;

        let result = self
            .rooms
            .compare_and_swap(code.as_bytes(), None as Option<&[u8]>, Some(bytes))?;
        match result {
            Ok(()) => Ok(()),
            Err(_) => Err(RoomStoreError::RoomCodeCollision(code.to_string())),
        }
    }

    /// Looks up `code`, lazily treating an expired record as absent (and
    /// removing it). Returns [`AuthOutcome`] — never the stored hash.
    pub fn authenticate(&self, code: &str, password: &str) -> RoomStoreResult<AuthOutcome> {
        let code = code.to_ascii_uppercase();
        let record = match self.load_live(&code)? {
            Some(r) => r,
            None => return Ok(AuthOutcome::RoomNotFound),
        };

        let matches = bcrypt::verify(password, &record.password_hash)?;
        if matches {
            Ok(AuthOutcome::Ok)
        } else {
            Ok(AuthOutcome::BadPassword)
        }
    }

    /// Returns whether `code` currently names a live (non-expired) room,
    /// without touching the password.
    pub fn room_exists(&self, code: &str) -> RoomStoreResult<bool> {
        Ok(self.load_live(&code.to_ascii_uppercase())?.is_some())
    }

    fn load_live(&self, code: &str) -> RoomStoreResult<Option<RoomRecord>> {
        let raw = match self.rooms.get(code.as_bytes())? {
            Some(r) => r,
            None => return Ok(None),
        };
        let record: RoomRecord = serde_json::from_slice(&raw)?;

        if record.is_expired(chrono::Utc::now().timestamp()) {
            debug!(room = %code, "room record past TTL, evicting");
            self.rooms.remove(code.as_bytes())?;
            return Ok(None);
        }

        Ok(Some(record))
    }

    /// Sweeps every record and evicts the ones past TTL. Intended to run on
    /// a periodic background tick alongside lazy per-lookup eviction.
    pub fn sweep_expired(&self) -> RoomStoreResult<usize> {
        let now = chrono::Utc::now().timestamp();
        let mut evicted = 0usize;

        for item in self.rooms.iter() {
            let (key, value) = item?;
            let record: RoomRecord = match serde_json::from_slice(&value) {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "dropping unreadable room record during sweep");
                    self.rooms.remove(&key)?;
                    evicted += 1;
                    continue;
                }
            };
            if record.is_expired(now) {
                self.rooms.remove(&key)?;
                evicted += 1;
            }
        }

        Ok(evicted)
    }

    pub fn flush(&self) -> RoomStoreResult<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Spawns a tokio task that periodically sweeps TTL-expired records.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match self.sweep_expired() {
                    Ok(n) if n > 0 => debug!(evicted = n, "room store sweep evicted expired rooms"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "room store sweep failed"),
                }
            }
        })
    }
}

impl Drop for RoomStore {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_store() -> RoomStore {
        let dir = tempdir().unwrap();
        RoomStore::open(dir.path().join("rooms.sled")).unwrap()
    }

    #[test]
    fn test_create_and_authenticate() {
        let store = test_store();
        let code = store.create_room("hunter2").unwrap();
        assert_eq!(code.len(), 6);

        assert_eq!(store.authenticate(&code, "hunter2").unwrap(), AuthOutcome::Ok);
        assert_eq!(store.authenticate(&code, "wrong").unwrap(), AuthOutcome::BadPassword);
    }

    #[test]
    fn test_authenticate_unknown_room() {
        let store = test_store();
        assert_eq!(
            store.authenticate("ZZZZZZ", "whatever").unwrap(),
            AuthOutcome::RoomNotFound
        );
    }

    #[test]
    fn test_authenticate_is_case_insensitive_on_code() {
        let store = test_store();
        let code = store.create_room("p").unwrap();
        assert_eq!(
            store.authenticate(&code.to_ascii_lowercase(), "p").unwrap(),
            AuthOutcome::Ok
        );
    }

    #[test]
    fn test_expired_room_is_not_found() {
        let store = test_store();
        let code = store.create_room("p").unwrap();

        // Force expiry by rewriting the record with a backdated timestamp.
        let backdated = RoomRecord {
            code: code.clone(),
            password_hash: bcrypt::hash("p", BCRYPT_COST).unwrap(),
            created_at: chrono::Utc::now().timestamp() - ROOM_TTL_SECONDS - 1,
        };
        store
            .rooms
            .insert(code.as_bytes(), serde_json::to_vec(&backdated).unwrap())
            .unwrap();

        assert_eq!(store.authenticate(&code, "p").unwrap(), AuthOutcome::RoomNotFound);
        assert!(!store.room_exists(&code).unwrap());
    }

    #[test]
    fn test_sweep_expired_evicts_stale_records() {
        let store = test_store();
        let code = store.create_room("p").unwrap();
        let backdated = RoomRecord {
            code: code.clone(),
            password_hash: bcrypt::hash("p", BCRYPT_COST).unwrap(),
            created_at: chrono::Utc::now().timestamp() - ROOM_TTL_SECONDS - 1,
        };
        store
            .rooms
            .insert(code.as_bytes(), serde_json::to_vec(&backdated).unwrap())
            .unwrap();

        let evicted = store.sweep_expired().unwrap();
        assert_eq!(evicted, 1);
    }
}
