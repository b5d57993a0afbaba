//! Persistent room registry: room code → hashed password + creation time.
//!
//! Backed by a single Sled tree. Room codes are six-character upper-case
//! alphanumeric strings; passwords are never stored or returned in plaintext.

mod sled_store;

pub use sled_store::RoomStore;

use serde::{Deserialize, Serialize};

/// Seconds a persisted room record stays valid after creation.
pub const ROOM_TTL_SECONDS: i64 = 86_400;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_LEN: usize = 6;

/// A persisted room record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomRecord {
    pub code: String,
    pub password_hash: String,
    pub created_at: i64,
}

impl RoomRecord {
    pub fn is_expired(&self, now: i64) -> bool {
        now - self.created_at >= ROOM_TTL_SECONDS
    }
}

/// Outcome of an [`RoomStore::authenticate`] call. Deliberately has no
/// variant carrying the stored hash — a caller can never retrieve it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Ok,
    RoomNotFound,
    BadPassword,
}

/// Generates a random six-character upper-case alphanumeric room code.
pub fn generate_room_code() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..CODE_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..CODE_ALPHABET.len());
            CODE_ALPHABET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_room_code_shape() {
        let code = generate_room_code();
        assert_eq!(code.len(), CODE_LEN);
        assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_room_record_expiry() {
        let rec = RoomRecord {
            code: "ABC123".into(),
            password_hash: "x".into(),
            created_at: 1_000,
        };
        assert!(!rec.is_expired(1_000 + ROOM_TTL_SECONDS - 1));
        assert!(rec.is_expired(1_000 + ROOM_TTL_SECONDS));
    }
}
