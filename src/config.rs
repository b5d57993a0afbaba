//! Typed runtime configuration, loaded from the environment (optionally via
//! a `.env` file).

use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub room_store_path: String,
    pub room_ttl_seconds: i64,
}

impl Config {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = std::env::var("PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(4000);
        let bind_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 4000)));

        let room_store_path = std::env::var("ROOM_STORE_PATH").unwrap_or_else(|_| "./data/rooms.sled".to_string());

        let room_ttl_seconds = std::env::var("ROOM_TTL_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(crate::store::ROOM_TTL_SECONDS);

        Self { bind_addr, room_store_path, room_ttl_seconds }
    }
}
