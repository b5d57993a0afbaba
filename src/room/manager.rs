//! Room Manager: per-room runtime orchestration.
//!
//! Aggregates the File Tree (C2), Working Directory (C3), Sync Arbiter (C4),
//! FS Watcher (C5), PTY Manager (C6), and Room Hub (C7) for one room, and
//! owns the room lifecycle — materialized on first join, torn down when
//! membership drops to zero.

use dashmap::DashMap;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::file_tree::{FileTree, FileTreeError};
use crate::arbiter::{SyncArbiter, SyncOrigin};
use crate::gateway::protocol::{ItemType, ServerEvent};
use crate::hub::RoomHub;
use crate::pty::PtyManager;
use crate::watcher::{RoomWatcher, WatchEvent, WatcherError};
use crate::workdir::{WorkingDirectory, WorkingDirectoryError};

#[derive(Error, Debug)]
pub enum RoomError {
    #[error("room not found: {0}")]
    RoomNotFound(String),

    #[error(transparent)]
    Tree(#[from] FileTreeError),

    #[error(transparent)]
    Workdir(#[from] WorkingDirectoryError),

    #[error(transparent)]
    Watcher(#[from] WatcherError),
}

const DEFAULT_FILE_NAME: &str = "main.js";
const DEFAULT_FILE_CONTENT: &str = "// start typing...\n";

/// Live state for one room.
pub struct RoomRuntime {
    pub code: String,
    pub tree: RwLock<FileTree>,
    pub workdir: WorkingDirectory,
    pub arbiter: SyncArbiter,
    pub hub: Arc<RoomHub>,
    pub pty: Arc<PtyManager>,
    _watcher: RoomWatcher,
}

impl RoomRuntime {
    async fn materialize(code: &str) -> Result<Arc<Self>, RoomError> {
        let workdir = WorkingDirectory::create(code).await?;

        let mut tree = FileTree::with_root(code);
        tree.create_file_at_path(&format!("{code}/{DEFAULT_FILE_NAME}"), DEFAULT_FILE_CONTENT)?;
        workdir.write_file(DEFAULT_FILE_NAME, DEFAULT_FILE_CONTENT).await?;

        let baseline: HashSet<String> = HashSet::from([DEFAULT_FILE_NAME.to_string()]);
        let (watcher, watch_rx) = RoomWatcher::spawn(workdir.root().to_path_buf(), baseline)?;

        let hub = RoomHub::new(code);
        let pty = PtyManager::new(workdir.root().to_path_buf());
        let arbiter = SyncArbiter::new();

        let runtime = Arc::new(Self {
            code: code.to_string(),
            tree: RwLock::new(tree),
            workdir,
            arbiter,
            hub,
            pty,
            _watcher: watcher,
        });

        spawn_watch_consumer(Arc::clone(&runtime), watch_rx);

        info!(room = %code, "room materialized");
        Ok(runtime)
    }

    async fn teardown(&self) {
        self.pty.terminate_all();
        if let Err(e) = self.workdir.cleanup().await {
            warn!(room = %self.code, error = %e, "failed to clean up working directory on teardown");
        }
        info!(room = %self.code, "room torn down");
    }
}

fn spawn_watch_consumer(runtime: Arc<RoomRuntime>, mut rx: tokio::sync::mpsc::UnboundedReceiver<WatchEvent>) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            handle_watch_event(&runtime, event).await;
        }
    });
}

async fn handle_watch_event(runtime: &Arc<RoomRuntime>, event: WatchEvent) {
    let code = runtime.code.clone();

    match event {
        WatchEvent::FileAdded { path } | WatchEvent::FileChanged { path } => {
            let Ok(content) = tokio::fs::read_to_string(runtime.workdir.resolve(&path)).await else {
                return;
            };
            if !runtime.arbiter.try_claim(SyncOrigin::Terminal, &code, &path) {
                return;
            }

            let full_path = format!("{code}/{path}");
            let mut tree = runtime.tree.write().await;
            let exists = tree.path_exists(&full_path);
            let result = if exists {
                tree.set_file_content_at_path(&full_path, content.clone())
            } else {
                tree.create_file_at_path(&full_path, content.clone())
            };
            drop(tree);

            if result.is_ok() {
                runtime.hub.broadcast(
                    serde_json::to_value(ServerEvent::FileSynced { file_name: path, content }).unwrap_or(json!({})),
                );
            }
        }
        WatchEvent::FileRemoved { path } => {
            if !runtime.arbiter.try_claim(SyncOrigin::Terminal, &code, &path) {
                return;
            }
            let full_path = format!("{code}/{path}");
            let mut tree = runtime.tree.write().await;
            if tree.path_exists(&full_path) {
                let _ = tree.delete_item_at_path(&full_path);
            }
            drop(tree);
            runtime.hub.broadcast(
                serde_json::to_value(ServerEvent::ItemDeleted { item_path: path, item_type: ItemType::File })
                    .unwrap_or(json!({})),
            );
        }
        WatchEvent::DirAdded { path } => {
            if !runtime.arbiter.try_claim(SyncOrigin::TerminalFolder, &code, &path) {
                return;
            }
            let full_path = format!("{code}/{path}");
            let mut tree = runtime.tree.write().await;
            let _ = tree.create_folder_at_path(&full_path);
            drop(tree);
            runtime
                .hub
                .broadcast(serde_json::to_value(ServerEvent::FolderCreated { folder_path: path }).unwrap_or(json!({})));
        }
        WatchEvent::DirRemoved { path } => {
            if !runtime.arbiter.try_claim(SyncOrigin::TerminalFolder, &code, &path) {
                return;
            }
            let full_path = format!("{code}/{path}");
            let mut tree = runtime.tree.write().await;
            if tree.path_exists(&full_path) {
                let _ = tree.delete_item_at_path(&full_path);
            }
            drop(tree);
            runtime.hub.broadcast(
                serde_json::to_value(ServerEvent::ItemDeleted { item_path: path, item_type: ItemType::Folder })
                    .unwrap_or(json!({})),
            );
        }
    }
}

/// Registry of live room runtimes, keyed by room code.
pub struct RoomManager {
    rooms: DashMap<String, Arc<RoomRuntime>>,
}

impl RoomManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { rooms: DashMap::new() })
    }

    pub fn get(&self, code: &str) -> Option<Arc<RoomRuntime>> {
        self.rooms.get(code).map(|r| Arc::clone(&r))
    }

    /// Returns the room's runtime, materializing it on first access.
    pub async fn get_or_materialize(&self, code: &str) -> Result<Arc<RoomRuntime>, RoomError> {
        if let Some(existing) = self.get(code) {
            return Ok(existing);
        }

        let runtime = RoomRuntime::materialize(code).await?;
        self.rooms.insert(code.to_string(), Arc::clone(&runtime));
        Ok(runtime)
    }

    /// Called after a member leaves. If the room is now empty, tears it
    /// down and removes it from the registry.
    pub async fn handle_member_left(&self, code: &str) {
        let Some(runtime) = self.get(code) else { return };
        if runtime.hub.member_count() > 0 {
            return;
        }

        self.rooms.remove(code);
        runtime.teardown().await;
    }

    pub fn active_room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn active_peer_count(&self) -> usize {
        self.rooms.iter().map(|r| r.hub.member_count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_materialize_creates_default_file() {
        let code = format!("T{}", uuid::Uuid::new_v4().simple());
        let runtime = RoomRuntime::materialize(&code).await.unwrap();

        let tree = runtime.tree.read().await;
        assert!(tree.path_exists(&format!("{code}/{DEFAULT_FILE_NAME}")));
        drop(tree);

        let on_disk = tokio::fs::read_to_string(runtime.workdir.resolve(DEFAULT_FILE_NAME)).await.unwrap();
        assert_eq!(on_disk, DEFAULT_FILE_CONTENT);

        runtime.teardown().await;
    }

    #[tokio::test]
    async fn test_room_manager_get_or_materialize_is_idempotent() {
        let manager = RoomManager::new();
        let code = format!("T{}", uuid::Uuid::new_v4().simple());

        let a = manager.get_or_materialize(&code).await.unwrap();
        let b = manager.get_or_materialize(&code).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        a.teardown().await;
    }

    #[tokio::test]
    async fn test_handle_member_left_tears_down_when_empty() {
        let manager = RoomManager::new();
        let code = format!("T{}", uuid::Uuid::new_v4().simple());
        let runtime = manager.get_or_materialize(&code).await.unwrap();
        assert_eq!(runtime.hub.member_count(), 0);

        manager.handle_member_left(&code).await;
        assert!(manager.get(&code).is_none());
    }
}
