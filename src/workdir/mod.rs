//! Per-room scratch directory on the OS temp filesystem: `compiler_<ROOMCODE>`.
//!
//! Mirrors the on-disk half of the room's state. Writes are content-diffed so
//! a no-op write never reaches the filesystem — this is what lets the FS
//! watcher (C5) and the Sync Arbiter (C4) guarantee convergence instead of
//! echoing changes back and forth forever.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum WorkingDirectoryError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type WorkingDirectoryResult<T> = Result<T, WorkingDirectoryError>;

fn io_err(path: impl Into<String>, source: std::io::Error) -> WorkingDirectoryError {
    WorkingDirectoryError::Io { path: path.into(), source }
}

/// The on-disk counterpart of a room's file tree.
#[derive(Debug, Clone)]
pub struct WorkingDirectory {
    root: PathBuf,
}

impl WorkingDirectory {
    /// Allocates `compiler_<room_code>` under the OS temp directory.
    pub async fn create(room_code: &str) -> WorkingDirectoryResult<Self> {
        let root = std::env::temp_dir().join(format!("compiler_{room_code}"));
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| io_err(root.to_string_lossy().to_string(), e))?;
        debug!(path = %root.display(), "working directory materialized");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, relative_path: &str) -> PathBuf {
        self.root.join(relative_path.trim_start_matches('/'))
    }

    /// Writes `content` to `path` relative to the root, but only if the
    /// existing on-disk content (if any) differs byte-for-byte. Returns
    /// `true` if a write actually happened.
    pub async fn write_file(&self, path: &str, content: &str) -> WorkingDirectoryResult<bool> {
        let target = self.resolve(path);

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err(parent.to_string_lossy().to_string(), e))?;
        }

        if let Ok(existing) = tokio::fs::read(&target).await {
            if existing == content.as_bytes() {
                return Ok(false);
            }
        }

        tokio::fs::write(&target, content)
            .await
            .map_err(|e| io_err(target.to_string_lossy().to_string(), e))?;
        Ok(true)
    }

    /// Recursive make, idempotent.
    pub async fn create_dir(&self, path: &str) -> WorkingDirectoryResult<()> {
        let target = self.resolve(path);
        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|e| io_err(target.to_string_lossy().to_string(), e))
    }

    /// Recursive for directories, unlink for files. Missing paths are not
    /// an error — the caller may be reconciling state that was already gone.
    pub async fn delete_item(&self, path: &str) -> WorkingDirectoryResult<()> {
        let target = self.resolve(path);

        let meta = match tokio::fs::symlink_metadata(&target).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_err(target.to_string_lossy().to_string(), e)),
        };

        let result = if meta.is_dir() {
            tokio::fs::remove_dir_all(&target).await
        } else {
            tokio::fs::remove_file(&target).await
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(target.to_string_lossy().to_string(), e)),
        }
    }

    /// Ensures the target's parent exists, then performs an atomic rename.
    pub async fn rename(&self, source: &str, target: &str) -> WorkingDirectoryResult<()> {
        let source_path = self.resolve(source);
        let target_path = self.resolve(target);

        if let Some(parent) = target_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err(parent.to_string_lossy().to_string(), e))?;
        }

        tokio::fs::rename(&source_path, &target_path)
            .await
            .map_err(|e| io_err(target_path.to_string_lossy().to_string(), e))
    }

    /// Recursively removes the entire working directory. Called when room
    /// membership drops to zero.
    pub async fn cleanup(&self) -> WorkingDirectoryResult<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(self.root.to_string_lossy().to_string(), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fresh() -> WorkingDirectory {
        let code: String = format!("T{}", uuid::Uuid::new_v4().simple());
        WorkingDirectory::create(&code).await.unwrap()
    }

    #[tokio::test]
    async fn test_write_file_creates_parent_dirs() {
        let wd = fresh().await;
        let wrote = wd.write_file("src/main.js", "x=1\n").await.unwrap();
        assert!(wrote);
        let content = tokio::fs::read_to_string(wd.resolve("src/main.js")).await.unwrap();
        assert_eq!(content, "x=1\n");
        wd.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_file_is_content_diffed() {
        let wd = fresh().await;
        assert!(wd.write_file("main.js", "x=1\n").await.unwrap());
        assert!(!wd.write_file("main.js", "x=1\n").await.unwrap());
        assert!(wd.write_file("main.js", "x=2\n").await.unwrap());
        wd.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_item_missing_is_ok() {
        let wd = fresh().await;
        wd.delete_item("nope.txt").await.unwrap();
        wd.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_item_recursive_for_dirs() {
        let wd = fresh().await;
        wd.write_file("src/lib.js", "x").await.unwrap();
        wd.delete_item("src").await.unwrap();
        assert!(!wd.resolve("src").exists());
        wd.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_rename_moves_file() {
        let wd = fresh().await;
        wd.write_file("old.js", "x").await.unwrap();
        wd.rename("old.js", "new/nested.js").await.unwrap();
        assert!(!wd.resolve("old.js").exists());
        assert_eq!(
            tokio::fs::read_to_string(wd.resolve("new/nested.js")).await.unwrap(),
            "x"
        );
        wd.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_removes_root() {
        let wd = fresh().await;
        wd.write_file("a.js", "x").await.unwrap();
        wd.cleanup().await.unwrap();
        assert!(!wd.root().exists());
    }
}
