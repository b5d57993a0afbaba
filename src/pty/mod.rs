//! Per-user pseudo-terminal shells.
//!
//! Exactly one shell is spawned per user joined to a room, pinned to the
//! room's working directory. Output bytes are forwarded only to that user's
//! private channel — never broadcast to the room.

use parking_lot::Mutex;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const RESPAWN_DELAY: Duration = Duration::from_secs(1);
const INITIAL_COLS: u16 = 80;
const INITIAL_ROWS: u16 = 30;

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("failed to allocate pty: {0}")]
    Allocate(#[source] anyhow::Error),

    #[error("failed to spawn shell: {0}")]
    Spawn(#[source] anyhow::Error),

    #[error("no session for user {0}")]
    NoSession(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PtyResult<T> = Result<T, PtyError>;

/// Output delivered to a single user's private channel.
#[derive(Debug, Clone)]
pub enum PtyOutput {
    Bytes(Vec<u8>),
    /// The shell exited; a red banner should be shown and a respawn is
    /// already scheduled.
    Ended,
}

fn default_shell() -> (String, Vec<String>) {
    if cfg!(windows) {
        ("powershell.exe".to_string(), Vec::new())
    } else {
        (std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string()), Vec::new())
    }
}

struct Session {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
}

/// Owns every user's shell for one room.
pub struct PtyManager {
    working_dir: PathBuf,
    sessions: Mutex<HashMap<String, Session>>,
}

impl PtyManager {
    pub fn new(working_dir: PathBuf) -> Arc<Self> {
        Arc::new(Self { working_dir, sessions: Mutex::new(HashMap::new()) })
    }

    /// Spawns a shell for `user_id` if one is not already running. Output is
    /// streamed to `output_tx`. `still_member` is consulted before a
    /// post-exit respawn — if the user has since left, no new shell starts.
    pub fn spawn_shell(
        self: &Arc<Self>,
        user_id: &str,
        output_tx: mpsc::UnboundedSender<PtyOutput>,
        still_member: Arc<dyn Fn(&str) -> bool + Send + Sync>,
    ) -> PtyResult<()> {
        if self.sessions.lock().contains_key(user_id) {
            return Ok(());
        }
        self.spawn_inner(user_id, output_tx, still_member)
    }

    fn spawn_inner(
        self: &Arc<Self>,
        user_id: &str,
        output_tx: mpsc::UnboundedSender<PtyOutput>,
        still_member: Arc<dyn Fn(&str) -> bool + Send + Sync>,
    ) -> PtyResult<()> {
        let pty_system = native_pty_system();
        let size = PtySize { rows: INITIAL_ROWS, cols: INITIAL_COLS, pixel_width: 0, pixel_height: 0 };
        let pair = pty_system.openpty(size).map_err(|e| PtyError::Allocate(e.into()))?;

        let (program, args) = default_shell();
        let mut builder = CommandBuilder::new(program);
        for arg in &args {
            builder.arg(arg);
        }
        builder.cwd(&self.working_dir);
        builder.env("TERM", "xterm-256color");
        builder.env("COLORTERM", "truecolor");
        builder.env("FORCE_COLOR", "1");

        let child = pair.slave.spawn_command(builder).map_err(|e| PtyError::Spawn(e.into()))?;
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Allocate(e.into()))?;
        let writer = pair.master.take_writer().map_err(|e| PtyError::Allocate(e.into()))?;

        self.sessions.lock().insert(
            user_id.to_string(),
            Session { master: pair.master, writer, child },
        );

        let manager = Arc::clone(self);
        let user_id_owned = user_id.to_string();
        let reader_tx = output_tx.clone();
        let runtime_handle = tokio::runtime::Handle::current();

        std::thread::spawn(move || {
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if reader_tx.send(PtyOutput::Bytes(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!(user = %user_id_owned, error = %e, "pty reader error");
                        break;
                    }
                }
            }

            manager.sessions.lock().remove(&user_id_owned);
            let _ = output_tx.send(PtyOutput::Ended);
            debug!(user = %user_id_owned, "shell exited, scheduling respawn");

            let manager_for_respawn = Arc::clone(&manager);
            let user_for_respawn = user_id_owned.clone();
            runtime_handle.spawn(async move {
                tokio::time::sleep(RESPAWN_DELAY).await;
                if !still_member(&user_for_respawn) {
                    return;
                }
                if let Err(e) = manager_for_respawn.spawn_inner(&user_for_respawn, output_tx, still_member) {
                    warn!(user = %user_for_respawn, error = %e, "failed to respawn shell");
                }
            });
        });

        Ok(())
    }

    /// Writes raw input bytes straight to the shell.
    pub fn send_input(&self, user_id: &str, data: &[u8]) -> PtyResult<()> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(user_id).ok_or_else(|| PtyError::NoSession(user_id.to_string()))?;
        session.writer.write_all(data)?;
        session.writer.flush()?;
        Ok(())
    }

    /// Writes `command_line` followed by a carriage return.
    pub fn execute_command(&self, user_id: &str, command_line: &str) -> PtyResult<()> {
        let mut line = command_line.as_bytes().to_vec();
        line.push(b'\r');
        self.send_input(user_id, &line)
    }

    /// Sends SIGINT via the controlling terminal (a single 0x03 byte).
    pub fn send_interrupt(&self, user_id: &str) -> PtyResult<()> {
        self.send_input(user_id, &[0x03])
    }

    /// Resizes the shell's pty; transient resize failures are swallowed.
    pub fn resize(&self, user_id: &str, cols: u16, rows: u16) -> PtyResult<()> {
        let sessions = self.sessions.lock();
        let session = sessions.get(user_id).ok_or_else(|| PtyError::NoSession(user_id.to_string()))?;
        let size = PtySize { rows, cols, pixel_width: 0, pixel_height: 0 };
        if let Err(e) = session.master.resize(size) {
            debug!(user = %user_id, error = %e, "transient pty resize failure, ignoring");
        }
        Ok(())
    }

    /// Kills a user's shell outright (e.g. on disconnect); does not schedule
    /// a respawn — the reader thread's exit path checks `still_member`
    /// before respawning, and the caller is expected to have already
    /// removed the user from the room before calling this.
    pub fn kill(&self, user_id: &str) {
        let mut sessions = self.sessions.lock();
        if let Some(mut session) = sessions.remove(user_id) {
            let _ = session.child.kill();
        }
    }

    pub fn has_session(&self, user_id: &str) -> bool {
        self.sessions.lock().contains_key(user_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Kills every session in this room. Used on room teardown.
    pub fn terminate_all(&self) {
        let ids: Vec<String> = self.sessions.lock().keys().cloned().collect();
        for id in ids {
            self.kill(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_and_send_input_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PtyManager::new(dir.path().to_path_buf());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let still_member: Arc<dyn Fn(&str) -> bool + Send + Sync> = Arc::new(|_| true);

        manager.spawn_shell("alice", tx, still_member).unwrap();
        assert!(manager.has_session("alice"));

        manager.execute_command("alice", "echo hi").unwrap();

        let output = tokio::time::timeout(Duration::from_secs(3), rx.recv()).await;
        assert!(output.is_ok());
    }

    #[tokio::test]
    async fn test_send_input_unknown_user_errors() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PtyManager::new(dir.path().to_path_buf());
        let err = manager.send_interrupt("ghost").unwrap_err();
        assert!(matches!(err, PtyError::NoSession(_)));
    }

    #[tokio::test]
    async fn test_kill_removes_session() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PtyManager::new(dir.path().to_path_buf());
        let (tx, _rx) = mpsc::unbounded_channel();
        let still_member: Arc<dyn Fn(&str) -> bool + Send + Sync> = Arc::new(|_| true);
        manager.spawn_shell("bob", tx, still_member).unwrap();

        manager.kill("bob");
        assert!(!manager.has_session("bob"));
    }
}
