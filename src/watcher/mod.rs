//! Per-room filesystem watcher.
//!
//! Mirrors on-disk changes made outside the editor (shell commands, external
//! tools) back into the room. Ignores dot-prefixed entries, never fires for
//! the initial directory enumeration, and debounces writes until the file
//! has been stable for at least [`STABILIZATION_WINDOW`] — editors routinely
//! flush content across more than one write.

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const STABILIZATION_WINDOW: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),
}

/// A filesystem change translated into a room-level mutation, after
/// debouncing and baseline filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    FileAdded { path: String },
    FileChanged { path: String },
    FileRemoved { path: String },
    DirAdded { path: String },
    DirRemoved { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    len: u64,
    modified: Option<SystemTime>,
}

fn fingerprint(path: &Path) -> Option<Fingerprint> {
    let meta = std::fs::metadata(path).ok()?;
    Some(Fingerprint { len: meta.len(), modified: meta.modified().ok() })
}

fn is_dotfile(relative: &str) -> bool {
    relative.split('/').any(|segment| segment.starts_with('.'))
}

/// Owns the `notify` watcher for one room's working directory. Dropping it
/// stops the watch and the background stabilization task.
pub struct RoomWatcher {
    _watcher: RecommendedWatcher,
    _shutdown: tokio::sync::oneshot::Sender<()>,
}

impl RoomWatcher {
    /// Starts watching `root` recursively. `baseline` is the set of
    /// room-relative paths already known to the room at watch-start time —
    /// any "created" event against one of these is the watcher observing
    /// the working directory's initial population, not a real change, and
    /// is suppressed.
    pub fn spawn(root: PathBuf, baseline: HashSet<String>) -> Result<(Self, mpsc::UnboundedReceiver<WatchEvent>), WatcherError> {
        let (raw_tx, raw_rx) = std_mpsc::channel::<Event>();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = raw_tx.send(event);
                }
            },
            Config::default().with_poll_interval(POLL_INTERVAL),
        )?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();

        let root_for_task = root.clone();
        tokio::spawn(async move {
            let mut pending: HashMap<PathBuf, (SystemTime, Option<Fingerprint>)> = HashMap::new();
            let mut known_dirs: HashSet<PathBuf> = HashSet::new();
            let mut seen_baseline = baseline;
            let mut ticker = tokio::time::interval(POLL_INTERVAL);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        while let Ok(event) = raw_rx.try_recv() {
                            let immediate = route_event(&root_for_task, event, &mut pending, &mut known_dirs, &mut seen_baseline);
                            for evt in immediate {
                                if out_tx.send(evt).is_err() {
                                    return;
                                }
                            }
                        }

                        let now = SystemTime::now();
                        let mut stable = Vec::new();
                        pending.retain(|path, (since, fp)| {
                            let elapsed = now.duration_since(*since).unwrap_or_default();
                            if elapsed < STABILIZATION_WINDOW {
                                return true;
                            }
                            let current = fingerprint(path);
                            if current == *fp {
                                stable.push(path.clone());
                                false
                            } else {
                                *fp = current;
                                *since = now;
                                true
                            }
                        });

                        for path in stable {
                            let Ok(relative) = path.strip_prefix(&root_for_task) else { continue };
                            let relative = relative.to_string_lossy().replace('\\', "/");
                            if is_dotfile(&relative) {
                                continue;
                            }
                            let is_new = !seen_baseline.contains(&relative);
                            seen_baseline.insert(relative.clone());
                            let evt = if is_new {
                                WatchEvent::FileAdded { path: relative }
                            } else {
                                WatchEvent::FileChanged { path: relative }
                            };
                            if out_tx.send(evt).is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok((Self { _watcher: watcher, _shutdown: shutdown_tx }, out_rx))
    }
}

fn route_event(
    root: &Path,
    event: Event,
    pending: &mut HashMap<PathBuf, (SystemTime, Option<Fingerprint>)>,
    known_dirs: &mut HashSet<PathBuf>,
    seen_baseline: &mut HashSet<String>,
) -> Vec<WatchEvent> {
    let mut out = Vec::new();

    for path in &event.paths {
        let Ok(relative) = path.strip_prefix(root) else { continue };
        let relative_str = relative.to_string_lossy().replace('\\', "/");
        if relative_str.is_empty() || is_dotfile(&relative_str) {
            continue;
        }

        match event.kind {
            EventKind::Create(_) => {
                if path.is_dir() {
                    let is_new = !known_dirs.contains(path) && !seen_baseline.contains(&relative_str);
                    known_dirs.insert(path.clone());
                    seen_baseline.insert(relative_str.clone());
                    if is_new {
                        out.push(WatchEvent::DirAdded { path: relative_str });
                    }
                } else {
                    pending.insert(path.clone(), (SystemTime::now(), fingerprint(path)));
                }
            }
            EventKind::Modify(_) => {
                if path.is_file() {
                    pending.insert(path.clone(), (SystemTime::now(), fingerprint(path)));
                }
            }
            EventKind::Remove(_) => {
                pending.remove(path);
                seen_baseline.remove(&relative_str);
                if known_dirs.remove(path) {
                    out.push(WatchEvent::DirRemoved { path: relative_str.clone() });
                } else {
                    out.push(WatchEvent::FileRemoved { path: relative_str.clone() });
                }
                debug!(path = %relative_str, "watcher observed remove");
            }
            _ => {}
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_dotfile() {
        assert!(is_dotfile(".git"));
        assert!(is_dotfile("src/.env"));
        assert!(!is_dotfile("src/main.js"));
    }

    #[tokio::test]
    async fn test_file_add_and_change_emit_events() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();

        let (_watcher, mut rx) = RoomWatcher::spawn(root.clone(), HashSet::new()).unwrap();

        tokio::fs::write(root.join("main.js"), "x=1\n").await.unwrap();

        let evt = tokio::time::timeout(Duration::from_secs(3), rx.recv()).await;
        match evt {
            Ok(Some(WatchEvent::FileAdded { path })) => assert_eq!(path, "main.js"),
            other => panic!("expected FileAdded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dotfile_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let (_watcher, mut rx) = RoomWatcher::spawn(root.clone(), HashSet::new()).unwrap();

        tokio::fs::write(root.join(".env"), "SECRET=1\n").await.unwrap();
        tokio::fs::write(root.join("visible.js"), "x\n").await.unwrap();

        let evt = tokio::time::timeout(Duration::from_secs(3), rx.recv()).await.ok().flatten();
        match evt {
            Some(WatchEvent::FileAdded { path }) => assert_eq!(path, "visible.js"),
            other => panic!("expected visible.js FileAdded, got {other:?}"),
        }
    }
}
