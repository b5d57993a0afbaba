//! Session Gateway: the WebSocket upgrade endpoint and event dispatcher.
//!
//! One task pair per connection — a send task draining a private relay
//! channel into the socket, and an inline receive loop parsing frames and
//! dispatching them — mirroring the split-socket relay pattern used
//! throughout this codebase for other duplex protocols. Every mutation is
//! routed through the Tree (C2), its disk effects applied through the
//! Working Directory (C3) gated by the Sync Arbiter (C4), then fanned out
//! via the Room Hub (C7).

pub mod protocol;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::pty::PtyOutput;
use crate::room::file_tree::DiskEffect;
use crate::room::manager::RoomRuntime;
use crate::room::RoomManager;
use crate::rundispatch;
use crate::store::{AuthOutcome, RoomStore};

use protocol::{AckReply, ClientEnvelope, ClientEvent, ItemType, ServerEvent};

/// Shared handles the gateway needs to serve every connection.
#[derive(Clone)]
pub struct GatewayState {
    pub rooms: Arc<RoomManager>,
    pub store: Arc<RoomStore>,
}

struct ConnectionState {
    user_id: String,
    username: Option<String>,
    room_code: Option<String>,
}

impl ConnectionState {
    fn new() -> Self {
        Self { user_id: Uuid::new_v4().to_string(), username: None, room_code: None }
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, Arc::new(state)))
}

async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (relay_tx, mut relay_rx) = mpsc::unbounded_channel::<serde_json::Value>();

    let mut send_task = tokio::spawn(async move {
        while let Some(value) = relay_rx.recv().await {
            let Ok(text) = serde_json::to_string(&value) else { continue };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut conn = ConnectionState::new();
    let mut broadcast_task: Option<tokio::task::JoinHandle<()>> = None;

    let recv_loop = async {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            let text = match msg {
                Message::Text(t) => t,
                Message::Close(_) => break,
                _ => continue,
            };

            let envelope: ClientEnvelope = match serde_json::from_str(&text) {
                Ok(e) => e,
                Err(e) => {
                    debug!(error = %e, "failed to parse client frame");
                    continue;
                }
            };

            handle_envelope(&state, &mut conn, envelope, &relay_tx, &mut broadcast_task).await;
        }
    };
    tokio::pin!(recv_loop);

    tokio::select! {
        _ = &mut send_task => {}
        _ = &mut recv_loop => {}
    }

    send_task.abort();
    if let Some(task) = broadcast_task {
        task.abort();
    }
    cleanup_connection(&state, &conn).await;
}

async fn cleanup_connection(state: &GatewayState, conn: &ConnectionState) {
    let Some(code) = &conn.room_code else { return };
    let Some(runtime) = state.rooms.get(code) else { return };

    runtime.pty.kill(&conn.user_id);
    runtime.hub.leave(&conn.user_id);

    if let Some(username) = &conn.username {
        runtime.hub.broadcast(to_value(ServerEvent::UserLeft {
            username: username.clone(),
            user_id: conn.user_id.clone(),
        }));
    }

    state.rooms.handle_member_left(code).await;
    info!(room = %code, user = %conn.user_id, "connection closed");
}

fn to_value(event: ServerEvent) -> serde_json::Value {
    serde_json::to_value(event).unwrap_or_else(|_| json!({}))
}

/// Subscribes to the room's broadcast channel and forwards every message
/// into this connection's private relay, so the send task has a single
/// stream to drain regardless of whether a message was room-wide or
/// addressed only to this user.
fn spawn_broadcast_forward(
    mut rx: broadcast::Receiver<serde_json::Value>,
    relay_tx: mpsc::UnboundedSender<serde_json::Value>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(value) => {
                    if relay_tx.send(value).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Forwards a user's PTY output onto their private relay as `terminal-output`.
fn spawn_pty_forward(
    user_id: String,
    relay_tx: mpsc::UnboundedSender<serde_json::Value>,
    mut pty_rx: mpsc::UnboundedReceiver<PtyOutput>,
) {
    tokio::spawn(async move {
        while let Some(output) = pty_rx.recv().await {
            let text = match output {
                PtyOutput::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                PtyOutput::Ended => "\r\n\x1b[31m[shell exited, restarting...]\x1b[0m\r\n".to_string(),
            };
            if relay_tx.send(to_value(ServerEvent::TerminalOutput(text))).is_err() {
                debug!(user = %user_id, "dropping pty output, connection gone");
                break;
            }
        }
    });
}

async fn handle_envelope(
    state: &GatewayState,
    conn: &mut ConnectionState,
    envelope: ClientEnvelope,
    relay_tx: &mpsc::UnboundedSender<serde_json::Value>,
    broadcast_task: &mut Option<tokio::task::JoinHandle<()>>,
) {
    let ack_id = envelope.ack_id;
    let outcome = dispatch(state, conn, envelope.event, relay_tx, broadcast_task).await;

    let Some(ack_id) = ack_id else {
        if let Err(message) = outcome {
            let _ = relay_tx.send(to_value(ServerEvent::FileError { message }));
        }
        return;
    };

    let data = match outcome {
        Ok(Some(data)) => data,
        Ok(None) => json!({ "success": true }),
        Err(message) => json!({ "success": false, "error": message }),
    };
    let reply = AckReply { ack_id, data };
    let _ = relay_tx.send(serde_json::to_value(reply).unwrap_or_else(|_| json!({})));
}

fn full_path(room_code: &str, relative: &str) -> String {
    format!("{room_code}/{}", relative.trim_start_matches('/'))
}

fn strip_room_prefix<'a>(room_code: &str, path: &'a str) -> &'a str {
    path.strip_prefix(room_code).unwrap_or(path).trim_start_matches('/')
}

async fn authorized_room(state: &GatewayState, conn: &ConnectionState, room_code: &str) -> Result<Arc<RoomRuntime>, String> {
    let runtime = state.rooms.get(room_code).ok_or_else(|| "room not found".to_string())?;
    if !runtime.hub.is_member(&conn.user_id) {
        return Err("not a member of this room".to_string());
    }
    Ok(runtime)
}

/// Applies a mutation's disk side effects through the Working Directory,
/// gated by the Sync Arbiter so the FS watcher doesn't echo these writes
/// back as shell-originated changes.
async fn apply_disk_effects(runtime: &RoomRuntime, effects: &[DiskEffect]) {
    use crate::arbiter::SyncOrigin;

    for effect in effects {
        match effect {
            DiskEffect::WriteFile { path, content } => {
                let rel = strip_room_prefix(&runtime.code, path);
                if runtime.arbiter.try_claim(SyncOrigin::Editor, &runtime.code, rel) {
                    if let Err(e) = runtime.workdir.write_file(rel, content).await {
                        warn!(room = %runtime.code, path = rel, error = %e, "failed to write file to working directory");
                    }
                }
            }
            DiskEffect::CreateDir { path } => {
                let rel = strip_room_prefix(&runtime.code, path);
                if runtime.arbiter.try_claim(SyncOrigin::EditorFolder, &runtime.code, rel) {
                    if let Err(e) = runtime.workdir.create_dir(rel).await {
                        warn!(room = %runtime.code, path = rel, error = %e, "failed to create directory");
                    }
                }
            }
            DiskEffect::Delete { path, is_dir } => {
                let rel = strip_room_prefix(&runtime.code, path);
                let origin = if *is_dir { SyncOrigin::EditorFolder } else { SyncOrigin::Editor };
                if runtime.arbiter.try_claim(origin, &runtime.code, rel) {
                    if let Err(e) = runtime.workdir.delete_item(rel).await {
                        warn!(room = %runtime.code, path = rel, error = %e, "failed to delete path");
                    }
                }
            }
            DiskEffect::Rename { from, to, is_dir } => {
                let rel_from = strip_room_prefix(&runtime.code, from).to_string();
                let rel_to = strip_room_prefix(&runtime.code, to).to_string();
                let origin = if *is_dir { SyncOrigin::EditorFolder } else { SyncOrigin::Editor };
                if runtime.arbiter.try_claim(origin, &runtime.code, &rel_to) {
                    if let Err(e) = runtime.workdir.rename(&rel_from, &rel_to).await {
                        warn!(room = %runtime.code, from = %rel_from, to = %rel_to, error = %e, "failed to rename path");
                    }
                }
            }
        }
    }
}

/// Broadcasts a fresh `files-update` snapshot to the whole room.
async fn broadcast_files_update(runtime: &RoomRuntime) {
    let files = runtime.tree.read().await.snapshot();
    runtime.hub.broadcast(to_value(ServerEvent::FilesUpdate { files }));
}

/// After a rename/move, any member whose active file tracked the old path
/// is retargeted and notified privately.
async fn retarget_active_file(runtime: &RoomRuntime, old_path: &str, new_path: &str) {
    for member in runtime.hub.members() {
        let Some(active) = &member.active_file else { continue };
        let retargeted = if active == old_path {
            Some(new_path.to_string())
        } else if let Some(rest) = active.strip_prefix(&format!("{old_path}/")) {
            Some(format!("{new_path}/{rest}"))
        } else {
            None
        };

        if let Some(new_active) = retargeted {
            let _ = runtime.hub.set_active_file(&member.user_id, Some(new_active.clone()));
            let _ = runtime
                .hub
                .send_to(&member.user_id, to_value(ServerEvent::ActiveFileChanged { file_name: new_active }));
        }
    }
}

async fn dispatch(
    state: &GatewayState,
    conn: &mut ConnectionState,
    event: ClientEvent,
    relay_tx: &mpsc::UnboundedSender<serde_json::Value>,
    broadcast_task: &mut Option<tokio::task::JoinHandle<()>>,
) -> Result<Option<serde_json::Value>, String> {
    match event {
        ClientEvent::CreateRoom { username, password } => {
            let room_code = state.store.create_room(&password).map_err(|e| e.to_string())?;
            let runtime = state.rooms.get_or_materialize(&room_code).await.map_err(|e| e.to_string())?;

            join_room_connection(state, conn, &runtime, username, relay_tx, broadcast_task).await?;
            runtime.hub.broadcast(to_value(ServerEvent::RoomCreated { room_code: room_code.clone() }));

            Ok(Some(json!({ "success": true, "roomCode": room_code })))
        }

        ClientEvent::JoinRoom { username, room_code, password } => {
            match state.store.authenticate(&room_code, &password).map_err(|e| e.to_string())? {
                AuthOutcome::RoomNotFound => return Err("room not found".to_string()),
                AuthOutcome::BadPassword => return Err("incorrect password".to_string()),
                AuthOutcome::Ok => {}
            }

            let runtime = state.rooms.get_or_materialize(&room_code).await.map_err(|e| e.to_string())?;
            join_room_connection(state, conn, &runtime, username.clone(), relay_tx, broadcast_task).await?;

            let active_file = runtime.tree.read().await.first_file_path();
            if let Some(file) = &active_file {
                let _ = runtime.hub.set_active_file(&conn.user_id, Some(file.clone()));
            }

            runtime
                .hub
                .broadcast(to_value(ServerEvent::UserJoined { username, user_id: conn.user_id.clone() }));

            let files = runtime.tree.read().await.snapshot();
            Ok(Some(json!({ "success": true, "files": files, "activeFile": active_file })))
        }

        ClientEvent::GetFiles { room_code } => {
            let runtime = authorized_room(state, conn, &room_code).await?;
            let files = runtime.tree.read().await.snapshot();
            Ok(Some(json!({ "files": files })))
        }

        ClientEvent::GetFileContent { room_code, file_name } => {
            let runtime = authorized_room(state, conn, &room_code).await?;
            let tree = runtime.tree.read().await;
            let node = tree
                .get_by_path(&full_path(&room_code, &file_name))
                .ok_or_else(|| format!("no such file: {file_name}"))?;
            Ok(Some(json!({ "content": node.content })))
        }

        ClientEvent::SwitchFile { room_code, file_name } => {
            let runtime = authorized_room(state, conn, &room_code).await?;
            let content = {
                let tree = runtime.tree.read().await;
                tree.get_by_path(&full_path(&room_code, &file_name)).map(|n| n.content.clone())
            };
            runtime
                .hub
                .set_active_file(&conn.user_id, Some(file_name.clone()))
                .map_err(|e| e.to_string())?;
            if let Some(content) = content {
                let _ = relay_tx.send(to_value(ServerEvent::FileContentUpdate { file_name, content }));
            }
            Ok(None)
        }

        ClientEvent::CodeChange { room_code, code, file_name } => {
            let runtime = authorized_room(state, conn, &room_code).await?;
            let path = full_path(&room_code, &file_name);
            let mutation = {
                let mut tree = runtime.tree.write().await;
                tree.set_file_content_at_path(&path, code)
            }
            .map_err(|e| e.to_string())?;

            apply_disk_effects(&runtime, &mutation.disk_effects).await;
            broadcast_files_update(&runtime).await;
            Ok(None)
        }

        ClientEvent::CreateFile { room_code, file_name, parent_folder } => {
            let runtime = authorized_room(state, conn, &room_code).await?;
            let relative = join_relative(parent_folder.as_deref(), &file_name);
            let path = full_path(&room_code, &relative);
            let default_content =
                crate::room::file_tree::default_content_for_extension(extension_of(&file_name));

            let mutation = {
                let mut tree = runtime.tree.write().await;
                tree.create_file_at_path(&path, default_content)
            }
            .map_err(|e| e.to_string())?;

            apply_disk_effects(&runtime, &mutation.disk_effects).await;
            runtime.hub.broadcast(to_value(ServerEvent::FileCreated { file_name: relative }));
            broadcast_files_update(&runtime).await;
            Ok(None)
        }

        ClientEvent::CreateFolder { room_code, folder_name, parent_folder } => {
            let runtime = authorized_room(state, conn, &room_code).await?;
            let relative = join_relative(parent_folder.as_deref(), &folder_name);
            let path = full_path(&room_code, &relative);

            let mutation = {
                let mut tree = runtime.tree.write().await;
                tree.create_folder_at_path(&path)
            }
            .map_err(|e| e.to_string())?;

            apply_disk_effects(&runtime, &mutation.disk_effects).await;
            runtime.hub.broadcast(to_value(ServerEvent::FolderCreated { folder_path: relative }));
            broadcast_files_update(&runtime).await;
            Ok(None)
        }

        ClientEvent::DeleteItem { room_code, item_path } => {
            let runtime = authorized_room(state, conn, &room_code).await?;
            let path = full_path(&room_code, &item_path);
            let (mutation, is_dir) = {
                let mut tree = runtime.tree.write().await;
                let is_dir = tree.get_by_path(&path).map(|n| n.is_directory()).unwrap_or(false);
                (tree.delete_item_at_path(&path).map_err(|e| e.to_string())?, is_dir)
            };

            apply_disk_effects(&runtime, &mutation.disk_effects).await;
            let item_type = if is_dir { ItemType::Folder } else { ItemType::File };
            runtime.hub.broadcast(to_value(ServerEvent::ItemDeleted { item_path, item_type }));
            broadcast_files_update(&runtime).await;
            Ok(None)
        }

        ClientEvent::RenameItem { room_code, old_path, new_path } => {
            let runtime = authorized_room(state, conn, &room_code).await?;
            let full_old = full_path(&room_code, &old_path);
            let full_new = full_path(&room_code, &new_path);
            let (mutation, is_dir) = {
                let mut tree = runtime.tree.write().await;
                let is_dir = tree.get_by_path(&full_old).map(|n| n.is_directory()).unwrap_or(false);
                (tree.rename_item_at_path(&full_old, &full_new).map_err(|e| e.to_string())?, is_dir)
            };

            apply_disk_effects(&runtime, &mutation.disk_effects).await;
            retarget_active_file(&runtime, &old_path, &new_path).await;
            let item_type = if is_dir { ItemType::Folder } else { ItemType::File };
            runtime
                .hub
                .broadcast(to_value(ServerEvent::ItemRenamed { old_path, new_path, item_type }));
            broadcast_files_update(&runtime).await;
            Ok(None)
        }

        ClientEvent::MoveItem { room_code, source_path, target_path, item_type } => {
            let runtime = authorized_room(state, conn, &room_code).await?;
            let full_source = full_path(&room_code, &source_path);
            let full_target = full_path(&room_code, &target_path);
            let is_folder = item_type == ItemType::Folder;

            let mutation = {
                let mut tree = runtime.tree.write().await;
                tree.move_item_at_path(&full_source, &full_target, is_folder)
            }
            .map_err(|e| e.to_string())?;

            apply_disk_effects(&runtime, &mutation.disk_effects).await;
            if let Some((_, full_new)) = mutation.renamed_paths.last() {
                let new_relative = strip_room_prefix(&room_code, full_new).to_string();
                retarget_active_file(&runtime, &source_path, &new_relative).await;
            }
            runtime
                .hub
                .broadcast(to_value(ServerEvent::ItemMoved { source_path, target_path, item_type }));
            broadcast_files_update(&runtime).await;
            Ok(None)
        }

        ClientEvent::ToggleFolder { room_code, folder_path } => {
            let runtime = authorized_room(state, conn, &room_code).await?;
            let path = full_path(&room_code, &folder_path);
            let is_expanded = {
                let mut tree = runtime.tree.write().await;
                tree.toggle_folder_at_path(&path)
            }
            .map_err(|e| e.to_string())?;

            runtime
                .hub
                .broadcast(to_value(ServerEvent::FolderToggled { folder_path, is_expanded }));
            Ok(None)
        }

        ClientEvent::TerminalInit { room_code } => {
            let runtime = authorized_room(state, conn, &room_code).await?;
            ensure_pty(&runtime, conn, relay_tx);
            Ok(None)
        }

        ClientEvent::TerminalInput { room_code, input } => {
            let runtime = authorized_room(state, conn, &room_code).await?;
            runtime.pty.send_input(&conn.user_id, input.as_bytes()).map_err(|e| e.to_string())?;
            Ok(None)
        }

        ClientEvent::TerminalResize { room_code, cols, rows } => {
            let runtime = authorized_room(state, conn, &room_code).await?;
            runtime.pty.resize(&conn.user_id, cols, rows).map_err(|e| e.to_string())?;
            Ok(None)
        }

        ClientEvent::ExecuteCommand { room_code, command } => {
            let runtime = authorized_room(state, conn, &room_code).await?;
            runtime.pty.execute_command(&conn.user_id, &command).map_err(|e| e.to_string())?;
            Ok(None)
        }

        ClientEvent::ClearTerminal { room_code } => {
            let runtime = authorized_room(state, conn, &room_code).await?;
            runtime.pty.execute_command(&conn.user_id, "clear").map_err(|e| e.to_string())?;
            Ok(None)
        }

        ClientEvent::KillProcess { room_code } => {
            let runtime = authorized_room(state, conn, &room_code).await?;
            runtime.pty.send_interrupt(&conn.user_id).map_err(|e| e.to_string())?;
            Ok(None)
        }

        ClientEvent::RunFile { room_code, file_name } => {
            let runtime = authorized_room(state, conn, &room_code).await?;
            flush_and_run(&runtime, conn, &room_code, &file_name).await
        }

        ClientEvent::SaveAndRun { room_code, file_name } => {
            let runtime = authorized_room(state, conn, &room_code).await?;
            let target = match file_name {
                Some(name) => name,
                None => runtime
                    .hub
                    .members()
                    .into_iter()
                    .find(|m| m.user_id == conn.user_id)
                    .and_then(|m| m.active_file)
                    .ok_or_else(|| "no active file to run".to_string())?,
            };
            flush_and_run(&runtime, conn, &room_code, &target).await
        }

        ClientEvent::GetWorkingDirectory { room_code } => {
            let runtime = authorized_room(state, conn, &room_code).await?;
            Ok(Some(json!({ "workingDirectory": runtime.workdir.root().display().to_string() })))
        }
    }
}

fn join_relative(parent: Option<&str>, leaf: &str) -> String {
    match parent {
        Some(p) if !p.is_empty() => format!("{}/{leaf}", p.trim_end_matches('/')),
        _ => leaf.to_string(),
    }
}

fn extension_of(file_name: &str) -> &str {
    file_name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("")
}

/// Flushes the file's current in-memory content to disk, then asks the Run
/// Dispatcher (C9) for the command and hands it to the PTY.
async fn flush_and_run(
    runtime: &RoomRuntime,
    conn: &ConnectionState,
    room_code: &str,
    file_name: &str,
) -> Result<Option<serde_json::Value>, String> {
    let path = full_path(room_code, file_name);
    let content = runtime
        .tree
        .read()
        .await
        .get_by_path(&path)
        .map(|n| n.content.clone())
        .ok_or_else(|| format!("no such file: {file_name}"))?;

    runtime
        .workdir
        .write_file(file_name, &content)
        .await
        .map_err(|e| e.to_string())?;

    let command = rundispatch::command_for(file_name).map_err(|e| e.to_string())?;
    runtime.pty.execute_command(&conn.user_id, &command).map_err(|e| e.to_string())?;
    Ok(None)
}

fn ensure_pty(runtime: &Arc<RoomRuntime>, conn: &ConnectionState, relay_tx: &mpsc::UnboundedSender<serde_json::Value>) {
    if runtime.pty.has_session(&conn.user_id) {
        return;
    }
    let (pty_tx, pty_rx) = mpsc::unbounded_channel();
    let hub_for_check = Arc::clone(&runtime.hub);
    let still_member: Arc<dyn Fn(&str) -> bool + Send + Sync> = Arc::new(move |id| hub_for_check.is_member(id));

    if let Err(e) = runtime.pty.spawn_shell(&conn.user_id, pty_tx, still_member) {
        warn!(user = %conn.user_id, error = %e, "failed to spawn shell");
        return;
    }
    spawn_pty_forward(conn.user_id.clone(), relay_tx.clone(), pty_rx);
}

/// Common join-time wiring shared by `create-room` and `join-room`: records
/// the connection's identity, joins the Hub, subscribes to room broadcasts,
/// and spawns the user's shell.
async fn join_room_connection(
    state: &GatewayState,
    conn: &mut ConnectionState,
    runtime: &Arc<RoomRuntime>,
    username: String,
    relay_tx: &mpsc::UnboundedSender<serde_json::Value>,
    broadcast_task: &mut Option<tokio::task::JoinHandle<()>>,
) -> Result<(), String> {
    let _ = state;
    conn.username = Some(username.clone());
    conn.room_code = Some(runtime.code.clone());

    runtime.hub.join(&conn.user_id, &username, relay_tx.clone());
    *broadcast_task = Some(spawn_broadcast_forward(runtime.hub.subscribe(), relay_tx.clone()));
    ensure_pty(runtime, conn, relay_tx);

    info!(room = %runtime.code, user = %conn.user_id, username = %username, "joined room");
    Ok(())
}
