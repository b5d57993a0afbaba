//! Named-JSON-event wire protocol.
//!
//! Every client→server frame names an event and carries a payload shaped by
//! that name, with an optional `ackId` used for the reply-callback
//! convention: if present, the server's reply carries the same `ackId`
//! alongside the ack payload so the client can correlate it to the request
//! that triggered it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::room::file_tree::FileSnapshotEntry;

/// One inbound frame: `{ event, data, ackId? }`. `event` + `data` are
/// parsed together as an internally-tagged [`ClientEvent`] via `flatten`,
/// so this struct doubles as the wire-level envelope and the typed union.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientEnvelope {
    #[serde(flatten)]
    pub event: ClientEvent,
    #[serde(rename = "ackId", default)]
    pub ack_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "create-room")]
    CreateRoom { username: String, password: String },

    #[serde(rename = "join-room")]
    JoinRoom {
        username: String,
        #[serde(rename = "roomCode")]
        room_code: String,
        password: String,
    },

    #[serde(rename = "get-files")]
    GetFiles {
        #[serde(rename = "roomCode")]
        room_code: String,
    },

    #[serde(rename = "get-file-content")]
    GetFileContent {
        #[serde(rename = "roomCode")]
        room_code: String,
        #[serde(rename = "fileName")]
        file_name: String,
    },

    #[serde(rename = "switch-file")]
    SwitchFile {
        #[serde(rename = "roomCode")]
        room_code: String,
        #[serde(rename = "fileName")]
        file_name: String,
    },

    #[serde(rename = "code-change")]
    CodeChange {
        #[serde(rename = "roomCode")]
        room_code: String,
        code: String,
        #[serde(rename = "fileName")]
        file_name: String,
    },

    #[serde(rename = "create-file")]
    CreateFile {
        #[serde(rename = "roomCode")]
        room_code: String,
        #[serde(rename = "fileName")]
        file_name: String,
        #[serde(rename = "parentFolder", default)]
        parent_folder: Option<String>,
    },

    #[serde(rename = "create-folder")]
    CreateFolder {
        #[serde(rename = "roomCode")]
        room_code: String,
        #[serde(rename = "folderName")]
        folder_name: String,
        #[serde(rename = "parentFolder", default)]
        parent_folder: Option<String>,
    },

    #[serde(rename = "delete-item")]
    DeleteItem {
        #[serde(rename = "roomCode")]
        room_code: String,
        #[serde(rename = "itemPath")]
        item_path: String,
    },

    #[serde(rename = "rename-item")]
    RenameItem {
        #[serde(rename = "roomCode")]
        room_code: String,
        #[serde(rename = "oldPath")]
        old_path: String,
        #[serde(rename = "newPath")]
        new_path: String,
    },

    #[serde(rename = "move-item")]
    MoveItem {
        #[serde(rename = "roomCode")]
        room_code: String,
        #[serde(rename = "sourcePath")]
        source_path: String,
        #[serde(rename = "targetPath")]
        target_path: String,
        #[serde(rename = "itemType")]
        item_type: ItemType,
    },

    #[serde(rename = "toggle-folder")]
    ToggleFolder {
        #[serde(rename = "roomCode")]
        room_code: String,
        #[serde(rename = "folderPath")]
        folder_path: String,
    },

    #[serde(rename = "terminal-init")]
    TerminalInit {
        #[serde(rename = "roomCode")]
        room_code: String,
    },

    #[serde(rename = "terminal-input")]
    TerminalInput {
        #[serde(rename = "roomCode")]
        room_code: String,
        input: String,
    },

    #[serde(rename = "terminal-resize")]
    TerminalResize {
        #[serde(rename = "roomCode")]
        room_code: String,
        cols: u16,
        rows: u16,
    },

    #[serde(rename = "execute-command")]
    ExecuteCommand {
        #[serde(rename = "roomCode")]
        room_code: String,
        command: String,
    },

    #[serde(rename = "clear-terminal")]
    ClearTerminal {
        #[serde(rename = "roomCode")]
        room_code: String,
    },

    #[serde(rename = "kill-process")]
    KillProcess {
        #[serde(rename = "roomCode")]
        room_code: String,
    },

    #[serde(rename = "run-file")]
    RunFile {
        #[serde(rename = "roomCode")]
        room_code: String,
        #[serde(rename = "fileName")]
        file_name: String,
    },

    #[serde(rename = "save-and-run")]
    SaveAndRun {
        #[serde(rename = "roomCode")]
        room_code: String,
        #[serde(rename = "fileName", default)]
        file_name: Option<String>,
    },

    #[serde(rename = "get-working-directory")]
    GetWorkingDirectory {
        #[serde(rename = "roomCode")]
        room_code: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    File,
    Folder,
}

/// The server's reply to a client event that carried an `ackId`.
#[derive(Debug, Clone, Serialize)]
pub struct AckReply {
    #[serde(rename = "ackId")]
    pub ack_id: String,
    #[serde(flatten)]
    pub data: serde_json::Value,
}

/// Outbound named events, both room-wide and single-user. The Hub (C7)
/// decides delivery scope; the wire shape is the same either way.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "files-update")]
    FilesUpdate { files: HashMap<String, FileSnapshotEntry> },

    #[serde(rename = "file-content-update")]
    FileContentUpdate {
        #[serde(rename = "fileName")]
        file_name: String,
        content: String,
    },

    #[serde(rename = "active-file-changed")]
    ActiveFileChanged {
        #[serde(rename = "fileName")]
        file_name: String,
    },

    #[serde(rename = "file-created")]
    FileCreated {
        #[serde(rename = "fileName")]
        file_name: String,
    },

    #[serde(rename = "folder-created")]
    FolderCreated {
        #[serde(rename = "folderPath")]
        folder_path: String,
    },

    #[serde(rename = "file-synced")]
    FileSynced {
        #[serde(rename = "fileName")]
        file_name: String,
        content: String,
    },

    #[serde(rename = "item-deleted")]
    ItemDeleted {
        #[serde(rename = "itemPath")]
        item_path: String,
        #[serde(rename = "type")]
        item_type: ItemType,
    },

    #[serde(rename = "item-renamed")]
    ItemRenamed {
        #[serde(rename = "oldPath")]
        old_path: String,
        #[serde(rename = "newPath")]
        new_path: String,
        #[serde(rename = "type")]
        item_type: ItemType,
    },

    #[serde(rename = "item-moved")]
    ItemMoved {
        #[serde(rename = "sourcePath")]
        source_path: String,
        #[serde(rename = "targetPath")]
        target_path: String,
        #[serde(rename = "itemType")]
        item_type: ItemType,
    },

    #[serde(rename = "folder-toggled")]
    FolderToggled {
        #[serde(rename = "folderPath")]
        folder_path: String,
        #[serde(rename = "isExpanded")]
        is_expanded: bool,
    },

    #[serde(rename = "file-error")]
    FileError { message: String },

    #[serde(rename = "terminal-output")]
    TerminalOutput(String),

    #[serde(rename = "user-joined")]
    UserJoined {
        username: String,
        #[serde(rename = "userId")]
        user_id: String,
    },

    #[serde(rename = "user-left")]
    UserLeft {
        username: String,
        #[serde(rename = "userId")]
        user_id: String,
    },

    #[serde(rename = "room-created")]
    RoomCreated {
        #[serde(rename = "roomCode")]
        room_code: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_create_room() {
        let raw = r#"{"event":"create-room","data":{"username":"alice","password":"p"},"ackId":"1"}"#;
        let envelope: ClientEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.ack_id.as_deref(), Some("1"));
        match envelope.event {
            ClientEvent::CreateRoom { username, password } => {
                assert_eq!(username, "alice");
                assert_eq!(password, "p");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_parse_join_room_camel_case_fields() {
        let raw = r#"{"event":"join-room","data":{"username":"bob","roomCode":"ABC123","password":"p"}}"#;
        let envelope: ClientEnvelope = serde_json::from_str(raw).unwrap();
        assert!(envelope.ack_id.is_none());
        match envelope.event {
            ClientEvent::JoinRoom { username, room_code, password } => {
                assert_eq!(username, "bob");
                assert_eq!(room_code, "ABC123");
                assert_eq!(password, "p");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_parse_move_item_with_item_type() {
        let raw = r#"{"event":"move-item","data":{"roomCode":"A","sourcePath":"a","targetPath":"b","itemType":"folder"}}"#;
        let envelope: ClientEnvelope = serde_json::from_str(raw).unwrap();
        match envelope.event {
            ClientEvent::MoveItem { item_type, .. } => assert_eq!(item_type, ItemType::Folder),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_serialize_files_update() {
        let evt = ServerEvent::FilesUpdate { files: HashMap::new() };
        let json = serde_json::to_value(&evt).unwrap();
        assert_eq!(json["event"], "files-update");
        assert!(json["data"]["files"].is_object());
    }

    #[test]
    fn test_serialize_item_deleted_uses_type_field() {
        let evt = ServerEvent::ItemDeleted { item_path: "a/b.js".into(), item_type: ItemType::File };
        let json = serde_json::to_value(&evt).unwrap();
        assert_eq!(json["data"]["type"], "file");
    }

    #[test]
    fn test_ack_reply_flattens_data() {
        let reply = AckReply {
            ack_id: "42".into(),
            data: serde_json::json!({"success": true, "roomCode": "ABC123"}),
        };
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["ackId"], "42");
        assert_eq!(json["success"], true);
        assert_eq!(json["roomCode"], "ABC123");
    }
}
