//! File tree module implementing a movable tree CRDT structure.
//!
//! This module provides a tree data structure for representing file systems
//! that can be synchronized across multiple collaborators using CRDT semantics.
//! The tree supports:
//! - Creating files and folders
//! - Moving nodes (files/folders) between parents
//! - Renaming nodes
//! - Deleting nodes (with subtree cleanup)
//! - On-demand content loading

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

use super::{detect_language, NodeId};

/// Type of file system node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    File,
    Directory,
    Symlink,
}

impl Default for FileType {
    fn default() -> Self {
        Self::File
    }
}

/// A node in the file tree (file or directory)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileNode {
    /// Unique identifier for this node
    pub id: NodeId,
    /// Node name (filename or directory name)
    pub name: String,
    /// Full path relative to project root
    pub path: String,
    /// Type of node
    pub file_type: FileType,
    /// Parent node ID (None for root)
    pub parent_id: Option<NodeId>,
    /// Child node IDs (for directories)
    pub children: Vec<NodeId>,
    /// File extension (for files)
    pub extension: Option<String>,
    /// Detected language (for files)
    pub language: Option<String>,
    /// In-memory content (files only; authoritative until synced to disk)
    pub content: String,
    /// File size in bytes
    pub size: u64,
    /// Whether content has been loaded
    pub content_loaded: bool,
    /// Creation timestamp
    pub created_at: i64,
    /// Last modification timestamp
    pub modified_at: i64,
    /// Whether this node is expanded in the UI
    pub expanded: bool,
}

impl FileNode {
    /// Create a new file node
    pub fn new_file(id: impl Into<String>, name: impl Into<String>, path: impl Into<String>) -> Self {
        let name = name.into();
        let path = path.into();
        let extension = Path::new(&path)
            .extension()
            .map(|e| e.to_string_lossy().to_string());
        let language = Some(detect_language(&path));
        let now = chrono::Utc::now().timestamp();

        Self {
            id: id.into(),
            name,
            path,
            file_type: FileType::File,
            parent_id: None,
            children: Vec::new(),
            extension,
            language,
            content: String::new(),
            size: 0,
            content_loaded: false,
            created_at: now,
            modified_at: now,
            expanded: false,
        }
    }

    /// Create a new directory node
    pub fn new_directory(id: impl Into<String>, name: impl Into<String>, path: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp();

        Self {
            id: id.into(),
            name: name.into(),
            path: path.into(),
            file_type: FileType::Directory,
            parent_id: None,
            children: Vec::new(),
            extension: None,
            language: None,
            content: String::new(),
            size: 0,
            content_loaded: false,
            created_at: now,
            modified_at: now,
            expanded: false,
        }
    }

    /// Create a root directory node
    pub fn new_root(id: impl Into<String>, name: impl Into<String>) -> Self {
        let name_str = name.into();
        let mut node = Self::new_directory(id, name_str.clone(), name_str);
        node.expanded = true;
        node
    }

    /// Check if this is a directory
    pub fn is_directory(&self) -> bool {
        self.file_type == FileType::Directory
    }

    /// Check if this is a file
    pub fn is_file(&self) -> bool {
        self.file_type == FileType::File
    }

    /// Set the parent ID
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Set the file size
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// Set the initial content (files only)
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        let content = content.into();
        self.size = content.len() as u64;
        self.content = content;
        self
    }

    /// Add a child node ID
    pub fn add_child(&mut self, child_id: impl Into<String>) {
        let child_id = child_id.into();
        if !self.children.contains(&child_id) {
            self.children.push(child_id);
        }
    }

    /// Remove a child node ID
    pub fn remove_child(&mut self, child_id: &str) -> bool {
        let before = self.children.len();
        self.children.retain(|id| id != child_id);
        self.children.len() < before
    }

    /// Check if this node has a specific child
    pub fn has_child(&self, child_id: &str) -> bool {
        self.children.contains(&child_id.to_string())
    }

    /// Update modification timestamp
    pub fn touch(&mut self) {
        self.modified_at = chrono::Utc::now().timestamp();
    }

    /// Rename this node
    pub fn rename(&mut self, new_name: impl Into<String>) {
        self.name = new_name.into();
        self.touch();
    }
}

/// A complete file tree structure with index for fast lookups
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTree {
    /// Root node ID
    pub root_id: Option<NodeId>,
    /// All nodes indexed by ID
    nodes: HashMap<NodeId, FileNode>,
    /// Path to node ID mapping for fast path lookups
    path_index: HashMap<String, NodeId>,
    /// File node IDs in creation order, for active-file fallback on deletion.
    file_insertion_order: Vec<NodeId>,
}

impl FileTree {
    /// Create a new empty file tree
    pub fn new() -> Self {
        Self {
            root_id: None,
            nodes: HashMap::new(),
            path_index: HashMap::new(),
            file_insertion_order: Vec::new(),
        }
    }

    /// Create a file tree with a root directory
    pub fn with_root(name: impl Into<String>) -> Self {
        let mut tree = Self::new();
        let name = name.into();
        let root_id = generate_node_id();
        let root = FileNode::new_root(&root_id, &name);

        tree.path_index.insert(root.path.clone(), root_id.clone());
        tree.nodes.insert(root_id.clone(), root);
        tree.root_id = Some(root_id);

        tree
    }

    /// Get the root node
    pub fn root(&self) -> Option<&FileNode> {
        self.root_id.as_ref().and_then(|id| self.nodes.get(id))
    }

    /// Get a node by ID
    pub fn get(&self, id: &str) -> Option<&FileNode> {
        self.nodes.get(id)
    }

    /// Get a mutable reference to a node by ID
    pub fn get_mut(&mut self, id: &str) -> Option<&mut FileNode> {
        self.nodes.get_mut(id)
    }

    /// Get a node by path
    pub fn get_by_path(&self, path: &str) -> Option<&FileNode> {
        self.path_index.get(path).and_then(|id| self.nodes.get(id))
    }

    /// Get node ID by path
    pub fn get_id_by_path(&self, path: &str) -> Option<&NodeId> {
        self.path_index.get(path)
    }

    /// Check if a path exists
    pub fn path_exists(&self, path: &str) -> bool {
        self.path_index.contains_key(path)
    }

    /// Get the total number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Get the number of files
    pub fn file_count(&self) -> usize {
        self.nodes.values().filter(|n| n.is_file()).count()
    }

    /// Get the number of directories
    pub fn directory_count(&self) -> usize {
        self.nodes.values().filter(|n| n.is_directory()).count()
    }

    /// Insert a new node into the tree
    pub fn insert(&mut self, node: FileNode) -> Result<(), FileTreeError> {
        // Check if path already exists
        if self.path_index.contains_key(&node.path) {
            return Err(FileTreeError::PathExists(node.path.clone()));
        }

        // If node has a parent, add it to parent's children
        if let Some(parent_id) = &node.parent_id {
            if let Some(parent) = self.nodes.get_mut(parent_id) {
                parent.add_child(&node.id);
            } else {
                return Err(FileTreeError::ParentNotFound(parent_id.clone()));
            }
        }

        // Add to indices
        let id = node.id.clone();
        let path = node.path.clone();
        let is_file = node.is_file();
        self.path_index.insert(path, id.clone());
        self.nodes.insert(id.clone(), node);
        if is_file {
            self.file_insertion_order.push(id);
        }

        Ok(())
    }

    /// Create a file in the tree
    pub fn create_file(
        &mut self,
        parent_id: &str,
        name: &str,
    ) -> Result<NodeId, FileTreeError> {
        let parent = self.nodes.get(parent_id)
            .ok_or_else(|| FileTreeError::NodeNotFound(parent_id.to_string()))?;

        if !parent.is_directory() {
            return Err(FileTreeError::NotADirectory(parent_id.to_string()));
        }

        let path = format!("{}/{}", parent.path.trim_end_matches('/'), name);

        if self.path_exists(&path) {
            return Err(FileTreeError::PathExists(path));
        }

        let id = generate_node_id();
        let node = FileNode::new_file(&id, name, &path)
            .with_parent(parent_id);

        self.insert(node)?;
        Ok(id)
    }

    /// Create a directory in the tree
    pub fn create_directory(
        &mut self,
        parent_id: &str,
        name: &str,
    ) -> Result<NodeId, FileTreeError> {
        let parent = self.nodes.get(parent_id)
            .ok_or_else(|| FileTreeError::NodeNotFound(parent_id.to_string()))?;

        if !parent.is_directory() {
            return Err(FileTreeError::NotADirectory(parent_id.to_string()));
        }

        let path = format!("{}/{}", parent.path.trim_end_matches('/'), name);

        if self.path_exists(&path) {
            return Err(FileTreeError::PathExists(path));
        }

        let id = generate_node_id();
        let node = FileNode::new_directory(&id, name, &path)
            .with_parent(parent_id);

        self.insert(node)?;
        Ok(id)
    }

    /// Delete a node and its entire subtree
    pub fn delete(&mut self, id: &str) -> Result<Vec<FileNode>, FileTreeError> {
        let node = self.nodes.get(id)
            .ok_or_else(|| FileTreeError::NodeNotFound(id.to_string()))?;

        // Can't delete root
        if self.root_id.as_deref() == Some(id) {
            return Err(FileTreeError::CannotDeleteRoot);
        }

        // Collect all nodes to delete (DFS)
        let mut to_delete = Vec::new();
        self.collect_subtree(id, &mut to_delete);

        // Remove from parent's children
        if let Some(parent_id) = &node.parent_id.clone() {
            if let Some(parent) = self.nodes.get_mut(parent_id) {
                parent.remove_child(id);
            }
        }

        // Delete all collected nodes
        let mut deleted = Vec::new();
        for node_id in to_delete {
            if let Some(node) = self.nodes.remove(&node_id) {
                self.path_index.remove(&node.path);
                self.file_insertion_order.retain(|id| id != &node.id);
                deleted.push(node);
            }
        }

        Ok(deleted)
    }

    /// Collect all node IDs in a subtree (including the root)
    fn collect_subtree(&self, id: &str, result: &mut Vec<NodeId>) {
        result.push(id.to_string());

        if let Some(node) = self.nodes.get(id) {
            for child_id in &node.children {
                self.collect_subtree(child_id, result);
            }
        }
    }

    /// Rename a node
    pub fn rename(&mut self, id: &str, new_name: &str) -> Result<(), FileTreeError> {
        // Get old path and parent path
        let (old_path, parent_path) = {
            let node = self.nodes.get(id)
                .ok_or_else(|| FileTreeError::NodeNotFound(id.to_string()))?;

            let parent_path = Path::new(&node.path)
                .parent()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default();

            (node.path.clone(), parent_path)
        };

        // Calculate new path
        let new_path = if parent_path.is_empty() {
            new_name.to_string()
        } else {
            format!("{}/{}", parent_path, new_name)
        };

        // Check if new path already exists (and is not the same node)
        if self.path_index.get(&new_path).map(|existing_id| existing_id != id).unwrap_or(false) {
            return Err(FileTreeError::PathExists(new_path));
        }

        // Update path index for this node and all children
        self.update_paths(id, &old_path, &new_path)?;

        // Update node name, and for files, re-derive the extension/language from the
        // new leaf name (the spec requires the extension to track the current name).
        if let Some(node) = self.nodes.get_mut(id) {
            node.name = new_name.to_string();
            if node.is_file() {
                node.extension = Path::new(new_name)
                    .extension()
                    .map(|e| e.to_string_lossy().to_string());
                node.language = Some(detect_language(&node.path));
            }
            node.touch();
        }

        Ok(())
    }

    /// Update paths for a node and all its children (used during rename/move)
    fn update_paths(&mut self, id: &str, old_prefix: &str, new_prefix: &str) -> Result<(), FileTreeError> {
        let node = self.nodes.get(id)
            .ok_or_else(|| FileTreeError::NodeNotFound(id.to_string()))?;

        let children: Vec<NodeId> = node.children.clone();
        let old_path = node.path.clone();

        // Calculate new path
        let new_path = if old_path == old_prefix {
            new_prefix.to_string()
        } else {
            old_path.replacen(old_prefix, new_prefix, 1)
        };

        // Update path index
        self.path_index.remove(&old_path);
        self.path_index.insert(new_path.clone(), id.to_string());

        // Update node path
        if let Some(node) = self.nodes.get_mut(id) {
            node.path = new_path.clone();
        }

        // Recursively update children
        for child_id in children {
            self.update_paths(&child_id, old_prefix, new_prefix)?;
        }

        Ok(())
    }

    /// Move a node to a new parent
    pub fn move_node(&mut self, id: &str, new_parent_id: &str) -> Result<(), FileTreeError> {
        // Validate
        let node = self.nodes.get(id)
            .ok_or_else(|| FileTreeError::NodeNotFound(id.to_string()))?;

        if self.root_id.as_deref() == Some(id) {
            return Err(FileTreeError::CannotMoveRoot);
        }

        let new_parent = self.nodes.get(new_parent_id)
            .ok_or_else(|| FileTreeError::NodeNotFound(new_parent_id.to_string()))?;

        if !new_parent.is_directory() {
            return Err(FileTreeError::NotADirectory(new_parent_id.to_string()));
        }

        // Prevent moving to self or descendant
        if self.is_ancestor_of(id, new_parent_id) {
            return Err(FileTreeError::CircularMove);
        }

        let old_path = node.path.clone();
        let node_name = node.name.clone();
        let old_parent_id = node.parent_id.clone();

        // Calculate new path
        let new_path = format!("{}/{}", new_parent.path.trim_end_matches('/'), node_name);

        // Check if new path already exists
        if self.path_index.contains_key(&new_path) && self.path_index.get(&new_path) != Some(&id.to_string()) {
            return Err(FileTreeError::PathExists(new_path));
        }

        // Remove from old parent
        if let Some(old_parent) = old_parent_id.as_ref().and_then(|pid| self.nodes.get_mut(pid)) {
            old_parent.remove_child(id);
        }

        // Add to new parent
        if let Some(new_parent) = self.nodes.get_mut(new_parent_id) {
            new_parent.add_child(id);
        }

        // Update parent reference
        if let Some(node) = self.nodes.get_mut(id) {
            node.parent_id = Some(new_parent_id.to_string());
        }

        // Update paths
        self.update_paths(id, &old_path, &new_path)?;

        Ok(())
    }

    /// Check if node A is an ancestor of node B
    fn is_ancestor_of(&self, ancestor_id: &str, descendant_id: &str) -> bool {
        let mut current_id = Some(descendant_id.to_string());

        while let Some(id) = current_id {
            if id == ancestor_id {
                return true;
            }
            current_id = self.nodes.get(&id).and_then(|n| n.parent_id.clone());
        }

        false
    }

    /// Get all children of a node (direct children only)
    pub fn get_children(&self, id: &str) -> Vec<&FileNode> {
        self.nodes.get(id)
            .map(|node| {
                node.children.iter()
                    .filter_map(|child_id| self.nodes.get(child_id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get all descendants of a node
    pub fn get_descendants(&self, id: &str) -> Vec<&FileNode> {
        let mut result = Vec::new();

        if let Some(node) = self.nodes.get(id) {
            for child_id in &node.children {
                if let Some(child) = self.nodes.get(child_id) {
                    result.push(child);
                    result.extend(self.get_descendants(child_id));
                }
            }
        }

        result
    }

    /// Get path to a node (list of ancestor nodes from root)
    pub fn get_path_to(&self, id: &str) -> Vec<&FileNode> {
        let mut path = Vec::new();
        let mut current_id = Some(id.to_string());

        while let Some(id) = current_id {
            if let Some(node) = self.nodes.get(&id) {
                path.push(node);
                current_id = node.parent_id.clone();
            } else {
                break;
            }
        }

        path.reverse();
        path
    }

    /// Get all nodes as a flat list
    pub fn all_nodes(&self) -> Vec<&FileNode> {
        self.nodes.values().collect()
    }

    /// Get all files (non-directories)
    pub fn all_files(&self) -> Vec<&FileNode> {
        self.nodes.values().filter(|n| n.is_file()).collect()
    }

    /// Get all directories
    pub fn all_directories(&self) -> Vec<&FileNode> {
        self.nodes.values().filter(|n| n.is_directory()).collect()
    }

    /// Expand a directory (set expanded = true)
    pub fn expand(&mut self, id: &str) {
        if let Some(node) = self.nodes.get_mut(id) {
            if node.is_directory() {
                node.expanded = true;
            }
        }
    }

    /// Collapse a directory (set expanded = false)
    pub fn collapse(&mut self, id: &str) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.expanded = false;
        }
    }

    /// Toggle expanded state of a directory
    pub fn toggle_expanded(&mut self, id: &str) {
        if let Some(node) = self.nodes.get_mut(id) {
            if node.is_directory() {
                node.expanded = !node.expanded;
            }
        }
    }

    /// Convert to a nested structure for serialization (for frontend)
    pub fn to_nested(&self) -> Option<NestedNode> {
        self.root_id.as_ref().map(|id| self.node_to_nested(id))
    }

    fn node_to_nested(&self, id: &str) -> NestedNode {
        let node = self.nodes.get(id).expect("Node must exist");

        let children: Vec<NestedNode> = node.children
            .iter()
            .map(|child_id| self.node_to_nested(child_id))
            .collect();

        NestedNode {
            id: node.id.clone(),
            name: node.name.clone(),
            path: node.path.clone(),
            is_dir: node.is_directory(),
            extension: node.extension.clone(),
            language: node.language.clone(),
            size: node.size,
            expanded: node.expanded,
            children: if children.is_empty() { None } else { Some(children) },
        }
    }
}

/// Path-keyed operations matching the external wire contract. Internally these
/// still walk the ID-indexed tree; the path is the only thing callers ever see.
impl FileTree {
    /// Ensure every folder along `dir_path` exists, creating any missing ones.
    /// Returns the node ID of the final directory. `dir_path` is relative to the
    /// tree root's own path prefix (i.e. it already includes the root name).
    fn ensure_folder_chain(&mut self, dir_path: &str) -> Result<NodeId, FileTreeError> {
        let root_id = self.root_id.clone().ok_or_else(|| FileTreeError::NodeNotFound("<root>".to_string()))?;
        if dir_path.is_empty() || dir_path == self.root().map(|r| r.path.clone()).unwrap_or_default() {
            return Ok(root_id);
        }
        if let Some(id) = self.path_index.get(dir_path) {
            return Ok(id.clone());
        }

        let root_path = self.root().map(|r| r.path.clone()).unwrap_or_default();
        let relative = dir_path.strip_prefix(&root_path).unwrap_or(dir_path).trim_start_matches('/');

        let mut current_id = root_id;
        let mut current_path = root_path;
        for component in relative.split('/').filter(|c| !c.is_empty()) {
            current_path = format!("{}/{}", current_path.trim_end_matches('/'), component);
            if let Some(existing) = self.path_index.get(&current_path) {
                current_id = existing.clone();
                continue;
            }
            current_id = self.create_directory(&current_id, component)?;
        }
        Ok(current_id)
    }

    fn split_path(path: &str) -> (String, String) {
        match path.rsplit_once('/') {
            Some((parent, leaf)) => (parent.to_string(), leaf.to_string()),
            None => (String::new(), path.to_string()),
        }
    }

    /// `createFile(path, defaultContent)` (§4.2).
    pub fn create_file_at_path(&mut self, path: &str, content: impl Into<String>) -> Result<TreeMutation, FileTreeError> {
        if self.path_exists(path) {
            return Err(FileTreeError::PathExists(path.to_string()));
        }
        let (parent_path, leaf) = Self::split_path(path);
        let parent_id = self.ensure_folder_chain(&parent_path)?;
        let content = content.into();

        let id = self.create_file(&parent_id, &leaf)?;
        if let Some(node) = self.get_mut(&id) {
            node.size = content.len() as u64;
            node.content = content.clone();
            node.content_loaded = true;
        }

        Ok(TreeMutation {
            disk_effects: vec![DiskEffect::WriteFile { path: path.to_string(), content }],
            ..Default::default()
        })
    }

    /// `createFolder(path)` (§4.2).
    pub fn create_folder_at_path(&mut self, path: &str) -> Result<TreeMutation, FileTreeError> {
        if self.path_exists(path) {
            return Err(FileTreeError::PathExists(path.to_string()));
        }
        let (parent_path, leaf) = Self::split_path(path);
        let parent_id = self.ensure_folder_chain(&parent_path)?;
        self.create_directory(&parent_id, &leaf)?;

        Ok(TreeMutation {
            disk_effects: vec![DiskEffect::CreateDir { path: path.to_string() }],
            ..Default::default()
        })
    }

    /// `deleteItem(path)` (§4.2). Refuses to delete the last remaining file.
    pub fn delete_item_at_path(&mut self, path: &str) -> Result<TreeMutation, FileTreeError> {
        let id = self.get_id_by_path(path).cloned().ok_or_else(|| FileTreeError::NodeNotFound(path.to_string()))?;
        let node = self.get(&id).expect("indexed node must exist");
        let is_dir = node.is_directory();

        if !is_dir && self.file_count() <= 1 {
            return Err(FileTreeError::CannotDeleteLastFile);
        }

        let deleted = self.delete(&id)?;
        let removed_paths: Vec<String> = deleted.iter().map(|n| n.path.clone()).collect();

        Ok(TreeMutation {
            disk_effects: vec![DiskEffect::Delete { path: path.to_string(), is_dir }],
            removed_paths,
            ..Default::default()
        })
    }

    /// `renameItem(oldPath, newPath)` (§4.2).
    pub fn rename_item_at_path(&mut self, old_path: &str, new_path: &str) -> Result<TreeMutation, FileTreeError> {
        let id = self.get_id_by_path(old_path).cloned().ok_or_else(|| FileTreeError::NodeNotFound(old_path.to_string()))?;
        if self.path_exists(new_path) {
            return Err(FileTreeError::PathExists(new_path.to_string()));
        }
        let is_dir = self.get(&id).expect("indexed node must exist").is_directory();
        let (new_parent_path, new_leaf) = Self::split_path(new_path);
        self.ensure_folder_chain(&new_parent_path)?;

        self.rename(&id, &new_leaf)?;

        Ok(TreeMutation {
            disk_effects: vec![DiskEffect::Rename { from: old_path.to_string(), to: new_path.to_string(), is_dir }],
            renamed_paths: vec![(old_path.to_string(), new_path.to_string())],
            ..Default::default()
        })
    }

    /// `moveItem(sourcePath, targetPath, kind)` (§4.2). `kind` folds folder/file
    /// distinction; `IntoSelf` is only reachable when `is_folder` is true.
    pub fn move_item_at_path(&mut self, source_path: &str, target_path: &str, is_folder: bool) -> Result<TreeMutation, FileTreeError> {
        let id = self.get_id_by_path(source_path).cloned().ok_or_else(|| FileTreeError::NodeNotFound(source_path.to_string()))?;

        if is_folder {
            let prefix = format!("{}/", source_path);
            if target_path == source_path || target_path.starts_with(&prefix) {
                return Err(FileTreeError::IntoSelf);
            }
        }

        let new_parent_id = self.ensure_folder_chain(target_path)?;
        self.move_node(&id, &new_parent_id).map_err(|e| match e {
            FileTreeError::CircularMove => FileTreeError::IntoSelf,
            other => other,
        })?;

        let new_path = self.get(&id).expect("indexed node must exist").path.clone();

        Ok(TreeMutation {
            disk_effects: vec![DiskEffect::Rename { from: source_path.to_string(), to: new_path.clone(), is_dir: is_folder }],
            renamed_paths: vec![(source_path.to_string(), new_path)],
            ..Default::default()
        })
    }

    /// `toggleFolder(path)` (§4.2). Returns the new expanded state.
    pub fn toggle_folder_at_path(&mut self, path: &str) -> Result<bool, FileTreeError> {
        let id = self.get_id_by_path(path).cloned().ok_or_else(|| FileTreeError::NodeNotFound(path.to_string()))?;
        self.toggle_expanded(&id);
        Ok(self.get(&id).map(|n| n.expanded).unwrap_or(false))
    }

    /// `setFileContent(path, content)` (§4.2). Unconditional replace.
    pub fn set_file_content_at_path(&mut self, path: &str, content: impl Into<String>) -> Result<TreeMutation, FileTreeError> {
        let id = self.get_id_by_path(path).cloned().ok_or_else(|| FileTreeError::NodeNotFound(path.to_string()))?;
        let node = self.get_mut(&id).expect("indexed node must exist");
        if !node.is_file() {
            return Err(FileTreeError::NotAFile(path.to_string()));
        }
        let content = content.into();
        node.size = content.len() as u64;
        node.content = content.clone();
        node.touch();

        Ok(TreeMutation {
            disk_effects: vec![DiskEffect::WriteFile { path: path.to_string(), content }],
            ..Default::default()
        })
    }

    /// `snapshot()` (§4.2): the path → content mapping for fan-out, keyed
    /// relative to the room root (never the root's own name) so it lines up
    /// with every other wire path — `FileSynced`, `FileCreated`, `ItemDeleted`,
    /// and the rest already emit root-relative paths.
    pub fn snapshot(&self) -> HashMap<String, FileSnapshotEntry> {
        let root_prefix = self.root().map(|r| format!("{}/", r.path)).unwrap_or_default();
        self.nodes
            .values()
            .filter(|n| self.root_id.as_deref() != Some(n.id.as_str()))
            .map(|n| {
                let relative = n.path.strip_prefix(root_prefix.as_str()).unwrap_or(&n.path).to_string();
                (
                    relative,
                    FileSnapshotEntry {
                        is_dir: n.is_directory(),
                        content: n.content.clone(),
                        expanded: n.expanded,
                    },
                )
            })
            .collect()
    }

    /// The first file in insertion order, used to (re)seed a user's active file.
    pub fn first_file_path(&self) -> Option<String> {
        self.file_insertion_order.first().and_then(|id| self.nodes.get(id)).map(|n| n.path.clone())
    }
}

/// One entry of a [`FileTree::snapshot`] for wire serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSnapshotEntry {
    pub is_dir: bool,
    pub content: String,
    pub expanded: bool,
}

impl Default for FileTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Nested representation for frontend consumption
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NestedNode {
    pub id: String,
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub extension: Option<String>,
    pub language: Option<String>,
    pub size: u64,
    pub expanded: bool,
    pub children: Option<Vec<NestedNode>>,
}

/// Errors that can occur during file tree operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum FileTreeError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Parent not found: {0}")]
    ParentNotFound(String),

    #[error("Path already exists: {0}")]
    PathExists(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Cannot delete root node")]
    CannotDeleteRoot,

    #[error("Cannot move root node")]
    CannotMoveRoot,

    #[error("Cannot move node to its own descendant")]
    CircularMove,

    #[error("Cannot move folder into itself or one of its descendants")]
    IntoSelf,

    #[error("Not a file: {0}")]
    NotAFile(String),

    #[error("Cannot delete the last remaining file in the room")]
    CannotDeleteLastFile,

    #[error("IO error: {0}")]
    Io(String),
}

/// A disk-facing side effect produced by a mutating tree operation. The caller
/// (the room manager) applies these to the Working Directory through the Sync
/// Arbiter; the tree itself never touches the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskEffect {
    WriteFile { path: String, content: String },
    CreateDir { path: String },
    Delete { path: String, is_dir: bool },
    Rename { from: String, to: String, is_dir: bool },
}

/// The result of a mutating path-based operation: the disk effects to apply,
/// plus enough information for the caller to update active-file trackers.
#[derive(Debug, Clone, Default)]
pub struct TreeMutation {
    pub disk_effects: Vec<DiskEffect>,
    /// (old_path, new_path) pairs for every path that moved, most specific last.
    /// A user whose active file equals or is prefixed by `old_path` should shift
    /// to the corresponding `new_path`.
    pub renamed_paths: Vec<(String, String)>,
    /// Paths removed from the tree by this operation (for active-file fallback).
    pub removed_paths: Vec<String>,
}

/// Default content for a newly created file, keyed by lower-cased extension.
pub fn default_content_for_extension(extension: &str) -> &'static str {
    match extension.to_lowercase().as_str() {
        "js" | "jsx" => "// start typing...\n",
        "ts" | "tsx" => "// start typing...\n",
        "py" => "# start typing...\n",
        "html" => "<!DOCTYPE html>\n<html>\n<head>\n  <title>New file</title>\n</head>\n<body>\n\n</body>\n</html>\n",
        "css" => "/* start typing... */\n",
        "json" => "{}\n",
        "md" => "# New file\n",
        "txt" => "",
        _ => "// New file\n",
    }
}

/// Generate a unique node ID
pub fn generate_node_id() -> NodeId {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_file_tree() {
        let tree = FileTree::with_root("my-project");

        assert!(tree.root().is_some());
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.file_count(), 0);
        assert_eq!(tree.directory_count(), 1);
    }

    #[test]
    fn test_create_file() {
        let mut tree = FileTree::with_root("project");
        let root_id = tree.root_id.clone().unwrap();

        let file_id = tree.create_file(&root_id, "main.rs").unwrap();

        assert_eq!(tree.node_count(), 2);
        assert_eq!(tree.file_count(), 1);

        let file = tree.get(&file_id).unwrap();
        assert_eq!(file.name, "main.rs");
        assert_eq!(file.path, "project/main.rs");
        assert_eq!(file.language.as_deref(), Some("rust"));
    }

    #[test]
    fn test_create_directory() {
        let mut tree = FileTree::with_root("project");
        let root_id = tree.root_id.clone().unwrap();

        let dir_id = tree.create_directory(&root_id, "src").unwrap();
        let file_id = tree.create_file(&dir_id, "lib.rs").unwrap();

        assert_eq!(tree.node_count(), 3);

        let file = tree.get(&file_id).unwrap();
        assert_eq!(file.path, "project/src/lib.rs");
    }

    #[test]
    fn test_delete_node() {
        let mut tree = FileTree::with_root("project");
        let root_id = tree.root_id.clone().unwrap();

        let dir_id = tree.create_directory(&root_id, "src").unwrap();
        tree.create_file(&dir_id, "main.rs").unwrap();
        tree.create_file(&dir_id, "lib.rs").unwrap();

        assert_eq!(tree.node_count(), 4);

        // Delete directory should delete children too
        let deleted = tree.delete(&dir_id).unwrap();
        assert_eq!(deleted.len(), 3);
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn test_rename_node() {
        let mut tree = FileTree::with_root("project");
        let root_id = tree.root_id.clone().unwrap();

        let file_id = tree.create_file(&root_id, "old.rs").unwrap();

        tree.rename(&file_id, "new.rs").unwrap();

        let file = tree.get(&file_id).unwrap();
        assert_eq!(file.name, "new.rs");
        assert_eq!(file.path, "project/new.rs");

        assert!(tree.get_by_path("project/new.rs").is_some());
        assert!(tree.get_by_path("project/old.rs").is_none());
    }

    #[test]
    fn test_rename_directory_updates_children() {
        let mut tree = FileTree::with_root("project");
        let root_id = tree.root_id.clone().unwrap();

        let dir_id = tree.create_directory(&root_id, "old_dir").unwrap();
        let file_id = tree.create_file(&dir_id, "test.rs").unwrap();

        tree.rename(&dir_id, "new_dir").unwrap();

        let file = tree.get(&file_id).unwrap();
        assert_eq!(file.path, "project/new_dir/test.rs");
    }

    #[test]
    fn test_move_node() {
        let mut tree = FileTree::with_root("project");
        let root_id = tree.root_id.clone().unwrap();

        let src_id = tree.create_directory(&root_id, "src").unwrap();
        let lib_id = tree.create_directory(&root_id, "lib").unwrap();
        let file_id = tree.create_file(&src_id, "util.rs").unwrap();

        tree.move_node(&file_id, &lib_id).unwrap();

        let file = tree.get(&file_id).unwrap();
        assert_eq!(file.path, "project/lib/util.rs");
        assert_eq!(file.parent_id, Some(lib_id.clone()));

        // Check parent children lists updated
        let src = tree.get(&src_id).unwrap();
        assert!(!src.children.contains(&file_id));

        let lib = tree.get(&lib_id).unwrap();
        assert!(lib.children.contains(&file_id));
    }

    #[test]
    fn test_circular_move_prevented() {
        let mut tree = FileTree::with_root("project");
        let root_id = tree.root_id.clone().unwrap();

        let parent_id = tree.create_directory(&root_id, "parent").unwrap();
        let child_id = tree.create_directory(&parent_id, "child").unwrap();

        // Try to move parent into child
        let result = tree.move_node(&parent_id, &child_id);
        assert!(matches!(result, Err(FileTreeError::CircularMove)));
    }

    #[test]
    fn test_get_children() {
        let mut tree = FileTree::with_root("project");
        let root_id = tree.root_id.clone().unwrap();

        tree.create_file(&root_id, "a.rs").unwrap();
        tree.create_file(&root_id, "b.rs").unwrap();
        tree.create_directory(&root_id, "src").unwrap();

        let children = tree.get_children(&root_id);
        assert_eq!(children.len(), 3);
    }

    #[test]
    fn test_path_lookup() {
        let mut tree = FileTree::with_root("project");
        let root_id = tree.root_id.clone().unwrap();

        let src_id = tree.create_directory(&root_id, "src").unwrap();
        tree.create_file(&src_id, "main.rs").unwrap();

        assert!(tree.path_exists("project/src/main.rs"));
        assert!(!tree.path_exists("project/src/other.rs"));

        let node = tree.get_by_path("project/src/main.rs").unwrap();
        assert_eq!(node.name, "main.rs");
    }

    #[test]
    fn test_to_nested() {
        let mut tree = FileTree::with_root("project");
        let root_id = tree.root_id.clone().unwrap();

        let src_id = tree.create_directory(&root_id, "src").unwrap();
        tree.create_file(&src_id, "main.rs").unwrap();
        tree.create_file(&root_id, "Cargo.toml").unwrap();

        let nested = tree.to_nested().unwrap();

        assert_eq!(nested.name, "project");
        assert!(nested.is_dir);
        assert!(nested.children.is_some());

        let children = nested.children.unwrap();
        assert_eq!(children.len(), 2);
    }

    #[test]
    fn test_expand_collapse() {
        let mut tree = FileTree::with_root("project");
        let root_id = tree.root_id.clone().unwrap();

        let dir_id = tree.create_directory(&root_id, "src").unwrap();

        // Initially not expanded (except root)
        let dir = tree.get(&dir_id).unwrap();
        assert!(!dir.expanded);

        // Expand
        tree.expand(&dir_id);
        let dir = tree.get(&dir_id).unwrap();
        assert!(dir.expanded);

        // Collapse
        tree.collapse(&dir_id);
        let dir = tree.get(&dir_id).unwrap();
        assert!(!dir.expanded);

        // Toggle
        tree.toggle_expanded(&dir_id);
        let dir = tree.get(&dir_id).unwrap();
        assert!(dir.expanded);
    }

    #[test]
    fn test_get_descendants() {
        let mut tree = FileTree::with_root("project");
        let root_id = tree.root_id.clone().unwrap();

        let src_id = tree.create_directory(&root_id, "src").unwrap();
        let lib_id = tree.create_directory(&src_id, "lib").unwrap();
        tree.create_file(&lib_id, "mod.rs").unwrap();
        tree.create_file(&src_id, "main.rs").unwrap();

        let descendants = tree.get_descendants(&root_id);
        assert_eq!(descendants.len(), 4); // src, lib, mod.rs, main.rs
    }

    #[test]
    fn test_get_path_to() {
        let mut tree = FileTree::with_root("project");
        let root_id = tree.root_id.clone().unwrap();

        let src_id = tree.create_directory(&root_id, "src").unwrap();
        let file_id = tree.create_file(&src_id, "main.rs").unwrap();

        let path = tree.get_path_to(&file_id);
        assert_eq!(path.len(), 3); // root -> src -> main.rs
        assert_eq!(path[0].name, "project");
        assert_eq!(path[1].name, "src");
        assert_eq!(path[2].name, "main.rs");
    }

    #[test]
    fn test_create_file_at_path_auto_vivifies_parents() {
        let mut tree = FileTree::with_root("project");

        let mutation = tree.create_file_at_path("project/src/lib/mod.rs", "// hi\n").unwrap();
        assert!(tree.path_exists("project/src"));
        assert!(tree.path_exists("project/src/lib"));
        assert_eq!(
            mutation.disk_effects,
            vec![DiskEffect::WriteFile { path: "project/src/lib/mod.rs".into(), content: "// hi\n".into() }]
        );

        let node = tree.get_by_path("project/src/lib/mod.rs").unwrap();
        assert_eq!(node.content, "// hi\n");
    }

    #[test]
    fn test_create_file_at_path_already_exists() {
        let mut tree = FileTree::with_root("project");
        tree.create_file_at_path("project/main.js", "x").unwrap();

        let err = tree.create_file_at_path("project/main.js", "y").unwrap_err();
        assert!(matches!(err, FileTreeError::PathExists(_)));
    }

    #[test]
    fn test_delete_last_file_refused() {
        let mut tree = FileTree::with_root("project");
        tree.create_file_at_path("project/main.js", "x").unwrap();

        let err = tree.delete_item_at_path("project/main.js").unwrap_err();
        assert!(matches!(err, FileTreeError::CannotDeleteLastFile));
    }

    #[test]
    fn test_delete_folder_removes_descendants_and_reports_them() {
        let mut tree = FileTree::with_root("project");
        tree.create_file_at_path("project/main.js", "x").unwrap();
        tree.create_file_at_path("project/src/lib.js", "y").unwrap();

        let mutation = tree.delete_item_at_path("project/src").unwrap();
        assert!(!tree.path_exists("project/src"));
        assert!(!tree.path_exists("project/src/lib.js"));
        assert!(mutation.removed_paths.contains(&"project/src/lib.js".to_string()));
    }

    #[test]
    fn test_rename_item_updates_extension() {
        let mut tree = FileTree::with_root("project");
        tree.create_file_at_path("project/main.js", "x").unwrap();

        tree.rename_item_at_path("project/main.js", "project/app.ts").unwrap();
        let node = tree.get_by_path("project/app.ts").unwrap();
        assert_eq!(node.extension.as_deref(), Some("ts"));
    }

    #[test]
    fn test_move_folder_into_self_rejected() {
        let mut tree = FileTree::with_root("project");
        tree.create_file_at_path("project/src/main.js", "x").unwrap();
        tree.create_folder_at_path("project/src/nested").unwrap();

        let err = tree.move_item_at_path("project/src", "project/src/nested", true).unwrap_err();
        assert!(matches!(err, FileTreeError::IntoSelf));
    }

    #[test]
    fn test_set_file_content_requires_file() {
        let mut tree = FileTree::with_root("project");
        tree.create_folder_at_path("project/src").unwrap();
        tree.create_file_at_path("project/main.js", "x").unwrap();

        let err = tree.set_file_content_at_path("project/src", "y").unwrap_err();
        assert!(matches!(err, FileTreeError::NotAFile(_)));

        tree.set_file_content_at_path("project/main.js", "z").unwrap();
        assert_eq!(tree.get_by_path("project/main.js").unwrap().content, "z");
    }

    #[test]
    fn test_first_file_path_tracks_insertion_order() {
        let mut tree = FileTree::with_root("project");
        tree.create_file_at_path("project/b.js", "").unwrap();
        tree.create_file_at_path("project/a.js", "").unwrap();

        assert_eq!(tree.first_file_path().as_deref(), Some("project/b.js"));

        tree.delete_item_at_path("project/b.js").unwrap();
        assert_eq!(tree.first_file_path().as_deref(), Some("project/a.js"));
    }

    #[test]
    fn test_snapshot_excludes_root() {
        let mut tree = FileTree::with_root("project");
        tree.create_file_at_path("project/main.js", "x=1\n").unwrap();

        let snap = tree.snapshot();
        assert!(!snap.contains_key("project"));
        assert!(!snap.contains_key("project/main.js"));
        assert_eq!(snap.get("main.js").unwrap().content, "x=1\n");
    }
}
