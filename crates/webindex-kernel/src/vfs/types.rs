//! Serializable node metadata.
//!
//! These are what a presentation layer renders: plain values, no paths to
//! the physical filesystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::node::Node;

/// Node discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// The synthetic top level.
    VirtualRoot,
    /// Directory inside a mount.
    Directory,
    /// Regular file inside a mount.
    File,
}

impl NodeKind {
    /// Returns true for anything that can be listed.
    pub fn is_dir(&self) -> bool {
        !matches!(self, NodeKind::File)
    }
}

/// Metadata snapshot of a [`Node`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub kind: NodeKind,
    /// Display name (empty for the virtual root).
    pub name: String,
    /// Mount-prefixed virtual path (empty for the virtual root).
    pub virtual_path: String,
    pub is_directory: bool,
    /// Size in bytes; 0 for directories.
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    /// Files only.
    pub mime_type: Option<String>,
    pub mime_class: String,
}

impl From<&Node> for NodeInfo {
    fn from(node: &Node) -> Self {
        Self {
            kind: node.kind(),
            name: node.name().to_string(),
            virtual_path: node.virtual_path().to_string(),
            is_directory: node.is_directory(),
            size: node.size(),
            modified: node.modified().map(DateTime::<Utc>::from),
            mime_type: node.mime_type().map(str::to_string),
            mime_class: node.mime_class().to_string(),
        }
    }
}
