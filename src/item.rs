//! Context items - the unit of indexed content
//!
//! Every piece of project knowledge is stored as one of nine item types:
//! - `Code`, `Doc`, `Config`: files and fragments from the project tree
//! - `Workflow`, `Agent`, `Command`: AI-tool assets
//! - `Commit`: source-control history entries
//! - `Knowledge`: free-form facts recorded by tools
//! - `ToolConfig`: tool-specific configuration blobs
//!
//! Identifiers are derived deterministically from `type` and `name`, so the
//! same logical item always lands on the same row.

use crate::metadata::Metadata;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;

/// Number of hex characters kept from the SHA-256 digest
pub const CONTENT_HASH_LEN: usize = 16;

/// Kinds of content a context item can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Code,
    Doc,
    Workflow,
    Agent,
    Command,
    Commit,
    Knowledge,
    Config,
    ToolConfig,
}

impl ItemType {
    /// Get the string representation stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Code => "code",
            ItemType::Doc => "doc",
            ItemType::Workflow => "workflow",
            ItemType::Agent => "agent",
            ItemType::Command => "command",
            ItemType::Commit => "commit",
            ItemType::Knowledge => "knowledge",
            ItemType::Config => "config",
            ItemType::ToolConfig => "tool_config",
        }
    }

    /// Get all item types
    pub fn all() -> &'static [ItemType] {
        &[
            ItemType::Code,
            ItemType::Doc,
            ItemType::Workflow,
            ItemType::Agent,
            ItemType::Command,
            ItemType::Commit,
            ItemType::Knowledge,
            ItemType::Config,
            ItemType::ToolConfig,
        ]
    }
}

impl FromStr for ItemType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "code" => Ok(ItemType::Code),
            "doc" | "docs" | "documentation" => Ok(ItemType::Doc),
            "workflow" => Ok(ItemType::Workflow),
            "agent" => Ok(ItemType::Agent),
            "command" => Ok(ItemType::Command),
            "commit" => Ok(ItemType::Commit),
            "knowledge" => Ok(ItemType::Knowledge),
            "config" => Ok(ItemType::Config),
            "tool_config" | "tool-config" => Ok(ItemType::ToolConfig),
            _ => Err(Error::InvalidValue(format!("Unknown item type: {}", s))),
        }
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stored unit of indexed content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextItem {
    /// Deterministic identifier, `<type>:<slug(name)>`
    pub id: String,
    pub item_type: ItemType,
    pub name: String,
    pub content: String,
    pub metadata: Option<Metadata>,
    /// Source file path relative to the project root
    pub file_path: Option<String>,
    /// Truncated SHA-256 of `content`
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContextItem {
    /// Get the text handed to an embedding provider
    pub fn embedding_text(&self) -> String {
        let preview: String = self.content.chars().take(2000).collect();
        format!("{} {}\n{}", self.item_type, self.name, preview)
    }
}

impl PartialEq for ContextItem {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.content_hash == other.content_hash
    }
}

impl Eq for ContextItem {}

/// Derive the stable identifier for an item.
///
/// `("code", "auth.login")` becomes `code:auth-login`.
pub fn item_id(item_type: ItemType, name: &str) -> String {
    format!("{}:{}", item_type.as_str(), slugify(name))
}

/// Lowercase a name and replace anything outside `[a-z0-9_-]` with `-`
pub fn slugify(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

/// Hash text content for deduplication and drift detection
pub fn content_hash(content: &str) -> String {
    hash_bytes(content.as_bytes())
}

/// Hash raw bytes (e.g. a file read from disk)
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(CONTENT_HASH_LEN);
    hex
}
