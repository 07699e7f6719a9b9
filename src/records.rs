//! Tracking records: commits, tool configs, sync state, version tracking,
//! generated-file provenance and store statistics

use crate::metadata::Metadata;
use crate::tools::{SyncStatus, ToolId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A source-control commit indexed for context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub message: String,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    /// Commit time as reported by the VCS
    pub committed_at: Option<DateTime<Utc>>,
    pub files_changed: Vec<String>,
    pub stats: Option<Metadata>,
}

impl Commit {
    pub fn new(sha: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sha: sha.into(),
            message: message.into(),
            author_name: None,
            author_email: None,
            committed_at: None,
            files_changed: Vec::new(),
            stats: None,
        }
    }

    pub fn with_author(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.author_name = Some(name.into());
        self.author_email = Some(email.into());
        self
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files_changed = files;
        self
    }

    pub fn with_time(mut self, at: DateTime<Utc>) -> Self {
        self.committed_at = Some(at);
        self
    }
}

/// Tool-specific configuration content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// `<tool>:<config_type>:<slug(name)>`
    pub id: String,
    pub tool: ToolId,
    pub config_type: String,
    pub name: String,
    pub content: String,
    pub content_hash: String,
    pub file_path: Option<String>,
    pub metadata: Option<Metadata>,
    pub updated_at: DateTime<Utc>,
}

/// Per-tool synchronization summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
    pub tool: ToolId,
    pub content_hash: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
    pub status: SyncStatus,
    pub error_message: Option<String>,
    pub metadata: Option<Metadata>,
}

/// Per (tool, file) record of what the engine last wrote
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionTracking {
    pub tool: ToolId,
    pub file_path: String,
    /// Hash of the last known-good generated content
    pub content_hash: String,
    /// Engine version that produced the file
    pub engine_version: String,
    pub status: SyncStatus,
    pub user_modified: bool,
    pub last_synced: DateTime<Utc>,
    pub last_checked: Option<DateTime<Utc>>,
}

/// Provenance of a file the engine generated for a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedFile {
    /// `<tool>:<file_path>`
    pub id: String,
    pub tool: ToolId,
    pub file_path: String,
    pub content_hash: String,
    pub backup_path: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub last_verified: Option<DateTime<Utc>>,
    pub user_modified: bool,
    pub metadata: Option<Metadata>,
}

pub fn generated_file_id(tool: ToolId, file_path: &str) -> String {
    format!("{}:{}", tool.as_str(), file_path)
}

/// Result of comparing a generated file on disk against its provenance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftReport {
    pub recorded_hash: Option<String>,
    /// `None` when the file no longer exists
    pub current_hash: Option<String>,
    pub user_modified: bool,
}

/// Database statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbStats {
    pub items: usize,
    pub items_by_type: BTreeMap<String, usize>,
    pub relations: usize,
    pub embeddings: usize,
    pub commits: usize,
    pub tool_configs: usize,
    pub generated_files: usize,
    pub schema_version: Option<String>,
}

impl std::fmt::Display for DbStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Database Statistics:")?;
        writeln!(f, "  Items: {}", self.items)?;
        for (kind, count) in &self.items_by_type {
            writeln!(f, "    {}: {}", kind, count)?;
        }
        writeln!(f, "  Relations: {}", self.relations)?;
        writeln!(f, "  Embeddings: {}", self.embeddings)?;
        writeln!(f, "  Commits: {}", self.commits)?;
        writeln!(f, "  Tool configs: {}", self.tool_configs)?;
        writeln!(f, "  Generated files: {}", self.generated_files)?;
        write!(f, "  Schema: {}", self.schema_version.as_deref().unwrap_or("unknown"))
    }
}
