//! # ai-context-store - Embedded knowledge store for AI tooling
//!
//! Indexes a project's code, documentation and AI-tool configuration into a
//! single SQLite file and keeps track of what was generated for which tool.
//!
//! The crate provides:
//! - A schema registry with forward-only, checksummed migrations
//! - A store with item CRUD, hybrid text + vector search and graph traversal
//! - Sync-state, version-tracking and generated-file provenance records
//! - A snapshot manager for point-in-time backups, restore, diff and retention

pub mod item;
pub mod relation;
pub mod metadata;
pub mod tools;
pub mod records;
pub mod storage;
pub mod snapshot;
pub mod embedding;
pub mod config;
pub mod logging;

// Re-exports for convenient access
pub use item::{ContextItem, ItemType};
pub use relation::{Relation, RelationType};
pub use metadata::Metadata;
pub use tools::{SyncStatus, ToolId};
pub use storage::{HybridOptions, MigrateOptions, MigrationRunner, SearchHit, Store, SCHEMA_VERSION};
pub use snapshot::{CreateOptions, DiffPolicy, RestoreOptions, SnapshotDiff, SnapshotManager, SnapshotMetadata};
pub use embedding::EmbeddingProvider;

use std::path::PathBuf;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for store operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot access {}: {source}", path.display())]
    Resource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Migration {version} failed: {reason}")]
    Migration { version: String, reason: String },

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding provider error: {0}")]
    Embedding(String),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl Error {
    /// Wrap an IO error with the path it was raised for
    pub(crate) fn resource(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Resource { path: path.into(), source }
    }
}
