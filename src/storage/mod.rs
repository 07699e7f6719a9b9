//! Storage Layer - SQLite-backed persistence
//!
//! System of record is a single SQLite file with tables:
//! - context_items(id, type, name, content, metadata, file_path, content_hash)
//! - knowledge_graph(source_id, target_id, relation_type, weight)
//! - context_embeddings(item_id, embedding) via sqlite-vec
//! - git_commits, tool_configs, sync_state, version_tracking, generated_files
//! - schema_version, migration_history

pub mod schema;
pub mod migrations;
pub mod search;
pub mod sqlite;

pub use migrations::{
    MigrateOptions, MigrationEvent, MigrationReport, MigrationRunner, MigrationState,
    MigrationStatus,
};
pub use schema::{EMBEDDING_DIMENSIONS, SCHEMA_VERSION};
pub use search::{HybridOptions, SearchHit};
pub use sqlite::{Store, TransactionHandle};
