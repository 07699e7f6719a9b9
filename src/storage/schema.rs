//! Database schema definitions
//!
//! The statements here describe the schema at [`SCHEMA_VERSION`]. Fresh
//! databases are created directly at this shape; older databases reach it
//! through the migration units in `migrations/`.

/// Target schema version of this engine
pub const SCHEMA_VERSION: &str = "1.5.0";

/// Version assumed for databases created before versions were recorded
pub const BASELINE_VERSION: &str = "1.0.0";

/// Length of every stored embedding vector
pub const EMBEDDING_DIMENSIONS: usize = 1536;

/// Name of the vector-search virtual table
pub const EMBEDDINGS_TABLE: &str = "context_embeddings";

/// SQL to create the context items table
pub const CREATE_CONTEXT_ITEMS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS context_items (
    id TEXT PRIMARY KEY,
    type TEXT NOT NULL CHECK (type IN (
        'code', 'doc', 'workflow', 'agent', 'command',
        'commit', 'knowledge', 'config', 'tool_config'
    )),
    name TEXT NOT NULL,
    content TEXT NOT NULL,
    metadata TEXT,
    file_path TEXT,
    content_hash TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create the knowledge graph table
pub const CREATE_KNOWLEDGE_GRAPH_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS knowledge_graph (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id TEXT NOT NULL REFERENCES context_items(id) ON DELETE CASCADE,
    target_id TEXT NOT NULL REFERENCES context_items(id) ON DELETE CASCADE,
    relation_type TEXT NOT NULL CHECK (relation_type IN (
        'uses', 'implements', 'depends_on', 'references', 'tests',
        'documents', 'extends', 'contains', 'calls', 'imports',
        'configures', 'authenticates', 'validates', 'transforms'
    )),
    weight REAL NOT NULL DEFAULT 1.0,
    metadata TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(source_id, target_id, relation_type)
)
"#;

/// SQL to create the commit history table
pub const CREATE_GIT_COMMITS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS git_commits (
    sha TEXT PRIMARY KEY,
    message TEXT NOT NULL,
    author_name TEXT,
    author_email TEXT,
    committed_at TEXT,
    files_changed TEXT NOT NULL DEFAULT '[]',
    stats TEXT,
    indexed_at TEXT NOT NULL
)
"#;

/// SQL to create the tool configuration table
pub const CREATE_TOOL_CONFIGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS tool_configs (
    id TEXT PRIMARY KEY,
    tool TEXT NOT NULL,
    config_type TEXT NOT NULL,
    name TEXT NOT NULL,
    content TEXT NOT NULL,
    content_hash TEXT,
    file_path TEXT,
    metadata TEXT,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create the per-tool sync state table
pub const CREATE_SYNC_STATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS sync_state (
    tool TEXT PRIMARY KEY,
    content_hash TEXT,
    last_sync TEXT,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('synced', 'pending', 'conflict', 'error')),
    error_message TEXT,
    metadata TEXT
)
"#;

/// SQL to create the version tracking table
pub const CREATE_VERSION_TRACKING_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS version_tracking (
    tool TEXT NOT NULL,
    file_path TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    engine_version TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'synced'
        CHECK (status IN ('synced', 'pending', 'conflict', 'error')),
    last_synced TEXT NOT NULL,
    user_modified INTEGER NOT NULL DEFAULT 0,
    last_checked TEXT,
    PRIMARY KEY (tool, file_path)
)
"#;

/// SQL to create the generated file provenance table
pub const CREATE_GENERATED_FILES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS generated_files (
    id TEXT PRIMARY KEY,
    tool TEXT NOT NULL,
    file_path TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    backup_path TEXT,
    generated_at TEXT NOT NULL,
    last_verified TEXT,
    user_modified INTEGER NOT NULL DEFAULT 0,
    metadata TEXT,
    UNIQUE(tool, file_path)
)
"#;

/// SQL to create the schema version table
pub const CREATE_SCHEMA_VERSION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version TEXT PRIMARY KEY,
    applied_at TEXT NOT NULL
)
"#;

/// SQL to create the append-only migration history table
pub const CREATE_MIGRATION_HISTORY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS migration_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    version TEXT NOT NULL,
    description TEXT NOT NULL,
    checksum TEXT NOT NULL,
    applied_at TEXT NOT NULL,
    duration_ms INTEGER NOT NULL DEFAULT 0,
    success INTEGER NOT NULL
)
"#;

/// SQL to create indexes
pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_items_type ON context_items(type)",
    "CREATE INDEX IF NOT EXISTS idx_items_name ON context_items(name)",
    "CREATE INDEX IF NOT EXISTS idx_items_file_path ON context_items(file_path)",
    "CREATE INDEX IF NOT EXISTS idx_items_updated ON context_items(updated_at)",
    "CREATE INDEX IF NOT EXISTS idx_graph_source ON knowledge_graph(source_id)",
    "CREATE INDEX IF NOT EXISTS idx_graph_target ON knowledge_graph(target_id)",
    "CREATE INDEX IF NOT EXISTS idx_graph_type ON knowledge_graph(relation_type)",
    "CREATE INDEX IF NOT EXISTS idx_tool_configs_tool ON tool_configs(tool)",
    "CREATE INDEX IF NOT EXISTS idx_tool_configs_hash ON tool_configs(content_hash)",
    "CREATE INDEX IF NOT EXISTS idx_generated_tool ON generated_files(tool)",
];

/// Core table and index statements at the current schema version
pub fn core_schema_statements() -> Vec<&'static str> {
    let mut stmts = vec![
        CREATE_CONTEXT_ITEMS_TABLE,
        CREATE_KNOWLEDGE_GRAPH_TABLE,
        CREATE_GIT_COMMITS_TABLE,
        CREATE_TOOL_CONFIGS_TABLE,
        CREATE_SYNC_STATE_TABLE,
        CREATE_VERSION_TRACKING_TABLE,
        CREATE_GENERATED_FILES_TABLE,
    ];
    stmts.extend(CREATE_INDEXES.iter().copied());
    stmts
}

/// Bookkeeping tables used by the migration runner
pub fn migration_schema_statements() -> Vec<&'static str> {
    vec![CREATE_SCHEMA_VERSION_TABLE, CREATE_MIGRATION_HISTORY_TABLE]
}

/// DDL for the vector table; only valid once sqlite-vec is loaded
pub fn vector_table_statement() -> String {
    format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS {} USING vec0(
            item_id TEXT PRIMARY KEY,
            embedding float[{}]
        )",
        EMBEDDINGS_TABLE, EMBEDDING_DIMENSIONS
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemType;
    use crate::relation::RelationType;

    #[test]
    fn test_item_check_lists_every_type() {
        for kind in ItemType::all() {
            assert!(
                CREATE_CONTEXT_ITEMS_TABLE.contains(&format!("'{}'", kind.as_str())),
                "{} missing from CHECK",
                kind
            );
        }
    }

    #[test]
    fn test_relation_check_lists_every_type() {
        for kind in RelationType::all() {
            assert!(CREATE_KNOWLEDGE_GRAPH_TABLE.contains(&format!("'{}'", kind.as_str())));
        }
    }

    #[test]
    fn test_core_schema_applies_cleanly() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        for stmt in migration_schema_statements().into_iter().chain(core_schema_statements()) {
            conn.execute(stmt, []).unwrap();
        }
        // Idempotent
        for stmt in core_schema_statements() {
            conn.execute(stmt, []).unwrap();
        }
    }
}
