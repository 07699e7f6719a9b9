//! SQLite storage implementation

use super::migrations::{MigrateOptions, MigrationReport, MigrationRunner, MigrationStatus};
use super::schema::{self, EMBEDDING_DIMENSIONS};
use super::search::{self, HybridOptions, SearchHit, TEXT_SEARCH_LIMIT};
use crate::config::ensure_db_dir;
use crate::embedding::EmbeddingProvider;
use crate::item::{self, ContextItem, ItemType};
use crate::metadata::Metadata;
use crate::records::{
    generated_file_id, Commit, DbStats, DriftReport, GeneratedFile, SyncState, ToolConfig,
    VersionTracking,
};
use crate::relation::{Relation, RelationType, TraversalNode, DEFAULT_WEIGHT};
use crate::tools::{SyncStatus, ToolId};
use crate::{Error, Result};
use chrono::{Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Once;
use tracing::{debug, info, warn};

const ITEM_COLUMNS: &str =
    "id, type, name, content, metadata, file_path, content_hash, created_at, updated_at";

const QUALIFIED_ITEM_COLUMNS: &str =
    "i.id, i.type, i.name, i.content, i.metadata, i.file_path, i.content_hash, i.created_at, i.updated_at";

const RELATION_COLUMNS: &str = "source_id, target_id, relation_type, weight, metadata, created_at";

const GENERATED_FILE_COLUMNS: &str =
    "id, tool, file_path, content_hash, backup_path, generated_at, last_verified, user_modified, metadata";

const VERSION_TRACKING_COLUMNS: &str =
    "tool, file_path, content_hash, engine_version, status, user_modified, last_synced, last_checked";

static VECTOR_EXTENSION: Once = Once::new();

/// Register sqlite-vec with every connection this process opens
pub(crate) fn register_vector_extension() {
    VECTOR_EXTENSION.call_once(|| {
        // SAFETY: sqlite3_vec_init is an SQLite extension entry point
        unsafe {
            #[allow(clippy::missing_transmute_annotations)]
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite_vec::sqlite3_vec_init as *const (),
            )));
        }
    });
}

/// SQLite-backed knowledge store
///
/// Owns the single connection to the database file. Every read and write in
/// the crate goes through this type.
pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
    /// Set while `conn` is a placeholder between closing and reopening the file
    closed: bool,
}

impl Store {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        ensure_db_dir(path)?;
        let conn = Self::connect(path)?;
        let store = Self {
            conn,
            path: Some(path.to_path_buf()),
            closed: false,
        };
        store.initialize()?;
        info!("Opened context store at {}", path.display());
        Ok(store)
    }

    /// Open `path`, first copying `legacy` over if only the legacy file exists
    pub fn open_with_legacy(path: &Path, legacy: &Path) -> Result<Self> {
        if !path.exists() && legacy.exists() {
            ensure_db_dir(path)?;
            std::fs::copy(legacy, path).map_err(|e| Error::resource(path, e))?;
            info!(
                "Copied legacy database {} to {}",
                legacy.display(),
                path.display()
            );
        }
        Self::open(path)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        register_vector_extension();
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self {
            conn,
            path: None,
            closed: false,
        };
        store.initialize()?;
        Ok(store)
    }

    fn connect(path: &Path) -> Result<Connection> {
        register_vector_extension();
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    /// Path of the backing file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Create or upgrade the schema
    fn initialize(&self) -> Result<()> {
        let fresh = !self.table_exists("context_items")?;
        let runner = MigrationRunner::new(&self.conn)?;
        runner.ensure_tables()?;

        if fresh {
            self.create_core_schema()?;
            self.conn.execute(&schema::vector_table_statement(), [])?;
            runner.stamp_baseline()?;
        } else {
            self.conn.execute(&schema::vector_table_statement(), [])?;
            runner.run(&MigrateOptions::default())?;
            // Tables and indexes that are new at this version
            self.create_core_schema()?;
        }
        Ok(())
    }

    fn create_core_schema(&self) -> Result<()> {
        for stmt in schema::core_schema_statements() {
            self.conn.execute(stmt, [])?;
        }
        Ok(())
    }

    fn table_exists(&self, name: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE name = ?1",
            [name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // ========== Migrations ==========

    pub fn migration_status(&self) -> Result<MigrationStatus> {
        MigrationRunner::new(&self.conn)?.status()
    }

    /// Run pending migrations with explicit options (dry run, force, progress)
    pub fn migrate(&self, options: &MigrateOptions<'_>) -> Result<MigrationReport> {
        MigrationRunner::new(&self.conn)?.run(options)
    }

    pub fn schema_version(&self) -> Result<Option<String>> {
        Ok(MigrationRunner::new(&self.conn)?
            .current_version()?
            .map(|v| v.to_string()))
    }

    // ========== Transactions ==========

    /// Run `f` atomically. Joins the enclosing transaction if one is open.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Store) -> Result<T>,
    {
        if !self.conn.is_autocommit() {
            return f(self);
        }
        self.conn.execute_batch("BEGIN")?;
        let result = f(self);
        self.finish_transaction(result)
    }

    /// Async variant of [`Store::transaction`].
    ///
    /// The future may yield between statements, so BEGIN/COMMIT/ROLLBACK are
    /// issued around the whole awaited body.
    pub async fn transaction_async<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'s> FnOnce(&'s Store) -> Pin<Box<dyn Future<Output = Result<T>> + 's>>,
    {
        if !self.conn.is_autocommit() {
            return f(self).await;
        }
        self.conn.execute_batch("BEGIN")?;
        let result = f(self).await;
        self.finish_transaction(result)
    }

    /// Begin a transaction driven by the caller.
    ///
    /// The handle derefs to the store. Dropping it without calling
    /// `commit` rolls back.
    pub fn begin_transaction(&self) -> Result<TransactionHandle<'_>> {
        self.conn.execute_batch("BEGIN")?;
        Ok(TransactionHandle {
            store: self,
            finished: false,
        })
    }

    fn finish_transaction<T>(&self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => match self.conn.execute_batch("COMMIT") {
                Ok(()) => Ok(value),
                Err(e) => {
                    self.rollback_quietly();
                    Err(e.into())
                }
            },
            Err(e) => {
                self.rollback_quietly();
                Err(e)
            }
        }
    }

    fn rollback_quietly(&self) {
        if let Err(e) = self.conn.execute_batch("ROLLBACK") {
            warn!("Rollback failed: {}", e);
        }
    }

    /// Internal multi-statement writes; joins an open transaction
    fn atomically<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        if !self.conn.is_autocommit() {
            return f(&self.conn);
        }
        let tx = self.conn.unchecked_transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    // ========== Item Operations ==========

    /// Insert or replace an item keyed by its deterministic id
    pub fn upsert_item(
        &self,
        item_type: ItemType,
        name: &str,
        content: &str,
        metadata: Option<&Metadata>,
        file_path: Option<&str>,
    ) -> Result<ContextItem> {
        let id = item::item_id(item_type, name);
        let hash = item::content_hash(content);
        self.conn.execute(
            r#"
            INSERT INTO context_items (id, type, name, content, metadata, file_path, content_hash, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            ON CONFLICT(id) DO UPDATE SET
                type = excluded.type,
                name = excluded.name,
                content = excluded.content,
                metadata = excluded.metadata,
                file_path = excluded.file_path,
                content_hash = excluded.content_hash,
                updated_at = excluded.updated_at
            "#,
            params![id, item_type.as_str(), name, content, metadata, file_path, hash, Utc::now()],
        )?;
        self.get_item(&id)?.ok_or(Error::NotFound(id))
    }

    pub fn get_item(&self, id: &str) -> Result<Option<ContextItem>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM context_items WHERE id = ?1", ITEM_COLUMNS),
                [id],
                row_to_item,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn get_items_by_type(&self, item_type: ItemType) -> Result<Vec<ContextItem>> {
        self.query_items(
            &format!("SELECT {} FROM context_items WHERE type = ?1 ORDER BY name", ITEM_COLUMNS),
            params![item_type.as_str()],
        )
    }

    /// All items ordered by type then name
    pub fn get_all_items(&self) -> Result<Vec<ContextItem>> {
        self.query_items(
            &format!("SELECT {} FROM context_items ORDER BY type, name", ITEM_COLUMNS),
            [],
        )
    }

    pub fn get_items_by_file(&self, file_path: &str) -> Result<Vec<ContextItem>> {
        self.query_items(
            &format!("SELECT {} FROM context_items WHERE file_path = ?1 ORDER BY name", ITEM_COLUMNS),
            [file_path],
        )
    }

    pub fn count_items(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM context_items", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Delete an item, its edges (cascade) and its embedding
    pub fn delete_item(&self, id: &str) -> Result<bool> {
        self.atomically(|conn| {
            delete_embedding_row(conn, id)?;
            let deleted = conn.execute("DELETE FROM context_items WHERE id = ?1", [id])?;
            Ok(deleted > 0)
        })
    }

    /// Delete items not updated within `days`, optionally for one type only
    pub fn delete_stale_items(&self, days: u32, item_type: Option<ItemType>) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let kind = item_type.map(|t| t.as_str());
        let removed = self.atomically(|conn| {
            let ids: Vec<String> = {
                let mut stmt = conn.prepare(
                    "SELECT id FROM context_items WHERE updated_at < ?1 AND (?2 IS NULL OR type = ?2)",
                )?;
                let ids = stmt
                    .query_map(params![cutoff, kind], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                ids
            };
            for id in &ids {
                delete_embedding_row(conn, id)?;
                conn.execute("DELETE FROM context_items WHERE id = ?1", [id])?;
            }
            Ok(ids.len())
        })?;
        if removed > 0 {
            info!("Removed {} stale items older than {} days", removed, days);
        }
        Ok(removed)
    }

    fn query_items<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<ContextItem>> {
        let mut stmt = self.conn.prepare(sql)?;
        let items = stmt
            .query_map(params, row_to_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    // ========== Search ==========

    /// Case-insensitive substring match over name and content, capped at 50
    pub fn text_search(&self, query: &str, item_type: Option<ItemType>) -> Result<Vec<ContextItem>> {
        let pattern = format!("%{}%", escape_like(query));
        self.query_items(
            &format!(
                "SELECT {} FROM context_items
                 WHERE (content LIKE ?1 ESCAPE '\\' OR name LIKE ?1 ESCAPE '\\')
                   AND (?2 IS NULL OR type = ?2)
                 ORDER BY name
                 LIMIT ?3",
                ITEM_COLUMNS
            ),
            params![pattern, item_type.map(|t| t.as_str()), TEXT_SEARCH_LIMIT as i64],
        )
    }

    /// K nearest items by cosine distance, as `(item, 1 - distance)`
    pub fn vector_search(
        &self,
        query_vector: &[f32],
        limit: usize,
        item_type: Option<ItemType>,
    ) -> Result<Vec<(ContextItem, f64)>> {
        check_dimensions(query_vector)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {}, vec_distance_cosine(e.embedding, ?1) AS distance
             FROM context_embeddings e
             JOIN context_items i ON i.id = e.item_id
             WHERE (?3 IS NULL OR i.type = ?3)
             ORDER BY distance
             LIMIT ?2",
            QUALIFIED_ITEM_COLUMNS
        ))?;

        let results = stmt
            .query_map(
                params![vector_to_blob(query_vector), limit as i64, item_type.map(|t| t.as_str())],
                |row| {
                    let item = row_to_item(row)?;
                    let distance: f64 = row.get(9)?;
                    Ok((item, 1.0 - distance))
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(results)
    }

    /// Combined lexical and vector ranking
    pub fn hybrid_search(
        &self,
        query: &str,
        query_vector: Option<&[f32]>,
        options: &HybridOptions,
    ) -> Result<Vec<SearchHit>> {
        let text_results = self.text_search(query, options.item_type)?;
        let vector_results = match query_vector {
            Some(vector) => self.vector_search(vector, options.limit.max(1) * 2, options.item_type)?,
            None => Vec::new(),
        };
        debug!(
            "Hybrid search '{}': {} text, {} vector candidates",
            query,
            text_results.len(),
            vector_results.len()
        );
        Ok(search::fuse(text_results, vector_results, options.vector_weight, options.limit))
    }

    // ========== Embedding Operations ==========

    /// Store or replace the embedding for an existing item
    pub fn store_embedding(&self, item_id: &str, vector: &[f32]) -> Result<()> {
        check_dimensions(vector)?;
        if self.get_item(item_id)?.is_none() {
            return Err(Error::NotFound(item_id.to_string()));
        }
        let blob = vector_to_blob(vector);
        // vec0 has no update-in-place
        self.atomically(|conn| {
            delete_embedding_row(conn, item_id)?;
            conn.execute(
                "INSERT INTO context_embeddings (item_id, embedding) VALUES (?1, ?2)",
                params![item_id, blob],
            )?;
            Ok(())
        })
    }

    pub fn get_embedding(&self, item_id: &str) -> Result<Option<Vec<f32>>> {
        let blob: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT embedding FROM context_embeddings WHERE item_id = ?1",
                [item_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob.map(|b| blob_to_vector(&b)))
    }

    pub fn delete_embedding(&self, item_id: &str) -> Result<bool> {
        Ok(delete_embedding_row(&self.conn, item_id)? > 0)
    }

    /// Number of stored embeddings; 0 if the vector table is unavailable
    pub fn count_embeddings(&self) -> usize {
        match self
            .conn
            .query_row("SELECT COUNT(*) FROM context_embeddings", [], |row| row.get::<_, i64>(0))
        {
            Ok(count) => count as usize,
            Err(e) => {
                debug!("Embedding count unavailable: {}", e);
                0
            }
        }
    }

    pub fn items_without_embeddings(&self, limit: usize) -> Result<Vec<ContextItem>> {
        self.query_items(
            &format!(
                "SELECT {} FROM context_items
                 WHERE id NOT IN (SELECT item_id FROM context_embeddings)
                 ORDER BY type, name
                 LIMIT ?1",
                ITEM_COLUMNS
            ),
            [limit as i64],
        )
    }

    /// Ask `provider` for vectors of up to `limit` unembedded items and store them
    pub fn embed_missing(&self, provider: &dyn EmbeddingProvider, limit: usize) -> Result<usize> {
        if provider.dimensions() != EMBEDDING_DIMENSIONS {
            return Err(Error::DimensionMismatch {
                expected: EMBEDDING_DIMENSIONS,
                actual: provider.dimensions(),
            });
        }
        let items = self.items_without_embeddings(limit)?;
        if items.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = items.iter().map(ContextItem::embedding_text).collect();
        let vectors = provider.embed(&texts)?;
        if vectors.len() != items.len() {
            return Err(Error::Embedding(format!(
                "expected {} vectors, provider returned {}",
                items.len(),
                vectors.len()
            )));
        }

        self.transaction(|store| {
            for (item, vector) in items.iter().zip(&vectors) {
                store.store_embedding(&item.id, vector)?;
            }
            Ok(())
        })?;
        info!("Embedded {} items", items.len());
        Ok(items.len())
    }

    // ========== Knowledge Graph ==========

    /// Add an edge, or update weight/metadata if the triple already exists
    pub fn add_relation(
        &self,
        source_id: &str,
        target_id: &str,
        relation_type: RelationType,
        weight: Option<f64>,
        metadata: Option<&Metadata>,
    ) -> Result<Relation> {
        self.conn.execute(
            r#"
            INSERT INTO knowledge_graph (source_id, target_id, relation_type, weight, metadata, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(source_id, target_id, relation_type) DO UPDATE SET
                weight = excluded.weight,
                metadata = excluded.metadata
            "#,
            params![
                source_id,
                target_id,
                relation_type.as_str(),
                weight.unwrap_or(DEFAULT_WEIGHT),
                metadata,
                Utc::now(),
            ],
        )?;

        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM knowledge_graph
                     WHERE source_id = ?1 AND target_id = ?2 AND relation_type = ?3",
                    RELATION_COLUMNS
                ),
                params![source_id, target_id, relation_type.as_str()],
                row_to_relation,
            )
            .map_err(Into::into)
    }

    /// Outgoing edges, heaviest first
    pub fn get_relations_from(&self, id: &str, relation_type: Option<RelationType>) -> Result<Vec<Relation>> {
        self.query_relations("source_id", id, relation_type)
    }

    /// Incoming edges, heaviest first
    pub fn get_relations_to(&self, id: &str, relation_type: Option<RelationType>) -> Result<Vec<Relation>> {
        self.query_relations("target_id", id, relation_type)
    }

    fn query_relations(&self, column: &str, id: &str, relation_type: Option<RelationType>) -> Result<Vec<Relation>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM knowledge_graph
             WHERE {} = ?1 AND (?2 IS NULL OR relation_type = ?2)
             ORDER BY weight DESC",
            RELATION_COLUMNS, column
        ))?;
        let relations = stmt
            .query_map(params![id, relation_type.map(|t| t.as_str())], row_to_relation)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(relations)
    }

    pub fn delete_relation(&self, source_id: &str, target_id: &str, relation_type: RelationType) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM knowledge_graph WHERE source_id = ?1 AND target_id = ?2 AND relation_type = ?3",
            params![source_id, target_id, relation_type.as_str()],
        )?;
        Ok(deleted > 0)
    }

    pub fn count_relations(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM knowledge_graph", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Breadth-first walk over outgoing edges.
    ///
    /// Each item is visited once; items more than `max_depth` hops away are
    /// not expanded. An unknown start id yields an empty map.
    pub fn traverse_graph(&self, start_id: &str, max_depth: usize) -> Result<HashMap<String, TraversalNode>> {
        let mut visited = HashMap::new();
        let Some(start) = self.get_item(start_id)? else {
            return Ok(visited);
        };

        let mut seen = HashSet::from([start.id.clone()]);
        let mut queue = VecDeque::from([(start, 0usize)]);

        while let Some((item, depth)) = queue.pop_front() {
            let id = item.id.clone();
            visited.insert(id.clone(), TraversalNode { item, depth });
            if depth >= max_depth {
                continue;
            }
            for relation in self.get_relations_from(&id, None)? {
                if seen.insert(relation.target_id.clone()) {
                    if let Some(next) = self.get_item(&relation.target_id)? {
                        queue.push_back((next, depth + 1));
                    }
                }
            }
        }

        Ok(visited)
    }

    // ========== Commits ==========

    pub fn upsert_commit(&self, commit: &Commit) -> Result<()> {
        let files = serde_json::to_string(&commit.files_changed)?;
        self.conn.execute(
            r#"
            INSERT INTO git_commits (sha, message, author_name, author_email, committed_at, files_changed, stats, indexed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(sha) DO UPDATE SET
                message = excluded.message,
                author_name = excluded.author_name,
                author_email = excluded.author_email,
                committed_at = excluded.committed_at,
                files_changed = excluded.files_changed,
                stats = excluded.stats,
                indexed_at = excluded.indexed_at
            "#,
            params![
                commit.sha,
                commit.message,
                commit.author_name,
                commit.author_email,
                commit.committed_at,
                files,
                commit.stats,
                Utc::now(),
            ],
        )?;
        Ok(())
    }

    pub fn get_commit(&self, sha: &str) -> Result<Option<Commit>> {
        self.conn
            .query_row(
                "SELECT sha, message, author_name, author_email, committed_at, files_changed, stats
                 FROM git_commits WHERE sha = ?1",
                [sha],
                row_to_commit,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Most recent commits first
    pub fn get_commits(&self, limit: usize) -> Result<Vec<Commit>> {
        let mut stmt = self.conn.prepare(
            "SELECT sha, message, author_name, author_email, committed_at, files_changed, stats
             FROM git_commits
             ORDER BY committed_at DESC, indexed_at DESC
             LIMIT ?1",
        )?;
        let commits = stmt
            .query_map([limit as i64], row_to_commit)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(commits)
    }

    // ========== Tool Configs ==========

    pub fn upsert_tool_config(
        &self,
        tool: ToolId,
        config_type: &str,
        name: &str,
        content: &str,
        metadata: Option<&Metadata>,
        file_path: Option<&str>,
    ) -> Result<ToolConfig> {
        let id = format!("{}:{}:{}", tool.as_str(), item::slugify(config_type), item::slugify(name));
        self.conn.execute(
            r#"
            INSERT INTO tool_configs (id, tool, config_type, name, content, content_hash, file_path, metadata, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                content_hash = excluded.content_hash,
                file_path = excluded.file_path,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at
            "#,
            params![
                id,
                tool.as_str(),
                config_type,
                name,
                content,
                item::content_hash(content),
                file_path,
                metadata,
                Utc::now(),
            ],
        )?;
        self.get_tool_config(&id)?.ok_or(Error::NotFound(id))
    }

    pub fn get_tool_config(&self, id: &str) -> Result<Option<ToolConfig>> {
        self.conn
            .query_row(
                "SELECT id, tool, config_type, name, content, content_hash, file_path, metadata, updated_at
                 FROM tool_configs WHERE id = ?1",
                [id],
                row_to_tool_config,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn get_tool_configs(&self, tool: ToolId) -> Result<Vec<ToolConfig>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, tool, config_type, name, content, content_hash, file_path, metadata, updated_at
             FROM tool_configs WHERE tool = ?1 ORDER BY config_type, name",
        )?;
        let configs = stmt
            .query_map([tool.as_str()], row_to_tool_config)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(configs)
    }

    // ========== Sync State ==========

    /// Record the outcome of a sync attempt for a tool.
    ///
    /// `last_sync` only moves forward on `Synced`; a missing hash keeps the
    /// previously recorded one.
    pub fn update_sync_state(
        &self,
        tool: ToolId,
        status: SyncStatus,
        content_hash: Option<&str>,
        error_message: Option<&str>,
        metadata: Option<&Metadata>,
    ) -> Result<SyncState> {
        let last_sync = (status == SyncStatus::Synced).then(Utc::now);
        self.conn.execute(
            r#"
            INSERT INTO sync_state (tool, content_hash, last_sync, status, error_message, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(tool) DO UPDATE SET
                content_hash = COALESCE(excluded.content_hash, sync_state.content_hash),
                last_sync = COALESCE(excluded.last_sync, sync_state.last_sync),
                status = excluded.status,
                error_message = excluded.error_message,
                metadata = COALESCE(excluded.metadata, sync_state.metadata)
            "#,
            params![tool.as_str(), content_hash, last_sync, status.as_str(), error_message, metadata],
        )?;
        self.get_sync_state(tool)?
            .ok_or_else(|| Error::NotFound(format!("sync state for {}", tool)))
    }

    pub fn get_sync_state(&self, tool: ToolId) -> Result<Option<SyncState>> {
        self.conn
            .query_row(
                "SELECT tool, content_hash, last_sync, status, error_message, metadata
                 FROM sync_state WHERE tool = ?1",
                [tool.as_str()],
                row_to_sync_state,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn get_all_sync_states(&self) -> Result<Vec<SyncState>> {
        let mut stmt = self.conn.prepare(
            "SELECT tool, content_hash, last_sync, status, error_message, metadata
             FROM sync_state ORDER BY tool",
        )?;
        let states = stmt
            .query_map([], row_to_sync_state)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(states)
    }

    // ========== Version Tracking ==========

    /// Record that the engine just wrote `file_path` for `tool`
    pub fn update_version_tracking(
        &self,
        tool: ToolId,
        file_path: &str,
        content_hash: &str,
        engine_version: &str,
    ) -> Result<VersionTracking> {
        let now = Utc::now();
        self.conn.execute(
            r#"
            INSERT INTO version_tracking (tool, file_path, content_hash, engine_version, status, user_modified, last_synced, last_checked)
            VALUES (?1, ?2, ?3, ?4, 'synced', 0, ?5, ?5)
            ON CONFLICT(tool, file_path) DO UPDATE SET
                content_hash = excluded.content_hash,
                engine_version = excluded.engine_version,
                status = 'synced',
                user_modified = 0,
                last_synced = excluded.last_synced,
                last_checked = excluded.last_checked
            "#,
            params![tool.as_str(), file_path, content_hash, engine_version, now],
        )?;
        self.get_version_tracking(tool, file_path)?
            .ok_or_else(|| Error::NotFound(format!("version tracking for {}:{}", tool, file_path)))
    }

    pub fn get_version_tracking(&self, tool: ToolId, file_path: &str) -> Result<Option<VersionTracking>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM version_tracking WHERE tool = ?1 AND file_path = ?2",
                    VERSION_TRACKING_COLUMNS
                ),
                params![tool.as_str(), file_path],
                row_to_version_tracking,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn get_tool_version_tracking(&self, tool: ToolId) -> Result<Vec<VersionTracking>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM version_tracking WHERE tool = ?1 ORDER BY file_path",
            VERSION_TRACKING_COLUMNS
        ))?;
        let rows = stmt
            .query_map([tool.as_str()], row_to_version_tracking)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Flag a tool file as edited by the user.
    ///
    /// Stored hashes are left alone so later checks still compare against the
    /// last content the engine generated.
    pub fn mark_user_modified(&self, tool: ToolId, file_path: &str) -> Result<bool> {
        let now = Utc::now();
        self.atomically(|conn| {
            let tracked = conn.execute(
                "UPDATE version_tracking SET user_modified = 1, last_checked = ?3
                 WHERE tool = ?1 AND file_path = ?2",
                params![tool.as_str(), file_path, now],
            )?;
            let generated = conn.execute(
                "UPDATE generated_files SET user_modified = 1, last_verified = ?2 WHERE id = ?1",
                params![generated_file_id(tool, file_path), now],
            )?;
            Ok(tracked + generated > 0)
        })
    }

    // ========== Generated Files ==========

    /// Record provenance of a file just generated for a tool
    pub fn upsert_generated_file(
        &self,
        tool: ToolId,
        file_path: &str,
        content_hash: &str,
        backup_path: Option<&str>,
        metadata: Option<&Metadata>,
    ) -> Result<GeneratedFile> {
        let id = generated_file_id(tool, file_path);
        let now = Utc::now();
        self.conn.execute(
            r#"
            INSERT INTO generated_files (id, tool, file_path, content_hash, backup_path, generated_at, last_verified, user_modified, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, 0, ?7)
            ON CONFLICT(id) DO UPDATE SET
                content_hash = excluded.content_hash,
                backup_path = excluded.backup_path,
                generated_at = excluded.generated_at,
                last_verified = excluded.last_verified,
                user_modified = 0,
                metadata = excluded.metadata
            "#,
            params![id, tool.as_str(), file_path, content_hash, backup_path, now, metadata],
        )?;
        self.get_generated_file_info(tool, file_path)?
            .ok_or(Error::NotFound(id))
    }

    pub fn get_generated_file_info(&self, tool: ToolId, file_path: &str) -> Result<Option<GeneratedFile>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM generated_files WHERE id = ?1", GENERATED_FILE_COLUMNS),
                [generated_file_id(tool, file_path)],
                row_to_generated_file,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn get_all_generated_files(&self, tool: Option<ToolId>) -> Result<Vec<GeneratedFile>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM generated_files WHERE (?1 IS NULL OR tool = ?1) ORDER BY tool, file_path",
            GENERATED_FILE_COLUMNS
        ))?;
        let files = stmt
            .query_map([tool.map(|t| t.as_str())], row_to_generated_file)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    pub fn delete_generated_file(&self, tool: ToolId, file_path: &str) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM generated_files WHERE id = ?1",
            [generated_file_id(tool, file_path)],
        )?;
        Ok(deleted > 0)
    }

    /// Compare a generated file on disk against its recorded hash.
    ///
    /// A mismatch flags the file as user-modified. A missing file is reported
    /// with `current_hash: None` and is not flagged.
    pub fn check_drift(&self, tool: ToolId, file_path: &str, on_disk: &Path) -> Result<DriftReport> {
        let current_hash = match std::fs::read(on_disk) {
            Ok(bytes) => Some(item::hash_bytes(&bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(Error::resource(on_disk, e)),
        };

        let Some(recorded) = self.get_generated_file_info(tool, file_path)? else {
            return Ok(DriftReport {
                recorded_hash: None,
                current_hash,
                user_modified: false,
            });
        };

        let changed = current_hash
            .as_deref()
            .is_some_and(|hash| hash != recorded.content_hash);

        if changed && !recorded.user_modified {
            self.mark_user_modified(tool, file_path)?;
            debug!("Detected user edit to {} for {}", file_path, tool);
        } else {
            self.conn.execute(
                "UPDATE generated_files SET last_verified = ?2 WHERE id = ?1",
                params![recorded.id, Utc::now()],
            )?;
        }

        Ok(DriftReport {
            recorded_hash: Some(recorded.content_hash),
            current_hash,
            user_modified: recorded.user_modified || changed,
        })
    }

    // ========== Maintenance ==========

    /// Lightweight liveness probe
    pub fn health_check(&self) -> bool {
        !self.closed
            && self
                .conn
                .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .is_ok()
    }

    /// Rows from `PRAGMA integrity_check`; `["ok"]` when healthy
    pub fn integrity_check(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("PRAGMA integrity_check")?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn vacuum(&self) -> Result<()> {
        self.conn.execute_batch("VACUUM")?;
        Ok(())
    }

    pub fn reindex(&self) -> Result<()> {
        self.conn.execute_batch("REINDEX")?;
        Ok(())
    }

    pub fn stats(&self) -> Result<DbStats> {
        let mut items_by_type = std::collections::BTreeMap::new();
        {
            let mut stmt = self.conn.prepare("SELECT type, COUNT(*) FROM context_items GROUP BY type")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
            for row in rows {
                let (kind, count) = row?;
                items_by_type.insert(kind, count as usize);
            }
        }

        Ok(DbStats {
            items: self.count_items()?,
            items_by_type,
            relations: self.count_relations()?,
            embeddings: self.count_embeddings(),
            commits: self.count_rows("git_commits")?,
            tool_configs: self.count_rows("tool_configs")?,
            generated_files: self.count_rows("generated_files")?,
            schema_version: self.schema_version()?,
        })
    }

    fn count_rows(&self, table: &str) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Copy the live database to `dest` with SQLite's online backup API
    pub fn export_to(&self, dest: &Path) -> Result<()> {
        ensure_db_dir(dest)?;
        self.conn
            .backup(rusqlite::DatabaseName::Main, dest, None)?;
        Ok(())
    }

    /// Close the connection, copy the file to `dest`, reopen.
    ///
    /// In-memory stores fall back to [`Store::export_to`].
    pub fn backup(&mut self, dest: &Path) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return self.export_to(dest);
        };
        ensure_db_dir(dest)?;

        self.close_connection()?;
        let copied = std::fs::copy(&path, dest).map_err(|e| Error::resource(dest, e));
        self.reconnect(&path)?;
        copied?;

        info!("Backed up {} to {}", path.display(), dest.display());
        Ok(())
    }

    /// Swap the live file for `candidate` and reopen.
    ///
    /// `candidate` must already be verified readable. The connection is
    /// closed for the duration; errors after the swap are returned as-is.
    pub(crate) fn replace_database(&mut self, candidate: &Path) -> Result<()> {
        let path = self
            .path
            .clone()
            .ok_or_else(|| Error::Snapshot("cannot restore into an in-memory store".to_string()))?;

        self.close_connection()?;
        if let Err(e) = replace_file(candidate, &path) {
            // Live file untouched; bring the old connection back
            self.reconnect(&path)?;
            return Err(Error::resource(&path, e));
        }
        for suffix in ["-wal", "-shm", "-journal"] {
            let sidecar = PathBuf::from(format!("{}{}", path.display(), suffix));
            if sidecar.exists() {
                std::fs::remove_file(&sidecar).map_err(|e| Error::resource(&sidecar, e))?;
            }
        }

        self.reconnect(&path)?;
        self.initialize()?;
        Ok(())
    }

    /// Whether the store lost its file connection during a backup or restore
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn close_connection(&mut self) -> Result<()> {
        let conn = std::mem::replace(&mut self.conn, Connection::open_in_memory()?);
        self.closed = true;
        conn.close().map_err(|(_, e)| Error::Storage(e))
    }

    fn reconnect(&mut self, path: &Path) -> Result<()> {
        self.conn = Self::connect(path)?;
        self.closed = false;
        Ok(())
    }
}

/// Explicit transaction opened by [`Store::begin_transaction`]
pub struct TransactionHandle<'a> {
    store: &'a Store,
    finished: bool,
}

impl TransactionHandle<'_> {
    /// A failed COMMIT leaves the handle unfinished, so drop rolls back
    pub fn commit(mut self) -> Result<()> {
        self.store.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.store.conn.execute_batch("ROLLBACK")?;
        self.finished = true;
        Ok(())
    }
}

impl std::ops::Deref for TransactionHandle<'_> {
    type Target = Store;

    fn deref(&self) -> &Store {
        self.store
    }
}

impl Drop for TransactionHandle<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.store.rollback_quietly();
        }
    }
}

/// Rename, falling back to copy + remove across filesystems
fn replace_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
    }
}

fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn check_dimensions(vector: &[f32]) -> Result<()> {
    if vector.len() != EMBEDDING_DIMENSIONS {
        return Err(Error::DimensionMismatch {
            expected: EMBEDDING_DIMENSIONS,
            actual: vector.len(),
        });
    }
    Ok(())
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn delete_embedding_row(conn: &Connection, item_id: &str) -> Result<usize> {
    Ok(conn.execute("DELETE FROM context_embeddings WHERE item_id = ?1", [item_id])?)
}

fn conversion_error(column: usize, e: Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
}

pub(crate) fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<ContextItem> {
    let type_str: String = row.get(1)?;
    let item_type: ItemType = type_str.parse().map_err(|e| conversion_error(1, e))?;
    Ok(ContextItem {
        id: row.get(0)?,
        item_type,
        name: row.get(2)?,
        content: row.get(3)?,
        metadata: row.get(4)?,
        file_path: row.get(5)?,
        content_hash: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn row_to_relation(row: &rusqlite::Row) -> rusqlite::Result<Relation> {
    let kind: String = row.get(2)?;
    Ok(Relation {
        source_id: row.get(0)?,
        target_id: row.get(1)?,
        relation_type: kind.parse().map_err(|e| conversion_error(2, e))?,
        weight: row.get(3)?,
        metadata: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn row_to_commit(row: &rusqlite::Row) -> rusqlite::Result<Commit> {
    let files: String = row.get(5)?;
    let files_changed: Vec<String> = serde_json::from_str(&files)
        .map_err(|e| conversion_error(5, Error::Json(e)))?;
    Ok(Commit {
        sha: row.get(0)?,
        message: row.get(1)?,
        author_name: row.get(2)?,
        author_email: row.get(3)?,
        committed_at: row.get(4)?,
        files_changed,
        stats: row.get(6)?,
    })
}

fn row_to_tool(row: &rusqlite::Row, column: usize) -> rusqlite::Result<ToolId> {
    let tool: String = row.get(column)?;
    tool.parse().map_err(|e| conversion_error(column, e))
}

fn row_to_status(row: &rusqlite::Row, column: usize) -> rusqlite::Result<SyncStatus> {
    let status: String = row.get(column)?;
    status.parse().map_err(|e| conversion_error(column, e))
}

fn row_to_tool_config(row: &rusqlite::Row) -> rusqlite::Result<ToolConfig> {
    Ok(ToolConfig {
        id: row.get(0)?,
        tool: row_to_tool(row, 1)?,
        config_type: row.get(2)?,
        name: row.get(3)?,
        content: row.get(4)?,
        content_hash: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        file_path: row.get(6)?,
        metadata: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn row_to_sync_state(row: &rusqlite::Row) -> rusqlite::Result<SyncState> {
    Ok(SyncState {
        tool: row_to_tool(row, 0)?,
        content_hash: row.get(1)?,
        last_sync: row.get(2)?,
        status: row_to_status(row, 3)?,
        error_message: row.get(4)?,
        metadata: row.get(5)?,
    })
}

fn row_to_version_tracking(row: &rusqlite::Row) -> rusqlite::Result<VersionTracking> {
    Ok(VersionTracking {
        tool: row_to_tool(row, 0)?,
        file_path: row.get(1)?,
        content_hash: row.get(2)?,
        engine_version: row.get(3)?,
        status: row_to_status(row, 4)?,
        user_modified: row.get(5)?,
        last_synced: row.get(6)?,
        last_checked: row.get(7)?,
    })
}

fn row_to_generated_file(row: &rusqlite::Row) -> rusqlite::Result<GeneratedFile> {
    Ok(GeneratedFile {
        id: row.get(0)?,
        tool: row_to_tool(row, 1)?,
        file_path: row.get(2)?,
        content_hash: row.get(3)?,
        backup_path: row.get(4)?,
        generated_at: row.get(5)?,
        last_verified: row.get(6)?,
        user_modified: row.get(7)?,
        metadata: row.get(8)?,
    })
}
