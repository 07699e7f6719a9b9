//! Forward-only schema migrations
//!
//! Each unit carries a SQL body from `migrations/`, an optional data
//! transform, a breaking flag and the versions it depends on. Pending units
//! are applied in ascending version order, one transaction per unit. A failed
//! unit rolls back its own transaction and halts the run; everything applied
//! before it stays committed.
//!
//! There are no down-migrations. Rolling back means restoring a snapshot
//! taken before the upgrade.
//!
//! Every attempt is appended to `migration_history`, which is never edited.

use super::schema::{self, BASELINE_VERSION, SCHEMA_VERSION};
use crate::item;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Data transform run inside a unit's transaction after its SQL body
pub type DataTransform = fn(&Connection) -> Result<()>;

/// A single versioned schema change
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: &'static str,
    pub description: &'static str,
    pub breaking: bool,
    /// Versions that must be applied before this one
    pub depends_on: &'static [&'static str],
    pub sql: &'static str,
    pub transform: Option<DataTransform>,
}

impl Migration {
    /// SHA-256 of the SQL body
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.sql.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn parsed_version(&self) -> Result<SchemaVersion> {
        self.version.parse()
    }
}

/// Every migration unit shipped with this engine
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "1.1.0",
        description: "Add version tracking and generated file provenance",
        breaking: false,
        depends_on: &[],
        sql: include_str!("migrations/v1_1_0.sql"),
        transform: None,
    },
    Migration {
        version: "1.2.0",
        description: "Track content hashes on tool configs",
        breaking: false,
        depends_on: &[],
        sql: include_str!("migrations/v1_2_0.sql"),
        transform: None,
    },
    Migration {
        version: "1.3.0",
        description: "Record sync error details",
        breaking: false,
        depends_on: &[],
        sql: include_str!("migrations/v1_3_0.sql"),
        transform: None,
    },
    Migration {
        version: "1.4.0",
        description: "Index items by file path and update time, backfill content hashes",
        breaking: false,
        depends_on: &[],
        sql: include_str!("migrations/v1_4_0.sql"),
        transform: Some(backfill_content_hashes),
    },
    Migration {
        version: "1.5.0",
        description: "Move user-modified tracking onto version tracking",
        breaking: true,
        depends_on: &["1.1.0"],
        sql: include_str!("migrations/v1_5_0.sql"),
        transform: None,
    },
];

/// Items written before hashes were mandatory get one now
fn backfill_content_hashes(conn: &Connection) -> Result<()> {
    let rows: Vec<(String, String)> = {
        let mut stmt = conn.prepare("SELECT id, content FROM context_items WHERE content_hash IS NULL")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };

    for (id, content) in &rows {
        conn.execute(
            "UPDATE context_items SET content_hash = ?1 WHERE id = ?2",
            params![item::content_hash(content), id],
        )?;
    }
    debug!("Backfilled {} content hashes", rows.len());
    Ok(())
}

/// Semantic `major.minor.patch` version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FromStr for SchemaVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidValue(format!("Invalid schema version: {}", s));
        let mut parts = s.trim().trim_start_matches('v').split('.');
        let mut next = || -> Result<u32> {
            parts.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())
        };
        let version = SchemaVersion {
            major: next()?,
            minor: next()?,
            patch: next()?,
        };
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl std::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Lifecycle of a unit during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    Pending,
    Applying,
    Applied,
    Failed,
}

/// Progress notification handed to the caller's callback
#[derive(Debug, Clone)]
pub struct MigrationEvent {
    pub version: String,
    pub description: String,
    /// Zero-based position in this run
    pub index: usize,
    pub total: usize,
    pub state: MigrationState,
}

/// Options for [`MigrationRunner::run`]
#[derive(Default, Clone, Copy)]
pub struct MigrateOptions<'a> {
    /// Compute the plan without executing anything
    pub dry_run: bool,
    /// Skip dependency validation (recovery only)
    pub force: bool,
    pub progress: Option<&'a dyn Fn(&MigrationEvent)>,
}

impl<'a> MigrateOptions<'a> {
    fn notify(&self, unit: &Migration, index: usize, total: usize, state: MigrationState) {
        if let Some(progress) = self.progress {
            progress(&MigrationEvent {
                version: unit.version.to_string(),
                description: unit.description.to_string(),
                index,
                total,
                state,
            });
        }
    }
}

/// A unit selected for application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMigration {
    pub version: String,
    pub description: String,
    pub checksum: String,
    pub breaking: bool,
}

impl From<&Migration> for PlannedMigration {
    fn from(unit: &Migration) -> Self {
        Self {
            version: unit.version.to_string(),
            description: unit.description.to_string(),
            checksum: unit.checksum(),
            breaking: unit.breaking,
        }
    }
}

/// A row of `migration_history`
#[derive(Debug, Clone)]
pub struct AppliedMigration {
    pub version: String,
    pub description: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub success: bool,
}

/// Snapshot of where the schema stands
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    pub current: Option<String>,
    pub target: String,
    pub pending: Vec<PlannedMigration>,
    /// Successful units only; failed attempts stay in [`MigrationRunner::history`]
    pub applied: Vec<AppliedMigration>,
}

impl MigrationStatus {
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty() && self.current.as_deref() == Some(self.target.as_str())
    }
}

/// Outcome of a run
#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub from: Option<String>,
    pub to: Option<String>,
    pub planned: Vec<PlannedMigration>,
    pub applied: Vec<String>,
    pub dry_run: bool,
}

/// A history entry whose checksum no longer matches the shipped unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumMismatch {
    pub version: String,
    pub recorded: String,
    pub expected: String,
}

/// Applies pending migration units to a connection
pub struct MigrationRunner<'c> {
    conn: &'c Connection,
    units: Vec<Migration>,
    target: SchemaVersion,
}

impl<'c> MigrationRunner<'c> {
    /// Runner over the units shipped with this engine
    pub fn new(conn: &'c Connection) -> Result<Self> {
        Self::with_units(conn, MIGRATIONS.to_vec(), SCHEMA_VERSION)
    }

    /// Runner over an explicit set of units and target version
    pub fn with_units(conn: &'c Connection, mut units: Vec<Migration>, target: &str) -> Result<Self> {
        let target: SchemaVersion = target.parse()?;
        for unit in &units {
            unit.parsed_version()?;
        }
        units.sort_by_key(|unit| unit.parsed_version().ok());
        Ok(Self { conn, units, target })
    }

    pub fn target(&self) -> SchemaVersion {
        self.target
    }

    /// Create the bookkeeping tables if missing
    pub fn ensure_tables(&self) -> Result<()> {
        for stmt in schema::migration_schema_statements() {
            self.conn.execute(stmt, [])?;
        }
        Ok(())
    }

    /// Highest version recorded in `schema_version`
    pub fn current_version(&self) -> Result<Option<SchemaVersion>> {
        let mut stmt = self.conn.prepare("SELECT version FROM schema_version")?;
        let versions = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut highest = None;
        for version in versions {
            let parsed: SchemaVersion = version.parse()?;
            if highest.is_none_or(|h| parsed > h) {
                highest = Some(parsed);
            }
        }
        Ok(highest)
    }

    /// All history rows, oldest first
    pub fn history(&self) -> Result<Vec<AppliedMigration>> {
        let mut stmt = self.conn.prepare(
            "SELECT version, description, checksum, applied_at, duration_ms, success
             FROM migration_history ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(AppliedMigration {
                    version: row.get(0)?,
                    description: row.get(1)?,
                    checksum: row.get(2)?,
                    applied_at: row.get(3)?,
                    duration_ms: row.get(4)?,
                    success: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Units newer than `current` and not beyond the target
    fn pending_after(&self, current: SchemaVersion) -> Vec<Migration> {
        self.units
            .iter()
            .filter(|unit| {
                unit.parsed_version()
                    .map(|v| v > current && v <= self.target)
                    .unwrap_or(false)
            })
            .copied()
            .collect()
    }

    pub fn pending(&self) -> Result<Vec<PlannedMigration>> {
        let current = self.current_version()?.unwrap_or(BASELINE_VERSION.parse()?);
        Ok(self.pending_after(current).iter().map(PlannedMigration::from).collect())
    }

    pub fn status(&self) -> Result<MigrationStatus> {
        Ok(MigrationStatus {
            current: self.current_version()?.map(|v| v.to_string()),
            target: self.target.to_string(),
            pending: self.pending()?,
            applied: self.history()?.into_iter().filter(|h| h.success).collect(),
        })
    }

    /// Stamp a freshly created database at the target version.
    ///
    /// The full schema was just created, so nothing is replayed; each unit is
    /// recorded as applied so later dependency checks see it.
    pub fn stamp_baseline(&self) -> Result<()> {
        self.ensure_tables()?;
        if self.current_version()?.is_some() {
            return Ok(());
        }

        let tx = self.conn.unchecked_transaction()?;
        let now = Utc::now();
        for unit in &self.units {
            if unit.parsed_version()? <= self.target {
                insert_history(&tx, unit.version, unit.description, &unit.checksum(), now, 0, true)?;
            }
        }
        tx.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            params![self.target.to_string(), now],
        )?;
        tx.commit()?;

        info!("Initialized fresh database at schema {}", self.target);
        Ok(())
    }

    /// Apply every pending unit in ascending order
    pub fn run(&self, options: &MigrateOptions<'_>) -> Result<MigrationReport> {
        self.ensure_tables()?;
        let recorded = self.current_version()?;
        let baseline: SchemaVersion = BASELINE_VERSION.parse()?;
        let mut reached = recorded.unwrap_or(baseline);
        let pending = self.pending_after(reached);

        let mut report = MigrationReport {
            from: recorded.map(|v| v.to_string()),
            to: recorded.map(|v| v.to_string()),
            planned: pending.iter().map(PlannedMigration::from).collect(),
            applied: Vec::new(),
            dry_run: options.dry_run,
        };

        if options.dry_run {
            debug!("Dry run: {} pending migrations", pending.len());
            return Ok(report);
        }

        if recorded.is_none() {
            // Database predates version tracking
            let now = Utc::now();
            insert_history(self.conn, BASELINE_VERSION, "Legacy database baseline", "", now, 0, true)?;
            self.conn.execute(
                "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![BASELINE_VERSION, now],
            )?;
            report.to = Some(BASELINE_VERSION.to_string());
        }

        let total = pending.len();
        for (index, unit) in pending.iter().enumerate() {
            options.notify(unit, index, total, MigrationState::Applying);

            if !options.force {
                if let Err(e) = self.check_dependencies(unit, reached) {
                    options.notify(unit, index, total, MigrationState::Failed);
                    return Err(e);
                }
            }

            let started = Instant::now();
            match self.apply_unit(unit, &started) {
                Ok(()) => {
                    reached = unit.parsed_version()?;
                    report.applied.push(unit.version.to_string());
                    report.to = Some(unit.version.to_string());
                    info!(
                        "Applied migration {} ({}) in {}ms",
                        unit.version,
                        unit.description,
                        started.elapsed().as_millis()
                    );
                    options.notify(unit, index, total, MigrationState::Applied);
                }
                Err(e) => {
                    let duration = started.elapsed().as_millis() as i64;
                    insert_history(
                        self.conn,
                        unit.version,
                        unit.description,
                        &unit.checksum(),
                        Utc::now(),
                        duration,
                        false,
                    )?;
                    warn!("Migration {} failed: {}", unit.version, e);
                    options.notify(unit, index, total, MigrationState::Failed);
                    return Err(Error::Migration {
                        version: unit.version.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if reached < self.target {
            // Target moved without a schema change
            self.conn.execute(
                "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![self.target.to_string(), Utc::now()],
            )?;
            report.to = Some(self.target.to_string());
        }

        Ok(report)
    }

    fn check_dependencies(&self, unit: &Migration, reached: SchemaVersion) -> Result<()> {
        for dep in unit.depends_on {
            let dep_version: SchemaVersion = dep.parse()?;
            if dep_version <= reached {
                continue;
            }
            let applied: Option<i64> = self
                .conn
                .query_row(
                    "SELECT 1 FROM migration_history WHERE version = ?1 AND success = 1 LIMIT 1",
                    [dep],
                    |row| row.get(0),
                )
                .optional()?;
            if applied.is_none() {
                return Err(Error::Migration {
                    version: unit.version.to_string(),
                    reason: format!("dependency {} has not been applied", dep),
                });
            }
        }
        Ok(())
    }

    fn apply_unit(&self, unit: &Migration, started: &Instant) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(unit.sql)?;
        if let Some(transform) = unit.transform {
            transform(&tx)?;
        }
        let now = Utc::now();
        tx.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            params![unit.version, now],
        )?;
        insert_history(
            &tx,
            unit.version,
            unit.description,
            &unit.checksum(),
            now,
            started.elapsed().as_millis() as i64,
            true,
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Compare recorded checksums against the shipped units
    pub fn verify_checksums(&self) -> Result<Vec<ChecksumMismatch>> {
        let mut mismatches = Vec::new();
        for entry in self.history()?.into_iter().filter(|e| e.success) {
            if let Some(unit) = self.units.iter().find(|u| u.version == entry.version) {
                let expected = unit.checksum();
                if entry.checksum != expected {
                    mismatches.push(ChecksumMismatch {
                        version: entry.version,
                        recorded: entry.checksum,
                        expected,
                    });
                }
            }
        }
        Ok(mismatches)
    }
}

fn insert_history(
    conn: &Connection,
    version: &str,
    description: &str,
    checksum: &str,
    applied_at: DateTime<Utc>,
    duration_ms: i64,
    success: bool,
) -> Result<()> {
    conn.execute(
        "INSERT INTO migration_history (version, description, checksum, applied_at, duration_ms, success)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![version, description, checksum, applied_at, duration_ms, success],
    )?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Tables as they looked before versions were recorded
    pub(crate) const LEGACY_SCHEMA: &str = r#"
        CREATE TABLE context_items (
            id TEXT PRIMARY KEY,
            type TEXT NOT NULL,
            name TEXT NOT NULL,
            content TEXT NOT NULL,
            metadata TEXT,
            file_path TEXT,
            content_hash TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE knowledge_graph (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id TEXT NOT NULL REFERENCES context_items(id) ON DELETE CASCADE,
            target_id TEXT NOT NULL REFERENCES context_items(id) ON DELETE CASCADE,
            relation_type TEXT NOT NULL,
            weight REAL NOT NULL DEFAULT 1.0,
            metadata TEXT,
            created_at TEXT NOT NULL,
            UNIQUE(source_id, target_id, relation_type)
        );
        CREATE TABLE git_commits (
            sha TEXT PRIMARY KEY,
            message TEXT NOT NULL,
            author_name TEXT,
            author_email TEXT,
            committed_at TEXT,
            files_changed TEXT NOT NULL DEFAULT '[]',
            stats TEXT,
            indexed_at TEXT NOT NULL
        );
        CREATE TABLE tool_configs (
            id TEXT PRIMARY KEY,
            tool TEXT NOT NULL,
            config_type TEXT NOT NULL,
            name TEXT NOT NULL,
            content TEXT NOT NULL,
            file_path TEXT,
            metadata TEXT,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE sync_state (
            tool TEXT PRIMARY KEY,
            content_hash TEXT,
            last_sync TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            metadata TEXT
        );
        INSERT INTO context_items (id, type, name, content, created_at, updated_at)
        VALUES ('code:legacy', 'code', 'legacy', 'fn legacy() {}', '2024-01-01 00:00:00+00:00', '2024-01-01 00:00:00+00:00');
    "#;

    fn legacy_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(LEGACY_SCHEMA).unwrap();
        conn
    }

    fn column_exists(conn: &Connection, table: &str, column: &str) -> bool {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table)).unwrap();
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(1))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        names.iter().any(|n| n == column)
    }

    const GOOD_A: Migration = Migration {
        version: "1.1.0",
        description: "create a",
        breaking: false,
        depends_on: &[],
        sql: "CREATE TABLE a (x INTEGER);",
        transform: None,
    };
    const BROKEN_B: Migration = Migration {
        version: "1.2.0",
        description: "broken b",
        breaking: false,
        depends_on: &[],
        sql: "CREATE TABLE b (x INTEGER); INSERT INTO no_such_table VALUES (1);",
        transform: None,
    };
    const GOOD_C: Migration = Migration {
        version: "1.3.0",
        description: "create c",
        breaking: false,
        depends_on: &[],
        sql: "CREATE TABLE c (x INTEGER);",
        transform: None,
    };

    #[test]
    fn test_version_parsing_and_order() {
        let a: SchemaVersion = "1.5.0".parse().unwrap();
        let b: SchemaVersion = "1.10.0".parse().unwrap();
        assert!(a < b);
        assert_eq!(a.to_string(), "1.5.0");
        assert!("1.5".parse::<SchemaVersion>().is_err());
        assert!("1.5.0.1".parse::<SchemaVersion>().is_err());
    }

    #[test]
    fn test_shipped_units_are_ordered_and_reach_target() {
        let versions: Vec<SchemaVersion> = MIGRATIONS.iter().map(|m| m.parsed_version().unwrap()).collect();
        let mut sorted = versions.clone();
        sorted.sort();
        assert_eq!(versions, sorted);
        assert_eq!(versions.last().unwrap().to_string(), SCHEMA_VERSION);
    }

    #[test]
    fn test_fresh_database_is_stamped() {
        let conn = Connection::open_in_memory().unwrap();
        for stmt in schema::core_schema_statements() {
            conn.execute(stmt, []).unwrap();
        }
        let runner = MigrationRunner::new(&conn).unwrap();
        runner.stamp_baseline().unwrap();

        let status = runner.status().unwrap();
        assert_eq!(status.current.as_deref(), Some(SCHEMA_VERSION));
        assert!(status.pending.is_empty());
        assert_eq!(status.applied.len(), MIGRATIONS.len());
        assert!(status.is_up_to_date());

        // Stamping twice records nothing new
        runner.stamp_baseline().unwrap();
        assert_eq!(runner.history().unwrap().len(), MIGRATIONS.len());
    }

    #[test]
    fn test_legacy_database_upgrades_to_target() {
        let conn = legacy_conn();
        let runner = MigrationRunner::new(&conn).unwrap();

        let report = runner.run(&MigrateOptions::default()).unwrap();
        assert_eq!(report.from, None);
        assert_eq!(report.to.as_deref(), Some(SCHEMA_VERSION));
        assert_eq!(report.applied.len(), MIGRATIONS.len());

        assert!(column_exists(&conn, "tool_configs", "content_hash"));
        assert!(column_exists(&conn, "sync_state", "error_message"));
        assert!(column_exists(&conn, "version_tracking", "user_modified"));

        let hash: String = conn
            .query_row("SELECT content_hash FROM context_items WHERE id = 'code:legacy'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(hash, item::content_hash("fn legacy() {}"));

        // legacy baseline row + one row per unit
        let history = runner.history().unwrap();
        assert_eq!(history.len(), MIGRATIONS.len() + 1);
        assert_eq!(history[0].version, BASELINE_VERSION);

        // A second run is a no-op
        let again = runner.run(&MigrateOptions::default()).unwrap();
        assert!(again.applied.is_empty());
    }

    #[test]
    fn test_failed_unit_halts_the_run() {
        let conn = legacy_conn();
        let runner = MigrationRunner::with_units(&conn, vec![GOOD_C, BROKEN_B, GOOD_A], "1.3.0").unwrap();

        let err = runner.run(&MigrateOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Migration { ref version, .. } if version == "1.2.0"));

        assert_eq!(runner.current_version().unwrap().unwrap().to_string(), "1.1.0");
        let b_exists: i64 = conn
            .query_row("SELECT COUNT(*) FROM sqlite_master WHERE name IN ('b', 'c')", [], |row| row.get(0))
            .unwrap();
        assert_eq!(b_exists, 0);

        let failed: Vec<_> = runner.history().unwrap().into_iter().filter(|h| !h.success).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].version, "1.2.0");

        let status = runner.status().unwrap();
        assert!(status.applied.iter().all(|h| h.success));
        assert!(!status.applied.iter().any(|h| h.version == "1.2.0"));
        assert!(status.applied.iter().any(|h| h.version == "1.1.0"));
    }

    #[test]
    fn test_dry_run_changes_nothing() {
        let conn = legacy_conn();
        let runner = MigrationRunner::new(&conn).unwrap();
        let report = runner
            .run(&MigrateOptions { dry_run: true, ..Default::default() })
            .unwrap();

        assert!(report.dry_run);
        assert_eq!(report.planned.len(), MIGRATIONS.len());
        assert_eq!(report.planned[0].checksum, MIGRATIONS[0].checksum());
        assert!(runner.current_version().unwrap().is_none());
        assert!(!column_exists(&conn, "tool_configs", "content_hash"));
    }

    #[test]
    fn test_missing_dependency_requires_force() {
        let needs_missing = Migration {
            version: "1.2.0",
            description: "needs 1.1.5",
            breaking: false,
            depends_on: &["1.1.5"],
            sql: "CREATE TABLE d (x INTEGER);",
            transform: None,
        };

        let conn = legacy_conn();
        let runner = MigrationRunner::with_units(&conn, vec![needs_missing], "1.2.0").unwrap();
        assert!(runner.run(&MigrateOptions::default()).is_err());

        let report = runner.run(&MigrateOptions { force: true, ..Default::default() }).unwrap();
        assert_eq!(report.applied, vec!["1.2.0".to_string()]);
    }

    #[test]
    fn test_progress_callback_sees_each_unit() {
        let events = RefCell::new(Vec::new());
        let record = |e: &MigrationEvent| events.borrow_mut().push((e.version.clone(), e.state));

        let conn = legacy_conn();
        let runner = MigrationRunner::with_units(&conn, vec![GOOD_A, GOOD_C], "1.3.0").unwrap();
        runner
            .run(&MigrateOptions { progress: Some(&record), ..Default::default() })
            .unwrap();

        let events = events.into_inner();
        assert_eq!(
            events,
            vec![
                ("1.1.0".to_string(), MigrationState::Applying),
                ("1.1.0".to_string(), MigrationState::Applied),
                ("1.3.0".to_string(), MigrationState::Applying),
                ("1.3.0".to_string(), MigrationState::Applied),
            ]
        );
    }

    #[test]
    fn test_checksum_drift_is_reported() {
        let conn = legacy_conn();
        let runner = MigrationRunner::new(&conn).unwrap();
        runner.run(&MigrateOptions::default()).unwrap();
        assert!(runner.verify_checksums().unwrap().is_empty());

        conn.execute("UPDATE migration_history SET checksum = 'tampered' WHERE version = '1.2.0'", [])
            .unwrap();
        let mismatches = runner.verify_checksums().unwrap();
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].version, "1.2.0");
    }
}
