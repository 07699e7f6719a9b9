//! Snapshot Manager - point-in-time copies of the whole database
//!
//! A snapshot is `<id>.db` or `<id>.db.gz` plus a `<id>.meta.json` sidecar in
//! the snapshots directory. Snapshots are produced with SQLite's online
//! backup API, so they never capture a half-written page.

use crate::item;
use crate::storage::migrations::SchemaVersion;
use crate::storage::sqlite::register_vector_extension;
use crate::storage::{Store, SCHEMA_VERSION};
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

const DB_EXTENSION: &str = ".db";
const GZ_EXTENSION: &str = ".db.gz";
const META_EXTENSION: &str = ".meta.json";
const ID_SUFFIX_LEN: usize = 6;

/// Sidecar metadata describing one snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub item_count: usize,
    pub engine_version: String,
    pub schema_version: Option<String>,
    /// Source-control revision of the project when the snapshot was taken
    pub revision: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub automatic: bool,
    #[serde(default)]
    pub compressed: bool,
    /// Location of the data file; not persisted
    #[serde(skip)]
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub name: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub compress: bool,
    pub include_revision: bool,
    pub automatic: bool,
}

impl CreateOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            name: "snapshot".to_string(),
            description: None,
            tags: Vec::new(),
            compress: true,
            include_revision: false,
            automatic: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RestoreOptions {
    /// Accept a snapshot written by a newer schema
    pub force: bool,
    /// Snapshot the current database before replacing it
    pub backup_before_restore: bool,
    /// Probe the reopened database with `SELECT 1`
    pub verify: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            force: false,
            backup_before_restore: true,
            verify: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    pub restored_from: PathBuf,
    /// Safety snapshot taken before the swap, if requested
    pub safety_snapshot: Option<SnapshotMetadata>,
}

/// How [`SnapshotManager::diff`] decides an item changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DiffPolicy {
    /// Same id with a different type or name
    #[default]
    Identity,
    /// Identity plus content hash
    ContentHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub id: String,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
    pub unchanged: usize,
    /// Every change ordered by id
    pub changes: Vec<Change>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Item fields compared by diff
#[derive(Debug, Clone, PartialEq)]
struct ItemFingerprint {
    item_type: String,
    name: String,
    content_hash: String,
}

pub struct SnapshotManager {
    dir: PathBuf,
}

impl SnapshotManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| Error::resource(&self.dir, e))
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}{}", id, META_EXTENSION))
    }

    fn data_path(&self, id: &str) -> Result<Option<PathBuf>> {
        validate_id(id)?;
        Ok([GZ_EXTENSION, DB_EXTENSION]
            .iter()
            .map(|ext| self.dir.join(format!("{}{}", id, ext)))
            .find(|path| path.exists()))
    }

    /// Export the live database into a new snapshot
    pub fn create(&self, store: &Store, options: &CreateOptions) -> Result<SnapshotMetadata> {
        self.ensure_dir()?;
        let id = generate_id();
        let stats = store.stats()?;

        let staging = NamedTempFile::new_in(&self.dir).map_err(|e| Error::resource(&self.dir, e))?;
        store.export_to(staging.path())?;

        let data_path = if options.compress {
            let dest = self.dir.join(format!("{}{}", id, GZ_EXTENSION));
            compress_file(staging.path(), &dest)?;
            dest
        } else {
            let dest = self.dir.join(format!("{}{}", id, DB_EXTENSION));
            staging
                .persist(&dest)
                .map_err(|e| Error::resource(&dest, e.error))?;
            dest
        };

        let size_bytes = std::fs::metadata(&data_path)
            .map_err(|e| Error::resource(&data_path, e))?
            .len();

        let metadata = SnapshotMetadata {
            id: id.clone(),
            name: options.name.clone(),
            description: options.description.clone(),
            created_at: Utc::now(),
            size_bytes,
            item_count: stats.items,
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            schema_version: stats.schema_version,
            revision: if options.include_revision { current_git_revision() } else { None },
            tags: options.tags.clone(),
            automatic: options.automatic,
            compressed: options.compress,
            path: data_path,
        };
        self.write_metadata(&metadata)?;

        info!(
            "Created snapshot {} ({} items, {} bytes)",
            metadata.id, metadata.item_count, metadata.size_bytes
        );
        Ok(metadata)
    }

    /// Snapshot tagged as automatic, taken before a risky operation
    pub fn create_automatic(&self, store: &Store, reason: &str) -> Result<SnapshotMetadata> {
        let options = CreateOptions {
            name: format!("auto-{}", item::slugify(reason)),
            description: Some(format!("Automatic snapshot before {}", reason)),
            tags: vec!["automatic".to_string(), reason.to_string()],
            automatic: true,
            ..Default::default()
        };
        self.create(store, &options)
    }

    fn write_metadata(&self, metadata: &SnapshotMetadata) -> Result<()> {
        let path = self.meta_path(&metadata.id);
        let json = serde_json::to_string_pretty(metadata)?;
        std::fs::write(&path, json).map_err(|e| Error::resource(&path, e))
    }

    fn read_metadata(&self, id: &str, data_path: &Path) -> Result<SnapshotMetadata> {
        let meta_path = self.meta_path(id);
        let sidecar = std::fs::read_to_string(&meta_path)
            .map_err(Error::from)
            .and_then(|json| serde_json::from_str::<SnapshotMetadata>(&json).map_err(Error::from));

        match sidecar {
            Ok(mut metadata) => {
                metadata.path = data_path.to_path_buf();
                Ok(metadata)
            }
            Err(e) => {
                debug!("Snapshot {} has no usable metadata ({}), using file info", id, e);
                fallback_metadata(id, data_path)
            }
        }
    }

    /// All snapshots, newest first
    pub fn list(&self) -> Result<Vec<SnapshotMetadata>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut snapshots = Vec::new();
        let entries = std::fs::read_dir(&self.dir).map_err(|e| Error::resource(&self.dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| Error::resource(&self.dir, e))?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let id = file_name
                .strip_suffix(GZ_EXTENSION)
                .or_else(|| file_name.strip_suffix(DB_EXTENSION));
            // Only files named like generated ids; a live database sharing
            // the directory must never be listed or pruned
            if let Some(id) = id.filter(|id| is_snapshot_id(id)) {
                snapshots.push(self.read_metadata(id, &path)?);
            }
        }

        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(snapshots)
    }

    pub fn get(&self, id: &str) -> Result<Option<SnapshotMetadata>> {
        match self.data_path(id)? {
            Some(path) => self.read_metadata(id, &path).map(Some),
            None => Ok(None),
        }
    }

    /// Replace the live database with a snapshot.
    ///
    /// The snapshot is decompressed next to the live file and checked before
    /// anything is replaced; a bad snapshot leaves the live database as it was.
    pub fn restore(&self, store: &mut Store, snapshot: &Path, options: &RestoreOptions) -> Result<RestoreOutcome> {
        if !snapshot.exists() {
            return Err(Error::Snapshot(format!("snapshot not found: {}", snapshot.display())));
        }
        let live = store
            .path()
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::Snapshot("cannot restore into an in-memory store".to_string()))?;

        let safety_snapshot = if options.backup_before_restore {
            Some(self.create_automatic(store, "restore")?)
        } else {
            None
        };

        let staging_dir = live
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let candidate = materialize(snapshot, staging_dir)?;
        verify_candidate(candidate.path(), options.force)?;

        let candidate = candidate.into_temp_path();
        store.replace_database(&candidate)?;

        if options.verify && !store.health_check() {
            return Err(Error::Snapshot(format!(
                "restored database at {} failed verification",
                live.display()
            )));
        }

        info!("Restored {} from {}", live.display(), snapshot.display());
        Ok(RestoreOutcome {
            restored_from: snapshot.to_path_buf(),
            safety_snapshot,
        })
    }

    pub fn restore_by_id(&self, store: &mut Store, id: &str, options: &RestoreOptions) -> Result<RestoreOutcome> {
        let path = self
            .data_path(id)?
            .ok_or_else(|| Error::NotFound(format!("snapshot {}", id)))?;
        self.restore(store, &path, options)
    }

    /// Remove a snapshot's data file and sidecar; `false` if nothing existed
    pub fn delete(&self, id: &str) -> Result<bool> {
        validate_id(id)?;
        let mut removed = false;
        for path in [
            self.dir.join(format!("{}{}", id, GZ_EXTENSION)),
            self.dir.join(format!("{}{}", id, DB_EXTENSION)),
            self.meta_path(id),
        ] {
            if path.exists() {
                std::fs::remove_file(&path).map_err(|e| Error::resource(&path, e))?;
                removed = true;
            }
        }
        if removed {
            info!("Deleted snapshot {}", id);
        }
        Ok(removed)
    }

    /// Compare the items of two snapshots
    pub fn diff(&self, from_id: &str, to_id: &str, policy: DiffPolicy) -> Result<SnapshotDiff> {
        let from = self.load_fingerprints(from_id)?;
        let to = self.load_fingerprints(to_id)?;

        let mut diff = SnapshotDiff::default();
        for (id, before) in &from {
            match to.get(id) {
                None => diff.removed.push(id.clone()),
                Some(after) if is_modified(before, after, policy) => diff.modified.push(id.clone()),
                Some(_) => diff.unchanged += 1,
            }
        }
        diff.added = to.keys().filter(|id| !from.contains_key(*id)).cloned().collect();

        let mut changes: Vec<Change> = diff
            .added
            .iter()
            .map(|id| Change { id: id.clone(), kind: ChangeKind::Added })
            .chain(diff.removed.iter().map(|id| Change { id: id.clone(), kind: ChangeKind::Removed }))
            .chain(diff.modified.iter().map(|id| Change { id: id.clone(), kind: ChangeKind::Modified }))
            .collect();
        changes.sort_by(|a, b| a.id.cmp(&b.id));
        diff.changes = changes;

        Ok(diff)
    }

    fn load_fingerprints(&self, id: &str) -> Result<BTreeMap<String, ItemFingerprint>> {
        let path = self
            .data_path(id)?
            .ok_or_else(|| Error::NotFound(format!("snapshot {}", id)))?;
        let temp = materialize(&path, &std::env::temp_dir())?;
        let conn = open_read_only(temp.path())?;

        let mut stmt = conn.prepare("SELECT id, type, name, content, content_hash FROM context_items")?;
        let rows = stmt
            .query_map([], |row| {
                let content: String = row.get(3)?;
                let hash: Option<String> = row.get(4)?;
                Ok((
                    row.get::<_, String>(0)?,
                    ItemFingerprint {
                        item_type: row.get(1)?,
                        name: row.get(2)?,
                        content_hash: hash.unwrap_or_else(|| item::content_hash(&content)),
                    },
                ))
            })?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
        Ok(rows)
    }

    /// Apply retention: keep the newest `keep_minimum`, delete the rest if
    /// older than `days_old`
    pub fn cleanup(&self, days_old: u32, keep_minimum: usize) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(i64::from(days_old));
        let mut removed = 0;
        for snapshot in self.list()?.into_iter().skip(keep_minimum) {
            if snapshot.created_at < cutoff && self.delete(&snapshot.id)? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Removed {} snapshots older than {} days", removed, days_old);
        }
        Ok(removed)
    }
}

fn generate_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("snap-{}-{}", Utc::now().format("%Y%m%d-%H%M%S"), suffix)
}

/// `snap-YYYYMMDD-HHMMSS-xxxxxx`, as produced by [`generate_id`]
fn is_snapshot_id(id: &str) -> bool {
    let Some(rest) = id.strip_prefix("snap-") else {
        return false;
    };
    let parts: Vec<&str> = rest.split('-').collect();
    match parts.as_slice() {
        [date, time, suffix] => {
            date.len() == 8
                && date.bytes().all(|b| b.is_ascii_digit())
                && time.len() == 6
                && time.bytes().all(|b| b.is_ascii_digit())
                && suffix.len() == ID_SUFFIX_LEN
                && suffix.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        }
        _ => false,
    }
}

fn validate_id(id: &str) -> Result<()> {
    if is_snapshot_id(id) {
        Ok(())
    } else {
        Err(Error::InvalidValue(format!("invalid snapshot id: {:?}", id)))
    }
}

fn is_modified(before: &ItemFingerprint, after: &ItemFingerprint, policy: DiffPolicy) -> bool {
    let identity_changed = before.item_type != after.item_type || before.name != after.name;
    match policy {
        DiffPolicy::Identity => identity_changed,
        DiffPolicy::ContentHash => identity_changed || before.content_hash != after.content_hash,
    }
}

fn fallback_metadata(id: &str, data_path: &Path) -> Result<SnapshotMetadata> {
    let fs_meta = std::fs::metadata(data_path).map_err(|e| Error::resource(data_path, e))?;
    let created_at = fs_meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    Ok(SnapshotMetadata {
        id: id.to_string(),
        name: id.to_string(),
        description: None,
        created_at,
        size_bytes: fs_meta.len(),
        item_count: 0,
        engine_version: String::new(),
        schema_version: None,
        revision: None,
        tags: Vec::new(),
        automatic: false,
        compressed: data_path.to_string_lossy().ends_with(GZ_EXTENSION),
        path: data_path.to_path_buf(),
    })
}

fn compress_file(source: &Path, dest: &Path) -> Result<()> {
    let mut reader = BufReader::new(File::open(source).map_err(|e| Error::resource(source, e))?);
    let out = File::create(dest).map_err(|e| Error::resource(dest, e))?;
    let mut encoder = GzEncoder::new(BufWriter::new(out), Compression::default());
    std::io::copy(&mut reader, &mut encoder).map_err(|e| Error::resource(dest, e))?;
    encoder.finish().map_err(|e| Error::resource(dest, e))?;
    Ok(())
}

/// Copy (and gunzip if needed) a snapshot into a temp file inside `dir`
fn materialize(snapshot: &Path, dir: &Path) -> Result<NamedTempFile> {
    let mut temp = NamedTempFile::new_in(dir).map_err(|e| Error::resource(dir, e))?;
    let source = File::open(snapshot).map_err(|e| Error::resource(snapshot, e))?;

    if snapshot.to_string_lossy().ends_with(GZ_EXTENSION) {
        let mut decoder = GzDecoder::new(BufReader::new(source));
        std::io::copy(&mut decoder, temp.as_file_mut()).map_err(|e| {
            Error::Snapshot(format!("failed to decompress {}: {}", snapshot.display(), e))
        })?;
    } else {
        let mut reader = BufReader::new(source);
        std::io::copy(&mut reader, temp.as_file_mut()).map_err(|e| Error::resource(snapshot, e))?;
    }
    temp.as_file().sync_all().map_err(|e| Error::resource(temp.path(), e))?;
    Ok(temp)
}

fn open_read_only(path: &Path) -> Result<Connection> {
    register_vector_extension();
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    Ok(conn)
}

/// Confirm a materialized snapshot is a readable store database
fn verify_candidate(path: &Path, force: bool) -> Result<()> {
    let invalid = |reason: String| Error::Snapshot(format!("snapshot is not restorable: {}", reason));
    let conn = open_read_only(path).map_err(|e| invalid(e.to_string()))?;

    let check: String = conn
        .query_row("PRAGMA quick_check", [], |row| row.get(0))
        .map_err(|e| invalid(e.to_string()))?;
    if check != "ok" {
        return Err(invalid(check));
    }

    let has_items: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'context_items'",
            [],
            |row| row.get(0),
        )
        .map_err(|e| invalid(e.to_string()))?;
    if has_items == 0 {
        return Err(invalid("no context_items table".to_string()));
    }

    let versions: Vec<String> = conn
        .prepare("SELECT version FROM schema_version")
        .and_then(|mut stmt| {
            let rows = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>();
            rows
        })
        .unwrap_or_default();
    let target: SchemaVersion = SCHEMA_VERSION.parse()?;
    let newest = versions.iter().filter_map(|v| v.parse::<SchemaVersion>().ok()).max();
    if let Some(newest) = newest {
        if newest > target {
            if !force {
                return Err(invalid(format!(
                    "written by schema {}, this engine supports {}",
                    newest, target
                )));
            }
            warn!("Restoring snapshot from newer schema {} (forced)", newest);
        }
    }
    Ok(())
}

/// Short revision of the current git HEAD, if any
fn current_git_revision() -> Option<String> {
    std::process::Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .and_then(|output| {
            if output.status.success() {
                String::from_utf8(output.stdout)
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
            } else {
                None
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ItemType;
    use tempfile::{tempdir, TempDir};

    fn setup() -> (TempDir, Store, SnapshotManager) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join(".ai-context.db")).unwrap();
        let manager = SnapshotManager::new(dir.path().join("snapshots"));
        (dir, store, manager)
    }

    fn item_ids(store: &Store) -> Vec<String> {
        store.get_all_items().unwrap().into_iter().map(|i| i.id).collect()
    }

    fn backdate(manager: &SnapshotManager, id: &str, days: i64) {
        let mut meta = manager.get(id).unwrap().unwrap();
        meta.created_at = Utc::now() - Duration::days(days);
        manager.write_metadata(&meta).unwrap();
    }

    #[test]
    fn test_create_and_restore_round_trip() {
        let (_dir, mut store, manager) = setup();
        store.upsert_item(ItemType::Code, "a", "fn a() {}", None, None).unwrap();
        store.upsert_item(ItemType::Doc, "b", "docs", None, None).unwrap();
        let before = item_ids(&store);

        let snap = manager.create(&store, &CreateOptions::named("baseline")).unwrap();
        assert!(snap.id.starts_with("snap-"));
        assert!(snap.compressed);
        assert!(snap.path.to_string_lossy().ends_with(".db.gz"));
        assert_eq!(snap.item_count, 2);
        assert_eq!(snap.schema_version.as_deref(), Some(SCHEMA_VERSION));

        store.delete_item("code:a").unwrap();
        store.upsert_item(ItemType::Knowledge, "new", "added later", None, None).unwrap();

        let outcome = manager.restore_by_id(&mut store, &snap.id, &RestoreOptions::default()).unwrap();
        assert!(outcome.safety_snapshot.is_some());
        assert_eq!(item_ids(&store), before);
        assert_eq!(manager.list().unwrap().len(), 2);
    }

    #[test]
    fn test_uncompressed_snapshot() {
        let (_dir, mut store, manager) = setup();
        store.upsert_item(ItemType::Code, "a", "a", None, None).unwrap();

        let options = CreateOptions {
            compress: false,
            tags: vec!["release".to_string()],
            ..CreateOptions::named("plain")
        };
        let snap = manager.create(&store, &options).unwrap();
        assert!(snap.path.to_string_lossy().ends_with(".db"));
        assert_eq!(manager.get(&snap.id).unwrap().unwrap().tags, vec!["release".to_string()]);

        store.upsert_item(ItemType::Code, "b", "b", None, None).unwrap();
        let options = RestoreOptions { backup_before_restore: false, ..Default::default() };
        manager.restore(&mut store, &snap.path, &options).unwrap();
        assert_eq!(store.count_items().unwrap(), 1);
    }

    #[test]
    fn test_corrupt_snapshot_leaves_live_database() {
        let (dir, mut store, manager) = setup();
        store.upsert_item(ItemType::Code, "keep", "keep", None, None).unwrap();

        let bogus = dir.path().join("bogus.db.gz");
        std::fs::write(&bogus, b"not gzip at all").unwrap();
        let options = RestoreOptions { backup_before_restore: false, ..Default::default() };
        assert!(manager.restore(&mut store, &bogus, &options).is_err());

        let garbage = dir.path().join("garbage.db");
        std::fs::write(&garbage, vec![7u8; 4096]).unwrap();
        assert!(manager.restore(&mut store, &garbage, &options).is_err());

        assert!(manager.restore(&mut store, &dir.path().join("missing.db"), &options).is_err());

        assert!(store.health_check());
        assert!(store.get_item("code:keep").unwrap().is_some());
    }

    #[test]
    fn test_restore_rejects_newer_schema_unless_forced() {
        let (dir, mut store, manager) = setup();
        let other_path = dir.path().join("other.db");
        let other = Store::open(&other_path).unwrap();
        Connection::open(&other_path)
            .unwrap()
            .execute("INSERT INTO schema_version (version, applied_at) VALUES ('9.0.0', '2030-01-01')", [])
            .unwrap();
        let snap = manager.create(&other, &CreateOptions::named("future")).unwrap();

        let options = RestoreOptions { backup_before_restore: false, ..Default::default() };
        assert!(matches!(manager.restore(&mut store, &snap.path, &options), Err(Error::Snapshot(_))));

        let forced = RestoreOptions { force: true, ..options };
        manager.restore(&mut store, &snap.path, &forced).unwrap();
        assert_eq!(store.schema_version().unwrap().as_deref(), Some("9.0.0"));
    }

    #[test]
    fn test_delete_removes_data_and_sidecar() {
        let (_dir, store, manager) = setup();
        let snap = manager.create(&store, &CreateOptions::default()).unwrap();

        assert!(manager.delete(&snap.id).unwrap());
        assert!(!manager.delete(&snap.id).unwrap());
        assert!(manager.get(&snap.id).unwrap().is_none());
        assert!(!manager.meta_path(&snap.id).exists());
    }

    #[test]
    fn test_diff_classifies_items() {
        let (_dir, store, manager) = setup();
        store.upsert_item(ItemType::Code, "stays", "v1", None, None).unwrap();
        store.upsert_item(ItemType::Code, "edited", "v1", None, None).unwrap();
        store.upsert_item(ItemType::Code, "renamed.x", "v1", None, None).unwrap();
        store.upsert_item(ItemType::Code, "gone", "v1", None, None).unwrap();
        let a = manager.create(&store, &CreateOptions::named("a")).unwrap();

        store.upsert_item(ItemType::Code, "edited", "v2", None, None).unwrap();
        // Same id, different display name
        store.upsert_item(ItemType::Code, "renamed-x", "v1", None, None).unwrap();
        store.delete_item("code:gone").unwrap();
        store.upsert_item(ItemType::Code, "fresh", "v1", None, None).unwrap();
        let b = manager.create(&store, &CreateOptions::named("b")).unwrap();

        let diff = manager.diff(&a.id, &b.id, DiffPolicy::Identity).unwrap();
        assert_eq!(diff.added, vec!["code:fresh".to_string()]);
        assert_eq!(diff.removed, vec!["code:gone".to_string()]);
        assert_eq!(diff.modified, vec!["code:renamed-x".to_string()]);
        assert_eq!(diff.unchanged, 2);
        assert_eq!(diff.changes.len(), 3);
        assert_eq!(diff.changes[0].id, "code:fresh");

        let by_content = manager.diff(&a.id, &b.id, DiffPolicy::ContentHash).unwrap();
        assert_eq!(by_content.modified, vec!["code:edited".to_string(), "code:renamed-x".to_string()]);
        assert_eq!(by_content.unchanged, 1);

        assert!(manager.diff(&a.id, &a.id, DiffPolicy::ContentHash).unwrap().is_empty());
        assert!(matches!(manager.diff(&a.id, "snap-nope", DiffPolicy::Identity), Err(Error::InvalidValue(_))));
        assert!(matches!(
            manager.diff(&a.id, "snap-20000101-000000-abcdef", DiffPolicy::Identity),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_cleanup_keeps_minimum() {
        let (_dir, store, manager) = setup();
        let mut ids = Vec::new();
        for i in 0..4 {
            let snap = manager.create(&store, &CreateOptions::named(format!("s{}", i))).unwrap();
            backdate(&manager, &snap.id, 60 - i);
            ids.push(snap.id);
        }
        let recent = manager.create(&store, &CreateOptions::named("recent")).unwrap();

        // Newest two survive regardless of age; older ones past 30 days go
        assert_eq!(manager.cleanup(30, 2).unwrap(), 3);
        let remaining: Vec<String> = manager.list().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(remaining, vec![recent.id, ids[3].clone()]);

        assert_eq!(manager.cleanup(30, 0).unwrap(), 1);
    }

    #[test]
    fn test_list_falls_back_without_sidecar() {
        let (_dir, store, manager) = setup();
        let auto = manager.create_automatic(&store, "bulk delete").unwrap();
        assert!(auto.automatic);
        assert_eq!(auto.name, "auto-bulk-delete");

        std::fs::write(manager.meta_path(&auto.id), "{ not json").unwrap();
        let listed = manager.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, auto.id);
        assert_eq!(listed[0].name, auto.id);
        assert!(listed[0].compressed);
        assert!(listed[0].size_bytes > 0);
    }

    #[test]
    fn test_ids_outside_snapshot_shape_are_rejected() {
        let dir = tempdir().unwrap();
        let live = dir.path().join(".ai-context.db");
        let store = Store::open(&live).unwrap();
        let manager = SnapshotManager::new(dir.path().join(".ai-context-snapshots"));
        manager.create(&store, &CreateOptions::default()).unwrap();

        for id in ["../.ai-context", "snap-20240101-000000-abc/de", "..", "", "snap-2024-01-01"] {
            assert!(matches!(manager.delete(id), Err(Error::InvalidValue(_))), "{}", id);
            assert!(matches!(manager.get(id), Err(Error::InvalidValue(_))), "{}", id);
        }
        assert!(live.exists());
        assert!(store.health_check());
        assert_eq!(manager.list().unwrap().len(), 1);
    }

    #[test]
    fn test_cleanup_never_touches_live_database_in_same_dir() {
        let dir = tempdir().unwrap();
        let live = dir.path().join(".ai-context.db");
        let store = Store::open(&live).unwrap();
        let manager = SnapshotManager::new(dir.path());
        let snap = manager.create(&store, &CreateOptions::default()).unwrap();
        backdate(&manager, &snap.id, 90);

        let listed: Vec<String> = manager.list().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(listed, vec![snap.id]);
        assert_eq!(manager.cleanup(0, 0).unwrap(), 1);
        assert!(live.exists());
        assert!(manager.list().unwrap().is_empty());
    }

    #[test]
    fn test_list_on_missing_dir_is_empty() {
        let manager = SnapshotManager::new("/nonexistent/snapshots/dir");
        assert!(manager.list().unwrap().is_empty());
    }
}
