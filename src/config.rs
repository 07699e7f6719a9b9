//! Project configuration (`ai-context.toml`)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "ai-context.toml";
pub const DATABASE_FILE_NAME: &str = ".ai-context.db";
pub const LEGACY_DATABASE_FILE_NAME: &str = ".context.db";
pub const SNAPSHOTS_DIR_NAME: &str = ".ai-context-snapshots";

pub const DEFAULT_RETENTION_DAYS: u32 = 30;
pub const DEFAULT_KEEP_MINIMUM: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StoreConfig {
    pub database: Option<String>,
    pub snapshots_dir: Option<String>,
    pub legacy_database: Option<String>,
    pub snapshot_retention_days: Option<u32>,
    pub snapshot_keep_minimum: Option<usize>,
    pub compress_snapshots: Option<bool>,
}

/// Concrete locations and policies for one project
#[derive(Debug, Clone, PartialEq)]
pub struct StorePaths {
    pub database: PathBuf,
    pub legacy_database: PathBuf,
    pub snapshots_dir: PathBuf,
    pub retention_days: u32,
    pub keep_minimum: usize,
    pub compress_snapshots: bool,
}

impl StoreConfig {
    /// Fill defaults and resolve relative paths against `root`
    pub fn resolve(&self, root: &Path) -> StorePaths {
        let under_root = |value: &Option<String>, default: &str| {
            let path = PathBuf::from(value.as_deref().unwrap_or(default));
            if path.is_absolute() { path } else { root.join(path) }
        };

        StorePaths {
            database: under_root(&self.database, DATABASE_FILE_NAME),
            legacy_database: under_root(&self.legacy_database, LEGACY_DATABASE_FILE_NAME),
            snapshots_dir: under_root(&self.snapshots_dir, SNAPSHOTS_DIR_NAME),
            retention_days: self.snapshot_retention_days.unwrap_or(DEFAULT_RETENTION_DAYS),
            keep_minimum: self.snapshot_keep_minimum.unwrap_or(DEFAULT_KEEP_MINIMUM),
            compress_snapshots: self.compress_snapshots.unwrap_or(true),
        }
    }
}

pub fn default_config_path_in(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE_NAME)
}

pub fn load_config(path: &Path) -> Result<Option<StoreConfig>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(path).map_err(|e| Error::resource(path, e))?;
    let config: StoreConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &StoreConfig, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(Error::Config(format!(
            "config already exists at {} (pass force to overwrite)",
            path.display()
        )));
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents).map_err(|e| Error::resource(path, e))?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| Error::resource(parent, e))?;
        }
    }
    Ok(())
}

/// Keep the database and snapshots out of version control
pub fn ensure_gitignore(project_root: &Path) -> Result<()> {
    let gitignore_path = project_root.join(".gitignore");
    let snapshots_entry = format!("{}/", SNAPSHOTS_DIR_NAME);
    let entries = [DATABASE_FILE_NAME, snapshots_entry.as_str()];

    let mut content = if gitignore_path.exists() {
        std::fs::read_to_string(&gitignore_path).map_err(|e| Error::resource(&gitignore_path, e))?
    } else {
        String::new()
    };

    let missing: Vec<&str> = entries
        .iter()
        .copied()
        .filter(|entry| !content.lines().any(|line| line.trim() == *entry))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }

    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    for entry in missing {
        content.push_str(entry);
        content.push('\n');
    }
    std::fs::write(&gitignore_path, content).map_err(|e| Error::resource(&gitignore_path, e))?;
    Ok(())
}
