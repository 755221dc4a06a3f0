//! Per-store configuration, read from `.tasksync/config.yaml`.

use crate::import::ConflictResolution;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Config file name within the store directory.
pub const CONFIG_FILE: &str = "config.yaml";

/// Store configuration. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Canonical mirror file, relative to the project root. A `.gz`
    /// extension turns on compression.
    pub mirror_path: PathBuf,

    /// Backup directory, relative to the project root.
    pub backup_dir: PathBuf,

    /// Number of backups kept by sync (0 = unlimited).
    pub max_backups: usize,

    /// Strategy used when a sync or import names none.
    pub default_resolution: ConflictResolution,

    /// Reject records that violate any invariant instead of defaulting.
    pub strict_import: bool,

    /// Write the leading metadata line in the mirror.
    pub mirror_metadata: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mirror_path: PathBuf::from(".tasksync/tasks.jsonl"),
            backup_dir: PathBuf::from(".tasksync/backups"),
            max_backups: 20,
            default_resolution: ConflictResolution::Merge,
            strict_import: false,
            mirror_metadata: true,
        }
    }
}

impl Config {
    /// Create a new config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mirror_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.mirror_path = path.into();
        self
    }

    pub fn backup_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.backup_dir = path.into();
        self
    }

    pub fn max_backups(mut self, max: usize) -> Self {
        self.max_backups = max;
        self
    }

    pub fn default_resolution(mut self, resolution: ConflictResolution) -> Self {
        self.default_resolution = resolution;
        self
    }

    pub fn strict_import(mut self, strict: bool) -> Self {
        self.strict_import = strict;
        self
    }

    /// Load `config.yaml` from a store directory, or defaults if absent.
    pub fn load(store_dir: &Path) -> Result<Self> {
        let path = store_dir.join(CONFIG_FILE);
        if !path.exists() {
            log::debug!("No {} in {}, using defaults", CONFIG_FILE, store_dir.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Write this config into a store directory.
    pub fn save(&self, store_dir: &Path) -> Result<()> {
        let path = store_dir.join(CONFIG_FILE);
        let text = serde_yaml::to_string(self).context("Failed to serialize config")?;
        fs::write(&path, text).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Absolute mirror location for a project root.
    pub fn resolved_mirror_path(&self, root: &Path) -> PathBuf {
        root.join(&self.mirror_path)
    }

    /// Absolute backup directory for a project root.
    pub fn resolved_backup_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.backup_dir)
    }
}
