//! Sync: back up, import the mirror snapshot, rewrite the mirror.
//!
//! Running sync twice with no external change is a no-op: the second import
//! finds every record unchanged, so no backup is kept and the re-exported
//! mirror has the same digest as the file already on disk.

use crate::atomic::AtomicFile;
use crate::backup::{BackupInfo, DigestWriter, PendingBackup, list_backups, prune_backups};
use crate::export::{Compression, ExportOptions, export};
use crate::id::content_digest;
use crate::import::{ConflictResolution, ImportOptions, ImportReport, StoreImportExt};
use crate::store::Store;
use eyre::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Outcome of a sync.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    /// Backup holding the pre-sync state, when the import changed anything.
    pub backup: Option<PathBuf>,
    /// `None` when there was no snapshot to import.
    pub import: Option<ImportReport>,
    pub mirror_path: PathBuf,
    /// False when the mirror already matched the store.
    pub mirror_written: bool,
}

impl SyncReport {
    /// Whether the sync touched the store or the mirror.
    pub fn changed(&self) -> bool {
        self.mirror_written || self.import.as_ref().is_some_and(ImportReport::has_changes)
    }
}

/// Extension trait to sync a Store with its mirror.
pub trait StoreSyncExt {
    /// Sync against `snapshot` (the configured mirror when `None`), resolving
    /// collisions with `resolution` (the configured default when `None`).
    fn sync(&mut self, snapshot: Option<&Path>, resolution: Option<ConflictResolution>) -> Result<SyncReport>;

    /// Write a backup of the current state now.
    fn backup(&self) -> Result<PathBuf>;

    /// Backups on disk, oldest first.
    fn list_backups(&self) -> Result<Vec<BackupInfo>>;

    /// Rewrite the mirror if its content differs from the store.
    fn write_mirror(&self) -> Result<bool>;
}

impl Store {
    fn mirror_options(&self, path: &Path) -> ExportOptions {
        ExportOptions::canonical()
            .metadata(self.config().mirror_metadata)
            .compression(Compression::from_path(path))
    }
}

impl StoreSyncExt for Store {
    fn sync(&mut self, snapshot: Option<&Path>, resolution: Option<ConflictResolution>) -> Result<SyncReport> {
        let mirror_path = self.config().resolved_mirror_path(self.root());
        let snapshot = snapshot.map_or_else(|| mirror_path.clone(), Path::to_path_buf);
        let backup_dir = self.config().resolved_backup_dir(self.root());
        log::info!("Syncing with {}", snapshot.display());

        // 1. Safety net: the pre-import state, kept only if the import changes something
        let pending = PendingBackup::write(&backup_dir, &self.all()?)?;

        // 2. Import
        let import = if snapshot.exists() {
            let opts = ImportOptions::new()
                .resolution(resolution.unwrap_or(self.config().default_resolution))
                .strict(self.config().strict_import);
            match self.import_path(&snapshot, &opts) {
                Ok(report) => Some(report),
                Err(e) => {
                    pending.discard();
                    return Err(e).with_context(|| format!("Sync import from {} failed", snapshot.display()));
                }
            }
        } else {
            log::debug!("No snapshot at {}, nothing to import", snapshot.display());
            None
        };

        let backup = if import.as_ref().is_some_and(ImportReport::has_changes) {
            let path = pending.keep()?;
            prune_backups(&backup_dir, self.config().max_backups)?;
            Some(path)
        } else {
            pending.discard();
            None
        };

        // 3. Re-export so the file on disk matches the merged state
        let mirror_written = self.write_mirror()?;

        let report = SyncReport {
            backup,
            import,
            mirror_path,
            mirror_written,
        };
        log::info!(
            "Sync finished: {} change(s) imported, mirror {}",
            report.import.as_ref().map_or(0, ImportReport::applied),
            if report.mirror_written { "rewritten" } else { "unchanged" }
        );
        Ok(report)
    }

    fn backup(&self) -> Result<PathBuf> {
        let backup_dir = self.config().resolved_backup_dir(self.root());
        let path = PendingBackup::write(&backup_dir, &self.all()?)?.keep()?;
        prune_backups(&backup_dir, self.config().max_backups)?;
        Ok(path)
    }

    fn list_backups(&self) -> Result<Vec<BackupInfo>> {
        list_backups(&self.config().resolved_backup_dir(self.root()))
    }

    fn write_mirror(&self) -> Result<bool> {
        let path = self.config().resolved_mirror_path(self.root());
        let opts = self.mirror_options(&path);

        let mut writer = DigestWriter::new(AtomicFile::create(&path)?);
        let summary = export(&self.all()?, &opts, &mut writer)?;
        let (file, digest) = writer.finish();

        let current = match fs::read(&path) {
            Ok(bytes) => Some(content_digest(&bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e).with_context(|| format!("Failed to read mirror {}", path.display())),
        };
        if current.as_deref() == Some(digest.as_str()) {
            file.discard();
            log::debug!("Mirror {} already up to date", path.display());
            return Ok(false);
        }

        file.commit()?;
        log::info!("Wrote {} task(s) to mirror {}", summary.records, path.display());
        Ok(true)
    }
}
