//! Store backups.
//!
//! A backup is a canonical export named `<timestamp>-<digest>.jsonl`. The
//! digest is taken over the file content, so identical states share one
//! backup.

use crate::atomic::AtomicFile;
use crate::export::{ExportOptions, ExportSummary, export};
use crate::id::hex;
use crate::timestamp;
use crate::types::Task;
use chrono::{DateTime, NaiveDateTime, Utc};
use eyre::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Extension shared by every backup file.
pub const BACKUP_EXT: &str = "jsonl";

/// Hex digits of the content digest kept in a backup name.
const NAME_DIGEST_LEN: usize = 16;

const NAME_TIME_FORMAT: &str = "%Y%m%dT%H%M%S%6fZ";

/// Writer that hashes everything passing through it.
pub struct DigestWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> DigestWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    /// The wrapped writer and the hex digest of what was written.
    pub fn finish(self) -> (W, String) {
        (self.inner, hex(&self.hasher.finalize()))
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// A backup on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupInfo {
    pub path: PathBuf,
    pub taken_at: DateTime<Utc>,
    /// Shortened content digest from the file name.
    pub digest: String,
    pub bytes: u64,
}

/// Parse `<timestamp>-<digest>.jsonl`; anything else is not a backup.
fn parse_name(name: &str) -> Option<(DateTime<Utc>, String)> {
    let stem = name.strip_suffix(BACKUP_EXT)?.strip_suffix('.')?;
    let (stamp, digest) = stem.split_once('-')?;
    if digest.is_empty() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let taken_at = NaiveDateTime::parse_from_str(stamp, NAME_TIME_FORMAT).ok()?.and_utc();
    Some((taken_at, digest.to_string()))
}

fn backup_name(taken_at: &DateTime<Utc>, digest: &str) -> String {
    let short = &digest[..digest.len().min(NAME_DIGEST_LEN)];
    format!("{}-{}.{}", taken_at.format(NAME_TIME_FORMAT), short, BACKUP_EXT)
}

/// Backups in `dir`, oldest first. A missing directory has none.
pub fn list_backups(dir: &Path) -> Result<Vec<BackupInfo>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut backups = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read backup directory {}", dir.display()))? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some((taken_at, digest)) = parse_name(&name) else {
            continue;
        };
        backups.push(BackupInfo {
            path: entry.path(),
            taken_at,
            digest,
            bytes: entry.metadata().map(|m| m.len()).unwrap_or(0),
        });
    }
    backups.sort_by(|a, b| a.taken_at.cmp(&b.taken_at).then_with(|| a.path.cmp(&b.path)));
    Ok(backups)
}

/// Remove the oldest backups so at most `keep` remain. Zero keeps all.
pub fn prune_backups(dir: &Path, keep: usize) -> Result<Vec<PathBuf>> {
    if keep == 0 {
        return Ok(Vec::new());
    }
    let backups = list_backups(dir)?;
    let excess = backups.len().saturating_sub(keep);
    let mut removed = Vec::with_capacity(excess);
    for backup in backups.into_iter().take(excess) {
        fs::remove_file(&backup.path)
            .with_context(|| format!("Failed to remove old backup {}", backup.path.display()))?;
        log::debug!("Pruned backup {}", backup.path.display());
        removed.push(backup.path);
    }
    if !removed.is_empty() {
        log::info!("Pruned {} old backup(s) from {}", removed.len(), dir.display());
    }
    Ok(removed)
}

/// A backup written to a temporary file and not yet kept.
pub struct PendingBackup {
    dir: PathBuf,
    file: AtomicFile,
    digest: String,
    taken_at: DateTime<Utc>,
    pub summary: ExportSummary,
}

impl PendingBackup {
    /// Export `tasks` canonically into a temporary file under `dir`.
    pub fn write(dir: &Path, tasks: &[Task]) -> Result<Self> {
        let taken_at = timestamp::now();
        let file = AtomicFile::create(&dir.join(format!("pending.{}", BACKUP_EXT)))?;
        let mut writer = DigestWriter::new(file);
        let summary = export(tasks, &ExportOptions::canonical(), &mut writer).context("Failed to write backup")?;
        let (file, digest) = writer.finish();
        Ok(Self {
            dir: dir.to_path_buf(),
            file,
            digest,
            taken_at,
            summary,
        })
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// An existing backup with the same content, if any.
    pub fn existing(&self) -> Result<Option<BackupInfo>> {
        let short = &self.digest[..NAME_DIGEST_LEN];
        Ok(list_backups(&self.dir)?.into_iter().find(|b| b.digest == short))
    }

    /// Keep the backup unless an identical one exists; returns the path of
    /// whichever backup holds this content.
    pub fn keep(self) -> Result<PathBuf> {
        if let Some(existing) = self.existing()? {
            log::debug!("Backup content already in {}", existing.path.display());
            self.file.discard();
            return Ok(existing.path);
        }
        let target = self.dir.join(backup_name(&self.taken_at, &self.digest));
        let path = self.file.commit_as(&target)?;
        log::info!("Backed up {} task(s) to {}", self.summary.records, path.display());
        Ok(path)
    }

    pub fn discard(self) {
        self.file.discard();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Priority, Status};
    use std::collections::{BTreeMap, BTreeSet};
    use tempfile::TempDir;

    fn task(id: &str, title: &str) -> Task {
        let at = timestamp::parse("2026-04-01T08:00:00Z").unwrap();
        Task {
            id: id.to_string(),
            title: title.to_string(),
            description: None,
            status: Status::Todo,
            priority: Priority::Medium,
            tags: BTreeSet::new(),
            depends_on: BTreeSet::new(),
            assignee: None,
            created_at: at,
            updated_at: at,
            completed_at: None,
            due_date: None,
            estimated_hours: None,
            actual_hours: None,
            context: BTreeMap::new(),
            origin_id: None,
        }
    }

    #[test]
    fn test_name_roundtrip() {
        let at = timestamp::parse("2026-04-01T08:00:00.123456Z").unwrap();
        let name = backup_name(&at, &"ab".repeat(32));
        assert_eq!(name, "20260401T080000123456Z-abababababababab.jsonl");
        assert_eq!(parse_name(&name), Some((at, "ab".repeat(8))));
        assert_eq!(parse_name("notes.txt"), None);
        assert_eq!(parse_name("pending.jsonl"), None);
    }

    #[test]
    fn test_digest_writer_matches_content_digest() {
        let mut writer = DigestWriter::new(Vec::new());
        writer.write_all(b"hello ").unwrap();
        writer.write_all(b"world").unwrap();
        let (bytes, digest) = writer.finish();
        assert_eq!(digest, crate::id::content_digest(&bytes));
    }

    #[test]
    fn test_identical_content_is_kept_once() {
        let temp_dir = TempDir::new().unwrap();
        let tasks = vec![task("tk-0000000001", "Backed up task")];

        let first = PendingBackup::write(temp_dir.path(), &tasks).unwrap().keep().unwrap();
        let second = PendingBackup::write(temp_dir.path(), &tasks).unwrap().keep().unwrap();
        assert_eq!(first, second);
        assert_eq!(list_backups(temp_dir.path()).unwrap().len(), 1);

        let changed = vec![task("tk-0000000001", "Renamed backed up task")];
        PendingBackup::write(temp_dir.path(), &changed).unwrap().keep().unwrap();
        assert_eq!(list_backups(temp_dir.path()).unwrap().len(), 2);
    }

    #[test]
    fn test_discard_leaves_nothing() {
        let temp_dir = TempDir::new().unwrap();
        PendingBackup::write(temp_dir.path(), &[]).unwrap().discard();
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_prune_keeps_newest() {
        let temp_dir = TempDir::new().unwrap();
        for i in 0..5 {
            let tasks = vec![task("tk-0000000001", &format!("Version number {}", i))];
            PendingBackup::write(temp_dir.path(), &tasks).unwrap().keep().unwrap();
        }
        let before = list_backups(temp_dir.path()).unwrap();
        assert_eq!(before.len(), 5);

        let removed = prune_backups(temp_dir.path(), 2).unwrap();
        assert_eq!(removed, vec![before[0].path.clone(), before[1].path.clone(), before[2].path.clone()]);

        let after = list_backups(temp_dir.path()).unwrap();
        assert_eq!(after, before[3..].to_vec());
        assert!(prune_backups(temp_dir.path(), 0).unwrap().is_empty());
    }
}
