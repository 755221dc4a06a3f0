//! Atomic file replacement: write a temporary sibling, fsync, rename.

use eyre::{Context, Result};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// A file being written. Readers see either the old content or the new,
/// never a partial file. Dropping without [`AtomicFile::commit`] discards it.
pub struct AtomicFile {
    path: PathBuf,
    tmp_path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl AtomicFile {
    /// Start writing a replacement for `path`, creating parent directories.
    pub fn create(path: &Path) -> Result<Self> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).with_context(|| format!("Failed to create directory {}", parent.display()))?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        let tmp_path = parent.join(format!(".{}.tmp-{}", name, std::process::id()));

        let file =
            File::create(&tmp_path).with_context(|| format!("Failed to create temporary file {}", tmp_path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            tmp_path,
            writer: Some(BufWriter::new(file)),
        })
    }

    /// Final destination.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush, fsync and move into place.
    pub fn commit(self) -> Result<PathBuf> {
        let target = self.path.clone();
        self.commit_as(&target)
    }

    /// Like [`AtomicFile::commit`] but to a different name in the same directory.
    pub fn commit_as(mut self, target: &Path) -> Result<PathBuf> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| eyre::eyre!("atomic file {} already finished", self.path.display()))?;
        let file = writer
            .into_inner()
            .map_err(|e| e.into_error())
            .with_context(|| format!("Failed to flush {}", self.tmp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("Failed to sync {}", self.tmp_path.display()))?;
        drop(file);

        fs::rename(&self.tmp_path, target)
            .with_context(|| format!("Failed to move {} into place", target.display()))?;

        // Persist the rename itself
        #[cfg(unix)]
        {
            if let Some(parent) = target.parent()
                && let Ok(dir) = File::open(parent)
            {
                let _ = dir.sync_all();
            }
        }

        log::debug!("Wrote {}", target.display());
        Ok(target.to_path_buf())
    }

    /// Throw away everything written so far.
    pub fn discard(mut self) {
        self.remove_tmp();
    }

    fn remove_tmp(&mut self) {
        if self.writer.take().is_some()
            && let Err(e) = fs::remove_file(&self.tmp_path)
        {
            log::warn!("Failed to remove temporary file {}: {}", self.tmp_path.display(), e);
        }
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.writer.as_mut() {
            Some(w) => w.write(buf),
            None => Err(io::Error::other("atomic file already finished")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        self.remove_tmp();
    }
}
