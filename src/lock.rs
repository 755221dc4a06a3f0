//! Cross-process store lock.
//!
//! A lock file holding the owner's PID lives in the store directory for as
//! long as a [`crate::Store`] is open. A second opener gets
//! [`StoreError::Locked`]; a lock left by a dead process is reclaimed.

use crate::error::StoreError;
use eyre::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Lock file name within the store directory.
pub const LOCK_FILE: &str = "lock";

/// Held lock; released on drop.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    /// Acquire the lock for a store directory.
    pub fn acquire(store_dir: &Path) -> Result<Self> {
        let path = store_dir.join(LOCK_FILE);

        // One retry after reclaiming a stale lock
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    write!(file, "{}", std::process::id()).context("Failed to write lock file")?;
                    file.sync_all().context("Failed to sync lock file")?;
                    log::debug!("Acquired store lock {}", path.display());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let holder = read_holder(&path);
                    match holder {
                        Some(pid) if !process_alive(pid) => {
                            log::warn!("Reclaiming stale lock {} held by dead process {}", path.display(), pid);
                            fs::remove_file(&path).context("Failed to remove stale lock file")?;
                        }
                        _ => {
                            return Err(eyre::eyre!(StoreError::Locked {
                                path: path.clone(),
                                holder
                            }));
                        }
                    }
                }
                Err(e) => return Err(e).with_context(|| format!("Failed to create lock file {}", path.display())),
            }
        }

        Err(eyre::eyre!(StoreError::Locked {
            holder: read_holder(&path),
            path,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("Failed to release store lock {}: {}", self.path.display(), e);
        }
    }
}

fn read_holder(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // Signal 0 checks existence without delivering anything
    unsafe {
        if libc::kill(pid, 0) == 0 {
            return true;
        }
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}
