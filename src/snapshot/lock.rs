// ABOUTME: Exclusive apply lock guarding a unit's snapshot against concurrent applies.
// ABOUTME: Uses atomic create-new of a lock file holding JSON info about the holder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::types::ResourceName;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("apply already in progress: {0}")]
    Held(LockInfo),

    #[error("lock {path} was taken by another process while breaking it")]
    Contended { path: PathBuf },

    #[error("lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize lock info: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Information about who holds an apply lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Hostname of the machine that holds the lock.
    pub holder: String,
    /// Process ID of the lock holder.
    pub pid: u32,
    /// When the lock was acquired.
    pub started_at: DateTime<Utc>,
    /// Deployment unit being applied.
    pub unit: String,
}

impl LockInfo {
    pub fn new(unit: &ResourceName) -> Self {
        Self {
            holder: gethostname::gethostname().to_string_lossy().into_owned(),
            pid: std::process::id(),
            started_at: Utc::now(),
            unit: unit.to_string(),
        }
    }

    pub fn is_stale(&self, stale_after: Duration) -> bool {
        let age = Utc::now() - self.started_at;
        age.to_std().is_ok_and(|age| age >= stale_after)
    }
}

impl std::fmt::Display for LockInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "lock held by {} (pid {}) since {}",
            self.holder, self.pid, self.started_at
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// Break any existing lock.
    pub force: bool,
    /// Locks older than this are broken automatically.
    pub stale_after: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            force: false,
            stale_after: Duration::from_secs(60 * 60),
        }
    }
}

/// A held apply lock. Released explicitly or on drop.
#[derive(Debug)]
pub struct ApplyLock {
    path: PathBuf,
    broken: Option<LockInfo>,
    released: bool,
}

impl ApplyLock {
    /// Acquire the lock at `path`.
    ///
    /// Fails with [`LockError::Held`] if a live lock exists. Stale locks, and
    /// any lock when `options.force` is set, are broken with a warning.
    pub fn acquire(
        path: PathBuf,
        unit: &ResourceName,
        options: LockOptions,
    ) -> Result<Self, LockError> {
        let info = LockInfo::new(unit);
        let json = serde_json::to_string(&info)?;

        if try_create(&path, &json)? {
            return Ok(Self {
                path,
                broken: None,
                released: false,
            });
        }

        let existing = read_existing(&path);
        match &existing {
            Some(lock) if options.force => {
                tracing::warn!(
                    "Breaking lock held by {} (pid {}) since {}",
                    lock.holder,
                    lock.pid,
                    lock.started_at
                );
            }
            Some(lock) if lock.is_stale(options.stale_after) => {
                tracing::warn!(
                    "Auto-breaking stale lock held by {} (pid {}) since {}",
                    lock.holder,
                    lock.pid,
                    lock.started_at
                );
            }
            Some(lock) => return Err(LockError::Held(lock.clone())),
            None => tracing::warn!("Lock info at {} unreadable, breaking lock", path.display()),
        }

        tracing::debug!("Removing stale/forced lock at {}", path.display());
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(LockError::Io { path, source }),
        }

        if !try_create(&path, &json)? {
            return Err(LockError::Contended { path });
        }
        Ok(Self {
            path,
            broken: existing,
            released: false,
        })
    }

    /// The lock that was broken to acquire this one, if any.
    pub fn broken(&self) -> Option<&LockInfo> {
        self.broken.as_ref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        fs::remove_file(&self.path).map_err(|source| LockError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl Drop for ApplyLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Atomically creates the lock file. Returns false if it already exists.
fn try_create(path: &Path, contents: &str) -> Result<bool, LockError> {
    let io_err = |source| LockError::Io {
        path: path.to_path_buf(),
        source,
    };
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            file.write_all(contents.as_bytes()).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(source) => Err(io_err(source)),
    }
}

fn read_existing(path: &Path) -> Option<LockInfo> {
    let contents = fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> ResourceName {
        ResourceName::new("shop").unwrap()
    }

    #[test]
    fn lock_info_creates_with_current_host_and_pid() {
        let info = LockInfo::new(&unit());
        assert_eq!(info.unit, "shop");
        assert_eq!(info.pid, std::process::id());
        assert!(!info.holder.is_empty());
    }

    #[test]
    fn fresh_lock_is_not_stale() {
        let info = LockInfo::new(&unit());
        assert!(!info.is_stale(Duration::from_secs(3600)));
    }

    #[test]
    fn old_lock_is_stale() {
        let mut info = LockInfo::new(&unit());
        info.started_at = Utc::now() - chrono::Duration::hours(2);
        assert!(info.is_stale(Duration::from_secs(3600)));
    }

    #[test]
    fn second_acquire_fails_with_holder_info() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("shop.lock");
        let _held = ApplyLock::acquire(path.clone(), &unit(), LockOptions::default()).unwrap();

        let err = ApplyLock::acquire(path, &unit(), LockOptions::default()).unwrap_err();
        let LockError::Held(info) = &err else {
            panic!("expected Held, got {err:?}");
        };
        assert_eq!(info.pid, std::process::id());
    }

    #[test]
    fn release_and_drop_remove_the_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("shop.lock");

        let lock = ApplyLock::acquire(path.clone(), &unit(), LockOptions::default()).unwrap();
        assert!(path.exists());
        lock.release().unwrap();
        assert!(!path.exists());

        {
            let _lock = ApplyLock::acquire(path.clone(), &unit(), LockOptions::default()).unwrap();
        }
        assert!(!path.exists());
    }

    #[test]
    fn stale_lock_is_broken() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("shop.lock");
        let mut old = LockInfo::new(&unit());
        old.holder = "other-host".into();
        old.started_at = Utc::now() - chrono::Duration::hours(3);
        fs::write(&path, serde_json::to_string(&old).unwrap()).unwrap();

        let lock = ApplyLock::acquire(path, &unit(), LockOptions::default()).unwrap();
        assert_eq!(lock.broken().map(|b| b.holder.as_str()), Some("other-host"));
    }

    #[test]
    fn force_breaks_live_lock() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("shop.lock");
        let held = ApplyLock::acquire(path.clone(), &unit(), LockOptions::default()).unwrap();

        let forced = LockOptions {
            force: true,
            ..LockOptions::default()
        };
        let lock = ApplyLock::acquire(path.clone(), &unit(), forced).unwrap();
        assert!(lock.broken().is_some());

        // The original holder must not delete the new holder's file.
        std::mem::forget(held);
        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn corrupted_lock_is_broken() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("shop.lock");
        fs::write(&path, "not json").unwrap();
        let lock = ApplyLock::acquire(path, &unit(), LockOptions::default()).unwrap();
        assert!(lock.broken().is_none());
    }
}
