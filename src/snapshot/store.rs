// ABOUTME: Loads and atomically saves a unit's snapshot file under the state directory.
// ABOUTME: A missing file reads as an empty snapshot; writes go through a temp file and rename.

use super::lock::{ApplyLock, LockError, LockOptions};
use super::{SNAPSHOT_VERSION, Snapshot};
use crate::fragment::SecretKey;
use crate::types::ResourceName;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to read snapshot {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("snapshot {path} is not valid: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("snapshot {path} has unsupported version {version}")]
    UnsupportedVersion { path: PathBuf, version: u32 },

    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[source] serde_yaml::Error),

    #[error("failed to write snapshot {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("secret key {path} is not 64 hex characters")]
    InvalidKey { path: PathBuf },
}

/// Files in the state directory that must stay out of version control.
const IGNORED: &str = "*.key\n*.lock\n*.tmp\n";

/// File-backed snapshot storage for one deployment unit.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
    unit: ResourceName,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>, unit: ResourceName) -> Self {
        Self {
            dir: dir.into(),
            unit,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn unit(&self) -> &ResourceName {
        &self.unit
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.snapshot.yml", self.unit))
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(format!("{}.lock", self.unit))
    }

    pub fn load(&self) -> Result<Snapshot, SnapshotError> {
        let path = self.path();
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no snapshot yet, starting empty");
                return Ok(Snapshot::new());
            }
            Err(source) => return Err(SnapshotError::Read { path, source }),
        };

        let snapshot: Snapshot = serde_yaml::from_str(&contents)
            .map_err(|source| SnapshotError::Parse {
                path: path.clone(),
                source,
            })?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                path,
                version: snapshot.version,
            });
        }
        Ok(snapshot)
    }

    /// Replaces the snapshot file atomically.
    pub fn save(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let path = self.path();
        let yaml = serde_yaml::to_string(snapshot).map_err(SnapshotError::Serialize)?;
        let write_err = |source| SnapshotError::Write {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(write_err)?;
        let tmp = path.with_extension("yml.tmp");
        let mut file = fs::File::create(&tmp).map_err(write_err)?;
        file.write_all(yaml.as_bytes()).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        fs::rename(&tmp, &path).map_err(write_err)?;
        tracing::debug!(path = %path.display(), records = snapshot.len(), "saved snapshot");
        Ok(())
    }

    pub fn secret_key_path(&self) -> PathBuf {
        self.dir.join(format!("{}.key", self.unit))
    }

    /// The unit's secret key, if one was created.
    pub fn load_secret_key(&self) -> Result<Option<SecretKey>, SnapshotError> {
        let path = self.secret_key_path();
        match fs::read_to_string(&path) {
            Ok(contents) => SecretKey::from_hex(&contents)
                .map(Some)
                .ok_or(SnapshotError::InvalidKey { path }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SnapshotError::Read { path, source }),
        }
    }

    /// The unit's secret key, created on first use with owner-only permissions.
    pub fn secret_key(&self) -> Result<SecretKey, SnapshotError> {
        if let Some(key) = self.load_secret_key()? {
            return Ok(key);
        }

        let path = self.secret_key_path();
        let write_err = |source| SnapshotError::Write {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(write_err)?;
        let key = SecretKey::generate().map_err(write_err)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&path)
            .map_err(write_err)?;
        writeln!(file, "{}", key.to_hex()).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;

        let ignore = self.dir.join(".gitignore");
        if !ignore.exists() {
            fs::write(&ignore, IGNORED).map_err(|source| SnapshotError::Write {
                path: ignore.clone(),
                source,
            })?;
        }
        tracing::info!(path = %path.display(), "created secret key");
        Ok(key)
    }

    /// Takes the exclusive apply lock for this unit.
    pub fn lock(&self, options: LockOptions) -> Result<ApplyLock, LockError> {
        fs::create_dir_all(&self.dir).map_err(|source| LockError::Io {
            path: self.dir.clone(),
            source,
        })?;
        ApplyLock::acquire(self.lock_path(), &self.unit, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{Fragment, Volume};
    use crate::snapshot::SnapshotRecord;
    use crate::types::RuntimeHandle;

    fn store(dir: &Path) -> SnapshotStore {
        SnapshotStore::new(dir.join("state"), ResourceName::new("shop").unwrap())
    }

    #[test]
    fn missing_file_loads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let snapshot = store(tmp.path()).load().unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn save_then_load_preserves_records() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let fragment: Fragment = Volume::new("pgdata").unwrap().into();
        let snapshot = Snapshot::from_records(vec![SnapshotRecord::from_fragment(
            &fragment,
            RuntimeHandle::new("shop_pgdata"),
        )]);

        store.save(&snapshot).unwrap();
        assert!(store.path().ends_with("state/shop.snapshot.yml"));
        assert!(!store.path().with_extension("yml.tmp").exists());
        assert_eq!(store.load().unwrap(), snapshot);
    }

    #[test]
    fn secret_key_is_created_once_and_kept_private() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        assert_eq!(store.load_secret_key().unwrap(), None);

        let key = store.secret_key().unwrap();
        assert_eq!(store.secret_key().unwrap(), key);
        assert_eq!(store.load_secret_key().unwrap(), Some(key));

        let mode = fs::metadata(store.secret_key_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        let ignore = fs::read_to_string(store.dir().join(".gitignore")).unwrap();
        assert!(ignore.lines().any(|l| l == "*.key"));
    }

    #[test]
    fn malformed_secret_key_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.secret_key_path(), "not-a-key\n").unwrap();
        assert!(matches!(
            store.secret_key(),
            Err(SnapshotError::InvalidKey { .. })
        ));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.path(), "records: [[[").unwrap();
        assert!(matches!(store.load(), Err(SnapshotError::Parse { .. })));
    }

    #[test]
    fn future_version_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.path(), "version: 9\nrecords: []\n").unwrap();
        assert!(matches!(
            store.load(),
            Err(SnapshotError::UnsupportedVersion { version: 9, .. })
        ));
    }
}
