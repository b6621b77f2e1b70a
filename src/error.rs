// ABOUTME: Application-wide error types for dockr.
// ABOUTME: Wraps each layer's error; lock contention surfaces as ConcurrentApply.

use crate::fragment::ValidationError;
use crate::graph::GraphError;
use crate::plan::PlanningError;
use crate::runtime::{DriverError, RuntimeError};
use crate::snapshot::{LockError, LockInfo, SnapshotError};
use crate::types::ResourceKey;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("configuration file not found in {0}")]
    ConfigNotFound(PathBuf),

    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("resource '{name}': {source}")]
    InvalidResource {
        name: String,
        #[source]
        source: ValidationError,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("another apply is in progress ({0}); use --force-unlock to override")]
    ConcurrentApply(LockInfo),

    #[error(transparent)]
    Lock(LockError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("failed to inspect {key}: {source}")]
    Inspect {
        key: ResourceKey,
        #[source]
        source: DriverError,
    },

    #[error("{0} hook failed")]
    Hook(String),

    #[error("apply did not complete: {0}")]
    Incomplete(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl From<LockError> for Error {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Held(info) => Error::ConcurrentApply(info),
            other => Error::Lock(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResourceName;

    #[test]
    fn held_lock_becomes_concurrent_apply() {
        let info = LockInfo::new(&ResourceName::new("shop").unwrap());
        let err = Error::from(LockError::Held(info.clone()));
        let Error::ConcurrentApply(holder) = &err else {
            panic!("expected ConcurrentApply, got {err:?}");
        };
        assert_eq!(holder, &info);
        assert!(err.to_string().contains("--force-unlock"));
    }
}
