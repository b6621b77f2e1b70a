// ABOUTME: Error type for a single failed apply operation.
// ABOUTME: Runtime failures and timeouts abort the rest of the plan but keep earlier progress.

use crate::runtime::DriverError;
use crate::snapshot::SnapshotError;
use crate::types::ResourceKey;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error(transparent)]
    Runtime(#[from] DriverError),

    #[error("timed out after {}s", .after.as_secs())]
    Timeout { after: Duration },

    #[error("failed to persist snapshot: {0}")]
    Persist(#[from] SnapshotError),

    /// The plan names a resource that the desired graph or snapshot does not hold.
    #[error("plan references {key}, which is not in the {source_name}")]
    Inconsistent {
        key: ResourceKey,
        source_name: &'static str,
    },
}

impl ApplyError {
    /// Whether the runtime failed (including by not answering in time).
    pub fn is_runtime(&self) -> bool {
        matches!(self, ApplyError::Runtime(_) | ApplyError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_a_runtime_error() {
        let err = ApplyError::Timeout {
            after: Duration::from_secs(120),
        };
        assert!(err.is_runtime());
        assert_eq!(err.to_string(), "timed out after 120s");
    }

    #[test]
    fn driver_errors_display_through() {
        let err = ApplyError::from(DriverError::Build("exit 1".into()));
        assert!(err.is_runtime());
        assert_eq!(err.to_string(), "image build failed: exit 1");
    }
}
