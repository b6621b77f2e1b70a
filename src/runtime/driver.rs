// ABOUTME: The boundary between the apply engine and a container runtime.
// ABOUTME: Drivers realize fragments and report back opaque handles and observed state.

use crate::fragment::Fragment;
use crate::types::{ResourceKind, RuntimeHandle};
use async_trait::async_trait;
use std::fmt;

/// What a driver observes about a realized resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// A service whose containers are all running.
    Running,
    /// A service with at least one container not running.
    Stopped,
    /// A non-service resource that exists.
    Present,
    Missing,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceState::Running => write!(f, "running"),
            ResourceState::Stopped => write!(f, "stopped"),
            ResourceState::Present => write!(f, "present"),
            ResourceState::Missing => write!(f, "missing"),
        }
    }
}

/// Errors reported by a runtime driver.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("image build failed: {0}")]
    Build(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("runtime error: {0}")]
    Runtime(String),
}

impl DriverError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DriverError::NotFound(_))
    }
}

/// Realizes fragments against a container runtime.
///
/// Handles are opaque to the engine; a driver must accept any handle it
/// previously returned, including after a process restart.
#[async_trait]
pub trait RuntimeDriver: Send + Sync {
    async fn create_resource(&self, fragment: &Fragment) -> Result<RuntimeHandle, DriverError>;

    /// Applies in-place changes. May return a new handle.
    async fn update_resource(
        &self,
        handle: &RuntimeHandle,
        fragment: &Fragment,
    ) -> Result<RuntimeHandle, DriverError>;

    /// Removes the resource. Returns [`DriverError::NotFound`] if it is already gone.
    async fn destroy_resource(
        &self,
        kind: ResourceKind,
        handle: &RuntimeHandle,
    ) -> Result<(), DriverError>;

    async fn inspect(
        &self,
        kind: ResourceKind,
        handle: &RuntimeHandle,
    ) -> Result<ResourceState, DriverError>;
}
