// ABOUTME: Runtime driver boundary plus the bollard-backed Docker/Podman implementation.
// ABOUTME: Detects the local runtime socket or uses the explicit config override.

mod bollard;
mod container;
mod detection;
mod driver;
mod error;
mod types;

pub use self::bollard::DockerDriver;
pub use container::{RESOURCE_LABEL, UNIT_LABEL, replica_name, scoped_name};
pub use detection::{DetectionError, detect_local};
pub use driver::{DriverError, ResourceState, RuntimeDriver};
pub use error::{RuntimeError, RuntimeErrorKind};
pub use types::{RuntimeConfig, RuntimeInfo, RuntimeType};
