// ABOUTME: Validated domain types shared across fragments, planner and driver.
// ABOUTME: Uses phantom types to prevent runtime ID confusion at compile time.

mod id;
mod image_ref;
mod resource_key;
mod resource_name;
mod restart_policy;

pub use id::{ContainerId, Id, RuntimeHandle};
pub use image_ref::{ImageRef, ParseImageRefError};
pub use resource_key::{ResourceKey, ResourceKind};
pub use resource_name::{ResourceName, ResourceNameError};
pub use restart_policy::RestartPolicy;
