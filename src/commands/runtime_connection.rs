// ABOUTME: Shared helper for connecting to the local container runtime.
// ABOUTME: Used by apply, destroy, and status.

use dockr::config::Config;
use dockr::error::Result;
use dockr::output::Output;
use dockr::runtime::{DockerDriver, RuntimeError, detect_local};
use std::path::Path;

/// Connect to the container runtime on this machine.
///
/// This handles the common pattern of:
/// 1. Detecting the runtime type and socket path
/// 2. Outputting progress messages
/// 3. Establishing and verifying the connection
pub async fn connect_to_runtime(
    config: &Config,
    project_dir: &Path,
    output: &Output,
) -> Result<DockerDriver> {
    output.progress("  → Detecting runtime...");
    let runtime_info = detect_local(&config.runtime).map_err(RuntimeError::from)?;

    output.progress(&format!(
        "  → Found {} at {}",
        runtime_info.runtime_type, runtime_info.socket_path
    ));

    let driver = DockerDriver::connect(
        &runtime_info,
        config.unit.clone(),
        &config.state_dir_in(project_dir),
    )?;
    driver.ping().await?;

    Ok(driver)
}
