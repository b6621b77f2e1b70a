// ABOUTME: Status command implementation.
// ABOUTME: Inspects every recorded resource and flags the ones missing from the runtime.

use super::runtime_connection::connect_to_runtime;
use dockr::Engine;
use dockr::config::Config;
use dockr::diagnostics::{Diagnostics, Warning};
use dockr::error::Result;
use dockr::output::Output;
use dockr::runtime::ResourceState;
use std::path::Path;

pub async fn status(config: &Config, project_dir: &Path, output: Output) -> Result<()> {
    let driver = connect_to_runtime(config, project_dir, &output).await?;
    let engine = Engine::new(config.snapshot_store(project_dir), driver);
    let mut diag = Diagnostics::default();

    let statuses = engine.status().await?;
    for status in &statuses {
        if status.state == ResourceState::Missing {
            diag.warn(Warning::drift(format!(
                "{} is recorded but missing from the runtime",
                status.record.key()
            )));
        }
    }

    output.status(&statuses);
    for warning in diag.warnings() {
        output.warning(&warning.message);
    }
    Ok(())
}
