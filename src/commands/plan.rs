// ABOUTME: Plan command implementation.
// ABOUTME: Diffs dockr.yml against the recorded snapshot without touching the runtime.

use dockr::config::Config;
use dockr::error::Result;
use dockr::output::Output;
use dockr::plan::plan as diff;
use std::path::Path;

pub fn plan(config: &Config, project_dir: &Path, output: Output) -> Result<()> {
    let desired = config.stack()?;
    let snapshot = config.snapshot_store(project_dir).load()?;
    let changes = diff(&desired, &snapshot)?;
    output.plan(&changes);
    Ok(())
}
