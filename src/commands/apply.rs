// ABOUTME: Apply and destroy command implementations.
// ABOUTME: Handles hooks, lock-guarded execution through the engine, and outcome reporting.

use super::runtime_connection::connect_to_runtime;
use dockr::Engine;
use dockr::apply::PartialApplyResult;
use dockr::config::Config;
use dockr::diagnostics::{Diagnostics, Warning};
use dockr::error::{Error, Result};
use dockr::graph::StackGraph;
use dockr::hooks::{HookContext, HookPoint, HookRunner};
use dockr::output::Output;
use dockr::runtime::DockerDriver;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// What the run converges to.
enum Target {
    Stack(StackGraph),
    Teardown,
}

impl Target {
    fn graph(&self) -> StackGraph {
        match self {
            Target::Stack(graph) => graph.clone(),
            Target::Teardown => StackGraph::empty(),
        }
    }
}

/// Bring the runtime in line with dockr.yml.
pub async fn apply(
    config: Config,
    project_dir: &Path,
    force_unlock: bool,
    cancel: CancellationToken,
    output: Output,
) -> Result<()> {
    let desired = config.stack()?;
    run(
        &config,
        project_dir,
        Target::Stack(desired),
        force_unlock,
        cancel,
        output,
    )
    .await
}

/// Remove everything recorded for the unit, dependents first.
pub async fn destroy(
    config: Config,
    project_dir: &Path,
    force_unlock: bool,
    cancel: CancellationToken,
    output: Output,
) -> Result<()> {
    run(
        &config,
        project_dir,
        Target::Teardown,
        force_unlock,
        cancel,
        output,
    )
    .await
}

async fn run(
    config: &Config,
    project_dir: &Path,
    target: Target,
    force_unlock: bool,
    cancel: CancellationToken,
    mut output: Output,
) -> Result<()> {
    output.start_timer();
    let hook_runner = HookRunner::new(project_dir);
    let mut diag = Diagnostics::default();

    let driver = connect_to_runtime(config, project_dir, &output).await?;
    let engine = Engine::new(config.snapshot_store(project_dir), driver)
        .with_settings(config.engine_settings(force_unlock))
        .with_cancellation(cancel);

    let changes = engine.plan(&target.graph())?;
    if changes.is_empty() {
        output.plan(&changes);
        return Ok(());
    }
    output.progress(&format!("Applying {} ({})", config.unit, changes.summary()));

    let hook_context = HookContext::new(&config.unit, changes.len());
    run_hook(&hook_runner, HookPoint::PreApply, &hook_context, &mut diag).await?;

    let result = match execute(&engine, &target, &mut diag).await {
        Ok(result) => result,
        Err(e) => {
            let context = hook_context.with_failure(e.to_string());
            run_hook(&hook_runner, HookPoint::OnError, &context, &mut diag).await?;
            emit_warnings(&output, &diag);
            return Err(e);
        }
    };

    output.outcomes(&result);

    if result.is_success() {
        run_hook(&hook_runner, HookPoint::PostApply, &hook_context, &mut diag).await?;
        emit_warnings(&output, &diag);
        output.success(&format!(
            "Applied {} operation(s) to {}",
            result.outcomes().len(),
            config.unit
        ));
        return Ok(());
    }

    let reason = incomplete_reason(&result);
    let context = hook_context.with_failure(reason.clone());
    run_hook(&hook_runner, HookPoint::OnError, &context, &mut diag).await?;
    emit_warnings(&output, &diag);
    Err(Error::Incomplete(reason))
}

async fn execute(
    engine: &Engine<DockerDriver>,
    target: &Target,
    diag: &mut Diagnostics,
) -> Result<PartialApplyResult> {
    match target {
        Target::Stack(graph) => engine.apply(graph, diag).await,
        Target::Teardown => engine.destroy(diag).await,
    }
}

/// Fails the run only for fatal hook points; other failures become warnings.
async fn run_hook(
    runner: &HookRunner,
    point: HookPoint,
    context: &HookContext,
    diag: &mut Diagnostics,
) -> Result<()> {
    let Some(hook) = runner.run(point, context).await else {
        return Ok(());
    };
    if hook.success {
        return Ok(());
    }
    if point.is_fatal() {
        if !hook.stderr.is_empty() {
            eprintln!("{}", hook.stderr);
        }
        return Err(Error::Hook(point.filename().to_string()));
    }
    diag.warn(Warning::hook(format!(
        "{} hook exited with {:?}",
        point.filename(),
        hook.exit_code
    )));
    Ok(())
}

fn emit_warnings(output: &Output, diag: &Diagnostics) {
    for warning in diag.warnings() {
        output.warning(&warning.message);
    }
}

fn incomplete_reason(result: &PartialApplyResult) -> String {
    let committed = result.committed().count();
    let total = result.outcomes().len();
    match result.failure() {
        Some(failure) => format!(
            "{} failed after {} of {} operation(s): {}",
            failure.operation, committed, total, failure.error
        ),
        None => format!(
            "cancelled after {} of {} operation(s)",
            committed, total
        ),
    }
}
