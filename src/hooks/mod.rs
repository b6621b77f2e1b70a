// ABOUTME: Hooks for apply lifecycle events.
// ABOUTME: Discovers and executes scripts in .dockr/hooks at pre-apply, post-apply, and on-error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::types::ResourceName;

/// Hook execution points in the apply lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    /// Before any operation runs. Failure aborts the apply.
    PreApply,
    /// After every operation committed. Failure logs warning.
    PostApply,
    /// After a failed or cancelled apply. Failure logs warning.
    OnError,
}

impl HookPoint {
    pub fn filename(&self) -> &'static str {
        match self {
            HookPoint::PreApply => "pre-apply",
            HookPoint::PostApply => "post-apply",
            HookPoint::OnError => "on-error",
        }
    }

    /// Whether failure at this hook point should abort the apply.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HookPoint::PreApply)
    }
}

/// Context passed to hooks via environment variables.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub unit: ResourceName,
    /// Number of planned operations.
    pub operations: usize,
    /// The operation that failed, for `on-error`.
    pub failed: Option<String>,
}

impl HookContext {
    pub fn new(unit: &ResourceName, operations: usize) -> Self {
        Self {
            unit: unit.clone(),
            operations,
            failed: None,
        }
    }

    pub fn with_failure(mut self, failed: impl Into<String>) -> Self {
        self.failed = Some(failed.into());
        self
    }

    pub fn to_env(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("DOCKR_UNIT".to_string(), self.unit.to_string());
        env.insert("DOCKR_OPERATIONS".to_string(), self.operations.to_string());
        if let Some(ref failed) = self.failed {
            env.insert("DOCKR_FAILED".to_string(), failed.clone());
        }
        env
    }
}

/// Result of running a hook.
#[derive(Debug)]
pub struct HookResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Discovers and runs hooks from a project directory.
pub struct HookRunner {
    hooks_dir: PathBuf,
}

impl HookRunner {
    /// Looks for hooks in `<project_dir>/.dockr/hooks`.
    pub fn new(project_dir: &Path) -> Self {
        Self {
            hooks_dir: project_dir.join(".dockr").join("hooks"),
        }
    }

    pub fn hook_exists(&self, point: HookPoint) -> bool {
        self.hook_path(point).is_file()
    }

    fn hook_path(&self, point: HookPoint) -> PathBuf {
        self.hooks_dir.join(point.filename())
    }

    /// Run a hook if it exists.
    ///
    /// Returns None if the hook doesn't exist, or Some(HookResult) if it was run.
    pub async fn run(&self, point: HookPoint, context: &HookContext) -> Option<HookResult> {
        let hook_path = self.hook_path(point);
        if !hook_path.is_file() {
            return None;
        }

        tracing::info!("Running {} hook: {}", point.filename(), hook_path.display());

        let output = Command::new(&hook_path)
            .envs(context.to_env())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        let result = match output {
            Ok(output) => HookResult {
                success: output.status.success(),
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            },
            Err(e) => {
                tracing::error!("Failed to execute {} hook: {}", point.filename(), e);
                HookResult {
                    success: false,
                    exit_code: None,
                    stdout: String::new(),
                    stderr: e.to_string(),
                }
            }
        };

        if result.success {
            tracing::info!("{} hook completed successfully", point.filename());
        } else {
            tracing::warn!(
                "{} hook failed with exit code {:?}",
                point.filename(),
                result.exit_code
            );
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> ResourceName {
        ResourceName::new("shop").unwrap()
    }

    #[test]
    fn hook_point_filenames() {
        assert_eq!(HookPoint::PreApply.filename(), "pre-apply");
        assert_eq!(HookPoint::PostApply.filename(), "post-apply");
        assert_eq!(HookPoint::OnError.filename(), "on-error");
    }

    #[test]
    fn only_pre_apply_is_fatal() {
        assert!(HookPoint::PreApply.is_fatal());
        assert!(!HookPoint::PostApply.is_fatal());
        assert!(!HookPoint::OnError.is_fatal());
    }

    #[test]
    fn hook_context_to_env() {
        let env = HookContext::new(&unit(), 3)
            .with_failure("destroy service/db")
            .to_env();
        assert_eq!(env.get("DOCKR_UNIT"), Some(&"shop".to_string()));
        assert_eq!(env.get("DOCKR_OPERATIONS"), Some(&"3".to_string()));
        assert_eq!(
            env.get("DOCKR_FAILED"),
            Some(&"destroy service/db".to_string())
        );
    }

    #[test]
    fn hook_context_without_failure() {
        let env = HookContext::new(&unit(), 0).to_env();
        assert!(!env.contains_key("DOCKR_FAILED"));
    }

    #[test]
    fn hook_runner_checks_hooks_dir() {
        let runner = HookRunner::new(Path::new("/nonexistent"));
        assert!(!runner.hook_exists(HookPoint::PreApply));
    }
}
