// ABOUTME: Integration tests for hooks system.
// ABOUTME: Tests hook discovery, execution, and environment variable passing.

use dockr::hooks::{HookContext, HookPoint, HookRunner};
use dockr::types::ResourceName;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use tempfile::TempDir;

fn create_hook(dir: &TempDir, name: &str, script: &str) {
    let hooks_dir = dir.path().join(".dockr").join("hooks");
    fs::create_dir_all(&hooks_dir).unwrap();

    let hook_path = hooks_dir.join(name);
    fs::write(&hook_path, script).unwrap();

    let mut perms = fs::metadata(&hook_path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&hook_path, perms).unwrap();
}

fn test_context() -> HookContext {
    HookContext::new(&ResourceName::new("shop").unwrap(), 3)
}

#[tokio::test]
async fn pre_apply_hook_runs() {
    let temp_dir = TempDir::new().unwrap();
    create_hook(
        &temp_dir,
        "pre-apply",
        "#!/bin/sh\necho 'pre-apply ran'\nexit 0\n",
    );

    let runner = HookRunner::new(temp_dir.path());
    assert!(runner.hook_exists(HookPoint::PreApply));

    let result = runner
        .run(HookPoint::PreApply, &test_context())
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.exit_code, Some(0));
    assert!(result.stdout.contains("pre-apply ran"));
}

#[tokio::test]
async fn hooks_only_run_at_their_own_point() {
    let temp_dir = TempDir::new().unwrap();
    create_hook(&temp_dir, "post-apply", "#!/bin/sh\nexit 0\n");

    let runner = HookRunner::new(temp_dir.path());
    assert!(runner.hook_exists(HookPoint::PostApply));
    assert!(!runner.hook_exists(HookPoint::PreApply));
    assert!(
        runner
            .run(HookPoint::OnError, &test_context())
            .await
            .is_none()
    );
}

#[tokio::test]
async fn failing_hook_reports_exit_code_and_stderr() {
    let temp_dir = TempDir::new().unwrap();
    create_hook(
        &temp_dir,
        "pre-apply",
        "#!/bin/sh\necho 'not today' >&2\nexit 3\n",
    );

    let runner = HookRunner::new(temp_dir.path());
    let result = runner
        .run(HookPoint::PreApply, &test_context())
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.exit_code, Some(3));
    assert!(result.stderr.contains("not today"));
}

#[tokio::test]
async fn hook_receives_environment_variables() {
    let temp_dir = TempDir::new().unwrap();
    create_hook(
        &temp_dir,
        "on-error",
        r#"#!/bin/sh
echo "UNIT=$DOCKR_UNIT"
echo "OPERATIONS=$DOCKR_OPERATIONS"
echo "FAILED=$DOCKR_FAILED"
exit 0
"#,
    );

    let context = test_context().with_failure("create service/app");
    let runner = HookRunner::new(temp_dir.path());
    let result = runner.run(HookPoint::OnError, &context).await.unwrap();

    assert!(result.success);
    assert!(result.stdout.contains("UNIT=shop"));
    assert!(result.stdout.contains("OPERATIONS=3"));
    assert!(result.stdout.contains("FAILED=create service/app"));
}

#[tokio::test]
async fn non_executable_hook_fails_without_panicking() {
    let temp_dir = TempDir::new().unwrap();
    let hooks_dir = temp_dir.path().join(".dockr").join("hooks");
    fs::create_dir_all(&hooks_dir).unwrap();
    fs::write(hooks_dir.join("post-apply"), "#!/bin/sh\nexit 0\n").unwrap();

    let runner = HookRunner::new(temp_dir.path());
    let result = runner
        .run(HookPoint::PostApply, &test_context())
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.exit_code, None);
}

#[tokio::test]
async fn missing_hook_returns_none() {
    let temp_dir = TempDir::new().unwrap();

    let runner = HookRunner::new(temp_dir.path());
    assert!(!runner.hook_exists(HookPoint::PreApply));
    assert!(
        runner
            .run(HookPoint::PreApply, &test_context())
            .await
            .is_none()
    );
}
