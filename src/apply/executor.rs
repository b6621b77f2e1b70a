// ABOUTME: Runs a change plan against a runtime driver, one operation at a time.
// ABOUTME: Stops at the first failure or on cancellation; the snapshot reflects exactly what committed.

use super::error::ApplyError;
use super::state::{ApplyFailure, OperationOutcome, OperationState, Step};
use crate::graph::StackGraph;
use crate::plan::{ChangePlan, Operation, OperationKind};
use crate::runtime::RuntimeDriver;
use crate::snapshot::{Snapshot, SnapshotError, SnapshotRecord};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Result of executing a plan, successful or not.
#[derive(Debug)]
pub struct PartialApplyResult {
    outcomes: Vec<OperationOutcome>,
    failure: Option<ApplyFailure>,
    cancelled: bool,
    snapshot: Snapshot,
}

impl PartialApplyResult {
    /// Every operation of the plan, in plan order, with its final state.
    pub fn outcomes(&self) -> &[OperationOutcome] {
        &self.outcomes
    }

    pub fn committed(&self) -> impl Iterator<Item = &Operation> {
        self.with_state(OperationState::Committed)
    }

    pub fn not_started(&self) -> impl Iterator<Item = &Operation> {
        self.with_state(OperationState::Pending)
    }

    pub fn failure(&self) -> Option<&ApplyFailure> {
        self.failure.as_ref()
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none() && !self.cancelled
    }

    /// The snapshot after the run, in dependency order.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn into_snapshot(self) -> Snapshot {
        self.snapshot
    }

    fn with_state(&self, state: OperationState) -> impl Iterator<Item = &Operation> {
        self.outcomes
            .iter()
            .filter(move |o| o.state == state)
            .map(|o| &o.operation)
    }
}

/// What a committed operation does to the snapshot.
enum Effect {
    Upsert(SnapshotRecord),
    Remove,
}

/// Applies plans through a driver.
pub struct Executor<'a, D: ?Sized> {
    driver: &'a D,
    timeout: Duration,
    cancel: CancellationToken,
}

impl<'a, D: RuntimeDriver + ?Sized> Executor<'a, D> {
    pub fn new(driver: &'a D) -> Self {
        Self {
            driver,
            timeout: DEFAULT_OPERATION_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    /// Upper bound for each driver call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Once `token` is cancelled no further operation starts. The one in
    /// flight runs to completion or timeout.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub async fn execute(
        &self,
        plan: &ChangePlan,
        desired: &StackGraph,
        snapshot: Snapshot,
    ) -> PartialApplyResult {
        self.execute_with(plan, desired, snapshot, |_| Ok(())).await
    }

    /// Like [`execute`](Self::execute), calling `on_commit` with the updated
    /// snapshot after every committed operation. An `on_commit` error fails
    /// that operation with [`ApplyError::Persist`] and stops the run.
    pub async fn execute_with<F>(
        &self,
        plan: &ChangePlan,
        desired: &StackGraph,
        mut snapshot: Snapshot,
        mut on_commit: F,
    ) -> PartialApplyResult
    where
        F: FnMut(&Snapshot) -> Result<(), SnapshotError>,
    {
        let mut outcomes = Vec::with_capacity(plan.len());
        let mut failure = None;
        let mut cancelled = false;
        let mut pending = plan.iter().cloned().map(Step::new);

        for step in pending.by_ref() {
            if self.cancel.is_cancelled() {
                tracing::warn!("apply cancelled, leaving remaining operations pending");
                cancelled = true;
                outcomes.push(step.into());
                break;
            }

            let step = step.start();
            let result = self.run(step.operation(), desired, &snapshot).await;
            let committed = result.and_then(|effect| {
                let key = step.operation().target.clone();
                match effect {
                    Effect::Upsert(record) => snapshot.upsert(record),
                    Effect::Remove => {
                        snapshot.remove(&key);
                    }
                }
                on_commit(&snapshot).map_err(ApplyError::Persist)
            });

            match committed {
                Ok(()) => outcomes.push(step.commit().into()),
                Err(error) => {
                    let (outcome, cause) = step.fail(error).into_parts();
                    outcomes.push(outcome);
                    failure = Some(cause);
                    break;
                }
            }
        }
        outcomes.extend(pending.map(OperationOutcome::from));

        snapshot.reorder(desired);
        PartialApplyResult {
            outcomes,
            failure,
            cancelled,
            snapshot,
        }
    }

    async fn run(
        &self,
        op: &Operation,
        desired: &StackGraph,
        snapshot: &Snapshot,
    ) -> Result<Effect, ApplyError> {
        let key = &op.target;
        match op.kind {
            OperationKind::Create => {
                let fragment = desired.get(key).ok_or_else(|| ApplyError::Inconsistent {
                    key: key.clone(),
                    source_name: "desired stack",
                })?;
                let handle = self.bounded(self.driver.create_resource(fragment)).await?;
                Ok(Effect::Upsert(SnapshotRecord::from_fragment(fragment, handle)))
            }
            OperationKind::Update => {
                let fragment = desired.get(key).ok_or_else(|| ApplyError::Inconsistent {
                    key: key.clone(),
                    source_name: "desired stack",
                })?;
                let record = snapshot.get(key).ok_or_else(|| ApplyError::Inconsistent {
                    key: key.clone(),
                    source_name: "snapshot",
                })?;
                let handle = self
                    .bounded(self.driver.update_resource(&record.handle, fragment))
                    .await?;
                Ok(Effect::Upsert(SnapshotRecord::from_fragment(fragment, handle)))
            }
            OperationKind::Destroy => {
                let record = snapshot.get(key).ok_or_else(|| ApplyError::Inconsistent {
                    key: key.clone(),
                    source_name: "snapshot",
                })?;
                match self
                    .bounded(self.driver.destroy_resource(key.kind, &record.handle))
                    .await
                {
                    Ok(()) => Ok(Effect::Remove),
                    Err(ApplyError::Runtime(e)) if e.is_not_found() => {
                        tracing::debug!(%key, "already gone");
                        Ok(Effect::Remove)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    async fn bounded<T, E>(
        &self,
        call: impl std::future::Future<Output = Result<T, E>>,
    ) -> Result<T, ApplyError>
    where
        ApplyError: From<E>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ApplyError::Timeout {
                after: self.timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{Fragment, Network, Service};
    use crate::plan::plan;
    use crate::runtime::{DriverError, ResourceState};
    use crate::types::{ResourceKind, RuntimeHandle};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Records calls; fails creates of the named resource.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl RuntimeDriver for Recorder {
        async fn create_resource(&self, fragment: &Fragment) -> Result<RuntimeHandle, DriverError> {
            self.calls.lock().push(format!("create {}", fragment.key()));
            if Some(fragment.name().as_str()) == self.fail_on {
                return Err(DriverError::Runtime("boom".into()));
            }
            Ok(RuntimeHandle::new(format!("h-{}", fragment.name())))
        }

        async fn update_resource(
            &self,
            handle: &RuntimeHandle,
            fragment: &Fragment,
        ) -> Result<RuntimeHandle, DriverError> {
            self.calls.lock().push(format!("update {}", fragment.key()));
            Ok(handle.clone())
        }

        async fn destroy_resource(
            &self,
            kind: ResourceKind,
            handle: &RuntimeHandle,
        ) -> Result<(), DriverError> {
            self.calls.lock().push(format!("destroy {} {}", kind, handle));
            Err(DriverError::NotFound(handle.to_string()))
        }

        async fn inspect(
            &self,
            _kind: ResourceKind,
            _handle: &RuntimeHandle,
        ) -> Result<ResourceState, DriverError> {
            Ok(ResourceState::Present)
        }
    }

    fn stack() -> StackGraph {
        StackGraph::assemble([
            Network::new("backend").unwrap().into(),
            Service::from_image("db", "postgres:16")
                .unwrap()
                .network("backend")
                .unwrap()
                .into(),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn applies_in_order_and_records_handles() {
        let driver = Recorder::default();
        let desired = stack();
        let plan = plan(&desired, &Snapshot::new()).unwrap();

        let result = Executor::new(&driver)
            .execute(&plan, &desired, Snapshot::new())
            .await;

        assert!(result.is_success());
        assert_eq!(result.committed().count(), 2);
        assert_eq!(
            *driver.calls.lock(),
            vec!["create network/backend", "create service/db"]
        );
        let handles: Vec<&str> = result
            .snapshot()
            .records()
            .iter()
            .map(|r| r.handle.as_str())
            .collect();
        assert_eq!(handles, vec!["h-backend", "h-db"]);
    }

    #[tokio::test]
    async fn failure_stops_the_run() {
        let driver = Recorder {
            fail_on: Some("backend"),
            ..Recorder::default()
        };
        let desired = stack();
        let plan = plan(&desired, &Snapshot::new()).unwrap();

        let result = Executor::new(&driver)
            .execute(&plan, &desired, Snapshot::new())
            .await;

        assert!(!result.is_success());
        let failure = result.failure().unwrap();
        assert_eq!(failure.operation.target.to_string(), "network/backend");
        assert!(failure.error.is_runtime());
        assert_eq!(result.not_started().count(), 1);
        assert!(result.snapshot().is_empty());
    }

    #[tokio::test]
    async fn destroying_a_missing_resource_commits() {
        let driver = Recorder::default();
        let desired = stack();
        let applied = Executor::new(&driver)
            .execute(
                &plan(&desired, &Snapshot::new()).unwrap(),
                &desired,
                Snapshot::new(),
            )
            .await
            .into_snapshot();

        let empty = StackGraph::empty();
        let teardown = plan(&empty, &applied).unwrap();
        let result = Executor::new(&driver)
            .execute(&teardown, &empty, applied)
            .await;

        assert!(result.is_success());
        assert!(result.snapshot().is_empty());
        assert!(driver.calls.lock().ends_with(&[
            "destroy service h-db".to_string(),
            "destroy network h-backend".to_string()
        ]));
    }

    #[tokio::test]
    async fn cancelled_token_starts_nothing() {
        let driver = Recorder::default();
        let desired = stack();
        let plan = plan(&desired, &Snapshot::new()).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let result = Executor::new(&driver)
            .with_cancellation(token)
            .execute(&plan, &desired, Snapshot::new())
            .await;

        assert!(result.was_cancelled());
        assert!(!result.is_success());
        assert_eq!(result.not_started().count(), 2);
        assert!(driver.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn persist_failure_fails_the_operation() {
        let driver = Recorder::default();
        let desired = stack();
        let plan = plan(&desired, &Snapshot::new()).unwrap();

        let result = Executor::new(&driver)
            .execute_with(&plan, &desired, Snapshot::new(), |_| {
                Err(SnapshotError::Serialize(
                    serde_yaml::from_str::<u32>("x: [").unwrap_err(),
                ))
            })
            .await;

        let failure = result.failure().unwrap();
        assert!(matches!(failure.error, ApplyError::Persist(_)));
        assert!(!failure.error.is_runtime());
        // The runtime change happened, so the returned snapshot keeps it.
        assert_eq!(result.snapshot().len(), 1);
    }
}
