// ABOUTME: Entry points tying store, planner, executor and driver together for one unit.
// ABOUTME: apply holds the unit's lock for its whole duration and persists after every commit.

use crate::apply::{DEFAULT_OPERATION_TIMEOUT, Executor, PartialApplyResult};
use crate::diagnostics::{Diagnostics, Warning};
use crate::error::{Error, Result};
use crate::graph::StackGraph;
use crate::plan::{ChangePlan, plan};
use crate::runtime::{ResourceState, RuntimeDriver};
use crate::snapshot::{LockOptions, SnapshotRecord, SnapshotStore};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub operation_timeout: Duration,
    pub lock: LockOptions,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            lock: LockOptions::default(),
        }
    }
}

/// Observed state of one snapshot record.
#[derive(Debug, Clone)]
pub struct ResourceStatus {
    pub record: SnapshotRecord,
    pub state: ResourceState,
}

/// Plans and applies stacks for one deployment unit.
pub struct Engine<D> {
    store: SnapshotStore,
    driver: D,
    settings: EngineSettings,
    cancel: CancellationToken,
}

impl<D: RuntimeDriver> Engine<D> {
    pub fn new(store: SnapshotStore, driver: D) -> Self {
        Self {
            store,
            driver,
            settings: EngineSettings::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Dry run: what `apply` would do right now. Takes no lock and writes nothing.
    pub fn plan(&self, desired: &StackGraph) -> Result<ChangePlan> {
        let snapshot = self.store.load()?;
        let desired = match self.store.load_secret_key()? {
            Some(key) => desired.clone().with_secret_key(&key),
            None => desired.clone(),
        };
        Ok(plan(&desired, &snapshot)?)
    }

    /// Brings the runtime in line with `desired`.
    ///
    /// Errors only for problems before execution starts. Execution failures
    /// are reported in the returned [`PartialApplyResult`].
    pub async fn apply(
        &self,
        desired: &StackGraph,
        diag: &mut Diagnostics,
    ) -> Result<PartialApplyResult> {
        let lock = self.store.lock(self.settings.lock)?;
        if let Some(broken) = lock.broken() {
            diag.warn(Warning::lock_broken(format!("broke apply {}", broken)));
        }

        let outcome = self.apply_locked(desired, diag).await;

        let lock_path = lock.path().to_path_buf();
        if let Err(e) = lock.release() {
            diag.warn(Warning::lock_release(format!(
                "failed to release lock {}: {}",
                lock_path.display(),
                e
            )));
        }
        outcome
    }

    async fn apply_locked(
        &self,
        desired: &StackGraph,
        diag: &mut Diagnostics,
    ) -> Result<PartialApplyResult> {
        let desired = desired.clone().with_secret_key(&self.store.secret_key()?);
        let snapshot = self.store.load()?;
        let changes = plan(&desired, &snapshot)?;
        tracing::info!(
            unit = %self.store.unit(),
            operations = changes.len(),
            "applying {}",
            changes.summary()
        );

        let result = Executor::new(&self.driver)
            .with_timeout(self.settings.operation_timeout)
            .with_cancellation(self.cancel.clone())
            .execute_with(&changes, &desired, snapshot, |current| self.store.save(current))
            .await;

        // Persists the final dependency ordering. Every commit is already on disk.
        if let Err(e) = self.store.save(result.snapshot()) {
            diag.warn(Warning::snapshot_save(format!(
                "failed to save the reordered snapshot: {}",
                e
            )));
        }
        Ok(result)
    }

    /// Tears down everything recorded for the unit, dependents first.
    pub async fn destroy(&self, diag: &mut Diagnostics) -> Result<PartialApplyResult> {
        self.apply(&StackGraph::empty(), diag).await
    }

    /// Inspects every recorded resource through the driver.
    pub async fn status(&self) -> Result<Vec<ResourceStatus>> {
        let snapshot = self.store.load()?;
        let mut statuses = Vec::with_capacity(snapshot.len());
        for record in snapshot.records() {
            let state = match self.driver.inspect(record.kind, &record.handle).await {
                Ok(state) => state,
                Err(e) if e.is_not_found() => ResourceState::Missing,
                Err(source) => {
                    return Err(Error::Inspect {
                        key: record.key(),
                        source,
                    });
                }
            };
            statuses.push(ResourceStatus {
                record: record.clone(),
                state,
            });
        }
        Ok(statuses)
    }
}
