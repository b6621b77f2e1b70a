// ABOUTME: Test support utilities.
// ABOUTME: Provides an in-memory runtime driver with injectable faults, and stack helpers.

// Each test binary only uses some of these helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use dockr::engine::{Engine, EngineSettings};
use dockr::fragment::{Fragment, Network, Service};
use dockr::graph::StackGraph;
use dockr::runtime::{DriverError, ResourceState, RuntimeDriver};
use dockr::snapshot::{LockOptions, SnapshotStore};
use dockr::types::{ResourceKind, ResourceName, RuntimeHandle};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Once;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env().add_directive("dockr=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    Create,
    Update,
    Destroy,
}

/// What the fake does instead of succeeding.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail with a runtime error.
    Error,
    /// Never answer; only an operation timeout ends the call.
    Hang,
    /// Cancel `token`, then succeed.
    Cancel(CancellationToken),
}

#[derive(Default)]
struct State {
    next_id: u32,
    /// handle -> resource key
    live: BTreeMap<String, String>,
    calls: Vec<String>,
    faults: HashMap<(Call, String), Fault>,
}

/// In-memory runtime. Handles are `<name>-<n>`.
#[derive(Default)]
pub struct FakeDriver {
    state: Mutex<State>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(self, call: Call, key: &str, fault: Fault) -> Self {
        self.inject(call, key, fault);
        self
    }

    pub fn inject(&self, call: Call, key: &str, fault: Fault) {
        self.state.lock().faults.insert((call, key.to_string()), fault);
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    /// Every driver call so far, e.g. `create service/db`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Keys of resources currently realized, sorted.
    pub fn live(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state.lock().live.values().cloned().collect();
        keys.sort();
        keys
    }

    /// Removes a resource behind the engine's back.
    pub fn vanish(&self, key: &str) {
        self.state.lock().live.retain(|_, k| k != key);
    }

    async fn enter(&self, call: Call, key: &str) -> Result<(), DriverError> {
        let fault = {
            let mut state = self.state.lock();
            let verb = match call {
                Call::Create => "create",
                Call::Update => "update",
                Call::Destroy => "destroy",
            };
            state.calls.push(format!("{} {}", verb, key));
            state.faults.get(&(call, key.to_string())).cloned()
        };
        match fault {
            None => Ok(()),
            Some(Fault::Error) => Err(DriverError::Runtime(format!("injected failure on {}", key))),
            Some(Fault::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
            Some(Fault::Cancel(token)) => {
                token.cancel();
                Ok(())
            }
        }
    }

    fn realize(&self, fragment: &Fragment) -> RuntimeHandle {
        let mut state = self.state.lock();
        state.next_id += 1;
        let handle = format!("{}-{}", fragment.name(), state.next_id);
        state.live.insert(handle.clone(), fragment.key().to_string());
        RuntimeHandle::new(handle)
    }

    fn key_of(&self, handle: &RuntimeHandle) -> Option<String> {
        self.state.lock().live.get(handle.as_str()).cloned()
    }
}

#[async_trait]
impl RuntimeDriver for FakeDriver {
    async fn create_resource(&self, fragment: &Fragment) -> Result<RuntimeHandle, DriverError> {
        self.enter(Call::Create, &fragment.key().to_string()).await?;
        Ok(self.realize(fragment))
    }

    async fn update_resource(
        &self,
        handle: &RuntimeHandle,
        fragment: &Fragment,
    ) -> Result<RuntimeHandle, DriverError> {
        self.enter(Call::Update, &fragment.key().to_string()).await?;
        if self.key_of(handle).is_none() {
            return Err(DriverError::NotFound(handle.to_string()));
        }
        Ok(handle.clone())
    }

    async fn destroy_resource(
        &self,
        kind: ResourceKind,
        handle: &RuntimeHandle,
    ) -> Result<(), DriverError> {
        let key = self
            .key_of(handle)
            .unwrap_or_else(|| format!("{}/{}", kind, handle));
        self.enter(Call::Destroy, &key).await?;
        match self.state.lock().live.remove(handle.as_str()) {
            Some(_) => Ok(()),
            None => Err(DriverError::NotFound(handle.to_string())),
        }
    }

    async fn inspect(
        &self,
        kind: ResourceKind,
        handle: &RuntimeHandle,
    ) -> Result<ResourceState, DriverError> {
        match self.key_of(handle) {
            Some(_) if kind == ResourceKind::Service => Ok(ResourceState::Running),
            Some(_) => Ok(ResourceState::Present),
            None => Err(DriverError::NotFound(handle.to_string())),
        }
    }
}

pub fn unit() -> ResourceName {
    ResourceName::new("shop").unwrap()
}

pub fn store(dir: &Path) -> SnapshotStore {
    SnapshotStore::new(dir.join("state"), unit())
}

/// An engine over `driver` with a short per-operation timeout.
pub fn engine(dir: &Path, driver: FakeDriver) -> Engine<FakeDriver> {
    init_tracing();
    Engine::new(store(dir), driver).with_settings(EngineSettings {
        operation_timeout: Duration::from_millis(200),
        lock: LockOptions::default(),
    })
}

pub fn network(name: &str) -> Fragment {
    Network::new(name).unwrap().into()
}

pub fn db() -> Fragment {
    Service::from_image("db", "postgres:16")
        .unwrap()
        .network("backend")
        .unwrap()
        .into()
}

pub fn app(tag: &str) -> Fragment {
    Service::from_image("app", &format!("shop/app:{}", tag))
        .unwrap()
        .network("backend")
        .unwrap()
        .depends_on("db")
        .unwrap()
        .into()
}

pub fn cache() -> Fragment {
    Service::from_image("cache", "redis:7-alpine").unwrap().into()
}

pub fn stack(fragments: impl IntoIterator<Item = Fragment>) -> StackGraph {
    StackGraph::assemble(fragments).unwrap()
}

/// Keys of a plan or outcome list, prefixed with the operation kind.
pub fn describe<'a>(ops: impl IntoIterator<Item = &'a dockr::plan::Operation>) -> Vec<String> {
    ops.into_iter()
        .map(|op| format!("{} {}", op.kind, op.target))
        .collect()
}
