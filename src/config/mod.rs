// ABOUTME: Configuration types and parsing for dockr.yml.
// ABOUTME: Declares the unit, its state directory and the resources that make up its stack.

mod deserialize;
mod env_value;
mod healthcheck;
mod init;
mod resource;

pub use env_value::EnvValue;
pub use healthcheck::HealthcheckConfig;
pub use init::init_config;
pub use resource::{
    Args, Expose, ImageDecl, Instruction, NetworkDecl, PresetDecl, PresetKind, ResourceDecl,
    RouteDecl, ServiceDecl, VolumeDecl,
};

use crate::engine::EngineSettings;
use crate::error::{Error, Result};
use crate::fragment::Fragment;
use crate::graph::StackGraph;
use crate::runtime::RuntimeConfig;
use crate::snapshot::{LockOptions, SnapshotStore};
use crate::types::ResourceName;
use deserialize::deserialize_resources;
use nonempty::NonEmpty;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "dockr.yml";
pub const CONFIG_FILENAME_ALT: &str = "dockr.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".dockr/config.yml";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub unit: ResourceName,

    /// Relative paths resolve against the project directory.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default = "default_operation_timeout", with = "humantime_serde")]
    pub operation_timeout: Duration,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(deserialize_with = "deserialize_resources")]
    pub resources: NonEmpty<ResourceDecl>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockConfig {
    #[serde(default = "default_stale_after", with = "humantime_serde")]
    pub stale_after: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after: default_stale_after(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".dockr/state")
}

fn default_operation_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_stale_after() -> Duration {
    Duration::from_secs(60 * 60)
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                tracing::debug!("using config {}", path.display());
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Where rendered proxy routes live, relative like `state_dir`.
    pub fn proxy_dir(&self) -> PathBuf {
        self.state_dir.join("proxy")
    }

    /// `state_dir` resolved against `project_dir`.
    pub fn state_dir_in(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.state_dir)
    }

    pub fn snapshot_store(&self, project_dir: &Path) -> SnapshotStore {
        SnapshotStore::new(self.state_dir_in(project_dir), self.unit.clone())
    }

    pub fn engine_settings(&self, force_unlock: bool) -> EngineSettings {
        EngineSettings {
            operation_timeout: self.operation_timeout,
            lock: LockOptions {
                force: force_unlock,
                stale_after: self.lock.stale_after,
            },
        }
    }

    /// Converts every declaration to a fragment, in declaration order.
    ///
    /// Host environment references are resolved here. Presets expand to their
    /// volumes and service, and their connection variables are added to the
    /// services listed in `wire`.
    pub fn fragments(&self) -> Result<Vec<Fragment>> {
        let mut fragments = Vec::new();
        let mut wiring = Vec::new();

        for decl in self.resources.iter() {
            match decl {
                ResourceDecl::Network(d) => fragments.push(d.to_fragment()?),
                ResourceDecl::Volume(d) => fragments.push(d.to_fragment()?),
                ResourceDecl::Service(d) => fragments.push(d.to_fragment()?),
                ResourceDecl::Image(d) => fragments.push(d.to_fragment()?),
                ResourceDecl::Route(d) => fragments.push(d.to_fragment()?),
                ResourceDecl::Preset(d) => {
                    let preset = d.to_preset(&self.proxy_dir())?;
                    if !d.wire.is_empty() {
                        wiring.push((preset.clone(), d.wire.clone()));
                    }
                    fragments.extend(preset.into_fragments());
                }
            }
        }

        for (preset, targets) in &wiring {
            for target in targets {
                let slot = fragments
                    .iter_mut()
                    .find(|f| {
                        matches!(f, Fragment::Service(s) if s.name().as_str() == target.as_str())
                    })
                    .ok_or_else(|| {
                        Error::InvalidConfig(format!(
                            "preset '{}' wires unknown service '{}'",
                            preset.service.name(),
                            target
                        ))
                    })?;
                if let Fragment::Service(service) = slot {
                    let wired = preset
                        .wire(service)
                        .map_err(|source| Error::InvalidResource {
                            name: target.clone(),
                            source,
                        })?;
                    *slot = wired.into();
                }
            }
        }

        Ok(fragments)
    }

    /// The validated stack graph this configuration declares.
    pub fn stack(&self) -> Result<StackGraph> {
        Ok(StackGraph::assemble(self.fragments()?)?)
    }
}
