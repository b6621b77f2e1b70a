// ABOUTME: Resource declarations of dockr.yml, tagged by `kind`.
// ABOUTME: Each declaration converts to a fragment through the validating builders.

use super::env_value::EnvValue;
use super::healthcheck::HealthcheckConfig;
use crate::error::{Error, Result};
use crate::fragment::presets::{self, DatabaseEngine, Preset};
use crate::fragment::{
    Fragment, ImageLayer, Network, ProxyKind, ProxyRoute, Service, ValidationError, Volume,
    parse_command, split_from,
};
use crate::types::RestartPolicy;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceDecl {
    Network(NetworkDecl),
    Volume(VolumeDecl),
    Service(ServiceDecl),
    Image(ImageDecl),
    Route(RouteDecl),
    Preset(PresetDecl),
}

impl ResourceDecl {
    pub fn name(&self) -> &str {
        match self {
            ResourceDecl::Network(d) => &d.name,
            ResourceDecl::Volume(d) => &d.name,
            ResourceDecl::Service(d) => &d.name,
            ResourceDecl::Image(d) => &d.name,
            ResourceDecl::Route(d) => &d.name,
            ResourceDecl::Preset(d) => d.preset.service_name(),
        }
    }
}

fn invalid(name: &str) -> impl FnOnce(ValidationError) -> Error + '_ {
    move |source| Error::InvalidResource {
        name: name.to_string(),
        source,
    }
}

/// Command arguments, as a YAML list or a single line.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Args {
    List(Vec<String>),
    Line(String),
}

impl Args {
    fn to_vec(&self, field: &'static str) -> std::result::Result<Vec<String>, ValidationError> {
        match self {
            Args::List(args) => Ok(args.clone()),
            Args::Line(line) => parse_command(field, line),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkDecl {
    pub name: String,
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default)]
    pub internal: bool,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl NetworkDecl {
    pub fn to_fragment(&self) -> Result<Fragment> {
        self.build().map(Fragment::from).map_err(invalid(&self.name))
    }

    fn build(&self) -> std::result::Result<Network, ValidationError> {
        let mut network = Network::new(&self.name)?;
        if let Some(driver) = &self.driver {
            network = network.driver(driver)?;
        }
        if self.internal {
            network = network.internal(true)?;
        }
        for (key, value) in &self.labels {
            network = network.label(key, value)?;
        }
        Ok(network)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolumeDecl {
    pub name: String,
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default)]
    pub driver_opts: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl VolumeDecl {
    pub fn to_fragment(&self) -> Result<Fragment> {
        self.build().map(Fragment::from).map_err(invalid(&self.name))
    }

    fn build(&self) -> std::result::Result<Volume, ValidationError> {
        let mut volume = Volume::new(&self.name)?;
        if let Some(driver) = &self.driver {
            volume = volume.driver(driver)?;
        }
        for (key, value) in &self.driver_opts {
            volume = volume.driver_opt(key, value)?;
        }
        for (key, value) in &self.labels {
            volume = volume.label(key, value)?;
        }
        Ok(volume)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceDecl {
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    /// Name of an `image` resource built from instructions.
    #[serde(default)]
    pub build: Option<String>,
    #[serde(default)]
    pub command: Option<Args>,
    #[serde(default)]
    pub env: BTreeMap<String, EnvValue>,
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub networks: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub restart: Option<RestartPolicy>,
    #[serde(default)]
    pub replicas: Option<u32>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub healthcheck: Option<HealthcheckConfig>,
}

struct ResolvedEnv {
    key: String,
    value: String,
    secret: bool,
}

fn resolve_env(env: &BTreeMap<String, EnvValue>) -> Result<Vec<ResolvedEnv>> {
    env.iter()
        .map(|(key, value)| {
            Ok(ResolvedEnv {
                key: key.clone(),
                value: value.resolve()?,
                secret: value.is_secret(),
            })
        })
        .collect()
}

impl ServiceDecl {
    pub fn to_fragment(&self) -> Result<Fragment> {
        let env = resolve_env(&self.env)?;
        self.build(&env)
            .map(Fragment::from)
            .map_err(invalid(&self.name))
    }

    fn build(&self, env: &[ResolvedEnv]) -> std::result::Result<Service, ValidationError> {
        let mut service = match (&self.image, &self.build) {
            (Some(image), None) => Service::from_image(&self.name, image)?,
            (None, Some(layer)) => Service::from_build(&self.name, layer)?,
            (Some(_), Some(_)) => {
                return Err(ValidationError::conflict(
                    "image",
                    "set either 'image' or 'build', not both",
                ));
            }
            (None, None) => {
                return Err(ValidationError::invalid(
                    "image",
                    "one of 'image' or 'build' is required",
                ));
            }
        };

        if let Some(command) = &self.command {
            service = service.command(command.to_vec("command")?.as_slice())?;
        }
        for entry in env {
            service = if entry.secret {
                service.secret_env(&entry.key, &entry.value)?
            } else {
                service.env(&entry.key, &entry.value)?
            };
        }
        for port in &self.ports {
            service = service.port(port)?;
        }
        for mount in &self.volumes {
            service = service.mount(mount)?;
        }
        for network in &self.networks {
            service = service.network(network)?;
        }
        for dependency in &self.depends_on {
            service = service.depends_on(dependency)?;
        }
        if let Some(policy) = &self.restart {
            service = service.restart(policy.clone())?;
        }
        if let Some(replicas) = self.replicas {
            service = service.replicas(replicas)?;
        }
        for (key, value) in &self.labels {
            service = service.label(key, value)?;
        }
        if let Some(check) = &self.healthcheck {
            service = service.healthcheck(check.to_healthcheck()?)?;
        }
        Ok(service)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageDecl {
    pub name: String,
    pub tag: String,
    #[serde(default)]
    pub context: Option<String>,
    pub instructions: Vec<Instruction>,
}

/// One Dockerfile instruction, written as a single-key map (`- run: make`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Instruction {
    /// `image` or `image AS stage`.
    From(String),
    /// `NAME` or `NAME=default`.
    Arg(String),
    Env(BTreeMap<String, String>),
    Label(BTreeMap<String, String>),
    Workdir(String),
    /// `src dest` or `--from=stage src dest`.
    Copy(String),
    /// A list is chained with `&&` into one layer.
    Run(Args),
    Expose(Expose),
    User(String),
    Volume(String),
    Healthcheck(HealthcheckConfig),
    Cmd(Args),
    Entrypoint(Args),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Expose {
    Port(u16),
    Spec(String),
}

impl ImageDecl {
    pub fn to_fragment(&self) -> Result<Fragment> {
        self.build().map(Fragment::from).map_err(invalid(&self.name))
    }

    fn build(&self) -> std::result::Result<ImageLayer, ValidationError> {
        let (first, rest) = match self.instructions.split_first() {
            Some((Instruction::From(base), rest)) => (base, rest),
            _ => {
                return Err(ValidationError::invalid(
                    "instructions",
                    "the first instruction must be 'from'",
                ));
            }
        };
        let (base, alias) = split_from(first)?;
        let mut layer = ImageLayer::with_base(&self.name, &self.tag, base, alias)?;
        if let Some(context) = &self.context {
            layer = layer.context(context)?;
        }
        for instruction in rest {
            layer = apply_instruction(layer, instruction)?;
        }
        Ok(layer)
    }
}

fn apply_instruction(
    layer: ImageLayer,
    instruction: &Instruction,
) -> std::result::Result<ImageLayer, ValidationError> {
    match instruction {
        Instruction::From(value) => layer.directive("from", value),
        Instruction::Arg(value) => layer.directive("arg", value),
        Instruction::Env(vars) => vars
            .iter()
            .try_fold(layer, |layer, (k, v)| layer.env(k, v)),
        Instruction::Label(labels) => labels
            .iter()
            .try_fold(layer, |layer, (k, v)| layer.label(k, v)),
        Instruction::Workdir(dir) => layer.workdir(dir),
        Instruction::Copy(value) => layer.directive("copy", value),
        Instruction::Run(Args::Line(command)) => layer.run(command),
        Instruction::Run(Args::List(commands)) => layer.run_all(commands.as_slice()),
        Instruction::Expose(Expose::Port(port)) => layer.expose(*port),
        Instruction::Expose(Expose::Spec(spec)) => layer.directive("expose", spec),
        Instruction::User(user) => layer.user(user),
        Instruction::Volume(path) => layer.volume(path),
        Instruction::Healthcheck(check) => layer.healthcheck(check.to_healthcheck()?),
        Instruction::Cmd(args) => layer.cmd(args.to_vec("cmd")?.as_slice()),
        Instruction::Entrypoint(args) => layer.entrypoint(args.to_vec("entrypoint")?.as_slice()),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteDecl {
    pub name: String,
    pub domain: String,
    /// `service:port`
    pub upstream: String,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub dns_provider: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

impl RouteDecl {
    pub fn to_fragment(&self) -> Result<Fragment> {
        self.build().map(Fragment::from).map_err(invalid(&self.name))
    }

    fn build(&self) -> std::result::Result<ProxyRoute, ValidationError> {
        let (service, port) = self
            .upstream
            .rsplit_once(':')
            .and_then(|(service, port)| port.parse::<u16>().ok().map(|port| (service, port)))
            .ok_or_else(|| {
                ValidationError::invalid(
                    "upstream",
                    format!("expected 'service:port', got '{}'", self.upstream),
                )
            })?;
        let mut route = ProxyRoute::new(&self.name, &self.domain, service, port)?;
        if let Some(proxy) = &self.proxy {
            route = route.proxy(proxy.parse::<ProxyKind>()?)?;
        }
        if let Some(email) = &self.email {
            route = route.email(email)?;
        }
        if let Some(provider) = &self.dns_provider {
            route = route.dns_provider(provider)?;
        }
        if let Some(path) = &self.path {
            route = route.path(path)?;
        }
        Ok(route)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresetKind {
    Postgres,
    Mysql,
    Mongo,
    Redis,
    Rabbitmq,
    Caddy,
    Swag,
}

impl PresetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresetKind::Postgres => "postgres",
            PresetKind::Mysql => "mysql",
            PresetKind::Mongo => "mongo",
            PresetKind::Redis => "redis",
            PresetKind::Rabbitmq => "rabbitmq",
            PresetKind::Caddy => "caddy",
            PresetKind::Swag => "swag",
        }
    }

    /// Name of the service the preset declares.
    pub fn service_name(&self) -> &'static str {
        match self {
            PresetKind::Postgres | PresetKind::Mysql | PresetKind::Mongo => "db",
            PresetKind::Redis => "redis",
            PresetKind::Rabbitmq => "rabbitmq",
            PresetKind::Caddy => "caddy",
            PresetKind::Swag => "swag",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PresetDecl {
    pub preset: PresetKind,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub password: Option<EnvValue>,
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub dns_provider: Option<String>,
    #[serde(default)]
    pub mods: Vec<String>,
    /// Services that receive the preset's connection variables.
    #[serde(default)]
    pub wire: Vec<String>,
}

fn required<'a>(
    value: &'a Option<String>,
    field: &'static str,
    preset: PresetKind,
) -> std::result::Result<&'a str, ValidationError> {
    value.as_deref().ok_or_else(|| {
        ValidationError::invalid(field, format!("required by the {} preset", preset.as_str()))
    })
}

impl PresetDecl {
    /// `proxy_dir` is where rendered routes are written; proxy presets mount it.
    pub fn to_preset(&self, proxy_dir: &Path) -> Result<Preset> {
        let password = self.password.as_ref().map(EnvValue::resolve).transpose()?;
        self.build(password, proxy_dir)
            .map_err(invalid(self.preset.service_name()))
    }

    fn build(
        &self,
        password: Option<String>,
        proxy_dir: &Path,
    ) -> std::result::Result<Preset, ValidationError> {
        match self.preset {
            PresetKind::Postgres => self.database(DatabaseEngine::Postgres, &password),
            PresetKind::Mysql => self.database(DatabaseEngine::Mysql, &password),
            PresetKind::Mongo => self.database(DatabaseEngine::Mongo, &password),
            PresetKind::Redis => presets::cache(),
            PresetKind::Rabbitmq => {
                let password = required(&password, "password", self.preset)?;
                presets::queue(self.queue.as_deref().unwrap_or("default"), password)
            }
            PresetKind::Caddy => presets::caddy(proxy_dir, self.dns_provider.as_deref()),
            PresetKind::Swag => {
                let domain = required(&self.domain, "domain", self.preset)?;
                let mods: Vec<&str> = self.mods.iter().map(String::as_str).collect();
                presets::swag(domain, self.email.as_deref(), &mods, proxy_dir)
            }
        }
    }

    fn database(
        &self,
        engine: DatabaseEngine,
        password: &Option<String>,
    ) -> std::result::Result<Preset, ValidationError> {
        let database = required(&self.database, "database", self.preset)?;
        let password = required(password, "password", self.preset)?;
        presets::database(engine, database, password)
    }
}
