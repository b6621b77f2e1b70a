// ABOUTME: Compose-style service fragment: image or build source, env, ports, mounts, networks.
// ABOUTME: Map-like directives fold last-write-wins so builder call order never changes the fields.

use super::{
    Fields, Healthcheck, SECRET_PLACEHOLDER, SecretKey, ValidationError, check_key,
    parse_command, parse_name, parse_ref, split_pair,
};
use crate::types::{ImageRef, ResourceKey, ResourceKind, ResourceName, RestartPolicy};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// A container port, optionally published on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub host_ip: Option<String>,
    pub host_port: Option<u16>,
    pub container_port: u16,
    pub protocol: Protocol,
}

impl PortBinding {
    /// Parses `8000`, `8080:80`, `127.0.0.1:8080:80`, each with an optional `/udp` or `/tcp`.
    pub fn parse(spec: &str) -> Result<Self, ValidationError> {
        let (addr, protocol) = match spec.rsplit_once('/') {
            Some((addr, "tcp")) => (addr, Protocol::Tcp),
            Some((addr, "udp")) => (addr, Protocol::Udp),
            Some((_, other)) => {
                return Err(ValidationError::invalid(
                    "ports",
                    format!("unknown protocol '{}'", other),
                ));
            }
            None => (spec, Protocol::Tcp),
        };

        let port = |s: &str| -> Result<u16, ValidationError> {
            match s.parse::<u16>() {
                Ok(0) | Err(_) => Err(ValidationError::invalid(
                    "ports",
                    format!("invalid port '{}' in '{}'", s, spec),
                )),
                Ok(p) => Ok(p),
            }
        };

        let parts: Vec<&str> = addr.split(':').collect();
        let (host_ip, host_port, container_port) = match parts[..] {
            [container] => (None, None, port(container)?),
            [host, container] => (None, Some(port(host)?), port(container)?),
            [ip, host, container] if !ip.is_empty() => {
                (Some(ip.to_string()), Some(port(host)?), port(container)?)
            }
            _ => {
                return Err(ValidationError::invalid(
                    "ports",
                    format!("malformed port binding '{}'", spec),
                ));
            }
        };

        Ok(Self {
            host_ip,
            host_port,
            container_port,
            protocol,
        })
    }

    fn field_key(&self) -> String {
        format!("ports.{}/{}", self.protocol, self.container_port)
    }

    fn field_value(&self) -> String {
        match (&self.host_ip, self.host_port) {
            (Some(ip), Some(port)) => format!("{}:{}", ip, port),
            (None, Some(port)) => port.to_string(),
            _ => "-".to_string(),
        }
    }

    fn same_host_socket(&self, other: &PortBinding) -> bool {
        self.host_port.is_some()
            && self.host_port == other.host_port
            && self.protocol == other.protocol
            && self.host_ip == other.host_ip
    }
}

/// A named volume or bind mount at a container path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

impl Mount {
    /// Parses `source:target[:ro|:rw]`.
    pub fn parse(spec: &str) -> Result<Self, ValidationError> {
        let parts: Vec<&str> = spec.split(':').collect();
        let (source, target, read_only) = match parts.as_slice() {
            [source, target] => (*source, *target, false),
            [source, target, "ro"] => (*source, *target, true),
            [source, target, "rw"] => (*source, *target, false),
            _ => {
                return Err(ValidationError::invalid(
                    "volumes",
                    format!("expected source:target[:ro], got '{}'", spec),
                ));
            }
        };
        if !target.starts_with('/') {
            return Err(ValidationError::invalid(
                "volumes",
                format!("mount target must be absolute, got '{}'", target),
            ));
        }
        let mount = Self {
            source: source.to_string(),
            target: target.to_string(),
            read_only,
        };
        if !mount.is_bind() {
            parse_ref("volumes", source)?;
        }
        Ok(mount)
    }

    /// Bind mounts reference host paths; everything else names a stack volume.
    pub fn is_bind(&self) -> bool {
        self.source.starts_with(['.', '/', '~'])
    }

    fn field_value(&self) -> String {
        if self.read_only {
            format!("{}:ro", self.source)
        } else {
            self.source.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceDirective {
    Image(ImageRef),
    Build(ResourceName),
    Command(Vec<String>),
    Env {
        key: String,
        value: String,
        secret: bool,
    },
    Port(PortBinding),
    Mount(Mount),
    Network(ResourceName),
    DependsOn(ResourceName),
    Restart(RestartPolicy),
    Replicas(u32),
    Label {
        key: String,
        value: String,
    },
    Healthcheck(Healthcheck),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceSource {
    Image(ImageRef),
    Build(ResourceName),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvEntry {
    pub value: String,
    pub secret: bool,
}

/// The effective service definition after folding all directives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub source: ServiceSource,
    pub command: Option<Vec<String>>,
    pub env: BTreeMap<String, EnvEntry>,
    pub ports: BTreeMap<(Protocol, u16), PortBinding>,
    pub mounts: BTreeMap<String, Mount>,
    pub networks: BTreeSet<ResourceName>,
    pub depends_on: BTreeSet<ResourceName>,
    pub restart: RestartPolicy,
    pub replicas: u32,
    pub labels: BTreeMap<String, String>,
    pub healthcheck: Option<Healthcheck>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    name: ResourceName,
    directives: Vec<ServiceDirective>,
    secret_key: Option<SecretKey>,
}

impl Service {
    pub fn from_image(name: &str, image: &str) -> Result<Self, ValidationError> {
        let image = parse_image(image)?;
        Ok(Self {
            name: parse_name(name)?,
            directives: vec![ServiceDirective::Image(image)],
            secret_key: None,
        })
    }

    /// A service running the image produced by the named image layer.
    pub fn from_build(name: &str, layer: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            name: parse_name(name)?,
            directives: vec![ServiceDirective::Build(parse_ref("build", layer)?)],
            secret_key: None,
        })
    }

    pub fn name(&self) -> &ResourceName {
        &self.name
    }

    pub fn directives(&self) -> &[ServiceDirective] {
        &self.directives
    }

    /// Secret env values enter the fields as digests under `key`.
    pub fn with_secret_key(&self, key: &SecretKey) -> Self {
        Self {
            secret_key: Some(key.clone()),
            ..self.clone()
        }
    }

    fn with(&self, directive: ServiceDirective) -> Self {
        let mut next = self.clone();
        next.directives.push(directive);
        next
    }

    pub fn image(&self, image: &str) -> Result<Self, ValidationError> {
        if let ServiceSource::Build(layer) = &self.spec().source {
            return Err(ValidationError::conflict(
                "build",
                format!("service already builds from image layer '{}'", layer),
            ));
        }
        Ok(self.with(ServiceDirective::Image(parse_image(image)?)))
    }

    pub fn build(&self, layer: &str) -> Result<Self, ValidationError> {
        if let ServiceSource::Image(image) = &self.spec().source {
            return Err(ValidationError::conflict(
                "image",
                format!("service already runs image '{}'", image),
            ));
        }
        Ok(self.with(ServiceDirective::Build(parse_ref("build", layer)?)))
    }

    pub fn command<S: AsRef<str>>(&self, args: &[S]) -> Result<Self, ValidationError> {
        if args.is_empty() {
            return Err(ValidationError::invalid("command", "command cannot be empty"));
        }
        Ok(self.with(ServiceDirective::Command(
            args.iter().map(|a| a.as_ref().to_string()).collect(),
        )))
    }

    pub fn env(&self, key: &str, value: &str) -> Result<Self, ValidationError> {
        check_key("env", key)?;
        Ok(self.with(ServiceDirective::Env {
            key: key.to_string(),
            value: value.to_string(),
            secret: false,
        }))
    }

    /// Like [`Service::env`], but the value never reaches the snapshot. With a
    /// [`SecretKey`] attached a keyed digest stands in for it.
    pub fn secret_env(&self, key: &str, value: &str) -> Result<Self, ValidationError> {
        check_key("env", key)?;
        Ok(self.with(ServiceDirective::Env {
            key: key.to_string(),
            value: value.to_string(),
            secret: true,
        }))
    }

    pub fn port(&self, spec: &str) -> Result<Self, ValidationError> {
        let binding = PortBinding::parse(spec)?;
        let current = self.spec();
        if let Some(existing) = current.ports.values().find(|p| {
            p.same_host_socket(&binding) && p.container_port != binding.container_port
        }) {
            return Err(ValidationError::conflict(
                "ports",
                format!(
                    "host port {} already bound to container port {}",
                    existing.field_value(),
                    existing.container_port
                ),
            ));
        }
        if binding.host_port.is_some() && current.replicas > 1 {
            return Err(ValidationError::conflict(
                "ports",
                "host port bindings require a single replica",
            ));
        }
        Ok(self.with(ServiceDirective::Port(binding)))
    }

    pub fn mount(&self, spec: &str) -> Result<Self, ValidationError> {
        let mount = Mount::parse(spec)?;
        if let Some(existing) = self.spec().mounts.get(&mount.target)
            && existing.source != mount.source
        {
            return Err(ValidationError::conflict(
                "volumes",
                format!(
                    "'{}' is already mounted from '{}'",
                    mount.target, existing.source
                ),
            ));
        }
        Ok(self.with(ServiceDirective::Mount(mount)))
    }

    pub fn network(&self, network: &str) -> Result<Self, ValidationError> {
        Ok(self.with(ServiceDirective::Network(parse_ref("networks", network)?)))
    }

    pub fn depends_on(&self, service: &str) -> Result<Self, ValidationError> {
        let target = parse_ref("depends_on", service)?;
        if target == self.name {
            return Err(ValidationError::invalid(
                "depends_on",
                "a service cannot depend on itself",
            ));
        }
        Ok(self.with(ServiceDirective::DependsOn(target)))
    }

    pub fn restart(&self, policy: RestartPolicy) -> Result<Self, ValidationError> {
        Ok(self.with(ServiceDirective::Restart(policy)))
    }

    pub fn replicas(&self, count: u32) -> Result<Self, ValidationError> {
        if count == 0 {
            return Err(ValidationError::invalid("replicas", "must be at least 1"));
        }
        if count > 1 && self.spec().ports.values().any(|p| p.host_port.is_some()) {
            return Err(ValidationError::conflict(
                "replicas",
                "host port bindings require a single replica",
            ));
        }
        Ok(self.with(ServiceDirective::Replicas(count)))
    }

    pub fn label(&self, key: &str, value: &str) -> Result<Self, ValidationError> {
        check_key("labels", key)?;
        Ok(self.with(ServiceDirective::Label {
            key: key.to_string(),
            value: value.to_string(),
        }))
    }

    pub fn healthcheck(&self, check: Healthcheck) -> Result<Self, ValidationError> {
        check.validate()?;
        Ok(self.with(ServiceDirective::Healthcheck(check)))
    }

    /// String form used by configuration files: `directive("port", "8080:80")`.
    pub fn directive(&self, key: &str, value: &str) -> Result<Self, ValidationError> {
        match key {
            "image" => self.image(value),
            "build" => self.build(value),
            "command" => {
                let args = parse_command("command", value)?;
                self.command(&args)
            }
            "env" => {
                let (k, v) = split_pair("env", value)?;
                self.env(k, v)
            }
            "port" | "ports" => self.port(value),
            "mount" | "volume" | "volumes" => self.mount(value),
            "network" | "networks" => self.network(value),
            "depends_on" => self.depends_on(value),
            "restart" => {
                let policy = value
                    .parse()
                    .map_err(|e: String| ValidationError::invalid("restart", e))?;
                self.restart(policy)
            }
            "replicas" => {
                let count = value.parse().map_err(|_| {
                    ValidationError::invalid("replicas", format!("'{}' is not a count", value))
                })?;
                self.replicas(count)
            }
            "label" | "labels" => {
                let (k, v) = split_pair("labels", value)?;
                self.label(k, v)
            }
            "healthcheck" => self.healthcheck(Healthcheck::new(value)?),
            other => Err(ValidationError::UnknownDirective {
                kind: ResourceKind::Service,
                key: other.to_string(),
            }),
        }
    }

    /// Folds the directive list into the effective definition.
    pub fn spec(&self) -> ServiceSpec {
        let mut source = None;
        let mut spec = ServiceSpec {
            source: ServiceSource::Build(self.name.clone()),
            command: None,
            env: BTreeMap::new(),
            ports: BTreeMap::new(),
            mounts: BTreeMap::new(),
            networks: BTreeSet::new(),
            depends_on: BTreeSet::new(),
            restart: RestartPolicy::default(),
            replicas: 1,
            labels: BTreeMap::new(),
            healthcheck: None,
        };

        for directive in &self.directives {
            match directive {
                ServiceDirective::Image(image) => source = Some(ServiceSource::Image(image.clone())),
                ServiceDirective::Build(layer) => source = Some(ServiceSource::Build(layer.clone())),
                ServiceDirective::Command(args) => spec.command = Some(args.clone()),
                ServiceDirective::Env { key, value, secret } => {
                    spec.env.insert(
                        key.clone(),
                        EnvEntry {
                            value: value.clone(),
                            secret: *secret,
                        },
                    );
                }
                ServiceDirective::Port(binding) => {
                    spec.ports
                        .insert((binding.protocol, binding.container_port), binding.clone());
                }
                ServiceDirective::Mount(mount) => {
                    spec.mounts.insert(mount.target.clone(), mount.clone());
                }
                ServiceDirective::Network(network) => {
                    spec.networks.insert(network.clone());
                }
                ServiceDirective::DependsOn(service) => {
                    spec.depends_on.insert(service.clone());
                }
                ServiceDirective::Restart(policy) => spec.restart = policy.clone(),
                ServiceDirective::Replicas(count) => spec.replicas = *count,
                ServiceDirective::Label { key, value } => {
                    spec.labels.insert(key.clone(), value.clone());
                }
                ServiceDirective::Healthcheck(check) => spec.healthcheck = Some(check.clone()),
            }
        }

        // Constructors always push a source first.
        if let Some(source) = source {
            spec.source = source;
        }
        spec
    }

    pub(super) fn dependencies(&self) -> Vec<ResourceKey> {
        let mut deps = Vec::new();
        let mut push = |key: ResourceKey| {
            if !deps.contains(&key) {
                deps.push(key);
            }
        };
        for directive in &self.directives {
            match directive {
                ServiceDirective::Build(layer) => {
                    push(ResourceKey::new(ResourceKind::ImageLayer, layer.clone()))
                }
                ServiceDirective::Mount(mount) if !mount.is_bind() => {
                    if let Ok(volume) = ResourceName::new(&mount.source) {
                        push(ResourceKey::new(ResourceKind::Volume, volume));
                    }
                }
                ServiceDirective::Network(network) => {
                    push(ResourceKey::new(ResourceKind::Network, network.clone()))
                }
                ServiceDirective::DependsOn(service) => push(ResourceKey::service(service.clone())),
                _ => {}
            }
        }
        deps
    }

    pub(super) fn fields(&self) -> Fields {
        let spec = self.spec();
        let mut fields = Fields::new();

        match &spec.source {
            ServiceSource::Image(image) => fields.insert("image".into(), image.to_string()),
            ServiceSource::Build(layer) => fields.insert("build".into(), layer.to_string()),
        };
        if let Some(command) = &spec.command {
            fields.insert("command".into(), json_args(command));
        }
        for (key, entry) in &spec.env {
            let value = if entry.secret {
                match &self.secret_key {
                    Some(secret_key) => secret_key.digest(&entry.value),
                    None => SECRET_PLACEHOLDER.to_string(),
                }
            } else {
                entry.value.clone()
            };
            fields.insert(format!("env.{}", key), value);
        }
        for binding in spec.ports.values() {
            fields.insert(binding.field_key(), binding.field_value());
        }
        for (target, mount) in &spec.mounts {
            fields.insert(format!("volumes.{}", target), mount.field_value());
        }
        for network in &spec.networks {
            fields.insert(format!("networks.{}", network), "attached".into());
        }
        for service in &spec.depends_on {
            fields.insert(format!("depends_on.{}", service), "service".into());
        }
        fields.insert("restart".into(), spec.restart.to_string());
        fields.insert("replicas".into(), spec.replicas.to_string());
        for (key, value) in &spec.labels {
            fields.insert(format!("labels.{}", key), value.clone());
        }
        if let Some(check) = &spec.healthcheck {
            fields.insert("healthcheck".into(), check.to_string());
        }
        fields
    }
}

fn parse_image(image: &str) -> Result<ImageRef, ValidationError> {
    ImageRef::parse(image).map_err(|e| ValidationError::invalid("image", e.to_string()))
}

/// Exec-form JSON array, e.g. `["uvicorn", "main:app"]`.
pub(super) fn json_args(args: &[String]) -> String {
    serde_json::to_string(args).unwrap_or_default()
}
