// ABOUTME: Immutable fragment builders for image layers, services, networks, volumes and routes.
// ABOUTME: Each builder call validates eagerly and returns a new value; nothing is mutated.

mod error;
mod fingerprint;
mod healthcheck;
mod image_layer;
mod network;
pub mod presets;
mod proxy_route;
mod service;
mod volume;

pub use error::ValidationError;
pub use fingerprint::{Fields, Fingerprint, SECRET_PLACEHOLDER, SecretKey, field_group};
pub use healthcheck::Healthcheck;
pub use image_layer::{ImageInstruction, ImageLayer};
pub(crate) use image_layer::split_from;
pub use network::{Network, NetworkDirective, NetworkSettings};
pub use proxy_route::{ProxyKind, ProxyRoute, RouteDirective, RouteSettings};
pub use service::{
    EnvEntry, Mount, PortBinding, Protocol, Service, ServiceDirective, ServiceSource, ServiceSpec,
};
pub use volume::{Volume, VolumeDirective, VolumeSettings};

use crate::types::{ResourceKey, ResourceKind, ResourceName};

/// One declared resource of a stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    ImageLayer(ImageLayer),
    Service(Service),
    Network(Network),
    Volume(Volume),
    ProxyRoute(ProxyRoute),
}

impl Fragment {
    pub fn name(&self) -> &ResourceName {
        match self {
            Fragment::ImageLayer(f) => f.name(),
            Fragment::Service(f) => f.name(),
            Fragment::Network(f) => f.name(),
            Fragment::Volume(f) => f.name(),
            Fragment::ProxyRoute(f) => f.name(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Fragment::ImageLayer(_) => ResourceKind::ImageLayer,
            Fragment::Service(_) => ResourceKind::Service,
            Fragment::Network(_) => ResourceKind::Network,
            Fragment::Volume(_) => ResourceKind::Volume,
            Fragment::ProxyRoute(_) => ResourceKind::ProxyRoute,
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.kind(), self.name().clone())
    }

    /// Keys of the fragments this one references, in directive order.
    pub fn dependencies(&self) -> Vec<ResourceKey> {
        match self {
            Fragment::Service(f) => f.dependencies(),
            Fragment::ProxyRoute(f) => f.dependencies(),
            Fragment::ImageLayer(_) | Fragment::Network(_) | Fragment::Volume(_) => Vec::new(),
        }
    }

    pub fn fields(&self) -> Fields {
        match self {
            Fragment::ImageLayer(f) => f.fields(),
            Fragment::Service(f) => f.fields(),
            Fragment::Network(f) => f.fields(),
            Fragment::Volume(f) => f.fields(),
            Fragment::ProxyRoute(f) => f.fields(),
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(self.kind(), &self.fields())
    }

    pub fn with_secret_key(&self, key: &SecretKey) -> Fragment {
        match self {
            Fragment::Service(f) => Fragment::Service(f.with_secret_key(key)),
            other => other.clone(),
        }
    }
}

macro_rules! impl_from_fragment {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for Fragment {
                fn from(value: $variant) -> Self {
                    Fragment::$variant(value)
                }
            }
        )*
    };
}

impl_from_fragment!(ImageLayer, Service, Network, Volume, ProxyRoute);

pub(crate) fn parse_name(value: &str) -> Result<ResourceName, ValidationError> {
    ResourceName::new(value).map_err(|source| ValidationError::InvalidName {
        value: value.to_string(),
        source,
    })
}

/// Validates a reference to another resource (network, volume, layer, service).
pub(crate) fn parse_ref(field: &'static str, value: &str) -> Result<ResourceName, ValidationError> {
    ResourceName::new(value)
        .map_err(|e| ValidationError::invalid(field, format!("'{}': {}", value, e)))
}

/// Environment and label keys: non-empty, no whitespace, no '='.
pub(crate) fn check_key(field: &'static str, key: &str) -> Result<(), ValidationError> {
    if key.is_empty() {
        return Err(ValidationError::invalid(field, "key cannot be empty"));
    }
    if let Some(c) = key.chars().find(|c| c.is_whitespace() || *c == '=') {
        return Err(ValidationError::invalid(
            field,
            format!("invalid character {:?} in key '{}'", c, key),
        ));
    }
    Ok(())
}

/// Splits `KEY=value` arguments of the string directive form.
pub(crate) fn split_pair<'a>(
    field: &'static str,
    value: &'a str,
) -> Result<(&'a str, &'a str), ValidationError> {
    value
        .split_once('=')
        .ok_or_else(|| ValidationError::invalid(field, format!("expected KEY=VALUE, got '{}'", value)))
}

pub(crate) fn parse_bool(field: &'static str, value: &str) -> Result<bool, ValidationError> {
    match value {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        other => Err(ValidationError::invalid(
            field,
            format!("expected a boolean, got '{}'", other),
        )),
    }
}

/// Command arguments: a JSON array (`["uvicorn", "main:app"]`) or whitespace separated words.
pub(crate) fn parse_command(field: &'static str, value: &str) -> Result<Vec<String>, ValidationError> {
    let value = value.trim();
    let args: Vec<String> = if value.starts_with('[') {
        serde_json::from_str(value).map_err(|e| ValidationError::invalid(field, e.to_string()))?
    } else {
        value.split_whitespace().map(str::to_string).collect()
    };
    if args.is_empty() {
        return Err(ValidationError::invalid(field, "command cannot be empty"));
    }
    Ok(args)
}
