// ABOUTME: Resource kinds and the (kind, name) key that identifies a fragment.
// ABOUTME: Keys render as "kind/name", e.g. "service/db".

use super::ResourceName;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// The closed set of resources a stack can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    ImageLayer,
    Service,
    Network,
    Volume,
    ProxyRoute,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::ImageLayer,
        ResourceKind::Service,
        ResourceKind::Network,
        ResourceKind::Volume,
        ResourceKind::ProxyRoute,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::ImageLayer => "image_layer",
            ResourceKind::Service => "service",
            ResourceKind::Network => "network",
            ResourceKind::Volume => "volume",
            ResourceKind::ProxyRoute => "proxy_route",
        }
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown resource kind: {}", s))
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a fragment: names are unique per kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub name: ResourceName,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, name: ResourceName) -> Self {
        Self { kind, name }
    }

    pub fn service(name: ResourceName) -> Self {
        Self::new(ResourceKind::Service, name)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

impl FromStr for ResourceKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, name) = s
            .split_once('/')
            .ok_or_else(|| format!("expected kind/name, got '{}'", s))?;
        let name = ResourceName::new(name).map_err(|e| e.to_string())?;
        Ok(Self::new(kind.parse()?, name))
    }
}

impl Serialize for ResourceKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_displays_kind_and_name() {
        let key = ResourceKey::service(ResourceName::new("db").unwrap());
        assert_eq!(key.to_string(), "service/db");

        let key = ResourceKey::new(
            ResourceKind::ImageLayer,
            ResourceName::new("app-image").unwrap(),
        );
        assert_eq!(key.to_string(), "image_layer/app-image");
    }

    #[test]
    fn same_name_different_kind_are_distinct() {
        let name = ResourceName::new("db").unwrap();
        let a = ResourceKey::new(ResourceKind::Service, name.clone());
        let b = ResourceKey::new(ResourceKind::Volume, name);
        assert_ne!(a, b);
    }

    #[test]
    fn key_parses_from_display_form() {
        let key: ResourceKey = "proxy_route/web".parse().unwrap();
        assert_eq!(key.kind, ResourceKind::ProxyRoute);
        assert_eq!(key.name.as_str(), "web");
        assert!("web".parse::<ResourceKey>().is_err());
        assert!("widget/web".parse::<ResourceKey>().is_err());
    }

    #[test]
    fn kind_serializes_snake_case() {
        let yaml = serde_yaml::to_string(&ResourceKind::ProxyRoute).unwrap();
        assert_eq!(yaml.trim(), "proxy_route");
    }
}
