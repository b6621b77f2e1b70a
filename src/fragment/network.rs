// ABOUTME: Network fragment: a user-defined bridge (or other driver) network.
// ABOUTME: Services attach to it by name, which makes it one of their dependencies.

use super::{Fields, ValidationError, check_key, parse_bool, parse_name, split_pair};
use crate::types::{ResourceKind, ResourceName};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkDirective {
    Driver(String),
    Internal(bool),
    Label { key: String, value: String },
}

/// Effective network settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSettings {
    pub driver: String,
    pub internal: bool,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    name: ResourceName,
    directives: Vec<NetworkDirective>,
}

impl Network {
    pub fn new(name: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            name: parse_name(name)?,
            directives: Vec::new(),
        })
    }

    pub fn name(&self) -> &ResourceName {
        &self.name
    }

    pub fn directives(&self) -> &[NetworkDirective] {
        &self.directives
    }

    fn with(&self, directive: NetworkDirective) -> Self {
        let mut next = self.clone();
        next.directives.push(directive);
        next
    }

    pub fn driver(&self, driver: &str) -> Result<Self, ValidationError> {
        let driver = driver.trim();
        let valid = driver
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if driver.is_empty() || !valid {
            return Err(ValidationError::invalid(
                "driver",
                format!("invalid network driver '{}'", driver),
            ));
        }
        Ok(self.with(NetworkDirective::Driver(driver.to_string())))
    }

    /// Internal networks have no route to the outside world.
    pub fn internal(&self, internal: bool) -> Result<Self, ValidationError> {
        Ok(self.with(NetworkDirective::Internal(internal)))
    }

    pub fn label(&self, key: &str, value: &str) -> Result<Self, ValidationError> {
        check_key("labels", key)?;
        Ok(self.with(NetworkDirective::Label {
            key: key.to_string(),
            value: value.to_string(),
        }))
    }

    pub fn directive(&self, key: &str, value: &str) -> Result<Self, ValidationError> {
        match key {
            "driver" => self.driver(value),
            "internal" => self.internal(parse_bool("internal", value)?),
            "label" | "labels" => {
                let (k, v) = split_pair("labels", value)?;
                self.label(k, v)
            }
            other => Err(ValidationError::UnknownDirective {
                kind: ResourceKind::Network,
                key: other.to_string(),
            }),
        }
    }

    pub fn settings(&self) -> NetworkSettings {
        let mut settings = NetworkSettings {
            driver: "bridge".to_string(),
            internal: false,
            labels: BTreeMap::new(),
        };
        for directive in &self.directives {
            match directive {
                NetworkDirective::Driver(d) => settings.driver = d.clone(),
                NetworkDirective::Internal(i) => settings.internal = *i,
                NetworkDirective::Label { key, value } => {
                    settings.labels.insert(key.clone(), value.clone());
                }
            }
        }
        settings
    }

    pub(super) fn fields(&self) -> Fields {
        let settings = self.settings();
        let mut fields = Fields::new();
        fields.insert("driver".into(), settings.driver);
        fields.insert("internal".into(), settings.internal.to_string());
        for (key, value) in settings.labels {
            fields.insert(format!("labels.{}", key), value);
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_bridge() {
        let net = Network::new("backend").unwrap();
        let fields = net.fields();
        assert_eq!(fields["driver"], "bridge");
        assert_eq!(fields["internal"], "false");
    }

    #[test]
    fn explicit_default_driver_matches_implicit() {
        let implicit = Network::new("backend").unwrap();
        let explicit = implicit.driver("bridge").unwrap();
        assert_eq!(implicit.fields(), explicit.fields());
    }

    #[test]
    fn rejects_bad_driver_and_unknown_directive() {
        let net = Network::new("backend").unwrap();
        assert_eq!(net.driver("my driver").unwrap_err().field(), "driver");
        assert!(matches!(
            net.directive("subnet", "10.0.0.0/24"),
            Err(ValidationError::UnknownDirective { .. })
        ));
        assert_eq!(net.directive("internal", "maybe").unwrap_err().field(), "internal");
    }
}
