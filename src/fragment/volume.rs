// ABOUTME: Volume fragment: a named volume that services mount by name.
// ABOUTME: Driver, driver options and labels all force a replacement when changed.

use super::{Fields, ValidationError, check_key, parse_name, split_pair};
use crate::types::{ResourceKind, ResourceName};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeDirective {
    Driver(String),
    DriverOpt { key: String, value: String },
    Label { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    name: ResourceName,
    directives: Vec<VolumeDirective>,
}

/// Effective volume settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSettings {
    pub driver: String,
    pub driver_opts: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

impl Volume {
    pub fn new(name: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            name: parse_name(name)?,
            directives: Vec::new(),
        })
    }

    pub fn name(&self) -> &ResourceName {
        &self.name
    }

    pub fn directives(&self) -> &[VolumeDirective] {
        &self.directives
    }

    fn with(&self, directive: VolumeDirective) -> Self {
        let mut next = self.clone();
        next.directives.push(directive);
        next
    }

    pub fn driver(&self, driver: &str) -> Result<Self, ValidationError> {
        let driver = driver.trim();
        if driver.is_empty() || driver.contains(char::is_whitespace) {
            return Err(ValidationError::invalid(
                "driver",
                format!("invalid volume driver '{}'", driver),
            ));
        }
        Ok(self.with(VolumeDirective::Driver(driver.to_string())))
    }

    pub fn driver_opt(&self, key: &str, value: &str) -> Result<Self, ValidationError> {
        check_key("driver_opts", key)?;
        Ok(self.with(VolumeDirective::DriverOpt {
            key: key.to_string(),
            value: value.to_string(),
        }))
    }

    pub fn label(&self, key: &str, value: &str) -> Result<Self, ValidationError> {
        check_key("labels", key)?;
        Ok(self.with(VolumeDirective::Label {
            key: key.to_string(),
            value: value.to_string(),
        }))
    }

    pub fn directive(&self, key: &str, value: &str) -> Result<Self, ValidationError> {
        match key {
            "driver" => self.driver(value),
            "driver_opt" | "driver_opts" => {
                let (k, v) = split_pair("driver_opts", value)?;
                self.driver_opt(k, v)
            }
            "label" | "labels" => {
                let (k, v) = split_pair("labels", value)?;
                self.label(k, v)
            }
            other => Err(ValidationError::UnknownDirective {
                kind: ResourceKind::Volume,
                key: other.to_string(),
            }),
        }
    }

    pub fn settings(&self) -> VolumeSettings {
        let mut settings = VolumeSettings {
            driver: "local".to_string(),
            driver_opts: BTreeMap::new(),
            labels: BTreeMap::new(),
        };
        for directive in &self.directives {
            match directive {
                VolumeDirective::Driver(d) => settings.driver = d.clone(),
                VolumeDirective::DriverOpt { key, value } => {
                    settings.driver_opts.insert(key.clone(), value.clone());
                }
                VolumeDirective::Label { key, value } => {
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
        for (key, value) in settings.driver_opts {
            fields.insert(format!("driver_opts.{}", key), value);
        }
        for (key, value) in settings.labels {
            fields.insert(format!("labels.{}", key), value);
        }
        fields
    }
}
