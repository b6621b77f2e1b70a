// ABOUTME: Translates a folded service definition into a bollard container create body.
// ABOUTME: Named volumes and networks are scoped to the deployment unit.

use crate::fragment::{Mount, Protocol, ServiceSpec};
use crate::types::{ResourceKey, ResourceName, RestartPolicy};
use bollard::models::{
    ContainerCreateBody, EndpointSettings, HealthConfig, HostConfig, Mount as MountSpec,
    MountTypeEnum, NetworkingConfig, PortBinding, RestartPolicy as RestartSpec,
    RestartPolicyNameEnum,
};
use std::collections::HashMap;
use std::path::Path;

pub const UNIT_LABEL: &str = "dockr.unit";
pub const RESOURCE_LABEL: &str = "dockr.resource";

/// Runtime name of a unit-scoped network or volume.
pub fn scoped_name(unit: &ResourceName, name: &str) -> String {
    format!("{}_{}", unit, name)
}

/// Container name of one replica, numbered from 1.
pub fn replica_name(unit: &ResourceName, service: &ResourceName, replica: u32) -> String {
    format!("{}-{}-{}", unit, service, replica)
}

/// Ownership labels put on everything the driver creates.
pub fn ownership_labels(unit: &ResourceName, key: &ResourceKey) -> HashMap<String, String> {
    HashMap::from([
        (UNIT_LABEL.to_string(), unit.to_string()),
        (RESOURCE_LABEL.to_string(), key.to_string()),
    ])
}

fn restart_policy(policy: &RestartPolicy) -> RestartSpec {
    let (name, maximum_retry_count) = match policy {
        RestartPolicy::No => (RestartPolicyNameEnum::NO, None),
        RestartPolicy::Always => (RestartPolicyNameEnum::ALWAYS, None),
        RestartPolicy::UnlessStopped => (RestartPolicyNameEnum::UNLESS_STOPPED, None),
        RestartPolicy::OnFailure { max_retries } => (
            RestartPolicyNameEnum::ON_FAILURE,
            max_retries.map(i64::from),
        ),
    };
    RestartSpec {
        name: Some(name),
        maximum_retry_count,
    }
}

fn mount_spec(unit: &ResourceName, mount: &Mount, base_dir: &Path) -> MountSpec {
    let (source, typ) = if mount.is_bind() {
        let source = match mount.source.strip_prefix("~/") {
            Some(rest) => std::env::var("HOME")
                .map(|home| Path::new(&home).join(rest))
                .unwrap_or_else(|_| base_dir.join(rest)),
            None => base_dir.join(&mount.source),
        };
        (source.to_string_lossy().into_owned(), MountTypeEnum::BIND)
    } else {
        (scoped_name(unit, &mount.source), MountTypeEnum::VOLUME)
    };
    MountSpec {
        source: Some(source),
        target: Some(mount.target.clone()),
        typ: Some(typ),
        read_only: Some(mount.read_only),
        ..Default::default()
    }
}

/// Builds the create body for one replica of `service`.
///
/// Relative bind mount sources are resolved against `base_dir`. Every
/// network gets an endpoint with the service name as alias.
pub fn container_body(
    unit: &ResourceName,
    key: &ResourceKey,
    spec: &ServiceSpec,
    image: &str,
    base_dir: &Path,
) -> ContainerCreateBody {
    let env: Vec<String> = spec
        .env
        .iter()
        .map(|(k, entry)| format!("{}={}", k, entry.value))
        .collect();

    let mut labels: HashMap<String, String> = spec
        .labels
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    labels.extend(ownership_labels(unit, key));

    let mut host_config = HostConfig {
        restart_policy: Some(restart_policy(&spec.restart)),
        ..Default::default()
    };

    let mounts: Vec<MountSpec> = spec
        .mounts
        .values()
        .map(|m| mount_spec(unit, m, base_dir))
        .collect();
    if !mounts.is_empty() {
        host_config.mounts = Some(mounts);
    }

    let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
    let mut exposed_ports: Vec<String> = Vec::new();
    for port in spec.ports.values() {
        let proto = match port.protocol {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        };
        let port_key = format!("{}/{}", port.container_port, proto);
        exposed_ports.push(port_key.clone());
        if let Some(host_port) = port.host_port {
            port_bindings.insert(
                port_key,
                Some(vec![PortBinding {
                    host_ip: port.host_ip.clone(),
                    host_port: Some(host_port.to_string()),
                }]),
            );
        }
    }
    if !port_bindings.is_empty() {
        host_config.port_bindings = Some(port_bindings);
    }

    let alias = key.name.to_string();
    let endpoints: HashMap<String, EndpointSettings> = spec
        .networks
        .iter()
        .map(|network| {
            (
                scoped_name(unit, network.as_str()),
                EndpointSettings {
                    aliases: Some(vec![alias.clone()]),
                    ..Default::default()
                },
            )
        })
        .collect();
    if let Some(first) = spec.networks.first() {
        host_config.network_mode = Some(scoped_name(unit, first.as_str()));
    }
    let networking_config = (!endpoints.is_empty()).then(|| NetworkingConfig {
        endpoints_config: Some(endpoints),
    });

    let healthcheck = spec.healthcheck.as_ref().map(|hc| HealthConfig {
        test: Some(vec!["CMD-SHELL".to_string(), hc.command.clone()]),
        interval: Some(hc.interval.as_nanos() as i64),
        timeout: Some(hc.timeout.as_nanos() as i64),
        retries: Some(i64::from(hc.retries)),
        start_period: hc.start_period.map(|d| d.as_nanos() as i64),
        start_interval: None,
    });

    ContainerCreateBody {
        image: Some(image.to_string()),
        env: (!env.is_empty()).then_some(env),
        labels: Some(labels),
        cmd: spec.command.clone(),
        host_config: Some(host_config),
        healthcheck,
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        networking_config,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::Service;

    fn unit() -> ResourceName {
        ResourceName::new("shop").unwrap()
    }

    fn body(service: &Service) -> ContainerCreateBody {
        let key = ResourceKey::service(service.name().clone());
        container_body(
            &unit(),
            &key,
            &service.spec(),
            "postgres:16",
            Path::new("/srv/shop"),
        )
    }

    #[test]
    fn names_are_unit_scoped() {
        let svc = ResourceName::new("db").unwrap();
        assert_eq!(scoped_name(&unit(), "backend"), "shop_backend");
        assert_eq!(replica_name(&unit(), &svc, 2), "shop-db-2");
    }

    #[test]
    fn env_labels_and_ownership() {
        let service = Service::from_image("db", "postgres:16")
            .unwrap()
            .env("POSTGRES_DB", "shop")
            .unwrap()
            .label("tier", "data")
            .unwrap();
        let body = body(&service);
        assert_eq!(body.env.unwrap(), vec!["POSTGRES_DB=shop".to_string()]);
        let labels = body.labels.unwrap();
        assert_eq!(labels["tier"], "data");
        assert_eq!(labels[UNIT_LABEL], "shop");
        assert_eq!(labels[RESOURCE_LABEL], "service/db");
    }

    #[test]
    fn named_volumes_are_scoped_and_binds_resolved() {
        let service = Service::from_image("db", "postgres:16")
            .unwrap()
            .mount("pgdata:/var/lib/postgresql/data")
            .unwrap()
            .mount("./init:/docker-entrypoint-initdb.d:ro")
            .unwrap();
        let mounts = body(&service).host_config.unwrap().mounts.unwrap();
        let named = mounts
            .iter()
            .find(|m| m.typ == Some(MountTypeEnum::VOLUME))
            .unwrap();
        assert_eq!(named.source.as_deref(), Some("shop_pgdata"));
        let bind = mounts
            .iter()
            .find(|m| m.typ == Some(MountTypeEnum::BIND))
            .unwrap();
        assert_eq!(bind.source.as_deref(), Some("/srv/shop/./init"));
        assert_eq!(bind.read_only, Some(true));
    }

    #[test]
    fn ports_and_networks() {
        let service = Service::from_image("web", "nginx")
            .unwrap()
            .port("8080:80")
            .unwrap()
            .port("9000")
            .unwrap()
            .network("frontend")
            .unwrap();
        let body = body(&service);
        let host = body.host_config.unwrap();
        let bindings = host.port_bindings.unwrap();
        assert!(bindings.contains_key("80/tcp"));
        assert!(!bindings.contains_key("9000/tcp"));
        assert_eq!(body.exposed_ports.unwrap().len(), 2);
        assert_eq!(host.network_mode.as_deref(), Some("shop_frontend"));
        let endpoints = body.networking_config.unwrap().endpoints_config.unwrap();
        assert_eq!(
            endpoints["shop_frontend"].aliases,
            Some(vec!["web".to_string()])
        );
    }

    #[test]
    fn restart_policy_maps_retries() {
        let service = Service::from_image("worker", "busybox")
            .unwrap()
            .restart(RestartPolicy::OnFailure {
                max_retries: Some(5),
            })
            .unwrap();
        let policy = body(&service).host_config.unwrap().restart_policy.unwrap();
        assert_eq!(policy.name, Some(RestartPolicyNameEnum::ON_FAILURE));
        assert_eq!(policy.maximum_retry_count, Some(5));
    }
}
