// ABOUTME: Bollard-based runtime driver for Docker and Podman.
// ABOUTME: Maps each resource kind to containers, networks, volumes, image builds or proxy files.

use super::container::{
    RESOURCE_LABEL, UNIT_LABEL, container_body, ownership_labels, replica_name, scoped_name,
};
use super::driver::{DriverError, ResourceState, RuntimeDriver};
use super::error::{ConnectionSnafu, RuntimeError};
use super::types::{RuntimeInfo, RuntimeType};
use crate::fragment::{
    Fragment, ImageLayer, Network, ProxyKind, ProxyRoute, Service, ServiceSource, Volume,
};
use crate::render::{ROOT_CADDYFILE, route_config, route_file_name};
use crate::types::{ContainerId, ResourceKey, ResourceKind, ResourceName, RuntimeHandle};
use async_trait::async_trait;
use bollard::Docker;
use bollard::models::{ContainerStateStatusEnum, NetworkCreateRequest, VolumeCreateRequest};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, InspectContainerOptions, InspectNetworkOptions,
    ListImagesOptions, RemoveContainerOptions, RemoveImageOptions, RemoveVolumeOptions,
    StartContainerOptions, StopContainerOptions,
};
use futures::StreamExt;
use snafu::ResultExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

// =============================================================================
// Error Mapping Helpers
// =============================================================================

fn map_error(e: bollard::errors::Error, what: &str) -> DriverError {
    match &e {
        bollard::errors::Error::DockerResponseServerError { status_code, .. }
            if *status_code == 404 =>
        {
            DriverError::NotFound(what.to_string())
        }
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 409 => DriverError::Conflict(format!("{}: {}", what, message)),
        _ => DriverError::Runtime(format!("{}: {}", what, e)),
    }
}

fn is_not_found(e: &bollard::errors::Error) -> bool {
    matches!(
        e,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

// =============================================================================
// DockerDriver
// =============================================================================

/// Runtime driver talking to a Docker-compatible API socket.
///
/// Networks and volumes are named `<unit>_<name>`, service replicas
/// `<unit>-<name>-<n>`. Proxy routes are rendered into `proxy_dir`, which the
/// proxy preset mounts into its container.
pub struct DockerDriver {
    client: Docker,
    runtime_type: RuntimeType,
    socket_path: String,
    unit: ResourceName,
    proxy_dir: PathBuf,
    base_dir: PathBuf,
    stop_timeout: Duration,
}

impl DockerDriver {
    /// Connect to the runtime described by `info`.
    pub fn connect(
        info: &RuntimeInfo,
        unit: ResourceName,
        state_dir: &Path,
    ) -> Result<Self, RuntimeError> {
        let client =
            Docker::connect_with_unix(&info.socket_path, 120, bollard::API_DEFAULT_VERSION)
                .context(ConnectionSnafu {
                    socket: info.socket_path.clone(),
                })?;
        let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Ok(Self {
            client,
            runtime_type: info.runtime_type,
            socket_path: info.socket_path.clone(),
            unit,
            proxy_dir: state_dir.join("proxy"),
            base_dir,
            stop_timeout: Duration::from_secs(10),
        })
    }

    /// Verify the runtime answers.
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.client.ping().await.context(ConnectionSnafu {
            socket: self.socket_path.clone(),
        })?;
        Ok(())
    }

    pub fn runtime_type(&self) -> RuntimeType {
        self.runtime_type
    }

    /// Directory route configs are written to.
    pub fn proxy_dir(&self) -> &Path {
        &self.proxy_dir
    }

    // -------------------------------------------------------------------------
    // Networks
    // -------------------------------------------------------------------------

    async fn create_network(&self, network: &Network) -> Result<RuntimeHandle, DriverError> {
        let key = ResourceKey::new(ResourceKind::Network, network.name().clone());
        let settings = network.settings();
        let name = scoped_name(&self.unit, network.name().as_str());

        let mut labels: HashMap<String, String> = settings.labels.into_iter().collect();
        labels.extend(ownership_labels(&self.unit, &key));

        let request = NetworkCreateRequest {
            name: name.clone(),
            driver: Some(settings.driver),
            internal: Some(settings.internal),
            labels: Some(labels),
            ..Default::default()
        };
        self.client
            .create_network(request)
            .await
            .map_err(|e| map_error(e, &name))?;
        Ok(RuntimeHandle::new(name))
    }

    // -------------------------------------------------------------------------
    // Volumes
    // -------------------------------------------------------------------------

    async fn create_volume(&self, volume: &Volume) -> Result<RuntimeHandle, DriverError> {
        let key = ResourceKey::new(ResourceKind::Volume, volume.name().clone());
        let settings = volume.settings();
        let name = scoped_name(&self.unit, volume.name().as_str());

        let mut labels: HashMap<String, String> = settings.labels.into_iter().collect();
        labels.extend(ownership_labels(&self.unit, &key));

        let options = VolumeCreateRequest {
            name: Some(name.clone()),
            driver: Some(settings.driver),
            driver_opts: Some(settings.driver_opts.into_iter().collect()),
            labels: Some(labels),
            ..Default::default()
        };
        self.client
            .create_volume(options)
            .await
            .map_err(|e| map_error(e, &name))?;
        Ok(RuntimeHandle::new(name))
    }

    // -------------------------------------------------------------------------
    // Image layers
    // -------------------------------------------------------------------------

    /// Builds through the runtime CLI with the rendered Dockerfile on stdin.
    async fn build_image(&self, layer: &ImageLayer) -> Result<RuntimeHandle, DriverError> {
        let key = ResourceKey::new(ResourceKind::ImageLayer, layer.name().clone());
        let tag = layer.tag_ref().to_string();
        let unit_label = format!("{}={}", UNIT_LABEL, self.unit);
        let resource_label = format!("{}={}", RESOURCE_LABEL, key);

        let mut command = Command::new(self.runtime_type.binary());
        command
            .args(["build", "-t", &tag])
            .args(["--label", &unit_label, "--label", &resource_label])
            .args(["-f", "-", layer.build_context()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        match self.runtime_type {
            RuntimeType::Docker => command.env("DOCKER_HOST", format!("unix://{}", self.socket_path)),
            RuntimeType::Podman => {
                command.env("CONTAINER_HOST", format!("unix://{}", self.socket_path))
            }
        };

        tracing::debug!(%tag, context = layer.build_context(), "building image");
        let mut child = command.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(layer.dockerfile().as_bytes()).await?;
        }
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(DriverError::Build(format!(
                "{}: {}",
                tag,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(RuntimeHandle::new(tag))
    }

    /// The image a service runs: pulled by reference, or the local build of its layer.
    async fn resolve_image(&self, source: &ServiceSource) -> Result<String, DriverError> {
        match source {
            ServiceSource::Image(reference) => {
                let image = reference.to_string();
                match self.client.inspect_image(&image).await {
                    Ok(_) => return Ok(image),
                    Err(e) if is_not_found(&e) => {}
                    Err(e) => return Err(map_error(e, &image)),
                }
                tracing::debug!(%image, "pulling image");
                let opts = CreateImageOptions {
                    from_image: Some(image.clone()),
                    ..Default::default()
                };
                let mut stream = self.client.create_image(Some(opts), None, None);
                while let Some(result) = stream.next().await {
                    result.map_err(|e| map_error(e, &image))?;
                }
                Ok(image)
            }
            ServiceSource::Build(layer) => {
                let key = ResourceKey::new(ResourceKind::ImageLayer, layer.clone());
                let filters = HashMap::from([(
                    "label".to_string(),
                    vec![
                        format!("{}={}", UNIT_LABEL, self.unit),
                        format!("{}={}", RESOURCE_LABEL, key),
                    ],
                )]);
                let images = self
                    .client
                    .list_images(Some(ListImagesOptions {
                        filters: Some(filters),
                        ..Default::default()
                    }))
                    .await
                    .map_err(|e| map_error(e, &key.to_string()))?;
                images
                    .into_iter()
                    .next()
                    .map(|image| image.repo_tags.into_iter().next().unwrap_or(image.id))
                    .ok_or_else(|| DriverError::NotFound(format!("no image built for {}", key)))
            }
        }
    }

    // -------------------------------------------------------------------------
    // Services
    // -------------------------------------------------------------------------

    async fn create_service(&self, service: &Service) -> Result<RuntimeHandle, DriverError> {
        let key = ResourceKey::service(service.name().clone());
        let spec = service.spec();
        let image = self.resolve_image(&spec.source).await?;

        let mut started: Vec<ContainerId> = Vec::new();
        for replica in 1..=spec.replicas {
            let name = replica_name(&self.unit, service.name(), replica);
            let body = container_body(&self.unit, &key, &spec, &image, &self.base_dir);
            match self.start_replica(&name, body).await {
                Ok(id) => started.push(id),
                Err(e) => {
                    for id in &started {
                        let _ = self.remove_container(id).await;
                    }
                    return Err(e);
                }
            }
        }

        let ids: Vec<&str> = started.iter().map(ContainerId::as_str).collect();
        Ok(RuntimeHandle::new(ids.join(",")))
    }

    async fn start_replica(
        &self,
        name: &str,
        body: bollard::models::ContainerCreateBody,
    ) -> Result<ContainerId, DriverError> {
        let opts = CreateContainerOptions {
            name: Some(name.to_string()),
            ..Default::default()
        };
        let response = self
            .client
            .create_container(Some(opts), body)
            .await
            .map_err(|e| map_error(e, name))?;
        let id = ContainerId::new(response.id);

        if let Err(e) = self
            .client
            .start_container(id.as_str(), None::<StartContainerOptions>)
            .await
        {
            let _ = self.remove_container(&id).await;
            return Err(map_error(e, name));
        }
        Ok(id)
    }

    /// Stops and force-removes one container. Returns false if it was already gone.
    async fn remove_container(&self, id: &ContainerId) -> Result<bool, DriverError> {
        let stop = StopContainerOptions {
            t: Some(self.stop_timeout.as_secs() as i32),
            signal: None,
        };
        // 304 (already stopped) and 404 are both fine here; removal decides.
        let _ = self.client.stop_container(id.as_str(), Some(stop)).await;

        let opts = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.client.remove_container(id.as_str(), Some(opts)).await {
            Ok(()) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(map_error(e, id.as_str())),
        }
    }

    async fn destroy_service(&self, handle: &RuntimeHandle) -> Result<(), DriverError> {
        let mut removed = 0;
        for id in container_ids(handle) {
            if self.remove_container(&id).await? {
                removed += 1;
            }
        }
        if removed == 0 {
            return Err(DriverError::NotFound(handle.to_string()));
        }
        Ok(())
    }

    async fn inspect_service(&self, handle: &RuntimeHandle) -> Result<ResourceState, DriverError> {
        let mut all_running = true;
        for id in container_ids(handle) {
            let details = match self
                .client
                .inspect_container(id.as_str(), None::<InspectContainerOptions>)
                .await
            {
                Ok(details) => details,
                Err(e) if is_not_found(&e) => return Ok(ResourceState::Missing),
                Err(e) => return Err(map_error(e, id.as_str())),
            };
            let status = details.state.and_then(|s| s.status);
            if status != Some(ContainerStateStatusEnum::RUNNING) {
                all_running = false;
            }
        }
        Ok(if all_running {
            ResourceState::Running
        } else {
            ResourceState::Stopped
        })
    }

    // -------------------------------------------------------------------------
    // Proxy routes
    // -------------------------------------------------------------------------

    async fn write_route(&self, route: &ProxyRoute) -> Result<RuntimeHandle, DriverError> {
        let settings = route.settings();
        tokio::fs::create_dir_all(&self.proxy_dir).await?;
        if settings.proxy == ProxyKind::Caddy {
            let root = self.proxy_dir.join("Caddyfile");
            if !tokio::fs::try_exists(&root).await? {
                tokio::fs::write(&root, ROOT_CADDYFILE).await?;
            }
        }

        let path = self
            .proxy_dir
            .join(route_file_name(route.name().as_str(), settings.proxy));
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, route_config(&settings)).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(RuntimeHandle::new(path.to_string_lossy()))
    }

    async fn remove_route(&self, handle: &RuntimeHandle) -> Result<(), DriverError> {
        match tokio::fs::remove_file(handle.as_str()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DriverError::NotFound(handle.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn container_ids(handle: &RuntimeHandle) -> impl Iterator<Item = ContainerId> + '_ {
    handle
        .as_str()
        .split(',')
        .filter(|id| !id.is_empty())
        .map(ContainerId::new)
}

#[async_trait]
impl RuntimeDriver for DockerDriver {
    async fn create_resource(&self, fragment: &Fragment) -> Result<RuntimeHandle, DriverError> {
        match fragment {
            Fragment::Network(network) => self.create_network(network).await,
            Fragment::Volume(volume) => self.create_volume(volume).await,
            Fragment::ImageLayer(layer) => self.build_image(layer).await,
            Fragment::Service(service) => self.create_service(service).await,
            Fragment::ProxyRoute(route) => self.write_route(route).await,
        }
    }

    async fn update_resource(
        &self,
        handle: &RuntimeHandle,
        fragment: &Fragment,
    ) -> Result<RuntimeHandle, DriverError> {
        match fragment {
            // Containers cannot change env or labels in place, so replicas are replaced.
            Fragment::Service(service) => {
                match self.destroy_service(handle).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
                self.create_service(service).await
            }
            Fragment::ProxyRoute(route) => {
                let written = self.write_route(route).await?;
                if written != *handle {
                    match self.remove_route(handle).await {
                        Ok(()) => {}
                        Err(e) if e.is_not_found() => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(written)
            }
            other => Err(DriverError::Unsupported(format!(
                "in-place update of {}",
                other.kind()
            ))),
        }
    }

    async fn destroy_resource(
        &self,
        kind: ResourceKind,
        handle: &RuntimeHandle,
    ) -> Result<(), DriverError> {
        match kind {
            ResourceKind::Service => self.destroy_service(handle).await,
            ResourceKind::Network => self
                .client
                .remove_network(handle.as_str())
                .await
                .map_err(|e| map_error(e, handle.as_str())),
            ResourceKind::Volume => self
                .client
                .remove_volume(handle.as_str(), None::<RemoveVolumeOptions>)
                .await
                .map_err(|e| map_error(e, handle.as_str())),
            ResourceKind::ImageLayer => {
                let opts = RemoveImageOptions {
                    force: false,
                    ..Default::default()
                };
                self.client
                    .remove_image(handle.as_str(), Some(opts), None)
                    .await
                    .map(|_| ())
                    .map_err(|e| map_error(e, handle.as_str()))
            }
            ResourceKind::ProxyRoute => self.remove_route(handle).await,
        }
    }

    async fn inspect(
        &self,
        kind: ResourceKind,
        handle: &RuntimeHandle,
    ) -> Result<ResourceState, DriverError> {
        let found = match kind {
            ResourceKind::Service => return self.inspect_service(handle).await,
            ResourceKind::Network => self
                .client
                .inspect_network(handle.as_str(), None::<InspectNetworkOptions>)
                .await
                .map(|_| ()),
            ResourceKind::Volume => self.client.inspect_volume(handle.as_str()).await.map(|_| ()),
            ResourceKind::ImageLayer => self.client.inspect_image(handle.as_str()).await.map(|_| ()),
            ResourceKind::ProxyRoute => {
                return Ok(if tokio::fs::try_exists(handle.as_str()).await? {
                    ResourceState::Present
                } else {
                    ResourceState::Missing
                });
            }
        };
        match found {
            Ok(()) => Ok(ResourceState::Present),
            Err(e) if is_not_found(&e) => Ok(ResourceState::Missing),
            Err(e) => Err(map_error(e, handle.as_str())),
        }
    }
}
