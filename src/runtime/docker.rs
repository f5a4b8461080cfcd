//! Docker Engine adapter built on bollard

use super::{
    ContainerRuntime, ContainerSpec, ContainerStatus, LogOptions, LogStream,
    RuntimeError, RuntimeResult,
};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerStateStatusEnum, HostConfig, PortBinding};
use bollard::volume::RemoveVolumeOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;

/// Seconds bollard waits on a single HTTP exchange with the engine
const CONNECT_TIMEOUT_SECS: u64 = 120;

/// Runtime adapter talking to one Docker Engine
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
    endpoint: String,
}

impl DockerRuntime {
    /// Connect using a host endpoint descriptor.
    ///
    /// `local` (or empty) uses the platform defaults, `unix://` a socket path,
    /// `tcp://` and `http://` a plain HTTP engine address.
    pub fn connect(endpoint: &str) -> RuntimeResult<Self> {
        let connected = if endpoint.is_empty() || endpoint == "local" {
            Docker::connect_with_local_defaults()
        } else if let Some(path) = endpoint.strip_prefix("unix://") {
            Self::connect_unix(path)
        } else if let Some(addr) = endpoint.strip_prefix("tcp://") {
            Docker::connect_with_http(
                &format!("http://{}", addr),
                CONNECT_TIMEOUT_SECS,
                API_DEFAULT_VERSION,
            )
        } else if endpoint.starts_with("http://") {
            Docker::connect_with_http(endpoint, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
        } else {
            return Err(RuntimeError::Unavailable(format!(
                "unsupported endpoint: {}",
                endpoint
            )));
        };
        let docker = connected
            .map_err(|e| RuntimeError::Unavailable(format!("{}: {}", endpoint, e)))?;

        tracing::debug!(endpoint = %endpoint, "Connected to Docker engine");
        Ok(Self {
            docker,
            endpoint: endpoint.to_string(),
        })
    }

    #[cfg(unix)]
    fn connect_unix(path: &str) -> Result<Docker, BollardError> {
        Docker::connect_with_unix(path, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
    }

    #[cfg(not(unix))]
    fn connect_unix(_path: &str) -> Result<Docker, BollardError> {
        Docker::connect_with_local_defaults()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn container_config(spec: &ContainerSpec) -> Config<String> {
        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        for mapping in &spec.ports {
            let key = format!("{}/tcp", mapping.container_port);
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(mapping.host_port.to_string()),
                }]),
            );
        }

        let binds = spec
            .volumes
            .iter()
            .map(|v| format!("{}:{}", v.volume, v.target))
            .collect::<Vec<_>>();

        Config {
            image: Some(spec.image.clone()),
            labels: Some(spec.labels.clone()),
            env: (!spec.env.is_empty()).then(|| spec.env.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                binds: (!binds.is_empty()).then_some(binds),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

fn map_err(id: &str, e: BollardError) -> RuntimeError {
    match e {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound(format!("{}: {}", id, message)),
        other => RuntimeError::Api(other.to_string()),
    }
}

fn is_status(e: &BollardError, code: u16) -> bool {
    matches!(e, BollardError::DockerResponseServerError { status_code, .. } if *status_code == code)
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), Self::container_config(spec))
            .await
            .map_err(|e| map_err(&spec.name, e))?;

        for warning in &response.warnings {
            tracing::warn!(container = %response.id, warning = %warning, "Docker create warning");
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| map_err(id, e))
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> RuntimeResult<()> {
        let options = StopContainerOptions {
            t: timeout.as_secs() as i64,
        };
        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(e) if is_status(&e, 304) => Ok(()),
            Err(e) => Err(map_err(id, e)),
        }
    }

    async fn remove_container(&self, id: &str, remove_volumes: bool) -> RuntimeResult<()> {
        let named_volumes = if remove_volumes {
            let info = self
                .docker
                .inspect_container(id, None::<InspectContainerOptions>)
                .await
                .map_err(|e| map_err(id, e))?;
            info.mounts
                .unwrap_or_default()
                .into_iter()
                .filter_map(|m| m.name)
                .collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        let options = RemoveContainerOptions {
            v: remove_volumes,
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| map_err(id, e))?;

        for volume in named_volumes {
            self.remove_volume(&volume).await?;
        }
        Ok(())
    }

    async fn inspect_status(&self, id: &str) -> RuntimeResult<ContainerStatus> {
        match self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => {
                let status = info.state.and_then(|s| s.status);
                Ok(match status {
                    Some(ContainerStateStatusEnum::RUNNING) => ContainerStatus::Running,
                    Some(ContainerStateStatusEnum::CREATED)
                    | Some(ContainerStateStatusEnum::EXITED)
                    | Some(ContainerStateStatusEnum::DEAD) => ContainerStatus::Exited,
                    _ => ContainerStatus::Unknown,
                })
            }
            Err(e) if is_status(&e, 404) => Ok(ContainerStatus::Missing),
            Err(e) => Err(map_err(id, e)),
        }
    }

    async fn stream_logs(&self, id: &str, options: &LogOptions) -> RuntimeResult<LogStream> {
        let logs_options = LogsOptions::<String> {
            follow: options.follow,
            stdout: true,
            stderr: true,
            tail: options.tail.to_string(),
            ..Default::default()
        };
        let owned_id = id.to_string();
        let stream = self
            .docker
            .logs(id, Some(logs_options))
            .map(move |chunk| {
                chunk
                    .map(|output| output.into_bytes())
                    .map_err(|e| map_err(&owned_id, e))
            });
        Ok(stream.boxed())
    }

    async fn remove_volume(&self, name: &str) -> RuntimeResult<()> {
        match self
            .docker
            .remove_volume(name, None::<RemoveVolumeOptions>)
            .await
        {
            Ok(()) => {
                tracing::debug!(volume = %name, "Removed volume");
                Ok(())
            }
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(map_err(name, e)),
        }
    }

    async fn find_by_labels(&self, filters: &[String]) -> RuntimeResult<Option<String>> {
        // Docker ANDs repeated label filters
        let mut query = HashMap::new();
        query.insert("label".to_string(), filters.to_vec());
        let options = ListContainersOptions {
            all: true,
            filters: query,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| RuntimeError::Api(e.to_string()))?;

        if containers.len() > 1 {
            tracing::warn!(
                labels = ?filters,
                count = containers.len(),
                "Multiple containers carry the same node labels, using the first"
            );
        }
        Ok(containers.into_iter().find_map(|c| c.id))
    }
}
