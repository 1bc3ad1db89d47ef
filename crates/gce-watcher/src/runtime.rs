use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::InspectContainerOptions;
use bollard::system::EventsOptions;
use bollard::Docker;
use futures::stream::{BoxStream, StreamExt};

use gce_common::{GceError, Result};

/// A container lifecycle event (`start`, `die`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEvent {
    pub action: String,
    pub container_id: String,
}

/// One host binding of a container port, as in `HostConfig.PortBindings`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct PublishedPort {
    /// Container side, e.g. `80/tcp`.
    pub container_port: String,
    pub host_ip: String,
    pub host_port: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDescription {
    pub id: String,
    pub labels: HashMap<String, String>,
    pub ports: Vec<PublishedPort>,
}

/// The slice of the container engine the watcher consumes.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Container events, in the order the engine emits them.
    fn events(&self) -> BoxStream<'_, Result<ContainerEvent>>;

    async fn inspect(&self, container_id: &str) -> Result<ContainerDescription>;
}

fn runtime_error(e: bollard::errors::Error) -> GceError {
    GceError::Runtime(e.to_string())
}

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(runtime_error)?;
        Ok(Self::new(docker))
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn events(&self) -> BoxStream<'_, Result<ContainerEvent>> {
        let mut filters = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);
        let options = EventsOptions::<String> {
            filters,
            ..Default::default()
        };

        self.docker
            .events(Some(options))
            .filter_map(|event| async move {
                match event {
                    Ok(message) => {
                        let action = message.action?;
                        let container_id = message.actor.and_then(|a| a.id)?;
                        Some(Ok(ContainerEvent {
                            action,
                            container_id,
                        }))
                    }
                    Err(e) => Some(Err(runtime_error(e))),
                }
            })
            .boxed()
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerDescription> {
        let inspect = self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .map_err(runtime_error)?;

        let labels = inspect
            .config
            .and_then(|c| c.labels)
            .unwrap_or_default();

        let mut ports: Vec<PublishedPort> = inspect
            .host_config
            .and_then(|h| h.port_bindings)
            .unwrap_or_default()
            .into_iter()
            .flat_map(|(container_port, bindings)| {
                bindings
                    .unwrap_or_default()
                    .into_iter()
                    .map(move |b| PublishedPort {
                        container_port: container_port.clone(),
                        host_ip: b.host_ip.unwrap_or_default(),
                        host_port: b.host_port.unwrap_or_default(),
                    })
            })
            .collect();
        ports.sort();

        Ok(ContainerDescription {
            id: inspect.id.unwrap_or_else(|| container_id.to_string()),
            labels,
            ports,
        })
    }
}
