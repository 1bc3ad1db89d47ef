use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use gce_common::config::network::managed_labels;
use gce_common::{NetworkConfig, NetworkProvider, PortBinding, Result};

use crate::runtime::{ContainerEvent, ContainerRuntime, PublishedPort};
use crate::scheduler::{JobId, Scheduler};

const SHORT_ID_LEN: usize = 12;

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Debounce window between an event and the cloud action it triggers.
    pub delay: Duration,
    /// First wait before subscribing again after the event stream fails.
    pub retry_delay: Duration,
    /// Cap for the doubling retry wait.
    pub max_retry_delay: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Create,
    Delete,
}

impl Action {
    fn from_event(action: &str) -> Option<Self> {
        match action {
            "start" => Some(Action::Create),
            "die" => Some(Action::Delete),
            _ => None,
        }
    }
}

pub fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

/// Host bindings that are reachable from outside: those on every
/// interface. Sorted so the derived network name is stable.
pub fn eligible_ports(ports: &[PublishedPort]) -> Vec<PortBinding> {
    let mut bindings = Vec::new();
    for published in ports {
        if !(published.host_ip.is_empty() || published.host_ip == "0.0.0.0") {
            continue;
        }

        let protocol = published
            .container_port
            .split_once('/')
            .map_or("tcp", |(_, proto)| proto);
        match format!("{}/{}", published.host_port, protocol).parse::<PortBinding>() {
            Ok(binding) if !bindings.contains(&binding) => bindings.push(binding),
            Ok(_) => {}
            Err(e) => debug!(port = ?published, error = %e, "skipping port binding"),
        }
    }
    bindings.sort_by_key(|b| (b.port, b.protocol.as_str()));
    bindings
}

/// Turns container lifecycle events into debounced network reconciliation.
pub struct Watcher {
    runtime: Arc<dyn ContainerRuntime>,
    network: Arc<dyn NetworkProvider>,
    scheduler: Scheduler,
    config: WatcherConfig,
}

impl Watcher {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        network: Arc<dyn NetworkProvider>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            runtime,
            network,
            scheduler: Scheduler::new(),
            config,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Consumes container events forever. A failed or finished event
    /// stream is subscribed to again after a backoff; the caller stops the
    /// watcher by dropping or aborting the future.
    pub async fn watch(&self) {
        info!(delay = ?self.config.delay, "watching container events");
        let mut retry_delay = self.config.retry_delay;

        loop {
            let mut events = self.runtime.events();

            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "container event stream failed");
                        break;
                    }
                };
                retry_delay = self.config.retry_delay;

                if let Err(e) = self.handle_event(&event).await {
                    error!(
                        container = %short_id(&event.container_id),
                        action = %event.action,
                        error = %e,
                        "error handling event"
                    );
                }
            }
            drop(events);

            warn!(retry_in = ?retry_delay, "container event stream ended, subscribing again");
            sleep(retry_delay).await;
            retry_delay = (retry_delay * 2).min(self.config.max_retry_delay);
        }
    }

    /// Validates one event and schedules the matching action. Events for
    /// unmanaged containers and uninteresting actions are ignored.
    pub async fn handle_event(&self, event: &ContainerEvent) -> Result<()> {
        let Some(action) = Action::from_event(&event.action) else {
            return Ok(());
        };

        let container = self.runtime.inspect(&event.container_id).await?;
        let labels = managed_labels(&container.labels);
        if labels.is_empty() {
            return Ok(());
        }

        let short = short_id(&container.id);
        debug!(container = %short, action = %event.action, ?labels, "event captured");

        let config = NetworkConfig::from_labels(&short, &labels, eligible_ports(&container.ports))?;
        let network = self.network.clone();
        let id = JobId::new(container.id);

        match action {
            Action::Create => {
                self.scheduler
                    .add(id, self.config.delay, move || async move {
                        network.create(&config).await
                    })
                    .await
            }
            Action::Delete => {
                self.scheduler
                    .add(id, self.config.delay, move || async move {
                        network.delete(&config).await
                    })
                    .await
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gce_common::Protocol;

    fn published(container_port: &str, host_ip: &str, host_port: &str) -> PublishedPort {
        PublishedPort {
            container_port: container_port.into(),
            host_ip: host_ip.into(),
            host_port: host_port.into(),
        }
    }

    #[test]
    fn only_wildcard_bindings_are_eligible() {
        let ports = eligible_ports(&[
            published("8080/tcp", "", "80"),
            published("8080/tcp", "127.0.0.1", "8081"),
            published("53/udp", "0.0.0.0", "5353"),
            published("8080/tcp", "::", "80"),
        ]);
        assert_eq!(
            ports,
            vec![PortBinding::tcp(80), PortBinding::new(5353, Protocol::Udp)]
        );
    }

    #[test]
    fn unparsable_host_ports_are_skipped() {
        let ports = eligible_ports(&[published("80/tcp", "", ""), published("81/tcp", "", "81")]);
        assert_eq!(ports, vec![PortBinding::tcp(81)]);
    }

    #[test]
    fn eligible_ports_are_sorted() {
        let ports = eligible_ports(&[published("443/tcp", "", "443"), published("80/tcp", "", "80")]);
        assert_eq!(ports, vec![PortBinding::tcp(80), PortBinding::tcp(443)]);
    }

    #[test]
    fn short_id_truncates() {
        assert_eq!(short_id("0123456789abcdef0123"), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
    }
}
