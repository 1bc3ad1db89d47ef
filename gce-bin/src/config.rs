use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use color_eyre::eyre::{self, WrapErr};

use gce_compute::{DeviceWaitConfig, HostIdentity, PollerConfig};
use gce_volume::{PluginServerConfig, DEFAULT_MOUNT_ROOT};
use gce_watcher::WatcherConfig;

pub const DEFAULT_LOG_FILTER: &str =
    "info,gce_docker=debug,gce_compute=debug,gce_watcher=debug,gce_volume=debug";

/// Daemon settings, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub plugin_name: String,
    pub plugin_dir: PathBuf,
    pub mount_root: PathBuf,
    pub debounce: Duration,
    pub operation_timeout: Duration,
    pub device_timeout: Duration,
    pub log_file: Option<PathBuf>,
    pub project: Option<String>,
    pub zone: Option<String>,
    pub instance: Option<String>,
    /// Static OAuth token used instead of the metadata server's.
    pub access_token: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let plugin = PluginServerConfig::default();
        Self {
            plugin_name: plugin.name,
            plugin_dir: plugin.plugin_dir,
            mount_root: PathBuf::from(DEFAULT_MOUNT_ROOT),
            debounce: WatcherConfig::default().delay,
            operation_timeout: PollerConfig::default().timeout,
            device_timeout: DeviceWaitConfig::default().timeout,
            log_file: None,
            project: None,
            zone: None,
            instance: None,
            access_token: None,
        }
    }
}

fn parse<T>(key: &str, value: &str) -> eyre::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .wrap_err_with(|| format!("invalid value for {key}: {value:?}"))
}

impl DaemonConfig {
    pub fn from_env() -> eyre::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> eyre::Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = var("GCE_DOCKER_PLUGIN_NAME") {
            config.plugin_name = v;
        }
        if let Some(v) = var("GCE_DOCKER_PLUGIN_DIR") {
            config.plugin_dir = PathBuf::from(v);
        }
        if let Some(v) = var("GCE_DOCKER_MOUNT_ROOT") {
            config.mount_root = PathBuf::from(v);
        }
        if let Some(v) = var("GCE_DOCKER_DEBOUNCE_MS") {
            config.debounce = Duration::from_millis(parse("GCE_DOCKER_DEBOUNCE_MS", &v)?);
        }
        if let Some(v) = var("GCE_DOCKER_OPERATION_TIMEOUT_SECS") {
            config.operation_timeout =
                Duration::from_secs(parse("GCE_DOCKER_OPERATION_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = var("GCE_DOCKER_DEVICE_TIMEOUT_SECS") {
            config.device_timeout =
                Duration::from_secs(parse("GCE_DOCKER_DEVICE_TIMEOUT_SECS", &v)?);
        }
        config.log_file = var("GCE_DOCKER_LOG_FILE").map(PathBuf::from);
        config.project = var("GCE_PROJECT");
        config.zone = var("GCE_ZONE");
        config.instance = var("GCE_INSTANCE");
        config.access_token = var("GCE_ACCESS_TOKEN");

        if config.plugin_name.contains('/') {
            eyre::bail!("plugin name must not contain '/': {:?}", config.plugin_name);
        }
        Ok(config)
    }

    /// Identity fully given by the environment, skipping the metadata server.
    pub fn identity(&self) -> Option<HostIdentity> {
        Some(HostIdentity::new(
            self.project.clone()?,
            self.zone.clone()?,
            self.instance.clone()?,
        ))
    }

    /// Overrides individual fields of an identity read from the metadata server.
    pub fn apply_overrides(&self, identity: &mut HostIdentity) {
        if let Some(project) = &self.project {
            identity.project = project.clone();
        }
        if let Some(zone) = &self.zone {
            identity.zone = zone.clone();
        }
        if let Some(instance) = &self.instance {
            identity.instance = instance.clone();
        }
    }

    pub fn poller(&self) -> PollerConfig {
        PollerConfig {
            timeout: self.operation_timeout,
            ..Default::default()
        }
    }

    pub fn device_wait(&self) -> DeviceWaitConfig {
        DeviceWaitConfig {
            timeout: self.device_timeout,
            ..Default::default()
        }
    }

    pub fn watcher(&self) -> WatcherConfig {
        WatcherConfig {
            delay: self.debounce,
            ..Default::default()
        }
    }

    pub fn plugin_server(&self) -> PluginServerConfig {
        PluginServerConfig {
            plugin_dir: self.plugin_dir.clone(),
            name: self.plugin_name.clone(),
        }
    }
}
