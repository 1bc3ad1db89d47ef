use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use color_eyre::eyre;
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use gce_compute::{
    ComputeClient, DiskReconciler, HostIdentity, MetadataClient, MetadataTokenSource,
    NetworkReconciler, RestCompute, StaticToken, TokenSource,
};
use gce_volume::{OsFilesystem, PluginServer, VolumeDriver};
use gce_watcher::{DockerRuntime, Watcher};

mod config;

use config::{DaemonConfig, DEFAULT_LOG_FILTER};

fn init_tracing(log_file: Option<&Path>) -> eyre::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

async fn resolve_identity(
    config: &DaemonConfig,
    metadata: &MetadataClient,
) -> eyre::Result<HostIdentity> {
    if let Some(identity) = config.identity() {
        info!("Using host identity from environment");
        return Ok(identity);
    }
    if !metadata.on_gce().await {
        eyre::bail!("metadata server not reachable; set GCE_PROJECT, GCE_ZONE and GCE_INSTANCE");
    }

    let mut identity = HostIdentity::from_metadata(metadata).await?;
    config.apply_overrides(&mut identity);
    Ok(identity)
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    let config = DaemonConfig::from_env()?;
    init_tracing(config.log_file.as_deref())?;

    info!("Starting GCE Docker daemon...");
    debug!(
        plugin = %config.plugin_name,
        mount_root = %config.mount_root.display(),
        debounce = ?config.debounce,
        "daemon configuration"
    );

    let metadata = MetadataClient::new();
    let identity = resolve_identity(&config, &metadata).await?;

    let tokens: Arc<dyn TokenSource> = match &config.access_token {
        Some(token) => Arc::new(StaticToken::new(token.clone())),
        None => Arc::new(MetadataTokenSource::new(metadata)),
    };
    let api = Arc::new(RestCompute::new(tokens));
    let client = ComputeClient::connect(api, identity, config.poller()).await?;

    let fs = Arc::new(OsFilesystem::new());
    let disks = Arc::new(
        DiskReconciler::new(client.clone(), fs.clone()).with_device_wait(config.device_wait()),
    );
    let network = Arc::new(NetworkReconciler::new(client));

    let runtime = Arc::new(DockerRuntime::connect()?);
    let watcher = Watcher::new(runtime, network, config.watcher());

    let driver = Arc::new(VolumeDriver::new(config.mount_root.clone(), disks, fs));
    let server = PluginServer::new(config.plugin_server(), driver);
    let socket_path = server.socket_path();

    let watcher_task = tokio::spawn(async move { watcher.watch().await });
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!("Volume plugin server stopped: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    watcher_task.abort();
    server_task.abort();
    if let Err(e) = std::fs::remove_file(&socket_path) {
        warn!(socket = %socket_path.display(), error = %e, "failed to remove plugin socket");
    }

    Ok(())
}
