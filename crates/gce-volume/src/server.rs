//! Docker volume plugin server on a unix socket.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::UnixListener;
use tower::Service;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use gce_common::{GceError, Result};

use crate::driver::VolumeDriver;
use crate::protocol::{
    ActivateResponse, VolumeRequest, VolumeResponse, PLUGIN_CONTENT_TYPE, VOLUME_DRIVER,
};

pub const DEFAULT_PLUGIN_DIR: &str = "/run/docker/plugins";
pub const DEFAULT_PLUGIN_NAME: &str = "gce";

#[derive(Debug, Clone)]
pub struct PluginServerConfig {
    /// Directory Docker scans for plugin sockets.
    pub plugin_dir: PathBuf,
    /// Driver name, as passed to `docker volume create -d <name>`.
    pub name: String,
}

impl Default for PluginServerConfig {
    fn default() -> Self {
        Self {
            plugin_dir: PathBuf::from(DEFAULT_PLUGIN_DIR),
            name: DEFAULT_PLUGIN_NAME.to_string(),
        }
    }
}

impl PluginServerConfig {
    pub fn socket_path(&self) -> PathBuf {
        self.plugin_dir.join(format!("{}.sock", self.name))
    }
}

/// JSON body with the plugin content type.
struct PluginReply<T>(T);

impl<T: Serialize> IntoResponse for PluginReply<T> {
    fn into_response(self) -> Response {
        ([(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)], Json(self.0)).into_response()
    }
}

/// Any driver failure, reported through the `Err` field.
struct PluginError(GceError);

impl From<GceError> for PluginError {
    fn from(err: GceError) -> Self {
        Self(err)
    }
}

impl IntoResponse for PluginError {
    fn into_response(self) -> Response {
        warn!(error = %self.0, "volume request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)],
            Json(VolumeResponse::error(self.0.to_string())),
        )
            .into_response()
    }
}

type Reply = std::result::Result<PluginReply<VolumeResponse>, PluginError>;

/// Docker sends either an empty body or JSON under a plugin content type,
/// so the body is decoded without checking headers.
fn parse(body: &Bytes) -> Result<VolumeRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(VolumeRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| GceError::Validation(format!("invalid plugin request: {e}")))
}

fn ok(response: VolumeResponse) -> Reply {
    Ok(PluginReply(response))
}

pub fn router(driver: Arc<VolumeDriver>) -> Router {
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/VolumeDriver.Create", post(create))
        .route("/VolumeDriver.Remove", post(remove))
        .route("/VolumeDriver.Mount", post(mount))
        .route("/VolumeDriver.Unmount", post(unmount))
        .route("/VolumeDriver.Path", post(path))
        .route("/VolumeDriver.Get", post(get))
        .route("/VolumeDriver.List", post(list))
        .route("/VolumeDriver.Capabilities", post(capabilities))
        .with_state(driver)
}

async fn activate() -> PluginReply<ActivateResponse> {
    PluginReply(ActivateResponse {
        implements: vec![VOLUME_DRIVER.to_string()],
    })
}

async fn create(State(driver): State<Arc<VolumeDriver>>, body: Bytes) -> Reply {
    let req = parse(&body)?;
    driver
        .create(&req.name, &req.options.unwrap_or_default())
        .await?;
    ok(VolumeResponse::default())
}

async fn remove(State(driver): State<Arc<VolumeDriver>>, body: Bytes) -> Reply {
    let req = parse(&body)?;
    driver.remove(&req.name).await?;
    ok(VolumeResponse::default())
}

async fn mount(State(driver): State<Arc<VolumeDriver>>, body: Bytes) -> Reply {
    let req = parse(&body)?;
    let mountpoint = driver.mount(&req.name).await?;
    ok(VolumeResponse {
        mountpoint: mountpoint.display().to_string(),
        ..Default::default()
    })
}

async fn unmount(State(driver): State<Arc<VolumeDriver>>, body: Bytes) -> Reply {
    let req = parse(&body)?;
    driver.unmount(&req.name).await?;
    ok(VolumeResponse::default())
}

async fn path(State(driver): State<Arc<VolumeDriver>>, body: Bytes) -> Reply {
    let req = parse(&body)?;
    let mountpoint = driver.path(&req.name).await?;
    ok(VolumeResponse {
        mountpoint: mountpoint.display().to_string(),
        ..Default::default()
    })
}

async fn get(State(driver): State<Arc<VolumeDriver>>, body: Bytes) -> Reply {
    let req = parse(&body)?;
    let volume = driver.get(&req.name).await?;
    ok(VolumeResponse {
        volume: Some(volume),
        ..Default::default()
    })
}

async fn list(State(driver): State<Arc<VolumeDriver>>) -> Reply {
    let volumes = driver.list().await?;
    ok(VolumeResponse {
        volumes: Some(volumes),
        ..Default::default()
    })
}

async fn capabilities(State(driver): State<Arc<VolumeDriver>>) -> Reply {
    ok(VolumeResponse {
        capabilities: Some(driver.capabilities()),
        ..Default::default()
    })
}

pub struct PluginServer {
    config: PluginServerConfig,
    driver: Arc<VolumeDriver>,
}

impl PluginServer {
    pub fn new(config: PluginServerConfig, driver: Arc<VolumeDriver>) -> Self {
        Self { config, driver }
    }

    pub fn socket_path(&self) -> PathBuf {
        self.config.socket_path()
    }

    /// Binds the plugin socket and serves until the listener fails.
    pub async fn run(&self) -> Result<()> {
        let socket_path = self.socket_path();
        let listener = bind(&socket_path)?;
        info!(socket = %socket_path.display(), "volume plugin listening");

        let app = router(Arc::clone(&self.driver)).layer(TraceLayer::new_for_http());

        loop {
            let (stream, _) = listener.accept().await?;

            let tower_service = app.clone();
            tokio::spawn(async move {
                let hyper_service =
                    hyper::service::service_fn(move |request: hyper::Request<Incoming>| {
                        tower_service.clone().call(request)
                    });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), hyper_service)
                    .await
                {
                    if !err.is_incomplete_message() {
                        error!(error = %err, "error serving plugin connection");
                    }
                }
            });
        }
    }
}

/// Replaces a stale socket left by a previous run.
fn bind(socket_path: &Path) -> Result<UnixListener> {
    match std::fs::remove_file(socket_path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
        _ => {}
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(UnixListener::bind(socket_path)?)
}
