use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use gce_common::testing::MemFilesystem;
use gce_compute::testing::{connected, FakeCompute};
use gce_compute::{DiskReconciler, PollerConfig};
use gce_volume::protocol::PLUGIN_CONTENT_TYPE;
use gce_volume::{router, VolumeDriver};

async fn app() -> (Router, Arc<FakeCompute>, MemFilesystem) {
    let fs = MemFilesystem::new();
    let fake = Arc::new(
        FakeCompute::new("my-project", "us-central1-a", "vm-1").with_devices(fs.clone()),
    );
    let client = connected(fake.clone(), PollerConfig::default()).await.unwrap();
    let disks = Arc::new(DiskReconciler::new(client, Arc::new(fs.clone())));
    let driver = Arc::new(VolumeDriver::new("/mnt/", disks, Arc::new(fs.clone())));
    (router(driver), fake, fs)
}

async fn call(app: &Router, path: &str, body: Option<Value>) -> (StatusCode, Value) {
    let body = match body {
        Some(value) => Body::from(value.to_string()),
        None => Body::empty(),
    };
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)
        .body(body)
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        PLUGIN_CONTENT_TYPE
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test(start_paused = true)]
async fn test_activate_and_capabilities() {
    let (app, _, _) = app().await;

    let (status, body) = call(&app, "/Plugin.Activate", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"Implements": ["VolumeDriver"]}));

    let (status, body) = call(&app, "/VolumeDriver.Capabilities", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"Err": "", "Capabilities": {"Scope": "global"}}));
}

#[tokio::test(start_paused = true)]
async fn test_volume_lifecycle_over_http() {
    let (app, fake, fs) = app().await;

    let (status, body) = call(
        &app,
        "/VolumeDriver.Create",
        Some(json!({"Name": "foo", "Opts": {"SizeGb": "20", "Type": "pd-ssd"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body, json!({"Err": ""}));
    assert_eq!(fake.disk("foo").unwrap().size_gb.as_deref(), Some("20"));

    let (_, body) = call(&app, "/VolumeDriver.Path", Some(json!({"Name": "foo"}))).await;
    assert_eq!(body["Mountpoint"], "/mnt/foo");
    assert!(!fs.exists(std::path::Path::new("/mnt/foo")));

    let (status, body) = call(
        &app,
        "/VolumeDriver.Mount",
        Some(json!({"Name": "foo", "ID": "abc"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body, json!({"Err": "", "Mountpoint": "/mnt/foo"}));

    let (_, body) = call(&app, "/VolumeDriver.Get", Some(json!({"Name": "foo"}))).await;
    assert_eq!(body["Volume"], json!({"Name": "foo", "Mountpoint": "/mnt/foo"}));

    let (_, body) = call(&app, "/VolumeDriver.List", None).await;
    assert_eq!(body["Volumes"], json!([{"Name": "foo"}]));

    let (status, _) = call(
        &app,
        "/VolumeDriver.Unmount",
        Some(json!({"Name": "foo", "ID": "abc"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fake.calls_matching("detach_disk").len(), 1);

    let (status, _) = call(&app, "/VolumeDriver.Remove", Some(json!({"Name": "foo"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(fake.disk("foo").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_errors_are_reported_in_err_field() {
    let (app, _, _) = app().await;

    let (status, body) = call(
        &app,
        "/VolumeDriver.Create",
        Some(json!({"Name": "foo", "Opts": {"Size": "10"}})),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["Err"].as_str().unwrap().contains("Size"));

    let (status, body) = call(&app, "/VolumeDriver.Get", Some(json!({"Name": "missing"}))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!body["Err"].as_str().unwrap().is_empty());
    assert!(body.get("Volume").is_none());

    let (status, body) = call(&app, "/VolumeDriver.Unmount", Some(json!({"Name": "foo"}))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["Err"].as_str().unwrap().contains("umount"));
}
