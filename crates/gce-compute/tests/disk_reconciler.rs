use std::sync::Arc;

use gce_common::testing::MemFilesystem;
use gce_common::{DiskConfig, DiskProvider, GceError};
use gce_compute::testing::{connected, FakeCompute};
use gce_compute::{DeviceWaitConfig, DiskReconciler, PollerConfig};

fn setup() -> (Arc<FakeCompute>, MemFilesystem) {
    let fs = MemFilesystem::new();
    let fake = Arc::new(FakeCompute::new("my-project", "us-central1-a", "vm-1").with_devices(fs.clone()));
    (fake, fs)
}

async fn reconciler(fake: &Arc<FakeCompute>, fs: &MemFilesystem) -> DiskReconciler {
    let client = connected(fake.clone(), PollerConfig::default()).await.unwrap();
    DiskReconciler::new(client, Arc::new(fs.clone()))
}

#[tokio::test(start_paused = true)]
async fn test_create_is_idempotent() {
    let (fake, fs) = setup();
    let disks = reconciler(&fake, &fs).await;

    let config = DiskConfig {
        size_gb: Some(10),
        disk_type: Some("pd-ssd".into()),
        ..DiskConfig::new("foo")
    };
    disks.create(&config).await.unwrap();
    disks.create(&config).await.unwrap();

    assert_eq!(fake.disk_names(), vec!["foo".to_string()]);
    assert_eq!(fake.calls_matching("insert_disk").len(), 1);

    let disk = fake.disk("foo").unwrap();
    assert_eq!(disk.size_gb.as_deref(), Some("10"));
    assert!(disk
        .disk_type
        .unwrap()
        .ends_with("/projects/my-project/zones/us-central1-a/diskTypes/pd-ssd"));
}

#[tokio::test(start_paused = true)]
async fn test_create_surfaces_lookup_errors() {
    let (fake, fs) = setup();
    let disks = reconciler(&fake, &fs).await;
    fake.fail("get_disk", 403);

    let err = disks.create(&DiskConfig::new("foo")).await.unwrap_err();
    assert!(matches!(err, GceError::Api { code: 403, .. }));
    assert!(fake.calls_matching("insert_disk").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_create_rejects_invalid_config() {
    let (fake, fs) = setup();
    let disks = reconciler(&fake, &fs).await;

    let config = DiskConfig {
        source_snapshot: Some("snap".into()),
        source_image: Some("image".into()),
        ..DiskConfig::new("foo")
    };
    let err = disks.create(&config).await.unwrap_err();
    assert!(matches!(err, GceError::Validation(_)));
    assert!(fake.calls_matching("get_disk").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_attach_waits_for_device_and_skips_when_attached() {
    let (fake, fs) = setup();
    let disks = reconciler(&fake, &fs).await;
    let config = DiskConfig::new("foo");

    disks.create(&config).await.unwrap();
    disks.attach(&config).await.unwrap();
    assert!(fs.exists(&config.device_path()));

    let attached = disks.attached_disk("foo").await.unwrap().unwrap();
    assert_eq!(attached.device_name.as_deref(), Some("docker-volume-foo"));

    disks.attach(&config).await.unwrap();
    assert_eq!(fake.calls_matching("attach_disk").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_attach_times_out_without_device_node() {
    let fake = Arc::new(FakeCompute::new("my-project", "us-central1-a", "vm-1"));
    let fs = MemFilesystem::new();
    let disks = reconciler(&fake, &fs).await.with_device_wait(DeviceWaitConfig::default());
    let config = DiskConfig::new("foo");

    disks.create(&config).await.unwrap();
    let err = disks.attach(&config).await.unwrap_err();
    assert!(matches!(err, GceError::Timeout(_)));
}

#[tokio::test(start_paused = true)]
async fn test_detach_twice_reports_not_attached() {
    let (fake, fs) = setup();
    let disks = reconciler(&fake, &fs).await;
    let config = DiskConfig::new("foo");

    disks.create(&config).await.unwrap();
    disks.attach(&config).await.unwrap();
    disks.detach(&config).await.unwrap();
    assert!(!fs.exists(&config.device_path()));

    let err = disks.detach(&config).await.unwrap_err();
    assert!(matches!(err, GceError::NotAttached { volume, instance } if volume == "foo" && instance == "vm-1"));
    assert_eq!(fake.calls_matching("detach_disk").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_delete_surfaces_missing_disk() {
    let (fake, fs) = setup();
    let disks = reconciler(&fake, &fs).await;

    let err = disks.delete(&DiskConfig::new("ghost")).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test(start_paused = true)]
async fn test_list_reports_status() {
    let (fake, fs) = setup();
    let disks = reconciler(&fake, &fs).await;
    disks.create(&DiskConfig::new("ready")).await.unwrap();
    fake.put_disk(gce_compute::types::Disk {
        name: "busy".into(),
        status: Some("CREATING".into()),
        ..Default::default()
    });

    let listed = disks.list().await.unwrap();
    let ready: Vec<_> = listed.iter().filter(|d| d.is_ready()).map(|d| d.name.as_str()).collect();
    assert_eq!(listed.len(), 2);
    assert_eq!(ready, vec!["ready"]);
}

#[tokio::test(start_paused = true)]
async fn test_operations_are_polled_in_their_scope() {
    let (fake, fs) = setup();
    let disks = reconciler(&fake, &fs).await;
    fake.set_polls_until_done(2);

    disks.create(&DiskConfig::new("foo")).await.unwrap();
    assert_eq!(fake.calls_matching("get_zone_operation").len(), 2);
    assert!(fake.calls_matching("get_region_operation").is_empty());
}
