use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gce_common::testing::MemFilesystem;
use gce_common::{DiskConfig, DiskProvider, GceError, HostFilesystem, PathKind};
use gce_compute::testing::{connected, FakeCompute};
use gce_compute::{DiskReconciler, PollerConfig};
use gce_volume::VolumeDriver;

struct Harness {
    fake: Arc<FakeCompute>,
    fs: MemFilesystem,
    disks: Arc<DiskReconciler>,
    driver: VolumeDriver,
}

async fn harness() -> Harness {
    let fs = MemFilesystem::new();
    let fake = Arc::new(
        FakeCompute::new("my-project", "us-central1-a", "vm-1").with_devices(fs.clone()),
    );
    let client = connected(fake.clone(), PollerConfig::default()).await.unwrap();
    let disks = Arc::new(DiskReconciler::new(client, Arc::new(fs.clone())));
    let driver = VolumeDriver::new("/mnt/", disks.clone(), Arc::new(fs.clone()));
    Harness {
        fake,
        fs,
        disks,
        driver,
    }
}

#[tokio::test(start_paused = true)]
async fn test_volume_end_to_end() {
    let h = harness().await;
    let options = HashMap::from([("SizeGb".to_string(), "10".to_string())]);

    h.driver.create("foo", &options).await.unwrap();
    assert_eq!(h.fake.disk_names(), vec!["foo".to_string()]);

    let mountpoint = h.driver.mount("foo").await.unwrap();
    assert_eq!(mountpoint, PathBuf::from("/mnt/foo"));
    assert_eq!(
        h.fs.path_kind(&mountpoint).await.unwrap(),
        Some(PathKind::Directory)
    );
    assert_eq!(h.fake.calls_matching("attach_disk").len(), 1);

    let device = DiskConfig::new("foo").device_path();
    assert_eq!(h.fs.format_count(&device), 1);
    assert_eq!(h.fs.mounted(&mountpoint), Some(device.clone()));

    h.driver.unmount("foo").await.unwrap();
    assert_eq!(h.fs.mounted(&mountpoint), None);
    assert_eq!(h.fake.calls_matching("detach_disk").len(), 1);
    assert!(!h.fs.exists(&device));

    let err = h.disks.detach(&DiskConfig::new("foo")).await.unwrap_err();
    assert!(matches!(err, GceError::NotAttached { ref volume, .. } if volume == "foo"));
}

#[tokio::test(start_paused = true)]
async fn test_remount_does_not_reformat() {
    let h = harness().await;
    h.driver.create("foo", &HashMap::new()).await.unwrap();

    h.driver.mount("foo").await.unwrap();
    h.driver.unmount("foo").await.unwrap();
    h.driver.mount("foo").await.unwrap();

    let device = DiskConfig::new("foo").device_path();
    assert_eq!(h.fs.format_count(&device), 1);
    assert_eq!(h.fs.mount_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_mount_over_regular_file_is_refused() {
    let h = harness().await;
    h.driver.create("foo", &HashMap::new()).await.unwrap();
    h.fs.add_file("/mnt/foo");

    let err = h.driver.mount("foo").await.unwrap_err();
    assert!(matches!(err, GceError::MountpointExists(ref p) if p == Path::new("/mnt/foo")));
    assert_eq!(h.fs.mount_calls(), 0);
    assert!(h.fake.calls_matching("attach_disk").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_mount_leaves_disk_attached() {
    let h = harness().await;
    h.driver.create("foo", &HashMap::new()).await.unwrap();
    h.fs.fail_mount("/mnt/foo");

    let err = h.driver.mount("foo").await.unwrap_err();
    assert!(matches!(err, GceError::Command { .. }));
    assert!(h.disks.attached_disk("foo").await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_get_list_and_remove() {
    let h = harness().await;
    h.driver.create("foo", &HashMap::new()).await.unwrap();
    let named = HashMap::from([("Name".to_string(), "data".to_string())]);
    h.driver.create("bar", &named).await.unwrap();

    let mut names: Vec<_> = h
        .driver
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|v| v.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["data", "foo"]);

    let volume = h.driver.get("foo").await.unwrap();
    assert_eq!(volume.mountpoint, "/mnt/foo");

    h.driver.remove("foo").await.unwrap();
    assert!(h.driver.get("foo").await.unwrap_err().is_not_found());
    assert!(h.driver.remove("foo").await.unwrap_err().is_not_found());
}
