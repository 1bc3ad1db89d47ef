//! Deterministic names and URLs for the cloud objects the daemon owns.
//!
//! Every object is found again by name, so create paths can always be
//! "look up, then insert if missing".

use std::path::PathBuf;

pub const COMPUTE_URL: &str = "https://www.googleapis.com/compute/v1";

pub const DEVICE_NAME_PREFIX: &str = "docker-volume-";
pub const DEVICE_BY_ID_PREFIX: &str = "/dev/disk/by-id/google-";
pub const NETWORK_NAME_PREFIX: &str = "docker-network-";

pub const DEFAULT_DISK_TYPE: &str = "pd-standard";
pub const DEFAULT_NETWORK: &str = "global/networks/default";
pub const ANY_SOURCE_RANGE: &str = "0.0.0.0/0";

pub fn disk_url(project: &str, zone: &str, disk: &str) -> String {
    format!("{COMPUTE_URL}/projects/{project}/zones/{zone}/disks/{disk}")
}

pub fn instance_url(project: &str, zone: &str, instance: &str) -> String {
    format!("{COMPUTE_URL}/projects/{project}/zones/{zone}/instances/{instance}")
}

pub fn target_pool_url(project: &str, region: &str, pool: &str) -> String {
    format!("{COMPUTE_URL}/projects/{project}/regions/{region}/targetPools/{pool}")
}

/// Full disk type URL; an empty type selects `pd-standard`.
pub fn disk_type_url(project: &str, zone: &str, disk_type: &str) -> String {
    let disk_type = if disk_type.is_empty() {
        DEFAULT_DISK_TYPE
    } else {
        disk_type
    };
    format!("{COMPUTE_URL}/projects/{project}/zones/{zone}/diskTypes/{disk_type}")
}

/// Suffix shared by every spelling of a disk's URL, used to find it in an
/// instance's attached-disk list.
pub fn disk_source_suffix(project: &str, zone: &str, disk: &str) -> String {
    format!("projects/{project}/zones/{zone}/disks/{disk}")
}

pub fn device_name(volume: &str) -> String {
    format!("{DEVICE_NAME_PREFIX}{volume}")
}

/// Where udev exposes an attached disk with the given device name.
pub fn device_path(device_name: &str) -> PathBuf {
    PathBuf::from(format!("{DEVICE_BY_ID_PREFIX}{device_name}"))
}

/// Last path segment of a resource URL (`.../regions/us-central1` -> `us-central1`).
pub fn last_segment(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls() {
        assert_eq!(
            disk_url("foo", "bar", "qux"),
            "https://www.googleapis.com/compute/v1/projects/foo/zones/bar/disks/qux"
        );
        assert_eq!(
            instance_url("bar", "baz", "foo"),
            "https://www.googleapis.com/compute/v1/projects/bar/zones/baz/instances/foo"
        );
        assert_eq!(
            target_pool_url("p", "us-central1", "pool"),
            "https://www.googleapis.com/compute/v1/projects/p/regions/us-central1/targetPools/pool"
        );
    }

    #[test]
    fn disk_type_defaults_to_standard() {
        assert!(disk_type_url("p", "z", "").ends_with("/diskTypes/pd-standard"));
        assert!(disk_type_url("p", "z", "pd-ssd").ends_with("/diskTypes/pd-ssd"));
    }

    #[test]
    fn device_paths() {
        assert_eq!(device_name("foo"), "docker-volume-foo");
        assert_eq!(
            device_path(&device_name("foo")),
            PathBuf::from("/dev/disk/by-id/google-docker-volume-foo")
        );
    }

    #[test]
    fn last_segment_of_url() {
        assert_eq!(
            last_segment("https://www.googleapis.com/compute/v1/projects/p/regions/europe-west1"),
            "europe-west1"
        );
        assert_eq!(last_segment("plain"), "plain");
    }
}
