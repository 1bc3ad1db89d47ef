use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::naming;
use crate::{GceError, Result};

pub const OPT_NAME: &str = "Name";
pub const OPT_TYPE: &str = "Type";
pub const OPT_SIZE_GB: &str = "SizeGb";
pub const OPT_SOURCE_SNAPSHOT: &str = "SourceSnapshot";
pub const OPT_SOURCE_IMAGE: &str = "SourceImage";

/// A persistent disk as requested through the volume plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskConfig {
    pub name: String,
    pub disk_type: Option<String>,
    pub size_gb: Option<u64>,
    pub source_snapshot: Option<String>,
    pub source_image: Option<String>,
}

impl DiskConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builds a config from a volume name and the plugin `Opts` map.
    ///
    /// Only `Name`, `Type`, `SizeGb`, `SourceSnapshot` and `SourceImage`
    /// are accepted; `Name` overrides the volume name.
    pub fn from_options(name: &str, options: &HashMap<String, String>) -> Result<Self> {
        let mut config = DiskConfig::new(name);

        for (key, value) in options {
            match key.as_str() {
                OPT_NAME => config.name = value.clone(),
                OPT_TYPE => config.disk_type = Some(value.clone()),
                OPT_SIZE_GB => {
                    let size = value.trim().parse::<u64>().map_err(|e| {
                        GceError::Validation(format!(
                            "invalid value for option {OPT_SIZE_GB:?}: {value:?} ({e})"
                        ))
                    })?;
                    config.size_gb = Some(size);
                }
                OPT_SOURCE_SNAPSHOT => config.source_snapshot = Some(value.clone()),
                OPT_SOURCE_IMAGE => config.source_image = Some(value.clone()),
                other => {
                    return Err(GceError::Validation(format!("unknown option {other:?}")));
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(GceError::Validation(
                "invalid disk config, name field cannot be empty".into(),
            ));
        }
        if !is_valid_disk_name(&self.name) {
            return Err(GceError::Validation(format!(
                "invalid disk config, name {:?} must match [a-z]([-a-z0-9]*[a-z0-9])? and be at most {MAX_NAME_LEN} characters",
                self.name
            )));
        }

        let has = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        if has(&self.source_snapshot) && has(&self.source_image) {
            return Err(GceError::Validation(
                "invalid disk config, source snapshot and source image are mutually exclusive"
                    .into(),
            ));
        }

        Ok(())
    }

    pub fn device_name(&self) -> String {
        naming::device_name(&self.name)
    }

    pub fn device_path(&self) -> PathBuf {
        naming::device_path(&self.device_name())
    }

    pub fn mount_point(&self, root: &Path) -> PathBuf {
        root.join(&self.name)
    }
}

/// Compute Engine resource name limit.
pub const MAX_NAME_LEN: usize = 63;

/// `[a-z]([-a-z0-9]*[a-z0-9])?`, which also keeps the name a single
/// path component under the mount root.
fn is_valid_disk_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            name.len() <= MAX_NAME_LEN
                && first.is_ascii_lowercase()
                && (last.is_ascii_lowercase() || last.is_ascii_digit())
                && bytes
                    .iter()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn from_options_maps_whitelisted_keys() {
        let config = DiskConfig::from_options(
            "foo",
            &opts(&[("Type", "pd-ssd"), ("SizeGb", "42"), ("SourceImage", "img")]),
        )
        .unwrap();

        assert_eq!(config.name, "foo");
        assert_eq!(config.disk_type.as_deref(), Some("pd-ssd"));
        assert_eq!(config.size_gb, Some(42));
        assert_eq!(config.source_image.as_deref(), Some("img"));
        assert_eq!(config.source_snapshot, None);
    }

    #[test]
    fn name_option_overrides_volume_name() {
        let config = DiskConfig::from_options("foo", &opts(&[("Name", "bar")])).unwrap();
        assert_eq!(config.name, "bar");
    }

    #[test]
    fn unknown_option_is_rejected() {
        let err = DiskConfig::from_options("foo", &opts(&[("Zone", "x")])).unwrap_err();
        assert!(matches!(err, GceError::Validation(msg) if msg.contains("Zone")));
    }

    #[test]
    fn unparsable_size_is_rejected() {
        let err = DiskConfig::from_options("foo", &opts(&[("SizeGb", "big")])).unwrap_err();
        assert!(matches!(err, GceError::Validation(_)));
    }

    #[test]
    fn validate() {
        assert!(DiskConfig::default().validate().is_err());
        assert!(DiskConfig::new("foo").validate().is_ok());

        let both = DiskConfig {
            source_snapshot: Some("foo".into()),
            source_image: Some("foo".into()),
            ..DiskConfig::new("foo")
        };
        assert!(matches!(both.validate(), Err(GceError::Validation(_))));
    }

    #[test]
    fn names_follow_compute_rules() {
        for name in ["foo", "a", "data-1", "x9"] {
            assert!(DiskConfig::new(name).validate().is_ok(), "{name}");
        }

        let too_long = "a".repeat(MAX_NAME_LEN + 1);
        for name in ["/etc/x", "../x", "a/b", "..", "Foo", "9lives", "foo-", "foo_bar", too_long.as_str()] {
            let err = DiskConfig::new(name).validate().unwrap_err();
            assert!(matches!(err, GceError::Validation(_)), "{name}");
        }
        assert!(DiskConfig::from_options("foo", &opts(&[("Name", "../etc")])).is_err());
    }

    #[test]
    fn derived_paths() {
        let config = DiskConfig::new("foo");
        assert_eq!(config.device_name(), "docker-volume-foo");
        assert_eq!(
            config.device_path(),
            PathBuf::from("/dev/disk/by-id/google-docker-volume-foo")
        );
        assert_eq!(config.mount_point(Path::new("/mnt/")), PathBuf::from("/mnt/foo"));
    }
}
