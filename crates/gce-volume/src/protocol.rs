//! Docker volume plugin wire types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1.1+json";
pub const VOLUME_DRIVER: &str = "VolumeDriver";

/// Body of every `/VolumeDriver.*` request. `Opts` is only sent on create
/// and `ID` only on mount/unmount.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct VolumeRequest {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Opts", default)]
    pub options: Option<HashMap<String, String>>,
    #[serde(rename = "ID", default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Volume {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mountpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Capabilities {
    pub scope: String,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            scope: "global".to_string(),
        }
    }
}

/// Response body; `Err` is always present and empty on success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeResponse {
    pub err: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mountpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<Volume>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<Volume>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
}

impl VolumeResponse {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            err: message.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActivateResponse {
    pub implements: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_accepts_null_and_missing_fields() {
        let req: VolumeRequest =
            serde_json::from_str(r#"{"Name":"foo","Opts":null}"#).unwrap();
        assert_eq!(req.name, "foo");
        assert_eq!(req.options, None);

        let req: VolumeRequest = serde_json::from_str(
            r#"{"Name":"foo","Opts":{"SizeGb":"10"},"ID":"abc"}"#,
        )
        .unwrap();
        assert_eq!(req.options.unwrap()["SizeGb"], "10");
        assert_eq!(req.id.as_deref(), Some("abc"));
    }

    #[test]
    fn success_response_carries_empty_err() {
        let json = serde_json::to_value(VolumeResponse::default()).unwrap();
        assert_eq!(json, serde_json::json!({"Err": ""}));

        let json = serde_json::to_value(VolumeResponse {
            capabilities: Some(Capabilities::default()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(json["Capabilities"]["Scope"], "global");
    }
}
