//! Docker volume plugin protocol messages.
//!
//! Field names follow the protocol's PascalCase JSON. Every request type
//! tolerates missing fields, since the runtime omits empty ones.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::registry::VolumeRecord;

/// Media type of every plugin response.
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1.1+json";

/// Subsystem implemented by this plugin.
pub const VOLUME_DRIVER: &str = "VolumeDriver";

/// `/VolumeDriver.Create` request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CreateRequest {
    /// Volume name.
    pub name: String,
    /// Driver options (`type`, `src`, `o` and free-form keys).
    pub opts: Option<BTreeMap<String, serde_json::Value>>,
}

/// Request carrying only a volume name (`Remove`, `Get`, `Path`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NameRequest {
    /// Volume name.
    pub name: String,
}

/// `/VolumeDriver.Mount` and `/VolumeDriver.Unmount` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MountRequest {
    /// Volume name.
    pub name: String,
    /// Caller identity, usually the container id.
    #[serde(rename = "ID")]
    pub id: Option<String>,
}

/// `/Plugin.Activate` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActivateResponse {
    /// Implemented subsystems.
    pub implements: Vec<String>,
}

impl Default for ActivateResponse {
    fn default() -> Self {
        Self {
            implements: vec![VOLUME_DRIVER.to_string()],
        }
    }
}

/// A volume as reported by `Get` and `List`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeInfo {
    /// Volume name.
    pub name: String,
    /// Local mountpoint.
    pub mountpoint: String,
}

impl From<&VolumeRecord> for VolumeInfo {
    fn from(record: &VolumeRecord) -> Self {
        Self {
            name: record.name.clone(),
            mountpoint: record.mountpoint.display().to_string(),
        }
    }
}

/// `/VolumeDriver.List` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListResponse {
    /// All volumes.
    pub volumes: Vec<VolumeInfo>,
}

/// `/VolumeDriver.Get` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetResponse {
    /// The requested volume.
    pub volume: VolumeInfo,
}

/// `/VolumeDriver.Path` and `/VolumeDriver.Mount` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MountpointResponse {
    /// Local mountpoint.
    pub mountpoint: String,
}

/// Scope reported by `Capabilities`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Capabilities {
    /// Always `local`: volumes exist on this host only.
    pub scope: String,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            scope: "local".to_string(),
        }
    }
}

/// `/VolumeDriver.Capabilities` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CapabilitiesResponse {
    /// Driver capabilities.
    pub capabilities: Capabilities,
}

/// Empty success body, `{}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyResponse {}

/// Failure body, `{"message": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error.
    pub message: String,
}
