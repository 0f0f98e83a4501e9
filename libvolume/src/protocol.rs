//! Volume plugin protocol messages.
//!
//! The container runtime talks to the plugin with one JSON `POST` per
//! operation. [`PluginRequest::decode`] turns an endpoint path plus body into
//! a request, and [`PluginResponse`] renders the reply body.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::types::{Capabilities, VolumeInfo};

/// Content type of every request and response body.
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1.1+json";

/// Subsystem advertised on activation.
pub const IMPLEMENTS: &str = "VolumeDriver";

/// A decoded plugin request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginRequest {
    /// Handshake (`/Plugin.Activate`).
    Activate,
    Create {
        name: String,
        options: HashMap<String, String>,
    },
    Remove {
        name: String,
    },
    Mount {
        name: String,
        id: String,
    },
    Unmount {
        name: String,
        id: String,
    },
    Path {
        name: String,
    },
    Get {
        name: String,
    },
    List,
    Capabilities,
}

/// Why a request could not be decoded.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("malformed {endpoint} request: {reason}")]
    Malformed { endpoint: String, reason: String },
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NameBody {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateBody {
    name: String,
    #[serde(default)]
    opts: Option<HashMap<String, String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MountBody {
    name: String,
    #[serde(rename = "ID", default)]
    id: String,
}

fn parse<'a, T: Deserialize<'a>>(endpoint: &str, body: &'a [u8]) -> Result<T, ProtocolError> {
    let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        body
    };
    serde_json::from_slice(body).map_err(|e| ProtocolError::Malformed {
        endpoint: endpoint.to_owned(),
        reason: e.to_string(),
    })
}

impl PluginRequest {
    /// Decode the request sent to `endpoint`. An empty body reads as `{}`.
    pub fn decode(endpoint: &str, body: &[u8]) -> Result<Self, ProtocolError> {
        let request = match endpoint {
            "/Plugin.Activate" => Self::Activate,
            "/VolumeDriver.Create" => {
                let b: CreateBody = parse(endpoint, body)?;
                Self::Create {
                    name: b.name,
                    options: b.opts.unwrap_or_default(),
                }
            }
            "/VolumeDriver.Remove" => Self::Remove {
                name: parse::<NameBody>(endpoint, body)?.name,
            },
            "/VolumeDriver.Mount" => {
                let b: MountBody = parse(endpoint, body)?;
                Self::Mount {
                    name: b.name,
                    id: b.id,
                }
            }
            "/VolumeDriver.Unmount" => {
                let b: MountBody = parse(endpoint, body)?;
                Self::Unmount {
                    name: b.name,
                    id: b.id,
                }
            }
            "/VolumeDriver.Path" => Self::Path {
                name: parse::<NameBody>(endpoint, body)?.name,
            },
            "/VolumeDriver.Get" => Self::Get {
                name: parse::<NameBody>(endpoint, body)?.name,
            },
            "/VolumeDriver.List" => Self::List,
            "/VolumeDriver.Capabilities" => Self::Capabilities,
            other => return Err(ProtocolError::UnknownEndpoint(other.to_owned())),
        };
        Ok(request)
    }
}

impl std::fmt::Display for PluginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Activate => f.write_str("Activate"),
            Self::Create { name, .. } => write!(f, "Create({name})"),
            Self::Remove { name } => write!(f, "Remove({name})"),
            Self::Mount { name, id } => write!(f, "Mount({name}, id={id})"),
            Self::Unmount { name, id } => write!(f, "Unmount({name}, id={id})"),
            Self::Path { name } => write!(f, "Path({name})"),
            Self::Get { name } => write!(f, "Get({name})"),
            Self::List => f.write_str("List"),
            Self::Capabilities => f.write_str("Capabilities"),
        }
    }
}

/// Reply to a [`PluginRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginResponse {
    Activated,
    /// Success without payload.
    Ok,
    Mountpoint(PathBuf),
    Volume(VolumeInfo),
    Volumes(Vec<VolumeInfo>),
    Capabilities(Capabilities),
    /// Failure, reported to the runtime as `{"Err": ...}`.
    Error(String),
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireVolume {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    mountpoint: Option<String>,
    status: HashMap<&'static str, &'static str>,
}

impl From<&VolumeInfo> for WireVolume {
    fn from(info: &VolumeInfo) -> Self {
        Self {
            name: info.name.clone(),
            mountpoint: info
                .mountpoint
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            status: info
                .location
                .map(|l| HashMap::from([("location", l.as_str())]))
                .unwrap_or_default(),
        }
    }
}

impl PluginResponse {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// HTTP status the response is sent with.
    pub fn status(&self) -> u16 {
        if self.is_error() { 500 } else { 200 }
    }

    fn body(&self) -> Value {
        match self {
            Self::Activated => json!({ "Implements": [IMPLEMENTS] }),
            Self::Ok => json!({}),
            Self::Mountpoint(path) => json!({ "Mountpoint": path.to_string_lossy() }),
            Self::Volume(info) => json!({ "Volume": WireVolume::from(info) }),
            Self::Volumes(infos) => json!({
                "Volumes": infos.iter().map(WireVolume::from).collect::<Vec<_>>()
            }),
            Self::Capabilities(caps) => json!({ "Capabilities": { "Scope": caps.scope.as_str() } }),
            Self::Error(msg) => json!({ "Err": msg }),
        }
    }

    /// JSON body of the response.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.body())
    }
}

impl std::fmt::Display for PluginResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Activated => f.write_str("Activated"),
            Self::Ok => f.write_str("Ok"),
            Self::Mountpoint(p) => write!(f, "Mountpoint({})", p.display()),
            Self::Volume(v) => write!(f, "Volume({})", v.name),
            Self::Volumes(vs) => write!(f, "Volumes(count={})", vs.len()),
            Self::Capabilities(c) => write!(f, "Capabilities(scope={})", c.scope.as_str()),
            Self::Error(e) => write!(f, "Error({e})"),
        }
    }
}
