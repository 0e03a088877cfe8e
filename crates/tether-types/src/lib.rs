//! Shared types for tether components.
//!
//! This crate provides the data types used across tether-rpc, tether-core
//! and tether-cli, plus two leaf utilities: key case conversion and a named
//! multicast fan-out.

pub mod case;
pub mod fanout;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use fanout::{Fanout, Subscription};

/// Connection state as seen by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Payload delivered to an `observe` subscriber.
///
/// Notification params arrive as JSON (already camelCased); frames on the
/// binary channel arrive as raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Binary(Bytes),
}

impl Payload {
    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Binary(_) => None,
        }
    }

    #[must_use]
    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Payload::Binary(bytes) => Some(bytes),
            Payload::Json(_) => None,
        }
    }

    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(self, Payload::Binary(_))
    }
}

/// Severity of a UI notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

/// Column-major 4x4 model transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transformation(pub [f64; 16]);

impl Transformation {
    pub const IDENTITY: Self = Self([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    #[must_use]
    pub fn translation(x: f64, y: f64, z: f64) -> Self {
        let mut m = Self::IDENTITY.0;
        m[12] = x;
        m[13] = y;
        m[14] = z;
        Self(m)
    }
}

impl Default for Transformation {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Model created by the server in response to an upload.
///
/// Fields use the UI (camelCase) spelling; anything the server adds beyond
/// the known fields is kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformation: Option<Transformation>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// File metadata sent with an upload request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub file_type: String,
    pub size: u64,
}

impl FileMetadata {
    /// Build metadata for `path`, inferring the display name and type.
    ///
    /// The type is the trailing dot-segment of the file name, or an empty
    /// string when the name has no dot.
    #[must_use]
    pub fn new(path: impl Into<String>, size: u64) -> Self {
        let path = path.into();
        let name = display_name(&path).to_string();
        let file_type = extension_of(&name).to_string();
        Self {
            name,
            path,
            file_type,
            size,
        }
    }
}

/// Final path segment, accepting both `/` and `\` separators.
#[must_use]
pub fn display_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Trailing dot-segment of a file name (`"scene.tar.gz"` → `"gz"`).
#[must_use]
pub fn extension_of(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) => &name[idx + 1..],
        None => "",
    }
}
