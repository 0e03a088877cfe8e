//! Error types for the tether-rpc crate.
//!
//! `ClientError` is what a request handle settles with when it does not
//! succeed. Transport failures never reach callers directly: they surface as
//! a liveness change and, for requests in flight, `ConnectionClosed`.

use serde_json::Value;

use crate::protocol::RpcError;

/// Errors a request can settle with
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i32,
        message: String,
        data: Option<Value>,
    },

    #[error("Request canceled")]
    Canceled,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Request dropped from the full outbound queue")]
    QueueFull,

    #[error("Request timeout")]
    Timeout,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl ClientError {
    pub fn rpc(code: i32, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Whether the request ended because the caller canceled it.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Server-provided error code, if this is a protocol error.
    #[must_use]
    pub fn rpc_code(&self) -> Option<i32> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<RpcError> for ClientError {
    fn from(e: RpcError) -> Self {
        Self::Rpc {
            code: e.code,
            message: e.message,
            data: e.data,
        }
    }
}

/// Errors opening or using a socket
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Connection refused: {0}")]
    Refused(String),

    #[error("Socket closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, ClientError>;
