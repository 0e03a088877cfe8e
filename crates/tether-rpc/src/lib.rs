//! JSON-RPC 2.0 over WebSocket client for the tether rendering server.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`protocol`]: JSON-RPC 2.0 message types (Request, Response, Notification)
//! - [`frame`]: Socket frames and inbound classification
//! - [`transport`]: WebSocket and in-memory socket transports
//! - [`connection`]: Reconnecting connection manager with a liveness signal
//! - [`client`]: Request/response correlation, notifications, cancellation
//! - [`upload`]: Chunked file upload
//! - [`error`]: Error types and result alias
//!
//! # Example
//!
//! ```no_run
//! use tether_rpc::{ClientConfig, RpcClient};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), tether_rpc::ClientError> {
//! let client = RpcClient::connect(ClientConfig::new("http://localhost:8080"));
//!
//! let result = client.request("inspect", Some(json!({"ping": true}))).await?;
//! println!("{result}");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connection;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod transport;
pub mod upload;

// Re-export main client types
pub use client::{Canceler, ClientConfig, DEFAULT_CHUNK_SIZE, Progress, RequestHandle, RpcClient};
pub use connection::{Connection, ConnectionConfig, ConnectionEvent, RequestTag};
pub use upload::{Chunker, UploadFile, UploadHandle, UploadOptions, UploadRequest};

// Re-export error types
pub use error::{ClientError, Result, TransportError};

// Re-export protocol types
pub use frame::{Frame, Inbound};
pub use protocol::{
    BINARY_METHOD, CANCEL_METHOD, CHUNK_METHOD, JSONRPC_VERSION, Notification, PROGRESS_METHOD,
    Request, RequestId, Response, RpcError, UPLOAD_METHOD,
};

// Re-export transport types
pub use transport::{MemoryPeer, MemoryServer, MemoryTransport, Transport, WsTransport, socket_url};

#[cfg(test)]
mod tests;
