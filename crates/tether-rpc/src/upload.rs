//! Chunked file upload.
//!
//! An upload is one `upload` request followed by a stream of chunk pairs: a
//! `chunk` notification naming the chunk group, then the raw bytes as a
//! binary frame. Chunks are read lazily and each pair is written back to
//! back before the next chunk is read. Chunk emission stops as soon as the
//! upload request settles, whichever way it settles.

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use bytes::Bytes;
use serde::Serialize;
use serde_json::{Value, json};
use tether_types::{FileMetadata, ModelDescriptor, Transformation};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{Canceler, Progress, RequestHandle, RpcClient, Shared};
use crate::connection::RequestTag;
use crate::error::{ClientError, Result};
use crate::frame::Frame;
use crate::protocol::{CHUNK_METHOD, Notification, RequestId, UPLOAD_METHOD};

/// File contents plus the metadata sent with the upload request.
pub struct UploadFile {
    metadata: FileMetadata,
    reader: Pin<Box<dyn AsyncRead + Send>>,
}

impl UploadFile {
    /// Open a file on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or stat'ed.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        Ok(Self::from_reader(path.to_string_lossy(), size, file))
    }

    /// In-memory contents. `path` is used for the name and type.
    pub fn from_bytes(path: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let size = bytes.len() as u64;
        Self::from_reader(path, size, io::Cursor::new(bytes))
    }

    /// Contents read from `reader`, which should yield `size` bytes.
    pub fn from_reader(
        path: impl Into<String>,
        size: u64,
        reader: impl AsyncRead + Send + 'static,
    ) -> Self {
        Self {
            metadata: FileMetadata::new(path, size),
            reader: Box::pin(reader),
        }
    }

    #[must_use]
    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }
}

impl std::fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadFile")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Optional fields forwarded with the upload request.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transformation: Option<Transformation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loader_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loader_properties: Option<Value>,
}

/// Upload job description.
#[derive(Debug)]
pub struct UploadRequest {
    pub file: UploadFile,
    /// Bytes per chunk; `0` uses the client's configured chunk size.
    pub chunk_size: usize,
    /// Overrides the name inferred from the file path.
    pub name: Option<String>,
    pub options: UploadOptions,
}

impl UploadRequest {
    #[must_use]
    pub fn new(file: UploadFile) -> Self {
        Self {
            file,
            chunk_size: 0,
            name: None,
            options: UploadOptions::default(),
        }
    }

    #[must_use]
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn options(mut self, options: UploadOptions) -> Self {
        self.options = options;
        self
    }

    fn params(&self, group_id: &str) -> Result<Value> {
        let mut metadata = self.file.metadata.clone();
        if let Some(name) = &self.name {
            metadata.name.clone_from(name);
        }

        let mut params = serde_json::to_value(&metadata)?;
        let serde_json::Value::Object(options) = serde_json::to_value(&self.options)? else {
            return Err(ClientError::UnexpectedResponse(
                "upload options did not serialize to an object".to_string(),
            ));
        };
        if let Some(params) = params.as_object_mut() {
            params.insert("id".to_string(), json!(group_id));
            params.extend(options);
        }
        Ok(params)
    }
}

/// Pull-driven reader that splits a byte source into fixed-size chunks.
///
/// Every chunk but the last is exactly `chunk_size` bytes. An empty source
/// yields no chunks.
pub struct Chunker {
    reader: Pin<Box<dyn AsyncRead + Send>>,
    chunk_size: usize,
    position: u64,
    done: bool,
}

impl Chunker {
    /// # Panics
    ///
    /// Panics if `chunk_size` is zero.
    #[must_use]
    pub fn new(reader: Pin<Box<dyn AsyncRead + Send>>, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be positive");
        Self {
            reader,
            chunk_size,
            position: 0,
            done: false,
        }
    }

    /// Bytes handed out so far.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read the next chunk, or `None` at end of input.
    ///
    /// # Errors
    ///
    /// Returns the underlying read error.
    pub async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        if self.done {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < self.chunk_size {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                self.done = true;
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        self.position += filled as u64;
        Ok(Some(Bytes::from(buf)))
    }
}

impl std::fmt::Debug for Chunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunker")
            .field("chunk_size", &self.chunk_size)
            .field("position", &self.position)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl RpcClient {
    /// Upload a file in chunks.
    ///
    /// The returned handle resolves with the server's model descriptor.
    /// Canceling it stops chunk emission and notifies the server.
    pub fn upload(&self, request: UploadRequest) -> UploadHandle {
        let group_id = uuid::Uuid::new_v4().to_string();
        let chunk_size = match request.chunk_size {
            0 => self.shared.config.chunk_size.max(1),
            n => n,
        };

        debug!(
            "Uploading {} ({} bytes) as group {group_id} in {chunk_size}-byte chunks",
            request.file.metadata.path, request.file.metadata.size
        );
        let params = request.params(&group_id);
        self.start_upload(group_id, params, request.file.reader, chunk_size)
    }

    fn start_upload(
        &self,
        group_id: String,
        params: Result<Value>,
        reader: Pin<Box<dyn AsyncRead + Send>>,
        chunk_size: usize,
    ) -> UploadHandle {
        let params = match params {
            Ok(params) => params,
            Err(e) => {
                warn!("Failed to encode upload params for group {group_id}: {e}");
                return UploadHandle {
                    request: RequestHandle::rejected(&self.shared, e),
                    group_id,
                };
            }
        };

        let handle = self.request(UPLOAD_METHOD, Some(params));

        let task = ChunkTask {
            chunker: Chunker::new(reader, chunk_size),
            group_id: group_id.clone(),
            request_id: handle.id().clone(),
            settled: handle.settled_token(),
            shared: Arc::downgrade(&self.shared),
        };
        tokio::spawn(task.run());

        UploadHandle {
            request: handle,
            group_id,
        }
    }
}

struct ChunkTask {
    chunker: Chunker,
    group_id: String,
    request_id: RequestId,
    settled: CancellationToken,
    shared: Weak<Shared>,
}

impl ChunkTask {
    async fn run(mut self) {
        let control = match Frame::notification(&Notification::new(
            CHUNK_METHOD,
            Some(json!({ "id": self.group_id })),
        )) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode chunk notification: {e}");
                return;
            }
        };

        let mut sent = 0usize;
        loop {
            let chunk = tokio::select! {
                biased;
                () = self.settled.cancelled() => break,
                chunk = self.chunker.next_chunk() => chunk,
            };

            let bytes = match chunk {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    debug!("Group {}: all {sent} chunk(s) sent", self.group_id);
                    return;
                }
                Err(e) => {
                    warn!("Group {}: read failed after {sent} chunk(s): {e}", self.group_id);
                    if let Some(shared) = self.shared.upgrade() {
                        shared.abort_request(&self.request_id, ClientError::Io(e));
                    }
                    return;
                }
            };

            if self.settled.is_cancelled() {
                break;
            }
            let Some(shared) = self.shared.upgrade() else {
                return;
            };
            let tag = RequestTag {
                id: self.request_id.clone(),
                settled: self.settled.clone(),
            };
            let written = shared
                .connection
                .send_tagged_flushed(tag, vec![control.clone(), Frame::Binary(bytes)]);
            drop(shared);

            let written = tokio::select! {
                biased;
                () = self.settled.cancelled() => break,
                written = written => written,
            };
            if !written {
                debug!("Group {}: chunk {sent} was not written", self.group_id);
                return;
            }
            sent += 1;
        }

        debug!(
            "Group {}: upload settled after {sent} chunk(s), stopping",
            self.group_id
        );
    }
}

/// Handle to an in-flight upload.
///
/// Resolves with the server's model descriptor.
#[derive(Debug)]
pub struct UploadHandle {
    request: RequestHandle,
    group_id: String,
}

impl UploadHandle {
    /// Chunk group id carried by every chunk notification.
    #[must_use]
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    #[must_use]
    pub fn id(&self) -> &RequestId {
        self.request.id()
    }

    pub fn cancel(&self) {
        self.request.cancel();
    }

    #[must_use]
    pub fn canceler(&self) -> Canceler {
        self.request.canceler()
    }

    pub fn progress(&mut self) -> Progress {
        self.request.progress()
    }
}

impl Future for UploadHandle {
    type Output = Result<ModelDescriptor>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.request)
            .poll(cx)
            .map(|result| Ok(serde_json::from_value(result?)?))
    }
}
