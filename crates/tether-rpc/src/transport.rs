//! Socket transports.
//!
//! A [`Transport`] opens one [`Socket`]: a sink of outgoing frames and a
//! stream of incoming frames. The connection manager owns the socket and
//! never shares it, so transports do not need to be reentrant.
//!
//! Two implementations are provided:
//!
//! - [`WsTransport`]: WebSocket via `tokio-tungstenite`
//! - [`MemoryTransport`]: in-process channels, for tests and embedding

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures_util::future::BoxFuture;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::error::TransportError;
use crate::frame::Frame;

/// Path appended to the server base URL.
pub const SOCKET_PATH: &str = "ws";

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// An open socket.
pub struct Socket {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket").finish_non_exhaustive()
    }
}

/// Opens sockets for the connection manager.
pub trait Transport: Send + Sync + 'static {
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Socket, TransportError>>;
}

/// Build the socket URL for a server base URL.
///
/// Appends `/ws` with exactly one separator and maps `http(s)://` to
/// `ws(s)://`.
///
/// ```
/// # use tether_rpc::transport::socket_url;
/// assert_eq!(socket_url("http://render:8080"), "ws://render:8080/ws");
/// assert_eq!(socket_url("wss://render.example/"), "wss://render.example/ws");
/// ```
#[must_use]
pub fn socket_url(base: &str) -> String {
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };

    format!("{}/{SOCKET_PATH}", base.trim_end_matches('/'))
}

/// WebSocket transport backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsTransport;

impl Transport for WsTransport {
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Socket, TransportError>> {
        Box::pin(async move {
            let (ws, _) = tokio_tungstenite::connect_async(url).await?;
            let (ws_tx, ws_rx) = ws.split();

            let sink = ws_tx
                .sink_map_err(TransportError::from)
                .with(|frame: Frame| async move { Ok::<_, TransportError>(to_message(frame)) });

            let stream = ws_rx.filter_map(|msg| async move {
                match msg {
                    Ok(msg) => from_message(msg).map(Ok),
                    Err(e) => Some(Err(TransportError::from(e))),
                }
            });

            Ok(Socket {
                sink: Box::pin(sink),
                stream: Box::pin(stream),
            })
        })
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(bytes) => Message::Binary(bytes),
    }
}

/// Control frames are handled by tungstenite itself.
fn from_message(msg: Message) -> Option<Frame> {
    match msg {
        Message::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
        Message::Binary(bytes) => Some(Frame::Binary(bytes)),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => None,
    }
}

/// In-process transport.
///
/// Every `connect` hands the server side a [`MemoryPeer`] through the paired
/// [`MemoryServer`]. Dropping the peer closes the socket from the server side.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    inner: Arc<MemoryInner>,
}

#[derive(Debug)]
struct MemoryInner {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    attempts: AtomicUsize,
    refuse: AtomicBool,
}

impl MemoryTransport {
    /// Create a transport and the server end that accepts its sockets.
    #[must_use]
    pub fn pair() -> (Self, MemoryServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let transport = Self {
            inner: Arc::new(MemoryInner {
                accept_tx,
                attempts: AtomicUsize::new(0),
                refuse: AtomicBool::new(false),
            }),
        };
        (transport, MemoryServer { accept_rx })
    }

    /// Number of `connect` calls so far, refused ones included.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Make subsequent `connect` calls fail.
    pub fn set_refuse(&self, refuse: bool) {
        self.inner.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl Transport for MemoryTransport {
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Socket, TransportError>> {
        Box::pin(async move {
            self.inner.attempts.fetch_add(1, Ordering::SeqCst);
            if self.inner.refuse.load(Ordering::SeqCst) {
                return Err(TransportError::Refused(url.to_string()));
            }

            let (to_server_tx, to_server_rx) = mpsc::unbounded_channel::<Frame>();
            let (to_client_tx, to_client_rx) = mpsc::unbounded_channel::<Frame>();

            let peer = MemoryPeer {
                url: url.to_string(),
                rx: to_server_rx,
                tx: to_client_tx,
            };
            self.inner
                .accept_tx
                .send(peer)
                .map_err(|_| TransportError::Refused(url.to_string()))?;

            let sink = futures_util::sink::unfold(to_server_tx, |tx, frame: Frame| async move {
                tx.send(frame).map_err(|_| TransportError::Closed)?;
                Ok::<_, TransportError>(tx)
            });

            let stream = futures_util::stream::unfold(to_client_rx, |mut rx| async move {
                rx.recv().await.map(|frame| (Ok(frame), rx))
            });

            Ok(Socket {
                sink: Box::pin(sink),
                stream: Box::pin(stream),
            })
        })
    }
}

/// Accepts sockets opened through a [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryServer {
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.try_recv().ok()
    }
}

/// Server side of one in-process socket.
#[derive(Debug)]
pub struct MemoryPeer {
    pub url: String,
    rx: mpsc::UnboundedReceiver<Frame>,
    tx: mpsc::UnboundedSender<Frame>,
}

impl MemoryPeer {
    /// Next frame written by the client. `None` once the client closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }

    /// Next text frame decoded as JSON, skipping binary frames.
    pub async fn recv_json(&mut self) -> Option<Value> {
        loop {
            match self.recv().await? {
                Frame::Text(text) => return serde_json::from_str(&text).ok(),
                Frame::Binary(_) => {}
            }
        }
    }

    /// Send a frame to the client. Returns `false` if the client is gone.
    pub fn send(&self, frame: Frame) -> bool {
        self.tx.send(frame).is_ok()
    }

    pub fn send_json(&self, value: &Value) -> bool {
        self.send(Frame::Text(value.to_string()))
    }

    /// Close the socket from the server side.
    pub fn close(self) {
        drop(self);
    }
}
