//! RPC client for the rendering server.
//!
//! Wraps a reconnecting [`Connection`] and adds request/response correlation,
//! per-method notification channels, and the binary channel. Params are
//! converted to snake_case on the way out; results and notification params
//! are converted to camelCase on the way in.
//!
//! Requests are never retried. When a socket closes, requests whose frame
//! reached it are rejected with [`ClientError::ConnectionClosed`]; requests
//! still queued stay pending and go out on the next socket.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures_util::Stream;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tether_types::case::{camelize_in_place, snakeize_in_place};
use tether_types::{ConnectionState, Fanout, Payload, Subscription};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::{
    Connection, ConnectionConfig, ConnectionEvent, DEFAULT_MAX_QUEUED_FRAMES,
    DEFAULT_RECONNECT_DELAY, RequestTag,
};
use crate::error::{ClientError, Result};
use crate::frame::{Frame, Inbound};
use crate::protocol::{
    BINARY_METHOD, CANCEL_METHOD, Notification, PROGRESS_METHOD, Request, RequestId, Response,
};
use crate::transport::{Transport, WsTransport, socket_url};

/// Default upload chunk size (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Client settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server base URL; the socket path is appended on connect.
    pub url: String,
    pub reconnect_delay: Duration,
    pub max_queued_frames: usize,
    /// Method that binary frames are published under.
    pub binary_method: String,
    /// Method carrying per-request progress notifications.
    pub progress_method: String,
    /// Chunk size used when an upload does not specify one.
    pub chunk_size: usize,
}

impl ClientConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_queued_frames: DEFAULT_MAX_QUEUED_FRAMES,
            binary_method: BINARY_METHOD.to_string(),
            progress_method: PROGRESS_METHOD.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    #[must_use]
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: socket_url(&self.url),
            reconnect_delay: self.reconnect_delay,
            max_queued_frames: self.max_queued_frames,
        }
    }
}

/// Request waiting for its response
struct PendingRequest {
    tx: oneshot::Sender<Result<Value>>,
    settled: CancellationToken,
    method: String,
    created_at: Instant,
    /// Set once the request frame reached a socket.
    written: bool,
}

impl PendingRequest {
    fn settle(self, result: Result<Value>) {
        self.settled.cancel();
        let _ = self.tx.send(result);
    }
}

type PendingMap = Arc<Mutex<HashMap<RequestId, PendingRequest>>>;

pub(crate) struct Shared {
    pub(crate) connection: Connection,
    pending: PendingMap,
    channels: Arc<Fanout<Payload>>,
    pub(crate) config: ClientConfig,
}

impl Shared {
    /// Settle a pending request with an error and tell the server to stop.
    ///
    /// Returns `false` if the request had already settled.
    pub(crate) fn abort_request(&self, id: &RequestId, error: ClientError) -> bool {
        let Some(entry) = self.pending.lock().remove(id) else {
            return false;
        };

        debug!(
            "Aborting request {id} ({}) after {:?}: {error}",
            entry.method,
            entry.created_at.elapsed()
        );
        self.send_notification(CANCEL_METHOD, Some(json!({ "id": id })));
        entry.settle(Err(error));
        true
    }

    fn send_notification(&self, method: &str, params: Option<Value>) {
        let notification = Notification::new(method, params);
        match Frame::notification(&notification) {
            Ok(frame) => self.connection.send(frame),
            Err(e) => warn!("Failed to encode '{method}' notification: {e}"),
        }
    }
}

/// RPC client for the rendering server
///
/// Cloning is cheap; clones share the connection and pending requests. The
/// connection shuts down when the last clone is dropped.
#[derive(Clone)]
pub struct RpcClient {
    pub(crate) shared: Arc<Shared>,
}

impl RpcClient {
    /// Connect to `config.url` over WebSocket.
    ///
    /// Returns immediately; the connection is established (and
    /// re-established) in the background. Must be called within a tokio
    /// runtime.
    #[must_use]
    pub fn connect(config: ClientConfig) -> Self {
        Self::with_transport(Arc::new(WsTransport), config)
    }

    /// Connect using a custom transport.
    #[must_use]
    pub fn with_transport(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        let (connection, events) = Connection::connect(transport, config.connection_config());
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let channels = Arc::new(Fanout::new());

        tokio::spawn(dispatch(
            events,
            pending.clone(),
            channels.clone(),
            config.binary_method.clone(),
        ));

        Self {
            shared: Arc::new(Shared {
                connection,
                pending,
                channels,
                config,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Send a request. The returned handle resolves with the camelCased result.
    ///
    /// Never fails synchronously: encoding errors settle the handle instead.
    pub fn request(&self, method: &str, params: Option<Value>) -> RequestHandle {
        let id = RequestId::random();
        let params = params.map(|mut params| {
            snakeize_in_place(&mut params);
            params
        });

        let (tx, rx) = oneshot::channel();
        let settled = CancellationToken::new();
        let progress = self.shared.channels.subscribe(&self.shared.config.progress_method);

        let pending = PendingRequest {
            tx,
            settled: settled.clone(),
            method: method.to_string(),
            created_at: Instant::now(),
            written: false,
        };

        match Frame::request(&Request::new(method, params, id.clone())) {
            Ok(frame) => {
                self.shared.pending.lock().insert(id.clone(), pending);
                debug!("Sending request {id} ({method})");
                let tag = RequestTag {
                    id: id.clone(),
                    settled: settled.clone(),
                };
                self.shared.connection.send_tagged(tag, vec![frame]);
            }
            Err(e) => pending.settle(Err(e.into())),
        }

        RequestHandle {
            id,
            rx,
            settled,
            shared: Arc::downgrade(&self.shared),
            progress: Some(progress),
        }
    }

    /// Send a request and deserialize the camelCased result.
    ///
    /// # Errors
    ///
    /// Returns the request's terminal error, or `ClientError::Json` if the
    /// result does not match `T`.
    pub async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T> {
        let value = self.request(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Like [`call`](Self::call), but cancels the request after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Timeout` if no response arrived in time.
    pub async fn call_with_timeout<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<T> {
        let mut handle = self.request(method, params);
        let Ok(result) = tokio::time::timeout(timeout, &mut handle).await else {
            handle.cancel();
            return Err(ClientError::Timeout);
        };
        Ok(serde_json::from_value(result?)?)
    }

    /// Send a notification. Fire-and-forget; never fails.
    pub fn notify(&self, method: &str, params: Option<Value>) {
        let params = params.map(|mut params| {
            snakeize_in_place(&mut params);
            params
        });
        self.shared.send_notification(method, params);
    }

    /// Resolves once every frame queued so far has been written, or to
    /// `false` if some of them were dropped first.
    pub fn flush(&self) -> impl Future<Output = bool> + use<> {
        self.shared.connection.send_flushed(Vec::new())
    }

    /// Subscribe to inbound traffic for `method`.
    ///
    /// For the configured binary method this yields only
    /// [`Payload::Binary`]; for every other method it yields
    /// [`Payload::Json`] with camelCased params.
    #[must_use]
    pub fn observe(&self, method: &str) -> Subscription<Payload> {
        self.shared.channels.subscribe(method)
    }

    /// Subscribe to the binary channel.
    #[must_use]
    pub fn observe_binary(&self) -> Subscription<Payload> {
        self.observe(&self.shared.config.binary_method)
    }

    /// Liveness signal with replay-last-value semantics.
    #[must_use]
    pub fn liveness(&self) -> watch::Receiver<bool> {
        self.shared.connection.liveness()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connection.is_live()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.connection.state()
    }

    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.connection.state_changes()
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Stop reconnecting, close the socket, and reject pending requests.
    pub fn shutdown(&self) {
        self.shared.connection.shutdown();
        fail_all(&self.shared.pending, || ClientError::ConnectionClosed);
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("url", &self.shared.connection.url())
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// Route socket events until the connection driver stops.
async fn dispatch(
    mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
    pending: PendingMap,
    channels: Arc<Fanout<Payload>>,
    binary_method: String,
) {
    while let Some(event) = events.recv().await {
        let frame = match event {
            ConnectionEvent::Frame(frame) => frame,
            ConnectionEvent::Opened => continue,
            ConnectionEvent::Written(id) => {
                if let Some(entry) = pending.lock().get_mut(&id) {
                    entry.written = true;
                }
                continue;
            }
            ConnectionEvent::Dropped(id) => {
                let entry = pending.lock().remove(&id);
                if let Some(entry) = entry {
                    warn!("Request {id} ({}) dropped from the outbound queue", entry.method);
                    entry.settle(Err(ClientError::QueueFull));
                }
                continue;
            }
            ConnectionEvent::Closed => {
                fail_written(&pending);
                continue;
            }
        };

        match Inbound::classify(frame) {
            Some(Inbound::Response(response)) => route_response(&pending, response),
            Some(Inbound::Notification(notification)) => {
                if notification.method == binary_method {
                    debug!("Ignoring JSON notification on binary method '{binary_method}'");
                    continue;
                }
                let mut params = notification.params.unwrap_or(Value::Null);
                camelize_in_place(&mut params);
                channels.publish(&notification.method, Payload::Json(params));
            }
            Some(Inbound::Binary(bytes)) => {
                channels.publish(&binary_method, Payload::Binary(bytes));
            }
            None => {}
        }
    }

    fail_all(&pending, || ClientError::ConnectionClosed);
    debug!("Dispatcher stopped");
}

fn route_response(pending: &PendingMap, response: Response) {
    let Some(entry) = pending.lock().remove(&response.id) else {
        debug!("Ignoring response for unknown request {}", response.id);
        return;
    };

    debug!(
        "Request {} ({}) settled after {:?}",
        response.id,
        entry.method,
        entry.created_at.elapsed()
    );

    let result = response
        .into_result()
        .map(|mut result| {
            camelize_in_place(&mut result);
            result
        })
        .map_err(ClientError::from);
    entry.settle(result);
}

/// Reject requests that were written to the socket that just closed.
fn fail_written(pending: &PendingMap) {
    let failed: Vec<PendingRequest> = {
        let mut pending = pending.lock();
        let ids: Vec<RequestId> = pending
            .iter()
            .filter(|(_, entry)| entry.written)
            .map(|(id, _)| id.clone())
            .collect();
        ids.iter().filter_map(|id| pending.remove(id)).collect()
    };
    if !failed.is_empty() {
        debug!("Rejecting {} request(s) in flight on the closed socket", failed.len());
    }
    for entry in failed {
        entry.settle(Err(ClientError::ConnectionClosed));
    }
}

fn fail_all(pending: &PendingMap, error: impl Fn() -> ClientError) {
    let drained: Vec<PendingRequest> = pending.lock().drain().map(|(_, entry)| entry).collect();
    if !drained.is_empty() {
        debug!("Rejecting {} pending request(s)", drained.len());
    }
    for entry in drained {
        entry.settle(Err(error()));
    }
}

/// Handle to one in-flight request.
///
/// Await it for the result. Dropping the handle does not cancel the request.
pub struct RequestHandle {
    id: RequestId,
    rx: oneshot::Receiver<Result<Value>>,
    settled: CancellationToken,
    shared: Weak<Shared>,
    progress: Option<Subscription<Payload>>,
}

impl RequestHandle {
    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Cancel the request: notifies the server and rejects this handle with
    /// `ClientError::Canceled`. No-op once the request has settled.
    pub fn cancel(&self) {
        self.canceler().cancel();
    }

    /// A detached cancel handle, usable after this handle is awaited.
    #[must_use]
    pub fn canceler(&self) -> Canceler {
        Canceler {
            id: self.id.clone(),
            shared: self.shared.clone(),
        }
    }

    /// Whether the request has resolved, rejected, or been canceled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.settled.is_cancelled()
    }

    /// A handle that has already failed with `error`. Nothing is sent.
    pub(crate) fn rejected(shared: &Arc<Shared>, error: ClientError) -> Self {
        let (tx, rx) = oneshot::channel();
        let settled = CancellationToken::new();
        settled.cancel();
        let _ = tx.send(Err(error));
        Self {
            id: RequestId::random(),
            rx,
            settled,
            shared: Arc::downgrade(shared),
            progress: None,
        }
    }

    pub(crate) fn settled_token(&self) -> CancellationToken {
        self.settled.clone()
    }

    /// Progress notifications for this request.
    ///
    /// The first call yields every progress event since the request was
    /// sent; later calls only see events from that point on.
    pub fn progress(&mut self) -> Progress {
        let inner = match self.progress.take() {
            Some(subscription) => subscription,
            None => match self.shared.upgrade() {
                Some(shared) => shared.channels.subscribe(&shared.config.progress_method),
                None => Fanout::new().subscribe(""),
            },
        };
        Progress {
            id: self.id.clone(),
            inner,
        }
    }
}

impl Future for RequestHandle {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(ClientError::ConnectionClosed)))
    }
}

impl std::fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle")
            .field("id", &self.id)
            .field("settled", &self.is_settled())
            .finish_non_exhaustive()
    }
}

/// Cancels one request. Cloneable and detached from the request handle.
#[derive(Clone)]
pub struct Canceler {
    id: RequestId,
    shared: Weak<Shared>,
}

impl Canceler {
    /// Returns `true` if the request was still pending.
    pub fn cancel(&self) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        shared.abort_request(&self.id, ClientError::Canceled)
    }
}

impl std::fmt::Debug for Canceler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Canceler").field("id", &self.id).finish()
    }
}

/// Progress events whose `id` names one request.
#[derive(Debug)]
pub struct Progress {
    id: RequestId,
    inner: Subscription<Payload>,
}

impl Stream for Progress {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Payload::Json(event)))
                    if event.get("id").is_some_and(|id| self.id.matches(id)) =>
                {
                    return Poll::Ready(Some(event));
                }
                Poll::Ready(Some(_)) => {}
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::JSONRPC_VERSION;
    use crate::transport::{MemoryPeer, MemoryServer, MemoryTransport};
    use bytes::Bytes;
    use futures_util::StreamExt;

    async fn connected() -> (RpcClient, MemoryPeer, MemoryServer) {
        let (transport, mut server) = MemoryTransport::pair();
        let client = RpcClient::with_transport(Arc::new(transport), ClientConfig::new("mem://render"));
        let peer = server.accept().await.unwrap();
        let mut live = client.liveness();
        live.wait_for(|live| *live).await.unwrap();
        (client, peer, server)
    }

    fn respond(peer: &MemoryPeer, id: &Value, result: Value) {
        peer.send_json(&json!({"jsonrpc": JSONRPC_VERSION, "id": id, "result": result}));
    }

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::new("http://localhost:8080/");
        assert_eq!(config.connection_config().url, "ws://localhost:8080/ws");
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.binary_method, "image-jpeg");
        assert_eq!(config.progress_method, "progress");
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[tokio::test]
    async fn test_request_round_trip_converts_case() {
        let (client, mut peer, _server) = connected().await;

        let handle = client.request("inspect", Some(json!({"ping": true, "pingPong": true})));
        let sent = peer.recv_json().await.unwrap();
        assert_eq!(sent["method"], "inspect");
        assert_eq!(sent["params"], json!({"ping": true, "ping_pong": true}));

        respond(&peer, &sent["id"], json!({"just_pinged": true}));
        assert_eq!(handle.await.unwrap(), json!({"justPinged": true}));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_request_error_response_rejects() {
        let (client, mut peer, _server) = connected().await;

        let handle = client.request("load_scene", None);
        let sent = peer.recv_json().await.unwrap();
        assert!(sent.get("params").is_none());

        peer.send_json(&json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": sent["id"],
            "error": {"code": -32000, "message": "Scene not found"}
        }));

        match handle.await {
            Err(ClientError::Rpc { code, message, .. }) => {
                assert_eq!(code, -32000);
                assert_eq!(message, "Scene not found");
            }
            other => panic!("Expected Rpc error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_responses_matched_by_id_not_order() {
        let (client, mut peer, _server) = connected().await;

        let first = client.request("first", None);
        let second = client.request("second", None);
        let first_id = peer.recv_json().await.unwrap()["id"].clone();
        let second_id = peer.recv_json().await.unwrap()["id"].clone();
        assert_ne!(first_id, second_id);

        respond(&peer, &second_id, json!(2));
        respond(&peer, &first_id, json!(1));

        assert_eq!(second.await.unwrap(), json!(2));
        assert_eq!(first.await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn test_cancel_notifies_server_and_rejects() {
        let (client, mut peer, _server) = connected().await;

        let handle = client.request("render", None);
        let sent = peer.recv_json().await.unwrap();
        handle.cancel();
        assert!(handle.is_settled());

        let cancel = peer.recv_json().await.unwrap();
        assert_eq!(cancel["method"], CANCEL_METHOD);
        assert_eq!(cancel["params"]["id"], sent["id"]);
        assert!(cancel.get("id").is_none());

        assert!(matches!(handle.await, Err(ClientError::Canceled)));
        assert_eq!(client.pending_count(), 0);

        // Late response for the canceled request is ignored.
        respond(&peer, &sent["id"], json!("late"));
        let follow_up = client.request("ping", None);
        let ping = peer.recv_json().await.unwrap();
        respond(&peer, &ping["id"], json!("pong"));
        assert_eq!(follow_up.await.unwrap(), json!("pong"));
    }

    #[tokio::test]
    async fn test_cancel_after_settle_is_noop() {
        let (client, mut peer, _server) = connected().await;

        let handle = client.request("ping", None);
        let canceler = handle.canceler();
        let sent = peer.recv_json().await.unwrap();
        respond(&peer, &sent["id"], json!(true));
        assert_eq!(handle.await.unwrap(), json!(true));

        assert!(!canceler.cancel());
        tokio::task::yield_now().await;
        assert!(peer.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_notify_converts_case() {
        let (client, mut peer, _server) = connected().await;

        client.notify("set_camera", Some(json!({"cameraPosition": [0, 1, 2]})));
        let sent = peer.recv_json().await.unwrap();
        assert_eq!(sent["method"], "set_camera");
        assert_eq!(sent["params"], json!({"camera_position": [0, 1, 2]}));
        assert!(sent.get("id").is_none());
    }

    #[tokio::test]
    async fn test_flush_waits_for_queued_frames() {
        let (client, mut peer, _server) = connected().await;

        client.notify("first", None);
        client.notify("second", None);
        assert!(client.flush().await);

        assert_eq!(peer.recv_json().await.unwrap()["method"], "first");
        assert_eq!(peer.recv_json().await.unwrap()["method"], "second");
    }

    #[tokio::test]
    async fn test_observe_notifications_camelized() {
        let (client, peer, _server) = connected().await;
        let mut scene = client.observe("scene_changed");
        let mut other = client.observe("other");

        peer.send_json(&json!({"jsonrpc": "2.0", "method": "scene_changed", "params": {"model_ids": ["a"]}}));

        let payload = scene.next().await.unwrap();
        assert_eq!(payload, Payload::Json(json!({"modelIds": ["a"]})));
        assert!(other.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_observe_binary_method_only_yields_binary() {
        let (client, peer, _server) = connected().await;
        let mut images = client.observe("image-jpeg");
        let mut status = client.observe("status");

        peer.send_json(&json!({"jsonrpc": "2.0", "method": "status", "params": {"fps": 30}}));
        peer.send_json(&json!({"jsonrpc": "2.0", "method": "image-jpeg", "params": {"x": 1}}));
        peer.send(Frame::Binary(Bytes::from_static(b"\xff\xd8jpeg")));
        peer.send_json(&json!({"jsonrpc": "2.0", "method": "status", "params": {"fps": 29}}));
        peer.send(Frame::Binary(Bytes::from_static(b"\xff\xd8next")));

        let first = images.next().await.unwrap();
        let second = images.next().await.unwrap();
        assert_eq!(first, Payload::Binary(Bytes::from_static(b"\xff\xd8jpeg")));
        assert_eq!(second, Payload::Binary(Bytes::from_static(b"\xff\xd8next")));

        assert_eq!(status.next().await.unwrap(), Payload::Json(json!({"fps": 30})));
        assert_eq!(status.next().await.unwrap(), Payload::Json(json!({"fps": 29})));
        assert!(images.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_malformed_frames_do_not_break_dispatch() {
        let (client, mut peer, _server) = connected().await;

        let handle = client.request("ping", None);
        let sent = peer.recv_json().await.unwrap();

        peer.send(Frame::Text("not json at all".to_string()));
        peer.send(Frame::Text("{\"unexpected\": true}".to_string()));
        peer.send(Frame::Text("[]".to_string()));
        peer.send(Frame::Text(String::new()));
        respond(&peer, &sent["id"], json!("pong"));

        assert_eq!(handle.await.unwrap(), json!("pong"));
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_progress_filtered_by_request_id() {
        let (client, mut peer, _server) = connected().await;

        let mut handle = client.request("bake_lighting", None);
        let mut progress = handle.progress();
        let sent = peer.recv_json().await.unwrap();

        peer.send_json(&json!({"method": "progress", "params": {"id": "someone-else", "percent": 10}}));
        peer.send_json(&json!({"method": "progress", "params": {"id": sent["id"], "percent": 50, "stage_name": "bake"}}));
        respond(&peer, &sent["id"], json!({}));

        let event = progress.next().await.unwrap();
        assert_eq!(event["percent"], 50);
        assert_eq!(event["stageName"], "bake");
        assert!(handle.await.is_ok());
    }

    #[tokio::test]
    async fn test_socket_close_rejects_pending() {
        let (client, mut peer, _server) = connected().await;

        let handle = client.request("slow", None);
        let _ = peer.recv_json().await.unwrap();
        peer.close();

        assert!(matches!(handle.await, Err(ClientError::ConnectionClosed)));
        let mut live = client.liveness();
        live.wait_for(|live| !*live).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_while_disconnected_is_queued() {
        let (transport, mut server) = MemoryTransport::pair();
        transport.set_refuse(true);
        let toggle = transport.clone();
        let client = RpcClient::with_transport(Arc::new(transport), ClientConfig::new("mem://render"));
        tokio::task::yield_now().await;

        let handle = client.request("inspect", Some(json!({"ping": true})));
        assert!(!client.is_connected());
        assert_eq!(client.pending_count(), 1);

        toggle.set_refuse(false);
        let mut peer = server.accept().await.unwrap();
        let sent = peer.recv_json().await.unwrap();
        assert_eq!(sent["method"], "inspect");
        respond(&peer, &sent["id"], json!({"just_pinged": true}));
        assert_eq!(handle.await.unwrap(), json!({"justPinged": true}));
    }

    #[tokio::test]
    async fn test_call_deserializes_result() {
        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Stats {
            frame_count: u32,
        }

        let (client, mut peer, _server) = connected().await;
        let call = tokio::spawn({
            let client = client.clone();
            async move { client.call::<Stats>("stats", None).await }
        });

        let sent = peer.recv_json().await.unwrap();
        respond(&peer, &sent["id"], json!({"frame_count": 12}));
        let stats = call.await.unwrap().unwrap();
        assert_eq!(stats.frame_count, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_with_timeout_cancels() {
        let (client, mut peer, _server) = connected().await;

        let result: Result<Value> = client
            .call_with_timeout("never", None, Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(ClientError::Timeout)));

        let _request = peer.recv_json().await.unwrap();
        let cancel = peer.recv_json().await.unwrap();
        assert_eq!(cancel["method"], CANCEL_METHOD);
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_pending() {
        let (client, mut peer, _server) = connected().await;
        let handle = client.request("slow", None);
        let _ = peer.recv_json().await.unwrap();

        client.shutdown();
        assert!(matches!(handle.await, Err(ClientError::ConnectionClosed)));
        assert_eq!(client.pending_count(), 0);
    }
}
