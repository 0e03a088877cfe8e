//! Reconnecting connection manager.
//!
//! A single driver task owns the socket and the reconnect timer:
//!
//! ```text
//!   Disconnected ──connect──▶ Connecting ──open──▶ Connected
//!        ▲                        │                    │
//!        └──── delay elapsed ◀────┴── fail / close ◀───┘
//! ```
//!
//! Because only the driver arms the timer, reconnect attempts can never
//! overlap. Retries continue until the connection is shut down or dropped.
//!
//! Sending never fails synchronously: frames written while the socket is down
//! are queued (bounded by `max_queued_frames`) and flushed in order on the
//! next open.
//!
//! Batches tagged with a [`RequestTag`] are tracked: the driver reports when
//! they reach a socket ([`ConnectionEvent::Written`]) or fall out of a full
//! queue ([`ConnectionEvent::Dropped`]), and skips them once their request
//! has settled.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tether_types::ConnectionState;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::frame::Frame;
use crate::protocol::RequestId;
use crate::transport::{FrameSink, Socket, Transport};

/// Default delay before reconnecting after a close or failed attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Default bound on frames held while disconnected.
pub const DEFAULT_MAX_QUEUED_FRAMES: usize = 1024;

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Full socket URL (see [`crate::transport::socket_url`]).
    pub url: String,
    pub reconnect_delay: Duration,
    pub max_queued_frames: usize,
}

impl ConnectionConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_queued_frames: DEFAULT_MAX_QUEUED_FRAMES,
        }
    }
}

/// Events the driver reports to the connection's owner, in socket order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened,
    Frame(Frame),
    /// A tagged batch was handed to the socket. Also reported when the write
    /// failed partway, since the server may have seen part of it.
    Written(RequestId),
    /// A tagged batch was discarded from the full queue without being written.
    Dropped(RequestId),
    Closed,
}

/// Request an outbound batch belongs to.
#[derive(Debug, Clone)]
pub struct RequestTag {
    pub id: RequestId,
    /// Cancelled once the request has settled; queued batches are then skipped.
    pub settled: CancellationToken,
}

/// Frames written together, with an optional write acknowledgment.
struct Outbound {
    frames: Vec<Frame>,
    written: Option<oneshot::Sender<()>>,
    tag: Option<RequestTag>,
}

/// Handle to a reconnecting socket.
///
/// Dropping the handle stops the driver and closes the socket.
pub struct Connection {
    url: String,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    state_rx: watch::Receiver<ConnectionState>,
    live_rx: watch::Receiver<bool>,
    shutdown: CancellationToken,
}

impl Connection {
    /// Start connecting to `config.url`.
    ///
    /// Returns the handle plus the receiver for socket events. Must be
    /// called within a tokio runtime.
    pub fn connect(
        transport: Arc<dyn Transport>,
        config: ConnectionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (live_tx, live_rx) = watch::channel(false);
        let shutdown = CancellationToken::new();

        let driver = Driver {
            transport,
            config: config.clone(),
            outbound_rx,
            events_tx,
            state_tx,
            live_tx,
            shutdown: shutdown.clone(),
            queue: VecDeque::new(),
            queued_frames: 0,
        };
        tokio::spawn(driver.run());

        let connection = Self {
            url: config.url,
            outbound_tx,
            state_rx,
            live_rx,
            shutdown,
        };
        (connection, events_rx)
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Queue one frame for writing.
    pub fn send(&self, frame: Frame) {
        self.send_batch(vec![frame]);
    }

    /// Queue frames that must reach the socket back to back.
    pub fn send_batch(&self, frames: Vec<Frame>) {
        self.enqueue(frames, None, None);
    }

    /// Queue frames on behalf of a request.
    pub fn send_tagged(&self, tag: RequestTag, frames: Vec<Frame>) {
        self.enqueue(frames, None, Some(tag));
    }

    /// Queue frames and wait until they have been written to a socket.
    ///
    /// Resolves to `false` if the batch was dropped (queue overflow, write
    /// failure, or shutdown).
    pub fn send_flushed(&self, frames: Vec<Frame>) -> impl Future<Output = bool> + use<> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(frames, Some(tx), None);
        async move { rx.await.is_ok() }
    }

    /// Tagged [`send_flushed`](Self::send_flushed). Also resolves to `false`
    /// if the request settled before the batch was written.
    pub fn send_tagged_flushed(
        &self,
        tag: RequestTag,
        frames: Vec<Frame>,
    ) -> impl Future<Output = bool> + use<> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(frames, Some(tx), Some(tag));
        async move { rx.await.is_ok() }
    }

    fn enqueue(
        &self,
        frames: Vec<Frame>,
        written: Option<oneshot::Sender<()>>,
        tag: Option<RequestTag>,
    ) {
        let outbound = Outbound {
            frames,
            written,
            tag,
        };
        if self.outbound_tx.send(outbound).is_err() {
            debug!("Connection to {} is shut down, dropping frames", self.url);
        }
    }

    /// Liveness signal. The receiver always holds the latest value.
    #[must_use]
    pub fn liveness(&self) -> watch::Receiver<bool> {
        self.live_rx.clone()
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        *self.live_rx.borrow()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Stop reconnecting and close the socket.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, PartialEq, Eq)]
enum PumpOutcome {
    Closed,
    Shutdown,
}

struct Driver {
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
    outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    state_tx: watch::Sender<ConnectionState>,
    live_tx: watch::Sender<bool>,
    shutdown: CancellationToken,
    queue: VecDeque<Outbound>,
    queued_frames: usize,
}

impl Driver {
    async fn run(mut self) {
        loop {
            self.set_state(ConnectionState::Connecting);
            debug!("Connecting to {}", self.config.url);

            let attempt = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                result = self.transport.connect(&self.config.url) => result,
            };

            match attempt {
                Ok(socket) => {
                    info!("Connected to {}", self.config.url);
                    self.set_state(ConnectionState::Connected);
                    let _ = self.events_tx.send(ConnectionEvent::Opened);

                    let outcome = self.pump(socket).await;

                    self.set_state(ConnectionState::Disconnected);
                    let _ = self.events_tx.send(ConnectionEvent::Closed);
                    if outcome == PumpOutcome::Shutdown {
                        break;
                    }
                    info!("Disconnected from {}", self.config.url);
                }
                Err(e) => {
                    warn!("Failed to connect to {}: {e}", self.config.url);
                    self.set_state(ConnectionState::Disconnected);
                }
            }

            if !self.wait_before_reconnect().await {
                break;
            }
        }

        self.set_state(ConnectionState::Disconnected);
        debug!("Connection driver for {} stopped", self.config.url);
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });

        let live = state.is_connected();
        self.live_tx.send_if_modified(|current| {
            if *current == live {
                return false;
            }
            *current = live;
            true
        });
    }

    async fn pump(&mut self, socket: Socket) -> PumpOutcome {
        let Socket { mut sink, mut stream } = socket;

        while let Some(outbound) = self.queue.pop_front() {
            self.queued_frames -= outbound.frames.len();
            if let Err(e) = write(&mut sink, outbound, &self.events_tx).await {
                warn!("Failed to flush queued frames: {e}");
                return PumpOutcome::Closed;
            }
        }

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {
                    let _ = sink.close().await;
                    return PumpOutcome::Shutdown;
                }
                incoming = stream.next() => match incoming {
                    Some(Ok(frame)) => {
                        let _ = self.events_tx.send(ConnectionEvent::Frame(frame));
                    }
                    Some(Err(e)) => {
                        warn!("Socket error on {}: {e}", self.config.url);
                        return PumpOutcome::Closed;
                    }
                    None => {
                        debug!("Socket closed by peer");
                        return PumpOutcome::Closed;
                    }
                },
                outbound = self.outbound_rx.recv() => {
                    let Some(outbound) = outbound else {
                        let _ = sink.close().await;
                        return PumpOutcome::Shutdown;
                    };
                    if let Err(e) = write(&mut sink, outbound, &self.events_tx).await {
                        warn!("Failed to write to {}: {e}", self.config.url);
                        return PumpOutcome::Closed;
                    }
                }
            }
        }
    }

    /// Sleep for the reconnect delay, queueing outbound frames meanwhile.
    ///
    /// Returns `false` if the connection was shut down while waiting.
    async fn wait_before_reconnect(&mut self) -> bool {
        let sleep = tokio::time::sleep(self.config.reconnect_delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return false,
                () = &mut sleep => return true,
                outbound = self.outbound_rx.recv() => match outbound {
                    Some(outbound) => self.hold(outbound),
                    None => return false,
                },
            }
        }
    }

    fn hold(&mut self, outbound: Outbound) {
        self.queued_frames += outbound.frames.len();
        self.queue.push_back(outbound);

        while self.queued_frames > self.config.max_queued_frames && self.queue.len() > 1 {
            let Some(dropped) = self.queue.pop_front() else {
                break;
            };
            self.queued_frames -= dropped.frames.len();
            warn!(
                "Outbound queue full, dropped {} frame(s) for {}",
                dropped.frames.len(),
                self.config.url
            );
            if let Some(tag) = dropped.tag
                && !tag.settled.is_cancelled()
            {
                let _ = self.events_tx.send(ConnectionEvent::Dropped(tag.id));
            }
        }
    }
}

/// Write one batch, reporting tagged batches to the event channel.
async fn write(
    sink: &mut FrameSink,
    outbound: Outbound,
    events: &mpsc::UnboundedSender<ConnectionEvent>,
) -> Result<(), TransportError> {
    let Outbound {
        frames,
        written,
        tag,
    } = outbound;

    if let Some(tag) = &tag
        && tag.settled.is_cancelled()
    {
        debug!("Skipping {} frame(s) for settled request {}", frames.len(), tag.id);
        return Ok(());
    }

    let result = write_frames(sink, frames).await;
    if let Some(tag) = tag {
        let _ = events.send(ConnectionEvent::Written(tag.id));
    }
    result?;

    if let Some(written) = written {
        let _ = written.send(());
    }
    Ok(())
}

async fn write_frames(sink: &mut FrameSink, frames: Vec<Frame>) -> Result<(), TransportError> {
    for frame in frames {
        sink.feed(frame).await?;
    }
    sink.flush().await
}
