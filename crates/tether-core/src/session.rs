//! Session context handed to UI collaborators.
//!
//! A [`Session`] owns the RPC client, the event bus and the display cache.
//! It republishes liveness changes on the bus so features that only know
//! about the bus can follow the connection.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tether_rpc::{ClientError, RpcClient};
use tether_types::NotificationLevel;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::Result;
use crate::bus::{AppEvent, EventBus};
use crate::cache::DisplayCache;
use crate::config::{Config, Directories};

pub struct Session {
    client: RpcClient,
    bus: EventBus,
    cache: Arc<Mutex<DisplayCache>>,
    cache_path: Option<PathBuf>,
    bridge: JoinHandle<()>,
}

impl Session {
    /// Connect to the configured server and load the display cache.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the display cache file exists but cannot be read.
    pub fn start(config: &Config, dirs: &Directories) -> Result<Self> {
        let (cache, cache_path) = if config.cache.enabled {
            let path = dirs.display_cache.clone();
            (DisplayCache::load(&path)?, Some(path))
        } else {
            (DisplayCache::new(), None)
        };

        info!("Starting session for {}", config.connection.url);
        let client = RpcClient::connect(config.client_config());
        Ok(Self::new(client, EventBus::new(), cache, cache_path))
    }

    /// Assemble a session from parts.
    ///
    /// `cache_path` is where [`save_cache`](Self::save_cache) writes; `None`
    /// keeps the cache in memory only.
    #[must_use]
    pub fn new(
        client: RpcClient,
        bus: EventBus,
        cache: DisplayCache,
        cache_path: Option<PathBuf>,
    ) -> Self {
        let bridge = tokio::spawn(bridge_liveness(client.liveness(), bus.clone()));
        Self {
            client,
            bus,
            cache: Arc::new(Mutex::new(cache)),
            cache_path,
            bridge,
        }
    }

    #[must_use]
    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn cache(&self) -> MutexGuard<'_, DisplayCache> {
        self.cache.lock()
    }

    /// Show a failed request to the user.
    ///
    /// Cancellation is not an error from the user's point of view and is not
    /// reported. Returns whether a notification was published.
    pub fn report_error(&self, error: &ClientError) -> bool {
        if error.is_canceled() {
            return false;
        }
        let level = match error {
            ClientError::ConnectionClosed | ClientError::QueueFull | ClientError::Timeout => {
                NotificationLevel::Warning
            }
            _ => NotificationLevel::Error,
        };
        self.bus.notify_user(level, error.to_string());
        true
    }

    /// Write the display cache if it changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache file cannot be written.
    pub fn save_cache(&self) -> Result<()> {
        match &self.cache_path {
            Some(path) => self.cache.lock().save(path),
            None => Ok(()),
        }
    }

    /// Save the cache and close the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache file cannot be written; the connection
    /// is closed either way.
    pub fn shutdown(self) -> Result<()> {
        self.client.shutdown();
        self.save_cache()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.bridge.abort();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("client", &self.client)
            .field("bus", &self.bus)
            .field("cache_path", &self.cache_path)
            .finish_non_exhaustive()
    }
}

async fn bridge_liveness(mut live: watch::Receiver<bool>, bus: EventBus) {
    while live.changed().await.is_ok() {
        let connected = *live.borrow_and_update();
        debug!("Connection status changed: connected={connected}");
        bus.publish_event(&AppEvent::ConnectionStatus { connected });
    }
}
