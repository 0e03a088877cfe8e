use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tether_rpc::ClientConfig;

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionSettings,

    #[serde(default)]
    pub upload: UploadSettings,

    #[serde(default)]
    pub channels: ChannelSettings,

    #[serde(default)]
    pub cache: CacheSettings,
}

impl Config {
    /// Load config from file, falling back to defaults when it is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        super::validation::warn_unknown_fields(&content, "config.json");
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save config to file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Settings for the RPC client.
    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.connection.url.clone());
        config.reconnect_delay = Duration::from_millis(self.connection.reconnect_delay_ms);
        config.max_queued_frames = self.connection.max_queued_frames;
        config.chunk_size = self.upload.chunk_size;
        config.binary_method.clone_from(&self.channels.binary_method);
        config.progress_method.clone_from(&self.channels.progress_method);
        config
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSettings {
    /// Server base URL (`http`, `https`, `ws` or `wss`)
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Frames held while disconnected before the oldest are dropped
    #[serde(default = "default_max_queued_frames")]
    pub max_queued_frames: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            url: default_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_queued_frames: default_max_queued_frames(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSettings {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSettings {
    /// Method that binary frames are published under
    #[serde(default = "default_binary_method")]
    pub binary_method: String,

    #[serde(default = "default_progress_method")]
    pub progress_method: String,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            binary_method: default_binary_method(),
            progress_method: default_progress_method(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_max_queued_frames() -> usize {
    tether_rpc::connection::DEFAULT_MAX_QUEUED_FRAMES
}

fn default_chunk_size() -> usize {
    tether_rpc::DEFAULT_CHUNK_SIZE
}

fn default_binary_method() -> String {
    tether_rpc::BINARY_METHOD.to_string()
}

fn default_progress_method() -> String {
    tether_rpc::PROGRESS_METHOD.to_string()
}

fn default_true() -> bool {
    true
}
