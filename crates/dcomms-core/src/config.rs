//! Orchestrator configuration
//!
//! Defaults match the intervals the desktop client shipped with. An optional
//! `dcomms.json` in the data directory overrides individual fields.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::ChatError;

/// Name of the optional override file inside the data directory
pub const CONFIG_FILE: &str = "dcomms.json";

/// Directory (under the data dir) holding `<name>.chat` files
pub const CHATS_DIR: &str = "chats";

/// Extension of persisted conversation files
pub const CHAT_EXTENSION: &str = "chat";

/// Default peer registry file name (under the data dir)
pub const PEER_REGISTRY_FILE: &str = "registry.db";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Root for conversation files and the default peer registry
    pub data_dir: PathBuf,
    /// Network sync tick
    pub sync_interval_ms: u64,
    /// Local change poll tick
    pub poll_interval_ms: u64,
    /// Connect timeout for a single liveness probe
    pub probe_timeout_ms: u64,
    /// Upper bound on engine teardown at shutdown
    pub shutdown_grace_ms: u64,
    /// Shared peer registry; `<data_dir>/registry.db` when unset
    pub peer_registry: Option<PathBuf>,
    /// Write this node's sync address into the peer registry at startup.
    /// Short-lived processes turn this off so the registry does not fill
    /// with ports nobody listens on.
    pub advertise: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            sync_interval_ms: 500,
            poll_interval_ms: 1000,
            probe_timeout_ms: 300,
            shutdown_grace_ms: 2000,
            peer_registry: None,
            advertise: true,
        }
    }
}

impl OrchestratorConfig {
    /// Defaults rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Defaults rooted at `data_dir`, overlaid with `<data_dir>/dcomms.json`
    /// when that file exists.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::Serialization` if the file is not valid JSON for
    /// this struct, `ChatError::Io` if it exists but cannot be read.
    pub fn load(data_dir: impl AsRef<Path>) -> Result<Self, ChatError> {
        let data_dir = data_dir.as_ref();
        let path = data_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::new(data_dir));
        }

        debug!(?path, "Loading config overrides");
        let raw = std::fs::read_to_string(&path)?;
        let mut config: Self = serde_json::from_str(&raw)?;
        // The file never relocates the directory it lives in
        config.data_dir = data_dir.to_path_buf();
        Ok(config)
    }

    pub fn with_peer_registry(mut self, path: impl Into<PathBuf>) -> Self {
        self.peer_registry = Some(path.into());
        self
    }

    pub fn with_advertise(mut self, advertise: bool) -> Self {
        self.advertise = advertise;
        self
    }

    pub fn with_intervals(mut self, sync: Duration, poll: Duration) -> Self {
        self.sync_interval_ms = sync.as_millis() as u64;
        self.poll_interval_ms = poll.as_millis() as u64;
        self
    }

    pub fn chats_dir(&self) -> PathBuf {
        self.data_dir.join(CHATS_DIR)
    }

    /// Path of the persisted file for conversation `name`
    pub fn chat_file(&self, name: &str) -> PathBuf {
        chat_file_in(&self.data_dir, name)
    }

    pub fn peer_registry_path(&self) -> PathBuf {
        self.peer_registry
            .clone()
            .unwrap_or_else(|| self.data_dir.join(PEER_REGISTRY_FILE))
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// `<data_dir>/chats/<name>.chat`
pub fn chat_file_in(data_dir: &Path, name: &str) -> PathBuf {
    data_dir
        .join(CHATS_DIR)
        .join(format!("{}.{}", name, CHAT_EXTENSION))
}
