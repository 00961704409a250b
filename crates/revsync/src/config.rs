//! Engine configuration.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use revsync_sync::SyncConfig;

/// Configuration for the sync engine.
///
/// Every field has a default, so a config file only needs what it changes:
///
/// ```json
/// { "nick": "alice", "ready_poll_interval_ms": 500 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Local analyst name, used as the author of published edits.
    pub nick: String,
    /// How often to poll "analysis complete" on hosts without notifications.
    pub ready_poll_interval_ms: u64,
    /// Bound of the inbound delivery queue.
    pub inbound_capacity: usize,
    /// Bound of the host event queue.
    pub command_capacity: usize,
    /// Bound of the read-only query queue.
    pub query_capacity: usize,
    /// Bound of the outbound publish queue.
    pub publish_capacity: usize,
    /// Publish a `join` message after joining a channel.
    pub announce_join: bool,
    /// Routing configuration.
    pub sync: SyncConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            nick: "anonymous".to_string(),
            ready_poll_interval_ms: 1000,
            inbound_capacity: 1024,
            command_capacity: 256,
            query_capacity: 64,
            publish_capacity: 256,
            announce_join: true,
            sync: SyncConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Default configuration with `nick` as the local analyst.
    pub fn with_nick(nick: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            ..Self::default()
        }
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms.max(1))
    }

    /// Load from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        anyhow::ensure!(!config.nick.trim().is_empty(), "config nick must not be empty");
        Ok(config)
    }
}
