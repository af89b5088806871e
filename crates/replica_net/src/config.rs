//! # Replication Configuration
//!
//! Tunables for the net instance and the UDP transport, loadable from TOML:
//!
//! ```toml
//! max_connections = 8
//! update_policy = "on_change"
//!
//! [udp]
//! resend_timeout_ms = 80
//! connection_timeout_ms = 3000
//! ```
//!
//! Every field has a default, so an empty file is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NetError, NetResult};

/// When the server sends `PropertyUpdate` messages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    /// Send every replicated entity's full state to every client each tick.
    #[default]
    EveryTick,
    /// Skip a client's update when the serialized state is byte-identical to
    /// the last one sent to that client.
    OnChange,
}

/// Net instance configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Connection slots the server transport offers.
    pub max_connections: usize,
    /// Replication send policy.
    pub update_policy: UpdatePolicy,
    /// Send `CreateEntity` for every replicated entity to newly connected clients.
    pub sync_on_connect: bool,
    /// Drop server RPCs from clients that do not own the target entity.
    pub require_rpc_ownership: bool,
    /// UDP transport tunables.
    pub udp: UdpConfig,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            max_connections: 32,
            update_policy: UpdatePolicy::EveryTick,
            sync_on_connect: true,
            require_rpc_ownership: false,
            udp: UdpConfig::default(),
        }
    }
}

impl NetConfig {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Fails on malformed TOML or unknown enum values.
    pub fn from_toml_str(text: &str) -> NetResult<Self> {
        toml::from_str(text).map_err(|e| NetError::Config(e.to_string()))
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> NetResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

/// Reliable UDP transport tunables. All times in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    /// Resend an unacknowledged message after this long.
    pub resend_timeout_ms: u64,
    /// Send a keep-alive when nothing else was sent for this long.
    pub heartbeat_interval_ms: u64,
    /// Drop a peer that has been silent this long.
    pub connection_timeout_ms: u64,
    /// Interval between client connect attempts.
    pub connect_retry_ms: u64,
    /// Give up connecting after this long.
    pub connect_timeout_ms: u64,
    /// Maximum unacknowledged messages per peer; further sends queue locally.
    pub max_in_flight: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            resend_timeout_ms: 100,
            heartbeat_interval_ms: 250,
            connection_timeout_ms: 5_000,
            connect_retry_ms: 200,
            connect_timeout_ms: 5_000,
            max_in_flight: 512,
        }
    }
}

impl UdpConfig {
    /// Resend timeout as a duration.
    #[must_use]
    pub const fn resend_timeout(&self) -> Duration {
        Duration::from_millis(self.resend_timeout_ms)
    }

    /// Heartbeat interval as a duration.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Connection timeout as a duration.
    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Connect retry interval as a duration.
    #[must_use]
    pub const fn connect_retry(&self) -> Duration {
        Duration::from_millis(self.connect_retry_ms)
    }

    /// Connect timeout as a duration.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
