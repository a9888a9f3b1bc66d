//! # Server Configuration
//!
//! Static configuration for a network-server instance, deserializable
//! from JSON and buildable through a fluent builder for programmatic
//! wiring.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::lorawan::NetId;

/// Configuration for the network server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The 24-bit network identifier; its low 7 bits prefix every
    /// assigned DevAddr.
    pub net_id: NetId,
    /// Regional band name (e.g. "EU868", "US915").
    pub band: String,
    /// How long to collect duplicate receptions before handling a frame.
    pub deduplication_window_ms: u64,
    /// TTL of node-sessions and MAC-command queues. Must exceed the
    /// longest device reactivation interval; counters are lost with the
    /// session.
    pub session_ttl_secs: u64,
    /// Deadline for the application server's downlink queue poll. The
    /// receive window leaves no room for slow answers.
    pub data_down_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            net_id: NetId::from_bytes([0, 0, 0x01]),
            band: "EU868".to_string(),
            deduplication_window_ms: 200,
            session_ttl_secs: 60 * 60 * 24 * 14, // two weeks
            data_down_timeout_ms: 1000,
        }
    }
}

impl ServerConfig {
    pub fn deduplication_window(&self) -> Duration {
        Duration::from_millis(self.deduplication_window_ms)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn data_down_timeout(&self) -> Duration {
        Duration::from_millis(self.data_down_timeout_ms)
    }
}

/// Builder for [`ServerConfig`] with a fluent API.
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn net_id(mut self, net_id: NetId) -> Self {
        self.config.net_id = net_id;
        self
    }

    pub fn band(mut self, band: &str) -> Self {
        self.config.band = band.to_string();
        self
    }

    pub fn deduplication_window(mut self, window: Duration) -> Self {
        self.config.deduplication_window_ms = window.as_millis() as u64;
        self
    }

    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.config.session_ttl_secs = ttl.as_secs();
        self
    }

    pub fn data_down_timeout(mut self, timeout: Duration) -> Self {
        self.config.data_down_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}
