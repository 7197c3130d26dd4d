//! Server configuration.
//!
//! Loads from JSON strings/files (file IO left to the binary). Every field
//! has a default so a bare `{}` is a runnable development config.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::packet::{handshake_key, DEFAULT_APP_IDENT, DEFAULT_PORT, DISCOVERY_PORT};

/// Root server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Human-facing server name, advertised in discovery responses.
    #[serde(default = "default_name")]
    pub server_name: String,
    #[serde(default = "default_description")]
    pub server_description: String,
    /// Content/data version tag, advertised in discovery responses.
    #[serde(default = "default_data_version")]
    pub data_version: String,
    /// Primary game socket port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Discovery responder port.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Hard cap on concurrently connected peers.
    #[serde(default = "default_max_players")]
    pub max_players: u32,
    /// Application identifier half of the handshake key.
    #[serde(default = "default_app_identifier")]
    pub app_identifier: String,
    /// External login service. `None` switches to client-generated identity.
    #[serde(default)]
    pub login_url: Option<String>,
    /// Tick rate while at least one region is active.
    #[serde(default = "default_busy_hz")]
    pub busy_hz: u32,
    /// Tick rate while no region is active.
    #[serde(default = "default_idle_hz")]
    pub idle_hz: u32,
    /// Threshold for the "running slow" warning. `None` derives the
    /// busy-rate budget.
    #[serde(default)]
    pub slow_tick_warning_ms: Option<u64>,
}

fn default_name() -> String {
    "Starlane Server".to_string()
}

fn default_description() -> String {
    "An unconfigured Starlane server.".to_string()
}

fn default_data_version() -> String {
    "dev".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_discovery_port() -> u16 {
    DISCOVERY_PORT
}

fn default_max_players() -> u32 {
    200
}

fn default_app_identifier() -> String {
    DEFAULT_APP_IDENT.to_string()
}

fn default_busy_hz() -> u32 {
    60
}

fn default_idle_hz() -> u32 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty config must deserialize")
    }
}

impl ServerConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// The handshake key connecting peers must present.
    pub fn expected_key(&self) -> String {
        handshake_key(&self.app_identifier)
    }

    pub fn busy_timestep(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.busy_hz.max(1)))
    }

    pub fn idle_timestep(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.idle_hz.max(1)))
    }

    /// The explicit slow-tick threshold, defaulting to the busy-rate budget.
    pub fn slow_tick_budget(&self) -> Duration {
        match self.slow_tick_warning_ms {
            Some(ms) => Duration::from_millis(ms),
            None => self.busy_timestep(),
        }
    }
}
