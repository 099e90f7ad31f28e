//! Client configuration parameters
//!
//! All tunable parameters for the LightDB node.
//! Values are loaded from NVS, fall back to build-time environment
//! variables, and finally to the defaults below.

use std::net::{SocketAddr, ToSocketAddrs};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Maximum PSK identity / key length (bytes).
pub const MAX_PSK_LEN: usize = 64;

/// Default CoAP-over-DTLS port.
pub const DEFAULT_PORT: u16 = 5684;

/// What the dispatcher does with the reserved `OK` liveness payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LivenessPolicy {
    /// Swallow it; the application handler never sees it.
    Suppress,
    /// Call the handler's `on_liveness` hook (no path, no payload).
    Notify,
}

/// Top-level reaction once the transport session turns fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryPolicy {
    /// Keepalive restarts the session on its next run.
    Restart,
    /// Stop feeding the watchdog and let the hardware reset the device.
    WatchdogReset,
}

/// Pre-shared key material presented during the DTLS handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PskCredentials {
    pub identity: heapless::String<MAX_PSK_LEN>,
    pub key: heapless::Vec<u8, MAX_PSK_LEN>,
}

/// Core client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    // --- Endpoint ---
    /// Server host name or IP literal
    pub host: heapless::String<64>,
    /// Server DTLS port
    pub port: u16,
    /// PSK identity
    pub psk_identity: heapless::String<MAX_PSK_LEN>,
    /// PSK secret
    pub psk: heapless::String<MAX_PSK_LEN>,

    // --- Network association ---
    pub wifi_ssid: heapless::String<32>,
    pub wifi_password: heapless::String<64>,

    // --- Task periods ---
    /// Liveness probe interval (milliseconds)
    pub keepalive_period_ms: u32,
    /// Inbound drain interval (milliseconds)
    pub poll_period_ms: u32,
    /// Counter publish interval (milliseconds)
    pub telemetry_period_ms: u32,
    /// Watchdog feed interval (milliseconds), at most half the timeout
    pub watchdog_feed_period_ms: u32,

    // --- Timeouts ---
    /// Hardware watchdog timeout (milliseconds)
    pub watchdog_timeout_ms: u32,
    /// DTLS handshake budget (milliseconds)
    pub handshake_timeout_ms: u32,
    /// Per-read wait; 0 makes the poll drain non-blocking
    pub read_timeout_ms: u32,

    // --- Resources ---
    /// LightDB key the telemetry counter is written to
    pub telemetry_key: heapless::String<32>,
    /// LightDB key observed for output state
    pub observe_key: heapless::String<32>,
    /// Also observe the `.u/desired` update stream
    pub observe_desired: bool,

    // --- Policies ---
    pub liveness_policy: LivenessPolicy,
    pub recovery: RecoveryPolicy,
    /// Consecutive fatal task results tolerated before the watchdog is starved
    pub max_fatal_streak: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            // Endpoint (must be provisioned)
            host: heapless::String::new(),
            port: DEFAULT_PORT,
            psk_identity: heapless::String::new(),
            psk: heapless::String::new(),

            wifi_ssid: heapless::String::new(),
            wifi_password: heapless::String::new(),

            // Periods
            keepalive_period_ms: 10_000,
            poll_period_ms: 500,
            telemetry_period_ms: 5_000,
            watchdog_feed_period_ms: 4_000,

            // Timeouts
            watchdog_timeout_ms: 10_000,
            handshake_timeout_ms: 5_000,
            read_timeout_ms: 0,

            telemetry_key: str_field("counter"),
            observe_key: str_field("led"),
            observe_desired: false,

            liveness_policy: LivenessPolicy::Suppress,
            recovery: RecoveryPolicy::Restart,
            max_fatal_streak: 5,
        }
    }
}

fn str_field<const N: usize>(s: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    let _ = out.push_str(s);
    out
}

/// Overwrite an empty field with `value`; oversized values are ignored.
fn fill_if_empty<const N: usize>(field: &mut heapless::String<N>, value: Option<&str>, name: &str) {
    let Some(value) = value else { return };
    if !field.is_empty() {
        return;
    }
    if field.push_str(value).is_err() {
        warn!("Config: build-time {} exceeds {} bytes, ignored", name, N);
        field.clear();
    }
}

impl ClientConfig {
    /// Fill unset endpoint, credential and Wi-Fi fields from the
    /// `LIGHTDB_*` variables captured at build time.
    pub fn with_build_env(mut self) -> Self {
        fill_if_empty(&mut self.host, option_env!("LIGHTDB_HOST"), "LIGHTDB_HOST");
        fill_if_empty(&mut self.psk_identity, option_env!("LIGHTDB_PSK_ID"), "LIGHTDB_PSK_ID");
        fill_if_empty(&mut self.psk, option_env!("LIGHTDB_PSK"), "LIGHTDB_PSK");
        fill_if_empty(&mut self.wifi_ssid, option_env!("LIGHTDB_WIFI_SSID"), "LIGHTDB_WIFI_SSID");
        fill_if_empty(&mut self.wifi_password, option_env!("LIGHTDB_WIFI_PASS"), "LIGHTDB_WIFI_PASS");
        if let Some(port) = option_env!("LIGHTDB_PORT").and_then(|p| p.parse().ok()) {
            self.port = port;
        }
        self
    }

    /// Range-check every field.  Must pass before any task starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::ValidationFailed("host must be set"));
        }
        if self.port == 0 {
            return Err(ConfigError::ValidationFailed("port must be non-zero"));
        }
        if self.psk_identity.is_empty() {
            return Err(ConfigError::ValidationFailed("psk_identity must be set"));
        }
        if self.psk.is_empty() {
            return Err(ConfigError::ValidationFailed("psk must be set"));
        }
        if !(1_000..=600_000).contains(&self.keepalive_period_ms) {
            return Err(ConfigError::ValidationFailed(
                "keepalive_period_ms must be 1000–600000",
            ));
        }
        if !(10..=60_000).contains(&self.poll_period_ms) {
            return Err(ConfigError::ValidationFailed("poll_period_ms must be 10–60000"));
        }
        if !(100..=3_600_000).contains(&self.telemetry_period_ms) {
            return Err(ConfigError::ValidationFailed(
                "telemetry_period_ms must be 100–3600000",
            ));
        }
        if !(1_000..=60_000).contains(&self.watchdog_timeout_ms) {
            return Err(ConfigError::ValidationFailed(
                "watchdog_timeout_ms must be 1000–60000",
            ));
        }
        if self.watchdog_feed_period_ms == 0
            || self.watchdog_feed_period_ms > self.watchdog_timeout_ms / 2
        {
            return Err(ConfigError::ValidationFailed(
                "watchdog_feed_period_ms must be 1..=watchdog_timeout_ms/2",
            ));
        }
        if !(100..=30_000).contains(&self.handshake_timeout_ms) {
            return Err(ConfigError::ValidationFailed(
                "handshake_timeout_ms must be 100–30000",
            ));
        }
        if self.read_timeout_ms >= self.poll_period_ms {
            return Err(ConfigError::ValidationFailed(
                "read_timeout_ms must be below poll_period_ms",
            ));
        }
        if self.telemetry_key.is_empty() || self.observe_key.is_empty() {
            return Err(ConfigError::ValidationFailed("resource keys must be set"));
        }
        if self.max_fatal_streak == 0 {
            return Err(ConfigError::ValidationFailed("max_fatal_streak must be >= 1"));
        }
        Ok(())
    }

    /// Resolve `host:port`, preferring an IPv4 address.
    pub fn remote_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|_| ConfigError::UnresolvableHost)?
            .collect();
        addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or(ConfigError::UnresolvableHost)
    }

    /// PSK material for the secure channel.
    pub fn credentials(&self) -> PskCredentials {
        let mut key = heapless::Vec::new();
        // Both buffers are MAX_PSK_LEN, so this cannot overflow.
        let _ = key.extend_from_slice(self.psk.as_bytes());
        PskCredentials {
            identity: self.psk_identity.clone(),
            key,
        }
    }
}
