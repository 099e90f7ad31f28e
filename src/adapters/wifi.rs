//! WiFi station-mode adapter.
//!
//! Implements [`ConnectivityPort`]: joins the configured access point once
//! at start-up, before the LightDB session is opened.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_idf_svc::wifi::BlockingWifi` over
//!   `EspWifi`, waiting for the netif to come up.
//! - **all other targets**: deterministic simulation for host-side tests.
//!
//! ## Retry policy
//!
//! A failed association is retried with exponential backoff (2 s → 4 s →
//! 8 s … capped at 60 s) up to `max_attempts` times.

use log::{error, info, warn};

use crate::app::ports::{ConnectivityError, ConnectivityPort};

#[cfg(target_os = "espidf")]
use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};

const INITIAL_BACKOFF_SECS: u32 = 2;
const MAX_BACKOFF_SECS: u32 = 60;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

// ───────────────────────────────────────────────────────────────
// Validation
// ───────────────────────────────────────────────────────────────

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

pub fn validate_ssid(ssid: &str) -> Result<(), ConnectivityError> {
    if ssid.is_empty() || ssid.len() > 32 || !is_printable_ascii(ssid) {
        return Err(ConnectivityError::InvalidSsid);
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), ConnectivityError> {
    if password.is_empty() {
        return Ok(());
    }
    if password.len() < 8 || password.len() > 64 {
        return Err(ConnectivityError::InvalidPassword);
    }
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// WiFi adapter
// ───────────────────────────────────────────────────────────────

pub struct WifiAdapter {
    associated: bool,
    max_attempts: u32,
    attempts: u32,
    #[cfg(target_os = "espidf")]
    wifi: BlockingWifi<EspWifi<'static>>,
    /// Simulation: number of upcoming attempts that fail.
    #[cfg(not(target_os = "espidf"))]
    sim_failures: u32,
}

impl WifiAdapter {
    #[cfg(target_os = "espidf")]
    pub fn new(wifi: BlockingWifi<EspWifi<'static>>, max_attempts: u32) -> Self {
        Self {
            associated: false,
            max_attempts: max_attempts.max(1),
            attempts: 0,
            wifi,
        }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            associated: false,
            max_attempts: max_attempts.max(1),
            attempts: 0,
            sim_failures: 0,
        }
    }

    /// Simulation: make the next `n` association attempts fail.
    #[cfg(not(target_os = "espidf"))]
    pub fn fail_next(&mut self, n: u32) {
        self.sim_failures = n;
    }

    /// Association attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn rssi(&self) -> Option<i8> {
        if !self.associated {
            return None;
        }
        self.platform_rssi()
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_associate(&mut self, ssid: &str, password: &str) -> Result<(), ConnectivityError> {
        let auth_method = if password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        let config = Configuration::Client(ClientConfiguration {
            ssid: ssid.try_into().map_err(|_| ConnectivityError::InvalidSsid)?,
            password: password
                .try_into()
                .map_err(|_| ConnectivityError::InvalidPassword)?,
            auth_method,
            ..Default::default()
        });

        let fail = |e: esp_idf_svc::sys::EspError| {
            warn!("WiFi(espidf): {}", e);
            ConnectivityError::ConnectionFailed
        };
        self.wifi.set_configuration(&config).map_err(fail)?;
        if !self.wifi.is_started().map_err(fail)? {
            self.wifi.start().map_err(fail)?;
        }
        self.wifi.connect().map_err(fail)?;
        self.wifi.wait_netif_up().map_err(fail)?;

        if let Ok(ip) = self.wifi.wifi().sta_netif().get_ip_info() {
            info!("WiFi(espidf): got address {}", ip.ip);
        }
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_associate(&mut self, ssid: &str, _password: &str) -> Result<(), ConnectivityError> {
        if self.sim_failures > 0 {
            self.sim_failures -= 1;
            warn!("WiFi(sim): simulated association failure (attempt {})", self.attempts);
            return Err(ConnectivityError::ConnectionFailed);
        }
        info!("WiFi(sim): associated with '{}' (attempt {})", ssid, self.attempts);
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_backoff(&self, secs: u32) {
        std::thread::sleep(std::time::Duration::from_secs(u64::from(secs)));
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_backoff(&self, _secs: u32) {}

    #[cfg(target_os = "espidf")]
    fn platform_rssi(&self) -> Option<i8> {
        let mut ap_info = esp_idf_svc::sys::wifi_ap_record_t::default();
        // SAFETY: ap_info is a valid out-parameter; the driver is started.
        let rc = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut ap_info) };
        (rc == esp_idf_svc::sys::ESP_OK).then_some(ap_info.rssi)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_rssi(&self) -> Option<i8> {
        // Oscillates between -66 and -55 with the attempt count.
        let oscillation = ((self.attempts % 12) as i8) - 6;
        Some(-60_i8.saturating_add(oscillation))
    }
}

// ───────────────────────────────────────────────────────────────
// ConnectivityPort
// ───────────────────────────────────────────────────────────────

impl ConnectivityPort for WifiAdapter {
    fn is_associated(&self) -> bool {
        self.associated
    }

    fn associate(&mut self, ssid: &str, password: &str) -> Result<(), ConnectivityError> {
        validate_ssid(ssid)?;
        validate_password(password)?;

        info!("WiFi: joining '{}'", ssid);
        let mut backoff = INITIAL_BACKOFF_SECS;
        for attempt in 1..=self.max_attempts {
            self.attempts += 1;
            match self.platform_associate(ssid, password) {
                Ok(()) => {
                    self.associated = true;
                    info!("WiFi: associated (RSSI={:?})", self.rssi());
                    return Ok(());
                }
                Err(e) if attempt < self.max_attempts => {
                    warn!("WiFi: attempt {} failed ({}), retrying in {}s", attempt, e, backoff);
                    self.platform_backoff(backoff);
                    backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
                }
                Err(e) => {
                    error!("WiFi: giving up after {} attempts ({})", attempt, e);
                    return Err(e);
                }
            }
        }
        Err(ConnectivityError::ConnectionFailed)
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
