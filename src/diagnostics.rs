//! Link and dispatch counters plus runtime diagnostics.
//!
//! The session and dispatcher keep plain counters; the keepalive task
//! folds them into one log line together with a [`RuntimeMetrics`]
//! snapshot (heap, RSSI, uptime).

use core::fmt;

/// Transport session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Successful channel establishments (initial + reconnects).
    pub connects: u32,
    /// Reconnects triggered by a failed read or write.
    pub reconnects: u32,
    /// Operations that ended in `TransportError::Fatal`.
    pub fatal_errors: u32,
    pub datagrams_sent: u32,
    pub datagrams_received: u32,
}

impl fmt::Display for LinkStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "connects={} reconnects={} fatal={} tx={} rx={}",
            self.connects,
            self.reconnects,
            self.fatal_errors,
            self.datagrams_sent,
            self.datagrams_received
        )
    }
}

/// Dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub packets: u32,
    pub liveness: u32,
    pub duplicates: u32,
    /// Sub-payloads the handler accepted.
    pub delivered: u32,
    /// Sub-payloads the handler rejected (logged and skipped).
    pub rejected: u32,
    /// Packets that matched no registered observation.
    pub uncorrelated: u32,
}

impl fmt::Display for DispatchStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "packets={} ok-acks={} dup={} delivered={} rejected={} uncorrelated={}",
            self.packets,
            self.liveness,
            self.duplicates,
            self.delivered,
            self.rejected,
            self.uncorrelated
        )
    }
}

/// Runtime diagnostics snapshot collected on demand.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeMetrics {
    pub uptime_secs: u64,
    pub heap_free: u32,
    pub heap_min_free: u32,
    pub wifi_rssi: i8,
}

impl RuntimeMetrics {
    #[cfg(target_os = "espidf")]
    pub fn collect(uptime_secs: u64) -> Self {
        use esp_idf_svc::sys::{esp_get_free_heap_size, esp_get_minimum_free_heap_size};
        // SAFETY: plain reads of allocator counters.
        let heap_free = unsafe { esp_get_free_heap_size() };
        let heap_min_free = unsafe { esp_get_minimum_free_heap_size() };

        Self {
            uptime_secs,
            heap_free,
            heap_min_free,
            wifi_rssi: Self::read_wifi_rssi(),
        }
    }

    #[cfg(target_os = "espidf")]
    fn read_wifi_rssi() -> i8 {
        use esp_idf_svc::sys::{ESP_OK, esp_wifi_sta_get_ap_info, wifi_ap_record_t};
        let mut ap_info: wifi_ap_record_t = unsafe { core::mem::zeroed() };
        let ret = unsafe { esp_wifi_sta_get_ap_info(&mut ap_info) };
        if ret == ESP_OK { ap_info.rssi } else { 0 }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn collect(uptime_secs: u64) -> Self {
        // Synthetic values so the simulation walks the same logging path.
        Self {
            uptime_secs,
            heap_free: 200 * 1024,
            heap_min_free: 170 * 1024,
            wifi_rssi: -60,
        }
    }
}

impl fmt::Display for RuntimeMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "uptime={}s heap={}B (min {}B) rssi={}dBm",
            self.uptime_secs, self.heap_free, self.heap_min_free, self.wifi_rssi
        )
    }
}

// ───────────────────────────────────────────────────────────────
// Panic hook
// ───────────────────────────────────────────────────────────────

/// Install a panic hook that logs the reason before the default handler
/// aborts (and the task watchdog or panic handler resets the chip).
pub fn install_panic_handler() {
    std::panic::set_hook(Box::new(|info| {
        let reason = if let Some(msg) = info.payload().downcast_ref::<&str>() {
            *msg
        } else if let Some(msg) = info.payload().downcast_ref::<String>() {
            msg.as_str()
        } else {
            "unknown panic"
        };
        match info.location() {
            Some(loc) => log::error!("PANIC: {} at {}:{}", reason, loc.file(), loc.line()),
            None => log::error!("PANIC: {}", reason),
        }
    }));
}
