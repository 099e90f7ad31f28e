//! Port traits — the boundary between the client core and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ TransportSession / MessageDispatcher / DeviceTasks
//! ```
//!
//! Driven adapters (DTLS socket, LEDs, watchdog, Wi-Fi, NVS, clock)
//! implement these traits.  The client core consumes them via generics, so
//! it never touches ESP-IDF directly and runs unchanged against the host
//! simulations and the test mocks.

use core::fmt;
use core::time::Duration;
use std::collections::BTreeMap;
use std::net::SocketAddr;

use crate::client::dispatcher::{Notification, PacketMeta};
use crate::config::{ClientConfig, PskCredentials};
use crate::error::{ChannelError, ConfigError, ProtocolError};
use crate::scheduler::TaskKind;

// ───────────────────────────────────────────────────────────────
// Secure channel (driven adapter: session ↔ DTLS socket)
// ───────────────────────────────────────────────────────────────

/// Datagram-oriented encrypted transport.
///
/// One `write` is one datagram and one `read` returns at most one
/// datagram.  The channel is connected to a single remote, so the sender
/// of every datagram it yields is that remote.
pub trait SecureChannel {
    /// Open a fresh channel (socket + handshake).  Any previous channel
    /// state has already been released by the caller.
    fn connect(&mut self, remote: SocketAddr, credentials: &PskCredentials)
    -> Result<(), ChannelError>;

    /// Send one datagram.  Returns the number of bytes accepted.
    fn write(&mut self, datagram: &[u8]) -> Result<usize, ChannelError>;

    /// Receive one datagram, waiting at most `timeout`.
    /// `Ok(0)` means nothing arrived; a zero timeout never blocks.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ChannelError>;

    /// Release the socket and security context.  Safe to call repeatedly.
    fn close(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Message handler (driving adapter: dispatcher → application)
// ───────────────────────────────────────────────────────────────

/// Application callback invoked by the dispatcher, supplied at
/// construction.
pub trait MessageHandler {
    /// One sub-payload of an inbound packet.
    ///
    /// Returning an error marks the fragment as rejected; the dispatcher
    /// logs it and continues with the rest of the batch.
    fn on_message(&mut self, notification: &Notification<'_>) -> Result<(), ProtocolError>;

    /// A liveness acknowledgement, delivered only under
    /// [`LivenessPolicy::Notify`](crate::config::LivenessPolicy::Notify).
    /// Carries no resource path and no payload.
    fn on_liveness(&mut self, _meta: &PacketMeta, _sender: SocketAddr) {}
}

// ───────────────────────────────────────────────────────────────
// Content decoder (application layer)
// ───────────────────────────────────────────────────────────────

/// Decoded output state: key → on/off.
pub type StateMap = BTreeMap<String, bool>;

/// Turns an encoded sub-payload into a key → bool mapping.
pub trait StateDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<StateMap, ProtocolError>;
}

// ───────────────────────────────────────────────────────────────
// Output port (driven adapter: application → GPIO)
// ───────────────────────────────────────────────────────────────

/// Indexed boolean outputs (LEDs, relays).
pub trait OutputPort {
    /// Number of addressable outputs; valid indices are `0..count`.
    fn output_count(&self) -> usize;

    /// Drive output `index` to the logical `on` state.
    fn set_output(&mut self, index: usize, on: bool);

    /// Drive every output to logical off.
    fn all_off(&mut self) {
        for i in 0..self.output_count() {
            self.set_output(i, false);
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Watchdog port
// ───────────────────────────────────────────────────────────────

/// Hardware watchdog.  Must be fed more often than its timeout.
pub trait WatchdogPort {
    fn feed(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Connectivity port (start-up only)
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityError {
    InvalidSsid,
    InvalidPassword,
    ConnectionFailed,
}

impl fmt::Display for ConnectivityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSsid => write!(f, "SSID invalid (must be 1-32 printable ASCII bytes)"),
            Self::InvalidPassword => write!(
                f,
                "password invalid (must be 8-64 bytes for WPA2, or empty for open)"
            ),
            Self::ConnectionFailed => write!(f, "WiFi association failed"),
        }
    }
}

impl std::error::Error for ConnectivityError {}

/// Network association, consulted once before the client starts.
pub trait ConnectivityPort {
    fn is_associated(&self) -> bool;

    /// Join `ssid`.  An empty password selects an open network.
    fn associate(&mut self, ssid: &str, password: &str) -> Result<(), ConnectivityError>;
}

// ───────────────────────────────────────────────────────────────
// Configuration port
// ───────────────────────────────────────────────────────────────

/// Loads and persists the client configuration.
///
/// Implementations MUST validate before persisting; invalid ranges are
/// rejected with [`ConfigError::ValidationFailed`], never clamped.
pub trait ConfigPort {
    /// Stored configuration, or `ConfigError::NotFound` on first boot.
    fn load(&self) -> Result<ClientConfig, ConfigError>;

    fn save(&self, config: &ClientConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Scheduler delegate (decouples the scheduler from the task bodies)
// ───────────────────────────────────────────────────────────────

/// Callback the [`Scheduler`](crate::scheduler::Scheduler) invokes for
/// every due task.
///
/// The body runs to completion before the scheduler looks at the next
/// task; nothing else can observe it half-done.
pub trait SchedulerDelegate {
    fn on_task_due(&mut self, kind: TaskKind, now_ms: u64);
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic milliseconds since an arbitrary epoch (boot).
pub trait Clock {
    fn now_ms(&self) -> u64;
}
