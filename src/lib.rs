//! LightDB node firmware library.
//!
//! A persistent CoAP-over-DTLS client for LightDB: a resilient transport
//! session, an observation dispatcher, a cooperative task scheduler and
//! the device tasks that tie them to LEDs, the watchdog and telemetry.
//!
//! All ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`
//! within each module; every other target gets simulation backends, so
//! the whole client runs in host tests.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod client;
pub mod coap;
pub mod config;
pub mod diagnostics;
pub mod drivers;
pub mod error;
pub mod runtime;
pub mod scheduler;
pub mod tasks;
