//! Adapters — concrete implementations of the port traits.
//!
//! | Adapter        | Implements         | Connects to               |
//! |----------------|--------------------|---------------------------|
//! | `dtls_channel` | SecureChannel      | UDP + DTLS 1.2 (PSK)      |
//! | `nvs`          | ConfigPort         | NVS / in-memory store     |
//! | `time`         | Clock              | ESP32 system timer        |
//! | `wifi`         | ConnectivityPort   | ESP-IDF WiFi STA          |

pub mod dtls_channel;
pub mod nvs;
pub mod time;
pub mod wifi;
