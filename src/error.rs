//! Unified error types for the LightDB node.
//!
//! A single `Error` enum that every subsystem converts into, so the task
//! bodies and `main` handle failures uniformly.  The leaf types are `Copy`
//! and carry no heap data; they are logged and counted, never unwound.
//!
//! | Kind              | Raised by                    | Policy                         |
//! |-------------------|------------------------------|--------------------------------|
//! | `TransportError`  | `TransportSession`           | one reconnect + retry, then fatal |
//! | `ProtocolError`   | CoAP codec, handler decoding | log and skip                   |
//! | `ConfigError`     | config load / validation     | fatal before tasks start       |

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible client operation funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The secure datagram transport failed.
    Transport(TransportError),
    /// A message could not be encoded, decoded or interpreted.
    Protocol(ProtocolError),
    /// Configuration is missing or invalid.
    Config(ConfigError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Protocol(e) => write!(f, "protocol: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Secure channel errors
// ---------------------------------------------------------------------------

/// Failure reported by the secure channel collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// No channel is open.
    NotConnected,
    /// Socket-level I/O failure.
    Io,
    /// DTLS handshake or record-layer failure.
    Handshake,
    /// The channel accepted fewer bytes than the datagram holds.
    ShortWrite,
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "channel not connected"),
            Self::Io => write!(f, "socket I/O error"),
            Self::Handshake => write!(f, "DTLS handshake or session error"),
            Self::ShortWrite => write!(f, "short datagram write"),
        }
    }
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

/// Session-level transport failure.
///
/// `Transient` is a single read/write/connect failure the session may still
/// recover from; `Fatal` means the reconnect-and-retry budget is spent and
/// the session is parked until an explicit restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    Transient(ChannelError),
    Fatal(ChannelError),
}

impl TransportError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// The underlying channel failure.
    pub fn cause(&self) -> ChannelError {
        match self {
            Self::Transient(c) | Self::Fatal(c) => *c,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient(c) => write!(f, "transient ({c})"),
            Self::Fatal(c) => write!(f, "fatal ({c})"),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Protocol errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Datagram shorter than its header, token or option claims.
    Truncated,
    /// CoAP version field is not 1.
    BadVersion,
    /// Token length nibble above 8.
    BadTokenLength,
    /// Reserved option delta/length nibble, or an oversized option value.
    BadOption,
    /// Payload marker present with nothing after it.
    EmptyPayload,
    /// Encoded message does not fit the datagram buffer.
    MessageTooLarge,
    /// Resource key empty or longer than the path buffer.
    InvalidPath,
    /// Observation table is full.
    TooManyObservations,
    /// Application content could not be decoded.
    Malformed(&'static str),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated message"),
            Self::BadVersion => write!(f, "unsupported CoAP version"),
            Self::BadTokenLength => write!(f, "token length above 8"),
            Self::BadOption => write!(f, "malformed option"),
            Self::EmptyPayload => write!(f, "payload marker without payload"),
            Self::MessageTooLarge => write!(f, "message exceeds datagram size"),
            Self::InvalidPath => write!(f, "invalid resource path"),
            Self::TooManyObservations => write!(f, "observation table full"),
            Self::Malformed(what) => write!(f, "malformed content: {what}"),
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No config found in storage (first boot).
    NotFound,
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// The configured host did not resolve to a socket address.
    UnresolvableHost,
    /// Generic I/O error from the storage backend.
    IoError,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::UnresolvableHost => write!(f, "host does not resolve"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
