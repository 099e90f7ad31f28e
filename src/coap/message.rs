//! CoAP message vocabulary used by the client.
//!
//! Only the slice of RFC 7252 this node speaks: confirmable requests with
//! GET/POST, the Uri-Path, Content-Format and Observe options, empty
//! CON/ACK/RST messages, and piggy-backed or separate responses.

use core::fmt;
use std::net::SocketAddr;

/// Largest datagram sent or received (RFC 7252 §4.6 recommendation).
pub const MAX_DATAGRAM: usize = 1152;

/// Largest token length the header can announce.
pub const MAX_TOKEN_LEN: usize = 8;

/// Resource path buffer size (`.d/<key>`, `.u/desired`).
pub const MAX_PATH_LEN: usize = 64;

pub type ResourcePath = heapless::String<MAX_PATH_LEN>;
pub type Token = heapless::Vec<u8, MAX_TOKEN_LEN>;
pub type Datagram = heapless::Vec<u8, MAX_DATAGRAM>;

/// Message id of a request issued by this client.
///
/// Only the client's own allocator mints these, so every id keyed in the
/// observation table originates from the outbound request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(u16);

impl MessageId {
    pub(crate) const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn value(self) -> u16 {
        self.0
    }

    /// The request token: the id in network byte order.  Notifications echo
    /// it, which is how they correlate back to the observe request.
    pub fn token(self) -> Token {
        let mut t = Token::new();
        let _ = t.extend_from_slice(&self.0.to_be_bytes());
        t
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Header `T` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Confirmable = 0,
    NonConfirmable = 1,
    Acknowledgement = 2,
    Reset = 3,
}

impl MessageKind {
    pub(crate) fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::Confirmable,
            1 => Self::NonConfirmable,
            2 => Self::Acknowledgement,
            _ => Self::Reset,
        }
    }
}

/// Request methods this node issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Method {
    Get = 1,
    Post = 2,
    Put = 3,
    Delete = 4,
}

/// Raw `class.detail` code byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Code(pub u8);

impl Code {
    pub const EMPTY: Code = Code(0);
    pub const CONTENT: Code = Code((2 << 5) | 5);
    pub const CHANGED: Code = Code((2 << 5) | 4);

    pub fn class(self) -> u8 {
        self.0 >> 5
    }

    pub fn detail(self) -> u8 {
        self.0 & 0x1f
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl From<Method> for Code {
    fn from(m: Method) -> Self {
        Code(m as u8)
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

/// Content-Format registry entries (RFC 7252 §12.3 plus JSON/CBOR).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentFormat {
    #[default]
    TextPlain,
    LinkFormat,
    Xml,
    OctetStream,
    Exi,
    Json,
    Cbor,
}

impl ContentFormat {
    pub const fn code(self) -> u16 {
        match self {
            Self::TextPlain => 0,
            Self::LinkFormat => 40,
            Self::Xml => 41,
            Self::OctetStream => 42,
            Self::Exi => 47,
            Self::Json => 50,
            Self::Cbor => 60,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::TextPlain),
            40 => Some(Self::LinkFormat),
            41 => Some(Self::Xml),
            42 => Some(Self::OctetStream),
            47 => Some(Self::Exi),
            50 => Some(Self::Json),
            60 => Some(Self::Cbor),
            _ => None,
        }
    }
}

/// A request about to be encoded and handed to the transport.
#[derive(Debug, Clone, Copy)]
pub struct OutboundMessage<'a> {
    pub method: Method,
    pub path: &'a str,
    pub payload: &'a [u8],
    pub content_format: Option<ContentFormat>,
    pub observe: bool,
}

/// A decoded datagram.  Borrows the payload from the receive buffer.
#[derive(Debug, Clone)]
pub struct InboundPacket<'a> {
    pub kind: MessageKind,
    pub code: Code,
    pub message_id: u16,
    pub token: Token,
    /// Observe sequence number, present on notifications.
    pub observe: Option<u32>,
    /// Raw Content-Format option value.
    pub content_format: Option<u16>,
    pub payload: &'a [u8],
    pub sender: SocketAddr,
}

impl InboundPacket<'_> {
    /// Request id echoed in the token, if the token has our 2-byte shape.
    pub fn token_id(&self) -> Option<u16> {
        match self.token.as_slice() {
            [hi, lo] => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }
}
