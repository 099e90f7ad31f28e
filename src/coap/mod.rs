//! CoAP (RFC 7252) message model and datagram codec.

pub mod codec;
pub mod message;

pub use codec::{decode, encode_empty, encode_request};
pub use message::{
    Code, ContentFormat, Datagram, InboundPacket, MAX_DATAGRAM, MAX_PATH_LEN, MessageId,
    MessageKind, Method, OutboundMessage, ResourcePath, Token,
};
