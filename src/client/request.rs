//! Request construction against the LightDB resource-path convention.
//!
//! | Operation   | Method | Path          | Options                    |
//! |-------------|--------|---------------|----------------------------|
//! | set         | POST   | `.d/<key>`    | Content-Format             |
//! | get         | GET    | `.d/<key>`    |                            |
//! | observe     | GET    | `.d/<key>`    | Observe = 0                |
//! | desired     | GET    | `.u/desired`  | Observe = 0                |

use core::fmt::Write;

use crate::coap::{ContentFormat, Method, OutboundMessage, ResourcePath};
use crate::error::ProtocolError;

/// Prefix of the data (LightDB state) namespace.
pub const DATA_PREFIX: &str = ".d";

/// Fixed path of the desired-state / update stream.
pub const DESIRED_PATH: &str = ".u/desired";

/// `.d/<key>`.  Leading slashes in `key` are ignored; an empty key, a key
/// with whitespace or control characters, or one that overflows the path
/// buffer is rejected.
pub fn data_path(key: &str) -> Result<ResourcePath, ProtocolError> {
    let key = key.trim_start_matches('/');
    if key.is_empty() || key.bytes().any(|b| b <= b' ' || b == 0x7F) {
        return Err(ProtocolError::InvalidPath);
    }
    let mut path = ResourcePath::new();
    write!(path, "{DATA_PREFIX}/{key}").map_err(|_| ProtocolError::InvalidPath)?;
    Ok(path)
}

/// Copy an already-formed path into a path buffer.
pub fn resource_path(path: &str) -> Result<ResourcePath, ProtocolError> {
    if path.trim_matches('/').is_empty() {
        return Err(ProtocolError::InvalidPath);
    }
    let mut out = ResourcePath::new();
    out.push_str(path).map_err(|_| ProtocolError::InvalidPath)?;
    Ok(out)
}

pub fn write<'a>(path: &'a str, value: &'a [u8], format: ContentFormat) -> OutboundMessage<'a> {
    OutboundMessage {
        method: Method::Post,
        path,
        payload: value,
        content_format: Some(format),
        observe: false,
    }
}

pub fn read(path: &str) -> OutboundMessage<'_> {
    OutboundMessage {
        method: Method::Get,
        path,
        payload: &[],
        content_format: None,
        observe: false,
    }
}

pub fn observe(path: &str) -> OutboundMessage<'_> {
    OutboundMessage {
        observe: true,
        ..read(path)
    }
}
