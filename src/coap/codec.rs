//! CoAP datagram codec.
//!
//! Wire format (RFC 7252 §3):
//! ```text
//! ┌───┬───┬─────┬────────┬──────────────┬─────────────┬──────┬─────────┐
//! │Ver│ T │ TKL │  Code  │  Message ID  │ Token (TKL) │ Opts │ FF + PL │
//! │ 2b│ 2b│  4b │   8b   │   16b (BE)   │  0..8 B     │ ...  │         │
//! └───┴───┴─────┴────────┴──────────────┴─────────────┴──────┴─────────┘
//! ```
//!
//! Options are delta-encoded in ascending number order.  Only Observe (6),
//! Uri-Path (11) and Content-Format (12) are produced; on decode every
//! option is walked but only Observe and Content-Format are kept.

use std::net::SocketAddr;

use crate::error::ProtocolError;

use super::message::{
    Code, Datagram, InboundPacket, MAX_TOKEN_LEN, MessageId, MessageKind, OutboundMessage, Token,
};

const VERSION: u8 = 1;
const HEADER_SIZE: usize = 4;
const PAYLOAD_MARKER: u8 = 0xFF;

const OPT_OBSERVE: u16 = 6;
const OPT_URI_PATH: u16 = 11;
const OPT_CONTENT_FORMAT: u16 = 12;

/// Encode a confirmable request.  The token is the message id.
pub fn encode_request(msg: &OutboundMessage<'_>, id: MessageId) -> Result<Datagram, ProtocolError> {
    let mut out = Datagram::new();
    let token = id.token();

    push_header(&mut out, MessageKind::Confirmable, Code::from(msg.method), id.value(), &token)?;

    let mut last = 0u16;
    if msg.observe {
        // Observe = 0 (register) is the zero-length uint.
        put_option(&mut out, &mut last, OPT_OBSERVE, &[])?;
    }
    for segment in msg.path.split('/').filter(|s| !s.is_empty()) {
        put_option(&mut out, &mut last, OPT_URI_PATH, segment.as_bytes())?;
    }
    if let Some(cf) = msg.content_format {
        let (buf, len) = uint_bytes(cf.code());
        put_option(&mut out, &mut last, OPT_CONTENT_FORMAT, &buf[..len])?;
    }

    if !msg.payload.is_empty() {
        out.push(PAYLOAD_MARKER)
            .map_err(|_| ProtocolError::MessageTooLarge)?;
        out.extend_from_slice(msg.payload)
            .map_err(|_| ProtocolError::MessageTooLarge)?;
    }
    Ok(out)
}

/// Encode an empty message (ping = empty CON, ACK of a CON notification).
pub fn encode_empty(kind: MessageKind, message_id: u16) -> [u8; HEADER_SIZE] {
    let [hi, lo] = message_id.to_be_bytes();
    [(VERSION << 6) | ((kind as u8) << 4), Code::EMPTY.0, hi, lo]
}

/// Decode a received datagram.
pub fn decode(bytes: &[u8], sender: SocketAddr) -> Result<InboundPacket<'_>, ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::Truncated);
    }
    if bytes[0] >> 6 != VERSION {
        return Err(ProtocolError::BadVersion);
    }
    let kind = MessageKind::from_bits(bytes[0] >> 4);
    let tkl = (bytes[0] & 0x0f) as usize;
    if tkl > MAX_TOKEN_LEN {
        return Err(ProtocolError::BadTokenLength);
    }
    let code = Code(bytes[1]);
    let message_id = u16::from_be_bytes([bytes[2], bytes[3]]);

    let mut pos = HEADER_SIZE;
    if bytes.len() < pos + tkl {
        return Err(ProtocolError::Truncated);
    }
    let mut token = Token::new();
    // tkl <= MAX_TOKEN_LEN was checked above.
    let _ = token.extend_from_slice(&bytes[pos..pos + tkl]);
    pos += tkl;

    let mut number = 0u32;
    let mut observe = None;
    let mut content_format = None;
    let mut payload: &[u8] = &[];

    while pos < bytes.len() {
        let head = bytes[pos];
        pos += 1;
        if head == PAYLOAD_MARKER {
            if pos == bytes.len() {
                return Err(ProtocolError::EmptyPayload);
            }
            payload = &bytes[pos..];
            break;
        }

        let delta = read_extended(head >> 4, bytes, &mut pos)?;
        let length = read_extended(head & 0x0f, bytes, &mut pos)?;
        number += delta as u32;
        if bytes.len() < pos + length {
            return Err(ProtocolError::Truncated);
        }
        let value = &bytes[pos..pos + length];
        pos += length;

        match number {
            n if n == u32::from(OPT_OBSERVE) => observe = Some(read_uint(value, 3)?),
            n if n == u32::from(OPT_CONTENT_FORMAT) => {
                content_format = Some(read_uint(value, 2)? as u16);
            }
            _ => {}
        }
    }

    Ok(InboundPacket {
        kind,
        code,
        message_id,
        token,
        observe,
        content_format,
        payload,
        sender,
    })
}

// ── Internal ──────────────────────────────────────────────────

fn push_header(
    out: &mut Datagram,
    kind: MessageKind,
    code: Code,
    message_id: u16,
    token: &Token,
) -> Result<(), ProtocolError> {
    let [hi, lo] = message_id.to_be_bytes();
    let first = (VERSION << 6) | ((kind as u8) << 4) | token.len() as u8;
    out.extend_from_slice(&[first, code.0, hi, lo])
        .map_err(|_| ProtocolError::MessageTooLarge)?;
    out.extend_from_slice(token)
        .map_err(|_| ProtocolError::MessageTooLarge)
}

fn put_option(
    out: &mut Datagram,
    last: &mut u16,
    number: u16,
    value: &[u8],
) -> Result<(), ProtocolError> {
    let delta = usize::from(number - *last);
    let (delta_nibble, delta_ext, delta_ext_len) = split_extended(delta)?;
    let (len_nibble, len_ext, len_ext_len) = split_extended(value.len())?;

    out.push((delta_nibble << 4) | len_nibble)
        .map_err(|_| ProtocolError::MessageTooLarge)?;
    out.extend_from_slice(&delta_ext[..delta_ext_len])
        .map_err(|_| ProtocolError::MessageTooLarge)?;
    out.extend_from_slice(&len_ext[..len_ext_len])
        .map_err(|_| ProtocolError::MessageTooLarge)?;
    out.extend_from_slice(value)
        .map_err(|_| ProtocolError::MessageTooLarge)?;
    *last = number;
    Ok(())
}

/// Split a delta/length into its nibble and 0–2 extension bytes.
fn split_extended(v: usize) -> Result<(u8, [u8; 2], usize), ProtocolError> {
    match v {
        0..=12 => Ok((v as u8, [0, 0], 0)),
        13..=268 => Ok((13, [(v - 13) as u8, 0], 1)),
        269..=65_804 => Ok((14, ((v - 269) as u16).to_be_bytes(), 2)),
        _ => Err(ProtocolError::BadOption),
    }
}

fn read_extended(nibble: u8, bytes: &[u8], pos: &mut usize) -> Result<usize, ProtocolError> {
    match nibble {
        0..=12 => Ok(nibble as usize),
        13 => {
            let b = *bytes.get(*pos).ok_or(ProtocolError::Truncated)?;
            *pos += 1;
            Ok(b as usize + 13)
        }
        14 => {
            let hi = *bytes.get(*pos).ok_or(ProtocolError::Truncated)?;
            let lo = *bytes.get(*pos + 1).ok_or(ProtocolError::Truncated)?;
            *pos += 2;
            Ok(u16::from_be_bytes([hi, lo]) as usize + 269)
        }
        _ => Err(ProtocolError::BadOption),
    }
}

fn read_uint(value: &[u8], max_len: usize) -> Result<u32, ProtocolError> {
    if value.len() > max_len {
        return Err(ProtocolError::BadOption);
    }
    Ok(value.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
}

/// Minimal big-endian uint option encoding.
fn uint_bytes(v: u16) -> ([u8; 2], usize) {
    match v {
        0 => ([0, 0], 0),
        1..=255 => ([v as u8, 0], 1),
        _ => (v.to_be_bytes(), 2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coap::message::{ContentFormat, Method};

    fn sender() -> SocketAddr {
        "10.0.0.1:5684".parse().unwrap()
    }

    #[test]
    fn observe_get_wire_layout() {
        let msg = OutboundMessage {
            method: Method::Get,
            path: ".d/led",
            payload: &[],
            content_format: None,
            observe: true,
        };
        let out = encode_request(&msg, MessageId::new(0x1234)).unwrap();
        assert_eq!(
            out.as_slice(),
            &[
                0x42, 0x01, 0x12, 0x34, // CON, TKL=2, GET, mid
                0x12, 0x34, // token
                0x60, // Observe, empty
                0x52, b'.', b'd', // Uri-Path ".d"
                0x03, b'l', b'e', b'd', // Uri-Path "led"
            ]
        );
    }

    #[test]
    fn post_with_text_plain_and_payload() {
        let msg = OutboundMessage {
            method: Method::Post,
            path: ".d/counter",
            payload: b"7",
            content_format: Some(ContentFormat::TextPlain),
            observe: false,
        };
        let out = encode_request(&msg, MessageId::new(1)).unwrap();
        assert_eq!(&out[..4], &[0x42, 0x02, 0x00, 0x01]);
        assert_eq!(&out[6..9], &[0xB2, b'.', b'd']);
        assert_eq!(out[9], 0x07);
        assert_eq!(&out[10..17], b"counter");
        // Content-Format delta 1, zero-length value (0 = text/plain)
        assert_eq!(out[17], 0x10);
        assert_eq!(&out[18..], &[0xFF, b'7']);
    }

    #[test]
    fn json_content_format_uses_one_byte() {
        let msg = OutboundMessage {
            method: Method::Post,
            path: "k",
            payload: b"{}",
            content_format: Some(ContentFormat::Json),
            observe: false,
        };
        let out = encode_request(&msg, MessageId::new(9)).unwrap();
        let decoded = decode(&out, sender()).unwrap();
        assert_eq!(decoded.content_format, Some(50));
        assert_eq!(decoded.payload, b"{}");
    }

    #[test]
    fn long_segment_uses_extended_length() {
        let key = "x".repeat(20);
        let msg = OutboundMessage {
            method: Method::Get,
            path: &key,
            payload: &[],
            content_format: None,
            observe: false,
        };
        let out = encode_request(&msg, MessageId::new(2)).unwrap();
        // delta 11, length nibble 13 + ext byte (20 - 13)
        assert_eq!(&out[6..8], &[0xBD, 7]);
        assert_eq!(out.len(), 8 + 20);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let big = [b'a'; 1200];
        let msg = OutboundMessage {
            method: Method::Post,
            path: ".d/blob",
            payload: &big,
            content_format: None,
            observe: false,
        };
        assert_eq!(
            encode_request(&msg, MessageId::new(3)).unwrap_err(),
            ProtocolError::MessageTooLarge
        );
    }

    #[test]
    fn empty_ping_is_four_bytes() {
        assert_eq!(encode_empty(MessageKind::Confirmable, 0xBEEF), [0x40, 0, 0xBE, 0xEF]);
        assert_eq!(encode_empty(MessageKind::Acknowledgement, 1), [0x60, 0, 0, 1]);
    }

    #[test]
    fn decodes_notification() {
        let bytes = [
            0x52, 0x45, 0xAB, 0xCD, // NON, TKL=2, 2.05, mid
            0x12, 0x34, // token
            0x61, 0x05, // Observe = 5
            0x61, 0x32, // Content-Format = 50
            0xFF, b'{', b'}',
        ];
        let p = decode(&bytes, sender()).unwrap();
        assert_eq!(p.kind, MessageKind::NonConfirmable);
        assert_eq!(p.code, Code::CONTENT);
        assert_eq!(p.message_id, 0xABCD);
        assert_eq!(p.token_id(), Some(0x1234));
        assert_eq!(p.observe, Some(5));
        assert_eq!(p.content_format, Some(50));
        assert_eq!(p.payload, b"{}");
        assert_eq!(p.sender, sender());
    }

    #[test]
    fn decodes_empty_reset() {
        let p = decode(&[0x70, 0x00, 0x00, 0x05], sender()).unwrap();
        assert_eq!(p.kind, MessageKind::Reset);
        assert!(p.code.is_empty());
        assert!(p.payload.is_empty());
        assert_eq!(p.token_id(), None);
    }

    #[test]
    fn skips_unknown_options() {
        // Uri-Host (3) then Observe (6, delta 3)
        let bytes = [0x50, 0x45, 0, 1, 0x31, b'h', 0x31, 0x02, 0xFF, b'x'];
        let p = decode(&bytes, sender()).unwrap();
        assert_eq!(p.observe, Some(2));
        assert_eq!(p.payload, b"x");
    }

    #[test]
    fn rejects_malformed_datagrams() {
        assert_eq!(decode(&[0x40, 0], sender()).unwrap_err(), ProtocolError::Truncated);
        assert_eq!(decode(&[0x80, 0, 0, 0], sender()).unwrap_err(), ProtocolError::BadVersion);
        assert_eq!(decode(&[0x49, 0, 0, 0], sender()).unwrap_err(), ProtocolError::BadTokenLength);
        assert_eq!(decode(&[0x42, 0, 0, 0, 1], sender()).unwrap_err(), ProtocolError::Truncated);
        assert_eq!(decode(&[0x40, 0x45, 0, 0, 0xFF], sender()).unwrap_err(), ProtocolError::EmptyPayload);
        assert_eq!(decode(&[0x40, 0x45, 0, 0, 0xF1, 0], sender()).unwrap_err(), ProtocolError::BadOption);
        assert_eq!(decode(&[0x40, 0x45, 0, 0, 0x13, 1], sender()).unwrap_err(), ProtocolError::Truncated);
    }
}
