//! Mock adapters for integration tests.
//!
//! Every mock keeps its state behind an `Rc`, so a test can hand one
//! clone to the client and keep another to script failures and inspect
//! traffic afterwards.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use lightdb_node::app::decoder::JsonStateDecoder;
use lightdb_node::app::handler::OutputStateHandler;
use lightdb_node::app::ports::{OutputPort, SecureChannel, WatchdogPort};
use lightdb_node::client::{LightDbClient, MessageDispatcher, MessageIdAllocator, TransportSession};
use lightdb_node::coap::{self, InboundPacket};
use lightdb_node::config::{ClientConfig, LivenessPolicy, PskCredentials};
use lightdb_node::error::ChannelError;

pub const SERVER: &str = "10.0.0.1:5684";
pub const SEED: u16 = 0x1000;

pub type TestClient = LightDbClient<MockChannel, OutputStateHandler<MockOutputs, JsonStateDecoder>>;

pub fn server() -> SocketAddr {
    SERVER.parse().unwrap()
}

// ── Secure channel ────────────────────────────────────────────

#[derive(Default)]
pub struct NetState {
    pub connected: bool,
    pub connects: u32,
    pub closes: u32,
    /// Datagrams written, in order.
    pub sent: Vec<Vec<u8>>,
    /// Datagrams the next reads return, in order.
    pub inbound: VecDeque<Vec<u8>>,
    /// The next N calls of each kind fail.
    pub fail_connects: u32,
    pub fail_writes: u32,
    pub fail_reads: u32,
    pub write_attempts: u32,
}

#[derive(Clone, Default)]
pub struct MockChannel(pub Rc<RefCell<NetState>>);

#[allow(dead_code)]
impl MockChannel {
    pub fn push_inbound(&self, datagram: Vec<u8>) {
        self.0.borrow_mut().inbound.push_back(datagram);
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.0.borrow().sent.clone()
    }

    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.0.borrow_mut().sent)
    }

    pub fn fail_writes(&self, n: u32) {
        self.0.borrow_mut().fail_writes = n;
    }

    pub fn fail_reads(&self, n: u32) {
        self.0.borrow_mut().fail_reads = n;
    }

    pub fn fail_connects(&self, n: u32) {
        self.0.borrow_mut().fail_connects = n;
    }

    pub fn connects(&self) -> u32 {
        self.0.borrow().connects
    }

    pub fn write_attempts(&self) -> u32 {
        self.0.borrow().write_attempts
    }
}

impl SecureChannel for MockChannel {
    fn connect(&mut self, _remote: SocketAddr, _creds: &PskCredentials) -> Result<(), ChannelError> {
        let mut s = self.0.borrow_mut();
        s.connects += 1;
        if s.fail_connects > 0 {
            s.fail_connects -= 1;
            return Err(ChannelError::Handshake);
        }
        s.connected = true;
        Ok(())
    }

    fn write(&mut self, datagram: &[u8]) -> Result<usize, ChannelError> {
        let mut s = self.0.borrow_mut();
        s.write_attempts += 1;
        if !s.connected {
            return Err(ChannelError::NotConnected);
        }
        if s.fail_writes > 0 {
            s.fail_writes -= 1;
            return Err(ChannelError::Io);
        }
        s.sent.push(datagram.to_vec());
        Ok(datagram.len())
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, ChannelError> {
        let mut s = self.0.borrow_mut();
        if !s.connected {
            return Err(ChannelError::NotConnected);
        }
        if s.fail_reads > 0 {
            s.fail_reads -= 1;
            return Err(ChannelError::Io);
        }
        match s.inbound.pop_front() {
            Some(d) => {
                buf[..d.len()].copy_from_slice(&d);
                Ok(d.len())
            }
            None => Ok(0),
        }
    }

    fn close(&mut self) {
        let mut s = self.0.borrow_mut();
        s.closes += 1;
        s.connected = false;
    }
}

// ── Outputs ───────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct MockOutputs {
    pub levels: Rc<RefCell<[bool; 4]>>,
    pub writes: Rc<Cell<u32>>,
}

#[allow(dead_code)]
impl MockOutputs {
    pub fn levels(&self) -> [bool; 4] {
        *self.levels.borrow()
    }

    pub fn writes(&self) -> u32 {
        self.writes.get()
    }
}

impl OutputPort for MockOutputs {
    fn output_count(&self) -> usize {
        4
    }

    fn set_output(&mut self, index: usize, on: bool) {
        self.levels.borrow_mut()[index] = on;
        self.writes.set(self.writes.get() + 1);
    }
}

// ── Watchdog ──────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct MockWatchdog(pub Rc<Cell<u32>>);

#[allow(dead_code)]
impl MockWatchdog {
    pub fn feeds(&self) -> u32 {
        self.0.get()
    }
}

impl WatchdogPort for MockWatchdog {
    fn feed(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

// ── Builders ──────────────────────────────────────────────────

pub fn config() -> ClientConfig {
    let mut c = ClientConfig::default();
    c.host.push_str("10.0.0.1").unwrap();
    c.psk_identity.push_str("node@project").unwrap();
    c.psk.push_str("supersecret").unwrap();
    c
}

pub fn client(net: &MockChannel, outputs: &MockOutputs, liveness: LivenessPolicy) -> TestClient {
    let session = TransportSession::new(
        net.clone(),
        server(),
        config().credentials(),
        Duration::ZERO,
    );
    let dispatcher = MessageDispatcher::new(
        OutputStateHandler::new(outputs.clone(), JsonStateDecoder),
        liveness,
    );
    LightDbClient::new(session, dispatcher, MessageIdAllocator::new(SEED))
}

// ── Wire helpers ──────────────────────────────────────────────

/// Server-side datagram: 2.05 Content with an optional Observe value, or
/// an empty message (code 0.00) when there is no payload, token or option.
/// `kind` is the 2-bit CoAP type (0 CON, 1 NON, 2 ACK, 3 RST).
pub fn server_packet(kind: u8, mid: u16, token: &[u8], observe: Option<u8>, payload: &[u8]) -> Vec<u8> {
    let empty = payload.is_empty() && token.is_empty() && observe.is_none();
    let code = if empty { 0x00 } else { 0x45 };
    let mut out = vec![
        0x40 | (kind << 4) | token.len() as u8,
        code,
        (mid >> 8) as u8,
        mid as u8,
    ];
    out.extend_from_slice(token);
    match observe {
        Some(0) => out.push(0x60),
        Some(v) => out.extend_from_slice(&[0x61, v]),
        None => {}
    }
    if !payload.is_empty() {
        out.push(0xFF);
        out.extend_from_slice(payload);
    }
    out
}

/// NON notification echoing the observe token of request `id`.
pub fn notification(mid: u16, observe_id: u16, seq: u8, payload: &[u8]) -> Vec<u8> {
    server_packet(1, mid, &observe_id.to_be_bytes(), Some(seq), payload)
}

pub fn decode(bytes: &[u8]) -> InboundPacket<'_> {
    coap::decode(bytes, server()).unwrap()
}

/// Uri-Path segments of an encoded request, joined with `/`.
pub fn uri_path(bytes: &[u8]) -> String {
    let tkl = (bytes[0] & 0x0F) as usize;
    let mut i = 4 + tkl;
    let mut number = 0u16;
    let mut segments = Vec::new();
    while i < bytes.len() && bytes[i] != 0xFF {
        let delta = u16::from(bytes[i] >> 4);
        let len = usize::from(bytes[i] & 0x0F);
        i += 1;
        let delta = if delta == 13 {
            i += 1;
            u16::from(bytes[i - 1]) + 13
        } else {
            delta
        };
        let len = if len == 13 {
            i += 1;
            usize::from(bytes[i - 1]) + 13
        } else {
            len
        };
        number += delta;
        if number == 11 {
            segments.push(String::from_utf8_lossy(&bytes[i..i + len]).into_owned());
        }
        i += len;
    }
    segments.join("/")
}
