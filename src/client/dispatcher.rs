//! Inbound dispatch and observation correlation.
//!
//! ```text
//!   InboundPacket
//!        │
//!        ├─ RST for an observe id ──▶ observation dropped
//!        ├─ empty payload ──────────▶ ignored
//!        ├─ repeated message id ────▶ duplicate (not re-dispatched)
//!        ├─ "OK" ───────────────────▶ LivenessPolicy (suppress | on_liveness)
//!        └─ A`B`C ──split──▶ on_message(A), on_message(B), on_message(C)
//! ```
//!
//! A handler error on one fragment is logged and counted; the remaining
//! fragments are still dispatched.

use std::net::SocketAddr;

use heapless::{Deque, FnvIndexMap};
use log::{debug, info, warn};

use crate::app::ports::MessageHandler;
use crate::coap::{Code, InboundPacket, MessageId, MessageKind, ResourcePath};
use crate::config::LivenessPolicy;
use crate::diagnostics::DispatchStats;
use crate::error::ProtocolError;

use super::request::resource_path;

/// Separator between notifications batched into one datagram.
pub const BATCH_DELIMITER: u8 = b'`';

/// Reserved liveness-acknowledgement payload.
pub const LIVENESS_ACK: &[u8] = b"OK";

/// Concurrent observations (power of two for the index map).
pub const MAX_OBSERVATIONS: usize = 8;

/// Message ids remembered for duplicate suppression.
const DEDUP_WINDOW: usize = 16;

/// Header fields of the packet a fragment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketMeta {
    pub kind: MessageKind,
    pub code: Code,
    pub message_id: u16,
    pub token_id: Option<u16>,
    pub observe: Option<u32>,
    pub content_format: Option<u16>,
}

impl From<&InboundPacket<'_>> for PacketMeta {
    fn from(p: &InboundPacket<'_>) -> Self {
        Self {
            kind: p.kind,
            code: p.code,
            message_id: p.message_id,
            token_id: p.token_id(),
            observe: p.observe,
            content_format: p.content_format,
        }
    }
}

/// One sub-payload handed to the application.
#[derive(Debug, Clone, Copy)]
pub struct Notification<'a> {
    /// Observed resource this packet correlates to, if any.
    pub path: Option<&'a str>,
    pub payload: &'a [u8],
    /// Position of this fragment within its batch.
    pub index: usize,
    pub meta: PacketMeta,
    pub sender: SocketAddr,
}

/// What [`MessageDispatcher::on_packet`] did with a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Ignored,
    Duplicate,
    Liveness,
    Delivered { delivered: u16, rejected: u16 },
}

pub struct MessageDispatcher<H: MessageHandler> {
    handler: H,
    observations: FnvIndexMap<u16, ResourcePath, MAX_OBSERVATIONS>,
    recent: Deque<u16, DEDUP_WINDOW>,
    liveness: LivenessPolicy,
    stats: DispatchStats,
}

impl<H: MessageHandler> MessageDispatcher<H> {
    pub fn new(handler: H, liveness: LivenessPolicy) -> Self {
        Self {
            handler,
            observations: FnvIndexMap::new(),
            recent: Deque::new(),
            liveness,
            stats: DispatchStats::default(),
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn liveness_policy(&self) -> LivenessPolicy {
        self.liveness
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    // ── Observation table ─────────────────────────────────────

    /// Map `id` to `path`.  Re-registering an id rebinds it.
    pub fn register_observation(&mut self, id: MessageId, path: &str) -> Result<(), ProtocolError> {
        let path = resource_path(path)?;
        match self.observations.insert(id.value(), path) {
            Ok(Some(old)) => {
                debug!("Dispatch: observation {} rebound from {}", id, old);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(_) => Err(ProtocolError::TooManyObservations),
        }
    }

    pub fn clear_observation(&mut self, id: MessageId) -> Option<ResourcePath> {
        self.observations.remove(&id.value())
    }

    /// Drop every observation (session teardown).
    pub fn clear_all(&mut self) {
        self.observations.clear();
        self.recent.clear();
    }

    pub fn is_observed(&self, raw_id: u16) -> bool {
        self.observations.contains_key(&raw_id)
    }

    pub fn observation(&self, id: MessageId) -> Option<&str> {
        self.observations.get(&id.value()).map(ResourcePath::as_str)
    }

    pub fn observation_count(&self) -> usize {
        self.observations.len()
    }

    /// Distinct observed paths, in registration order.
    pub fn observed_paths(&self) -> heapless::Vec<ResourcePath, MAX_OBSERVATIONS> {
        let mut out = heapless::Vec::new();
        for p in self.observations.values() {
            if !out.contains(p) {
                // Same capacity as the table.
                let _ = out.push(p.clone());
            }
        }
        out
    }

    // ── Dispatch ──────────────────────────────────────────────

    pub fn on_packet(&mut self, packet: &InboundPacket<'_>) -> Dispatch {
        if packet.kind == MessageKind::Reset {
            if let Some(path) = self.observations.remove(&packet.message_id) {
                info!("Dispatch: server reset observation {} ({})", packet.message_id, path);
            }
            return Dispatch::Ignored;
        }
        if packet.payload.is_empty() {
            return Dispatch::Ignored;
        }

        self.stats.packets += 1;
        // A piggy-backed ACK carries our own request id, not a server id.
        if packet.kind != MessageKind::Acknowledgement {
            if self.recent.iter().any(|id| *id == packet.message_id) {
                self.stats.duplicates += 1;
                debug!("Dispatch: duplicate message {} dropped", packet.message_id);
                return Dispatch::Duplicate;
            }
            if self.recent.is_full() {
                self.recent.pop_front();
            }
            // Space was made above.
            let _ = self.recent.push_back(packet.message_id);
        }

        let meta = PacketMeta::from(packet);

        if packet.payload == LIVENESS_ACK {
            self.stats.liveness += 1;
            match self.liveness {
                LivenessPolicy::Suppress => debug!("Dispatch: liveness ack suppressed"),
                LivenessPolicy::Notify => self.handler.on_liveness(&meta, packet.sender),
            }
            return Dispatch::Liveness;
        }

        let path = correlate(&self.observations, packet);
        if path.is_none() {
            self.stats.uncorrelated += 1;
        }

        let mut delivered = 0u16;
        let mut rejected = 0u16;
        let fragments = packet
            .payload
            .split(|b| *b == BATCH_DELIMITER)
            .filter(|f| !f.is_empty());
        for (index, payload) in fragments.enumerate() {
            let note = Notification {
                path,
                payload,
                index,
                meta,
                sender: packet.sender,
            };
            match self.handler.on_message(&note) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        "Dispatch: fragment {} of message {} rejected ({})",
                        index, packet.message_id, e
                    );
                    rejected += 1;
                }
            }
        }
        self.stats.delivered += u32::from(delivered);
        self.stats.rejected += u32::from(rejected);
        debug!(
            "Dispatch: message {} path={:?} delivered={} rejected={}",
            packet.message_id, path, delivered, rejected
        );
        Dispatch::Delivered { delivered, rejected }
    }
}

/// Observed path for `packet`: by echoed token, or by message id when the
/// packet carries no token.
fn correlate<'m>(
    observations: &'m FnvIndexMap<u16, ResourcePath, MAX_OBSERVATIONS>,
    packet: &InboundPacket<'_>,
) -> Option<&'m str> {
    let key = if packet.token.is_empty() {
        Some(packet.message_id)
    } else {
        packet.token_id()
    };
    key.and_then(|k| observations.get(&k)).map(ResourcePath::as_str)
}
