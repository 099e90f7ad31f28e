//! Application message handler: decoded state → indexed outputs.
//!
//! Keys of the decoded object are output indices (`"0"`, `"1"`, …); keys
//! that are not indices or are out of range are ignored.  Updates on the
//! `.u/desired` stream are counted and logged, not decoded.

use std::net::SocketAddr;

use log::{debug, info};

use crate::app::ports::{MessageHandler, OutputPort, StateDecoder};
use crate::client::request::DESIRED_PATH;
use crate::client::{Notification, PacketMeta};
use crate::error::ProtocolError;

pub struct OutputStateHandler<O: OutputPort, D: StateDecoder> {
    outputs: O,
    decoder: D,
    applied: u32,
    desired_updates: u32,
    liveness_acks: u32,
}

impl<O: OutputPort, D: StateDecoder> OutputStateHandler<O, D> {
    pub fn new(outputs: O, decoder: D) -> Self {
        Self {
            outputs,
            decoder,
            applied: 0,
            desired_updates: 0,
            liveness_acks: 0,
        }
    }

    pub fn outputs(&self) -> &O {
        &self.outputs
    }

    pub fn outputs_mut(&mut self) -> &mut O {
        &mut self.outputs
    }

    /// Output writes performed so far.
    pub fn applied(&self) -> u32 {
        self.applied
    }

    pub fn desired_updates(&self) -> u32 {
        self.desired_updates
    }

    pub fn liveness_acks(&self) -> u32 {
        self.liveness_acks
    }
}

impl<O: OutputPort, D: StateDecoder> MessageHandler for OutputStateHandler<O, D> {
    fn on_message(&mut self, n: &Notification<'_>) -> Result<(), ProtocolError> {
        debug!(
            "App: {} bytes from {} (path={:?}, mid={}, fragment {})",
            n.payload.len(),
            n.sender,
            n.path,
            n.meta.message_id,
            n.index
        );

        if n.path == Some(DESIRED_PATH) {
            self.desired_updates += 1;
            info!("App: desired-state update ({} bytes)", n.payload.len());
            return Ok(());
        }

        let state = self.decoder.decode(n.payload)?;
        let count = self.outputs.output_count();
        for (key, on) in &state {
            match output_index(key) {
                Some(i) if i < count => {
                    self.outputs.set_output(i, *on);
                    self.applied += 1;
                }
                _ => debug!("App: ignoring key '{}'", key),
            }
        }
        Ok(())
    }

    fn on_liveness(&mut self, meta: &PacketMeta, sender: SocketAddr) {
        self.liveness_acks += 1;
        debug!("App: liveness ack from {} (mid={})", sender, meta.message_id);
    }
}

/// Index named by `key`, accepted only in canonical decimal form
/// (`"0"`, `"12"`; not `"+1"`, `"01"` or `" 1"`).
fn output_index(key: &str) -> Option<usize> {
    let canonical = !key.is_empty()
        && key.bytes().all(|b| b.is_ascii_digit())
        && (key == "0" || !key.starts_with('0'));
    if canonical { key.parse().ok() } else { None }
}
