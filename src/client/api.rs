//! LightDB client API.
//!
//! All request calls are fire-and-forget: they encode a confirmable
//! request, hand it to the session and return the message id used.
//! Responses and notifications come back through [`poll`](LightDbClient::poll)
//! and the dispatcher's handler.

use log::{debug, info, warn};

use crate::app::ports::{MessageHandler, SecureChannel};
use crate::coap::{self, ContentFormat, MAX_DATAGRAM, MessageId, MessageKind, ResourcePath};
use crate::error::{Error, TransportError};

use super::dispatcher::{Dispatch, MessageDispatcher};
use super::ids::MessageIdAllocator;
use super::request::{self, DESIRED_PATH};
use super::session::{SessionState, TransportSession};

/// Datagrams drained per `poll` call.
pub const MAX_DRAIN: usize = 8;

/// Outcome of one [`LightDbClient::poll`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub received: u16,
    /// Datagrams that failed to decode (logged and skipped).
    pub malformed: u16,
    pub delivered: u16,
    pub rejected: u16,
    pub liveness: u16,
    pub duplicates: u16,
    /// Empty ACK/RST replies sent for confirmable messages.
    pub replies: u16,
}

pub struct LightDbClient<C: SecureChannel, H: MessageHandler> {
    session: TransportSession<C>,
    dispatcher: MessageDispatcher<H>,
    ids: MessageIdAllocator,
    rx: Box<[u8; MAX_DATAGRAM]>,
}

impl<C: SecureChannel, H: MessageHandler> LightDbClient<C, H> {
    pub fn new(
        session: TransportSession<C>,
        dispatcher: MessageDispatcher<H>,
        ids: MessageIdAllocator,
    ) -> Self {
        Self {
            session,
            dispatcher,
            ids,
            rx: Box::new([0u8; MAX_DATAGRAM]),
        }
    }

    pub fn session(&self) -> &TransportSession<C> {
        &self.session
    }

    pub fn dispatcher(&self) -> &MessageDispatcher<H> {
        &self.dispatcher
    }

    pub fn handler(&self) -> &H {
        self.dispatcher.handler()
    }

    pub fn handler_mut(&mut self) -> &mut H {
        self.dispatcher.handler_mut()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    // ── Lifecycle ─────────────────────────────────────────────

    pub fn connect(&mut self) -> Result<(), Error> {
        self.session.connect()?;
        Ok(())
    }

    /// Fresh session, then re-register every observed path on it.
    pub fn restart(&mut self) -> Result<(), Error> {
        // Observations survive a failed restart for the next attempt.
        self.session.restart()?;
        let paths = self.dispatcher.observed_paths();
        self.dispatcher.clear_all();
        let mut failure = None;
        for path in &paths {
            if failure.is_some() {
                // Session is fatal again; keep the path for the next restart.
                let id = self.next_id();
                self.dispatcher.register_observation(id, path)?;
                continue;
            }
            if let Err(e) = self.observe_path(path) {
                failure = Some(e);
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }
        if !paths.is_empty() {
            info!("Client: re-registered {} observation(s)", paths.len());
        }
        Ok(())
    }

    /// Close the session and drop all observations.
    pub fn close(&mut self) {
        self.dispatcher.clear_all();
        self.session.close();
    }

    // ── Requests ──────────────────────────────────────────────

    /// POST `value` to `.d/<key>`.
    pub fn set(&mut self, key: &str, value: &[u8], format: ContentFormat) -> Result<MessageId, Error> {
        let path = request::data_path(key)?;
        let id = self.send_request(&request::write(&path, value, format))?;
        debug!("Client: set {} ({} bytes) id={}", path, value.len(), id);
        Ok(id)
    }

    /// GET `.d/<key>`.
    pub fn get(&mut self, key: &str) -> Result<MessageId, Error> {
        let path = request::data_path(key)?;
        let id = self.send_request(&request::read(&path))?;
        debug!("Client: get {} id={}", path, id);
        Ok(id)
    }

    /// GET `.d/<key>` with Observe; notifications correlate to the id.
    pub fn observe(&mut self, key: &str) -> Result<MessageId, Error> {
        let path = request::data_path(key)?;
        self.observe_path(&path)
    }

    /// Observe the `.u/desired` update stream.
    pub fn observe_desired(&mut self) -> Result<MessageId, Error> {
        let path = request::resource_path(DESIRED_PATH)?;
        self.observe_path(&path)
    }

    /// Empty confirmable message (CoAP ping).
    pub fn ping(&mut self) -> Result<MessageId, Error> {
        let id = self.next_id();
        self.session
            .send(&coap::encode_empty(MessageKind::Confirmable, id.value()))?;
        debug!("Client: ping id={}", id);
        Ok(id)
    }

    /// Drain waiting datagrams into the dispatcher.
    pub fn poll(&mut self) -> Result<PollReport, TransportError> {
        let mut report = PollReport::default();
        for _ in 0..MAX_DRAIN {
            let Some((len, sender)) = self.session.receive(&mut self.rx[..])? else {
                break;
            };
            report.received += 1;

            let packet = match coap::decode(&self.rx[..len], sender) {
                Ok(p) => p,
                Err(e) => {
                    warn!("Client: dropping malformed datagram from {} ({})", sender, e);
                    report.malformed += 1;
                    continue;
                }
            };

            match self.dispatcher.on_packet(&packet) {
                Dispatch::Delivered { delivered, rejected } => {
                    report.delivered += delivered;
                    report.rejected += rejected;
                }
                Dispatch::Liveness => report.liveness += 1,
                Dispatch::Duplicate => report.duplicates += 1,
                Dispatch::Ignored => {}
            }

            if packet.kind == MessageKind::Confirmable {
                // Empty CON is a ping from the server: answer with RST.
                let reply = if packet.code.is_empty() {
                    MessageKind::Reset
                } else {
                    MessageKind::Acknowledgement
                };
                self.session
                    .send(&coap::encode_empty(reply, packet.message_id))?;
                report.replies += 1;
            }
        }
        Ok(report)
    }

    // ── Internal ──────────────────────────────────────────────

    fn observe_path(&mut self, path: &ResourcePath) -> Result<MessageId, Error> {
        let id = self.next_id();
        let datagram = coap::encode_request(&request::observe(path), id)?;
        self.dispatcher.register_observation(id, path)?;
        // A failed send leaves the session fatal; the registration stays so
        // that `restart` sends it again.
        if let Err(e) = self.session.send(&datagram) {
            warn!("Client: observe {} not sent ({}), kept for restart", path, e);
            return Err(e.into());
        }
        info!("Client: observing {} id={}", path, id);
        Ok(id)
    }

    fn send_request(&mut self, msg: &coap::OutboundMessage<'_>) -> Result<MessageId, Error> {
        let id = self.next_id();
        let datagram = coap::encode_request(msg, id)?;
        self.session.send(&datagram)?;
        Ok(id)
    }

    fn next_id(&mut self) -> MessageId {
        let dispatcher = &self.dispatcher;
        self.ids.allocate(|raw| dispatcher.is_observed(raw))
    }
}
