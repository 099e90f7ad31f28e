//! Resilient secured-datagram session.
//!
//! Owns the [`SecureChannel`] exclusively.  Every read or write that fails
//! triggers exactly one reconnect followed by exactly one resubmission; if
//! either fails the session goes `Fatal` and stays there until
//! [`restart`](TransportSession::restart).
//!
//! ```text
//!   Disconnected ──connect──▶ Connecting ──ok──▶ Connected
//!                                  │                 │ read/write error
//!                                  ▼ err             ▼
//!                             Disconnected      Reconnecting ──ok + retry ok──▶ Connected
//!                                                    │
//!                                                    └──reconnect or retry err──▶ Fatal
//!
//!   Fatal ──restart ok──▶ Connected        Fatal ──restart err──▶ Fatal
//! ```
//!
//! `&mut self` on every operation makes the session single-writer: a
//! reconnect triggered by one caller completes before any other caller can
//! reach the channel.

use core::time::Duration;
use std::net::SocketAddr;

use log::{debug, error, info, warn};

use crate::app::ports::SecureChannel;
use crate::config::PskCredentials;
use crate::diagnostics::LinkStats;
use crate::error::{ChannelError, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Fatal,
}

pub struct TransportSession<C: SecureChannel> {
    channel: C,
    remote: SocketAddr,
    credentials: PskCredentials,
    read_timeout: Duration,
    state: SessionState,
    /// Cause of the failure that made the session fatal.
    fatal_cause: Option<ChannelError>,
    generation: u32,
    stats: LinkStats,
}

impl<C: SecureChannel> TransportSession<C> {
    pub fn new(
        channel: C,
        remote: SocketAddr,
        credentials: PskCredentials,
        read_timeout: Duration,
    ) -> Self {
        Self {
            channel,
            remote,
            credentials,
            read_timeout,
            state: SessionState::Disconnected,
            fatal_cause: None,
            generation: 0,
            stats: LinkStats::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_fatal(&self) -> bool {
        self.state == SessionState::Fatal
    }

    /// Number of successful channel establishments so far.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Establish the channel.  An open channel is torn down first.
    ///
    /// A failed connect leaves the session `Disconnected` and is reported
    /// as transient; the next read or write starts the retry cycle.
    pub fn connect(&mut self) -> Result<(), TransportError> {
        if self.state == SessionState::Fatal {
            return Err(self.fatal_error());
        }
        if self.state != SessionState::Disconnected {
            self.channel.close();
        }
        self.state = SessionState::Connecting;
        match self.channel.connect(self.remote, &self.credentials) {
            Ok(()) => {
                self.on_established();
                info!("Session: connected to {} (generation {})", self.remote, self.generation);
                Ok(())
            }
            Err(e) => {
                self.channel.close();
                self.state = SessionState::Disconnected;
                warn!("Session: connect to {} failed ({})", self.remote, e);
                Err(TransportError::Transient(e))
            }
        }
    }

    /// Send one datagram.  A write that accepts fewer bytes than
    /// `datagram.len()` counts as a failure.
    pub fn send(&mut self, datagram: &[u8]) -> Result<usize, TransportError> {
        let len = datagram.len();
        let n = self.with_retry("write", |ch| match ch.write(datagram)? {
            n if n == len => Ok(n),
            _ => Err(ChannelError::ShortWrite),
        })?;
        self.stats.datagrams_sent += 1;
        Ok(n)
    }

    /// Receive one datagram.  `Ok(None)` means nothing is waiting.
    pub fn receive(
        &mut self,
        buf: &mut [u8],
    ) -> Result<Option<(usize, SocketAddr)>, TransportError> {
        let timeout = self.read_timeout;
        let n = self.with_retry("read", |ch| ch.read(&mut buf[..], timeout))?;
        if n == 0 {
            return Ok(None);
        }
        self.stats.datagrams_received += 1;
        Ok(Some((n, self.remote)))
    }

    /// Release the channel.
    pub fn close(&mut self) {
        self.channel.close();
        if self.state != SessionState::Fatal {
            self.state = SessionState::Disconnected;
        }
        info!("Session: closed");
    }

    /// Leave `Fatal` (or any state) with a fresh channel.
    ///
    /// A failed connect here leaves the session `Fatal`: only another
    /// `restart` brings it back.
    pub fn restart(&mut self) -> Result<(), TransportError> {
        info!("Session: restarting (was {:?})", self.state);
        self.channel.close();
        self.state = SessionState::Disconnected;
        self.fatal_cause = None;
        self.connect().map_err(|e| self.escalate("restart", e.cause()))
    }

    // ── Internal ──────────────────────────────────────────────

    /// Run `op`; on failure reconnect once and run it once more.
    fn with_retry<T>(
        &mut self,
        what: &str,
        mut op: impl FnMut(&mut C) -> Result<T, ChannelError>,
    ) -> Result<T, TransportError> {
        if self.state == SessionState::Fatal {
            return Err(self.fatal_error());
        }

        let first = match op(&mut self.channel) {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };

        warn!("Session: {} failed ({}), reconnecting", what, first);
        self.stats.reconnects += 1;
        self.state = SessionState::Reconnecting;
        self.channel.close();

        if let Err(e) = self.channel.connect(self.remote, &self.credentials) {
            return Err(self.escalate(what, e));
        }
        self.on_established();
        debug!("Session: reconnected (generation {}), retrying {}", self.generation, what);

        match op(&mut self.channel) {
            Ok(v) => Ok(v),
            Err(e) => Err(self.escalate(what, e)),
        }
    }

    fn on_established(&mut self) {
        self.state = SessionState::Connected;
        self.generation = self.generation.wrapping_add(1);
        self.stats.connects += 1;
    }

    fn escalate(&mut self, what: &str, cause: ChannelError) -> TransportError {
        self.channel.close();
        self.state = SessionState::Fatal;
        self.fatal_cause = Some(cause);
        self.stats.fatal_errors += 1;
        error!("Session: {} failed after reconnect ({}), session is fatal", what, cause);
        TransportError::Fatal(cause)
    }

    fn fatal_error(&self) -> TransportError {
        TransportError::Fatal(self.fatal_cause.unwrap_or(ChannelError::NotConnected))
    }
}
