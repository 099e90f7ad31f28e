//! DTLS-PSK datagram channel adapter.
//!
//! Implements [`SecureChannel`] — one UDP socket connected to the
//! LightDB endpoint, wrapped in a DTLS 1.2 session keyed by a pre-shared
//! key and identity.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: lwIP UDP socket + ESP-IDF mbedtls in
//!   DTLS client mode.  The handshake runs non-blocking, bounded by the
//!   configured handshake timeout.
//! - **all other targets**: a `std::net::UdpSocket` carrying plaintext
//!   datagrams, so a local socket can play the server in tests.
//!
//! ## Connection model
//!
//! 1. `connect()` opens the socket, connects it to the remote and (on
//!    device) completes the handshake.  Any previous session is dropped
//!    first.
//! 2. `write()` sends exactly one datagram.
//! 3. `read()` waits up to the given timeout for one datagram and
//!    returns `Ok(0)` when none arrived.
//! 4. `close()` sends close-notify (device) and releases the socket.

use core::time::Duration;
use std::net::SocketAddr;

use log::{debug, info};

use crate::app::ports::SecureChannel;
use crate::config::PskCredentials;
use crate::error::ChannelError;

#[cfg(not(target_os = "espidf"))]
use log::warn;

// ───────────────────────────────────────────────────────────────
// ESP-IDF platform helpers (real lwIP + mbedTLS)
// ───────────────────────────────────────────────────────────────
#[cfg(target_os = "espidf")]
mod esp_impl;

// ───────────────────────────────────────────────────────────────
// DtlsChannel
// ───────────────────────────────────────────────────────────────

pub struct DtlsChannel {
    handshake_timeout: Duration,
    remote: Option<SocketAddr>,

    // ── ESP-IDF fields ──────────────────────────────────────────
    #[cfg(target_os = "espidf")]
    session: Option<esp_impl::EspDtlsSession>,

    // ── Simulation fields ───────────────────────────────────────
    #[cfg(not(target_os = "espidf"))]
    socket: Option<std::net::UdpSocket>,
}

impl DtlsChannel {
    /// Create a closed channel.  `handshake_timeout` bounds each
    /// `connect()` on device; the simulation has no handshake.
    pub fn new(handshake_timeout: Duration) -> Self {
        Self {
            handshake_timeout,
            remote: None,
            #[cfg(target_os = "espidf")]
            session: None,
            #[cfg(not(target_os = "espidf"))]
            socket: None,
        }
    }

    pub fn is_open(&self) -> bool {
        #[cfg(target_os = "espidf")]
        {
            self.session.is_some()
        }
        #[cfg(not(target_os = "espidf"))]
        {
            self.socket.is_some()
        }
    }

    /// Remote of the current (or last) session.
    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    /// Local address of the open socket (simulation only).
    #[cfg(not(target_os = "espidf"))]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    // ── Platform helpers: connect ─────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_connect(
        &mut self,
        remote: SocketAddr,
        credentials: &PskCredentials,
    ) -> Result<(), ChannelError> {
        let session = esp_impl::esp_connect(remote, credentials, self.handshake_timeout)?;
        self.session = Some(session);
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_connect(
        &mut self,
        remote: SocketAddr,
        credentials: &PskCredentials,
    ) -> Result<(), ChannelError> {
        let bind: SocketAddr = if remote.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = std::net::UdpSocket::bind(bind).map_err(|_| ChannelError::Io)?;
        socket.connect(remote).map_err(|_| ChannelError::Io)?;
        debug!(
            "DTLS(sim): identity '{}' (handshake skipped, {:?} budget)",
            credentials.identity.as_str(),
            self.handshake_timeout
        );
        self.socket = Some(socket);
        Ok(())
    }

    // ── Platform helpers: close ───────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_close(&mut self) -> bool {
        // EspDtlsSession::drop() sends close-notify and frees everything.
        self.session.take().is_some()
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_close(&mut self) -> bool {
        self.socket.take().is_some()
    }

    // ── Platform helpers: write ───────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_write(&mut self, datagram: &[u8]) -> Result<usize, ChannelError> {
        let session = self.session.as_mut().ok_or(ChannelError::NotConnected)?;
        esp_impl::esp_write(session, datagram)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_write(&mut self, datagram: &[u8]) -> Result<usize, ChannelError> {
        let socket = self.socket.as_ref().ok_or(ChannelError::NotConnected)?;
        socket.send(datagram).map_err(|e| {
            warn!("DTLS(sim): send failed: {}", e);
            ChannelError::Io
        })
    }

    // ── Platform helpers: read ────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ChannelError> {
        let session = self.session.as_mut().ok_or(ChannelError::NotConnected)?;
        esp_impl::esp_read(session, buf, timeout)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ChannelError> {
        use std::io::ErrorKind;

        let socket = self.socket.as_ref().ok_or(ChannelError::NotConnected)?;
        if timeout.is_zero() {
            socket.set_nonblocking(true).map_err(|_| ChannelError::Io)?;
        } else {
            socket.set_nonblocking(false).map_err(|_| ChannelError::Io)?;
            socket
                .set_read_timeout(Some(timeout))
                .map_err(|_| ChannelError::Io)?;
        }

        match socket.recv(buf) {
            Ok(n) => Ok(n),
            Err(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(0),
            Err(e) => {
                warn!("DTLS(sim): recv failed: {}", e);
                Err(ChannelError::Io)
            }
        }
    }
}

impl Drop for DtlsChannel {
    fn drop(&mut self) {
        self.platform_close();
    }
}

// ───────────────────────────────────────────────────────────────
// SecureChannel implementation
// ───────────────────────────────────────────────────────────────

impl SecureChannel for DtlsChannel {
    fn connect(
        &mut self,
        remote: SocketAddr,
        credentials: &PskCredentials,
    ) -> Result<(), ChannelError> {
        self.platform_close();
        self.remote = Some(remote);
        self.platform_connect(remote, credentials)?;
        info!("DTLS: session open to {}", remote);
        Ok(())
    }

    fn write(&mut self, datagram: &[u8]) -> Result<usize, ChannelError> {
        self.platform_write(datagram)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ChannelError> {
        self.platform_read(buf, timeout)
    }

    fn close(&mut self) {
        if self.platform_close() {
            info!("DTLS: session closed");
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Tests (host / simulation path only)
// ───────────────────────────────────────────────────────────────
