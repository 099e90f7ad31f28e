//! ESP-IDF platform helpers for `DtlsChannel`.
//!
//! Compiled only for `target_os = "espidf"`: an lwIP UDP socket connected
//! to the server and an mbedTLS DTLS client session keyed with PSK.
//!
//! All items are `pub(super)` to keep them private to the adapter.

use core::ffi::{c_int, c_void};
use core::time::Duration;
use std::net::SocketAddr;

use log::{info, warn};

use esp_idf_svc::sys::{
    AF_INET, EAGAIN, F_SETFL, MBEDTLS_ERR_SSL_PEER_CLOSE_NOTIFY, MBEDTLS_ERR_SSL_TIMEOUT,
    MBEDTLS_ERR_SSL_WANT_READ, MBEDTLS_ERR_SSL_WANT_WRITE, MBEDTLS_SSL_IS_CLIENT,
    MBEDTLS_SSL_PRESET_DEFAULT, MBEDTLS_SSL_TRANSPORT_DATAGRAM, MBEDTLS_SSL_VERIFY_NONE,
    O_NONBLOCK, SOCK_DGRAM, esp_timer_get_time, in_addr, lwip_close, lwip_connect, lwip_fcntl,
    lwip_htons, lwip_recv, lwip_send, lwip_socket, mbedtls_ctr_drbg_context,
    mbedtls_ctr_drbg_free, mbedtls_ctr_drbg_init, mbedtls_ctr_drbg_random, mbedtls_ctr_drbg_seed,
    mbedtls_entropy_context, mbedtls_entropy_free, mbedtls_entropy_func, mbedtls_entropy_init,
    mbedtls_ssl_close_notify, mbedtls_ssl_conf_authmode, mbedtls_ssl_conf_handshake_timeout,
    mbedtls_ssl_conf_psk, mbedtls_ssl_conf_rng, mbedtls_ssl_config, mbedtls_ssl_config_defaults,
    mbedtls_ssl_config_free, mbedtls_ssl_config_init, mbedtls_ssl_context, mbedtls_ssl_free,
    mbedtls_ssl_handshake, mbedtls_ssl_init, mbedtls_ssl_read, mbedtls_ssl_set_bio,
    mbedtls_ssl_set_timer_cb, mbedtls_ssl_setup, mbedtls_ssl_write, sockaddr_in, vTaskDelay,
};

use crate::config::PskCredentials;
use crate::error::ChannelError;

/// DTLS retransmission window (RFC 6347 defaults are 1s..60s; the
/// upper bound is clamped to the handshake budget).
const HANDSHAKE_MIN_MS: u32 = 1_000;

const DRBG_LABEL: &[u8] = b"lightdb-node-dtls";

// ── BIO callbacks ─────────────────────────────────────────────────────────────
//
// The connected socket fd travels through the `p_bio` context pointer.

/// mbedTLS send BIO callback; one call is one datagram.
///
/// # Safety
///
/// `ctx` must be a socket fd cast to `*mut c_void`, valid for the whole
/// session (owned by `EspDtlsSession::fd`).
unsafe extern "C" fn bio_send(ctx: *mut c_void, buf: *const u8, len: usize) -> c_int {
    let fd = ctx as c_int;
    let ret = unsafe { lwip_send(fd, buf as *const c_void, len, 0) } as c_int;
    if ret < 0 && last_errno() == EAGAIN as i32 {
        return MBEDTLS_ERR_SSL_WANT_WRITE;
    }
    ret
}

/// mbedTLS recv BIO callback; returns at most one datagram.
///
/// # Safety
///
/// Same invariants as `bio_send`.
unsafe extern "C" fn bio_recv(ctx: *mut c_void, buf: *mut u8, len: usize) -> c_int {
    let fd = ctx as c_int;
    let ret = unsafe { lwip_recv(fd, buf as *mut c_void, len, 0) } as c_int;
    if ret < 0 && last_errno() == EAGAIN as i32 {
        return MBEDTLS_ERR_SSL_WANT_READ;
    }
    ret
}

fn last_errno() -> i32 {
    // SAFETY: __errno() points at the calling task's errno slot.
    unsafe { *esp_idf_svc::sys::__errno() }
}

fn now_ms() -> i64 {
    // SAFETY: reads the 64-bit system timer.
    unsafe { esp_timer_get_time() / 1_000 }
}

// ── DTLS timer callbacks ──────────────────────────────────────────────────────
//
// mbedTLS drives DTLS retransmission through a pair of set/get callbacks.
// The state lives in a boxed `DtlsTimer` owned by the session.

#[derive(Default)]
struct DtlsTimer {
    started_ms: i64,
    intermediate_ms: u32,
    final_ms: u32,
}

/// # Safety
///
/// `ctx` must point at the session's live `DtlsTimer`.
unsafe extern "C" fn timer_set(ctx: *mut c_void, int_ms: u32, fin_ms: u32) {
    let timer = unsafe { &mut *(ctx as *mut DtlsTimer) };
    timer.started_ms = now_ms();
    timer.intermediate_ms = int_ms;
    timer.final_ms = fin_ms;
}

/// Returns -1 when cancelled, 0 when nothing expired, 1 after the
/// intermediate delay and 2 after the final delay.
///
/// # Safety
///
/// Same invariants as `timer_set`.
unsafe extern "C" fn timer_get(ctx: *mut c_void) -> c_int {
    let timer = unsafe { &*(ctx as *const DtlsTimer) };
    if timer.final_ms == 0 {
        return -1;
    }
    let elapsed = now_ms() - timer.started_ms;
    if elapsed >= i64::from(timer.final_ms) {
        2
    } else if elapsed >= i64::from(timer.intermediate_ms) {
        1
    } else {
        0
    }
}

// ── Session state ─────────────────────────────────────────────────────────────

/// One DTLS session: socket, mbedTLS config and context, RNG and timer.
/// Everything is boxed so the addresses handed to mbedTLS stay stable.
pub(super) struct EspDtlsSession {
    fd: c_int,
    ssl: Box<mbedtls_ssl_context>,
    conf: Box<mbedtls_ssl_config>,
    entropy: Box<mbedtls_entropy_context>,
    drbg: Box<mbedtls_ctr_drbg_context>,
    timer: Box<DtlsTimer>,
    established: bool,
}

unsafe impl Send for EspDtlsSession {}

impl Drop for EspDtlsSession {
    fn drop(&mut self) {
        // SAFETY: every context was initialised in `esp_connect` before the
        // session was constructed; each is freed exactly once, ssl first
        // because it references conf.
        unsafe {
            if self.established {
                mbedtls_ssl_close_notify(self.ssl.as_mut());
            }
            mbedtls_ssl_free(self.ssl.as_mut());
            mbedtls_ssl_config_free(self.conf.as_mut());
            mbedtls_ctr_drbg_free(self.drbg.as_mut());
            mbedtls_entropy_free(self.entropy.as_mut());
            lwip_close(self.fd);
        }
    }
}

// ── Public helpers ────────────────────────────────────────────────────────────

/// Open a UDP socket to `remote` and complete a DTLS-PSK handshake within
/// `handshake_timeout`.
pub(super) fn esp_connect(
    remote: SocketAddr,
    credentials: &PskCredentials,
    handshake_timeout: Duration,
) -> Result<EspDtlsSession, ChannelError> {
    let SocketAddr::V4(v4) = remote else {
        warn!("DTLS(espidf): IPv6 remote {} not supported", remote);
        return Err(ChannelError::Io);
    };

    // ── Step 1: connected UDP socket ──────────────────────────────────────
    // SAFETY: lwIP socket call with valid domain/type/protocol.
    let fd = unsafe { lwip_socket(AF_INET as _, SOCK_DGRAM as _, 0) };
    if fd < 0 {
        warn!("DTLS(espidf): lwip_socket failed ({})", fd);
        return Err(ChannelError::Io);
    }

    let addr = sockaddr_in {
        sin_len: core::mem::size_of::<sockaddr_in>() as _,
        sin_family: AF_INET as _,
        // SAFETY: lwip_htons converts to network byte order.
        sin_port: unsafe { lwip_htons(v4.port()) },
        sin_addr: in_addr {
            s_addr: u32::from_ne_bytes(v4.ip().octets()),
        },
        sin_zero: [0u8; 8],
    };

    // SAFETY: `addr` is valid for the connect() call; errors are checked.
    let rc = unsafe {
        lwip_connect(
            fd,
            core::ptr::addr_of!(addr).cast(),
            core::mem::size_of::<sockaddr_in>() as _,
        )
    };
    if rc < 0 {
        unsafe {
            lwip_close(fd);
        }
        warn!("DTLS(espidf): lwip_connect failed ({})", rc);
        return Err(ChannelError::Io);
    }

    // SAFETY: F_SETFL + O_NONBLOCK is a valid fcntl for sockets.
    let rc = unsafe { lwip_fcntl(fd, F_SETFL as _, O_NONBLOCK as _) };
    if rc < 0 {
        unsafe {
            lwip_close(fd);
        }
        warn!("DTLS(espidf): O_NONBLOCK failed ({})", rc);
        return Err(ChannelError::Io);
    }

    // ── Step 2: mbedTLS config + context ──────────────────────────────────
    let mut session = EspDtlsSession {
        fd,
        ssl: Box::new(mbedtls_ssl_context::default()),
        conf: Box::new(mbedtls_ssl_config::default()),
        entropy: Box::new(mbedtls_entropy_context::default()),
        drbg: Box::new(mbedtls_ctr_drbg_context::default()),
        timer: Box::new(DtlsTimer::default()),
        established: false,
    };

    let budget_ms = u32::try_from(handshake_timeout.as_millis()).unwrap_or(u32::MAX);

    // SAFETY: all pointers come from the session's boxes, which outlive the
    // mbedTLS contexts that reference them.  Init calls happen before the
    // session can be dropped, so Drop always frees initialised contexts.
    unsafe {
        mbedtls_entropy_init(session.entropy.as_mut());
        mbedtls_ctr_drbg_init(session.drbg.as_mut());
        mbedtls_ssl_config_init(session.conf.as_mut());
        mbedtls_ssl_init(session.ssl.as_mut());

        let rc = mbedtls_ctr_drbg_seed(
            session.drbg.as_mut(),
            Some(mbedtls_entropy_func),
            session.entropy.as_mut() as *mut _ as *mut c_void,
            DRBG_LABEL.as_ptr(),
            DRBG_LABEL.len(),
        );
        if rc != 0 {
            warn!("DTLS(espidf): ctr_drbg_seed failed (rc={})", rc);
            return Err(ChannelError::Handshake);
        }

        let rc = mbedtls_ssl_config_defaults(
            session.conf.as_mut(),
            MBEDTLS_SSL_IS_CLIENT as _,
            MBEDTLS_SSL_TRANSPORT_DATAGRAM as _,
            MBEDTLS_SSL_PRESET_DEFAULT as _,
        );
        if rc != 0 {
            warn!("DTLS(espidf): ssl_config_defaults failed (rc={})", rc);
            return Err(ChannelError::Handshake);
        }

        // PSK authenticates both sides; no certificates.
        mbedtls_ssl_conf_authmode(session.conf.as_mut(), MBEDTLS_SSL_VERIFY_NONE as _);
        mbedtls_ssl_conf_rng(
            session.conf.as_mut(),
            Some(mbedtls_ctr_drbg_random),
            session.drbg.as_mut() as *mut _ as *mut c_void,
        );
        mbedtls_ssl_conf_handshake_timeout(
            session.conf.as_mut(),
            HANDSHAKE_MIN_MS.min(budget_ms),
            budget_ms.max(HANDSHAKE_MIN_MS),
        );

        let rc = mbedtls_ssl_conf_psk(
            session.conf.as_mut(),
            credentials.key.as_ptr(),
            credentials.key.len(),
            credentials.identity.as_ptr(),
            credentials.identity.len(),
        );
        if rc != 0 {
            warn!("DTLS(espidf): ssl_conf_psk failed (rc={})", rc);
            return Err(ChannelError::Handshake);
        }

        let rc = mbedtls_ssl_setup(session.ssl.as_mut(), session.conf.as_ref());
        if rc != 0 {
            warn!("DTLS(espidf): ssl_setup failed (rc={})", rc);
            return Err(ChannelError::Handshake);
        }

        mbedtls_ssl_set_bio(
            session.ssl.as_mut(),
            fd as usize as *mut c_void,
            Some(bio_send),
            Some(bio_recv),
            None,
        );
        mbedtls_ssl_set_timer_cb(
            session.ssl.as_mut(),
            session.timer.as_mut() as *mut DtlsTimer as *mut c_void,
            Some(timer_set),
            Some(timer_get),
        );
    }

    // ── Step 3: non-blocking handshake, bounded by the budget ─────────────
    let deadline = now_ms() + i64::from(budget_ms);
    loop {
        // SAFETY: ssl is set up with BIO and timer callbacks.
        let rc = unsafe { mbedtls_ssl_handshake(session.ssl.as_mut()) };
        if rc == 0 {
            break;
        }
        if rc == MBEDTLS_ERR_SSL_WANT_READ || rc == MBEDTLS_ERR_SSL_WANT_WRITE {
            if now_ms() >= deadline {
                warn!("DTLS(espidf): handshake timed out after {}ms", budget_ms);
                return Err(ChannelError::Handshake);
            }
            // Yield one tick so lwIP can deliver in-flight datagrams.
            unsafe { vTaskDelay(1) };
            continue;
        }
        warn!("DTLS(espidf): handshake failed (rc={})", rc);
        return Err(ChannelError::Handshake);
    }

    session.established = true;
    info!("DTLS(espidf): PSK handshake complete with {} (fd={})", remote, fd);
    Ok(session)
}

/// Send one datagram through the session.
pub(super) fn esp_write(session: &mut EspDtlsSession, data: &[u8]) -> Result<usize, ChannelError> {
    loop {
        // SAFETY: ssl is established; data is a valid slice.
        let rc = unsafe { mbedtls_ssl_write(session.ssl.as_mut(), data.as_ptr(), data.len()) };
        if rc >= 0 {
            return Ok(rc as usize);
        }
        if rc == MBEDTLS_ERR_SSL_WANT_WRITE {
            unsafe { vTaskDelay(1) };
            continue;
        }
        warn!("DTLS(espidf): ssl_write error (rc={})", rc);
        return Err(ChannelError::Io);
    }
}

/// Read one datagram, waiting at most `timeout`.  `Ok(0)` when none arrived.
pub(super) fn esp_read(
    session: &mut EspDtlsSession,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<usize, ChannelError> {
    let deadline = now_ms() + i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX / 2);
    loop {
        // SAFETY: ssl is established; buf is a valid mutable slice.
        let rc = unsafe { mbedtls_ssl_read(session.ssl.as_mut(), buf.as_mut_ptr(), buf.len()) };
        if rc > 0 {
            return Ok(rc as usize);
        }
        if rc == MBEDTLS_ERR_SSL_WANT_READ || rc == MBEDTLS_ERR_SSL_TIMEOUT {
            if now_ms() >= deadline {
                return Ok(0);
            }
            unsafe { vTaskDelay(1) };
            continue;
        }
        if rc == MBEDTLS_ERR_SSL_PEER_CLOSE_NOTIFY || rc == 0 {
            warn!("DTLS(espidf): peer closed the session");
            session.established = false;
            return Err(ChannelError::NotConnected);
        }
        warn!("DTLS(espidf): ssl_read error (rc={})", rc);
        return Err(ChannelError::Io);
    }
}
