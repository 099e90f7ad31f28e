//! Device task bodies.
//!
//! [`DeviceTasks`] is the device context: it owns the LightDB client (and
//! through it the session, dispatcher, handler and outputs) plus the
//! watchdog.  The scheduler calls [`SchedulerDelegate::on_task_due`] and
//! each arm runs one synchronous action.
//!
//! | Task         | Action                                              |
//! |--------------|-----------------------------------------------------|
//! | Keepalive    | ping (or restart a fatal session), log diagnostics  |
//! | Poll         | drain inbound datagrams into the dispatcher         |
//! | Telemetry    | write the counter to `.d/<telemetry_key>`           |
//! | WatchdogFeed | feed the TWDT unless recovery says to starve it     |

use core::fmt::Write as _;

use log::{debug, error, info, warn};

use crate::app::decoder::JsonStateDecoder;
use crate::app::handler::OutputStateHandler;
use crate::app::ports::{OutputPort, SchedulerDelegate, SecureChannel, StateDecoder, WatchdogPort};
use crate::client::LightDbClient;
use crate::coap::ContentFormat;
use crate::config::{ClientConfig, RecoveryPolicy};
use crate::diagnostics::RuntimeMetrics;
use crate::error::{ChannelError, Error, TransportError};
use crate::scheduler::TaskKind;

/// Client type driven by the tasks.
pub type DeviceClient<C, O, D = JsonStateDecoder> = LightDbClient<C, OutputStateHandler<O, D>>;

pub struct DeviceTasks<C, O, D, W>
where
    C: SecureChannel,
    O: OutputPort,
    D: StateDecoder,
    W: WatchdogPort,
{
    client: DeviceClient<C, O, D>,
    watchdog: W,
    telemetry_key: heapless::String<32>,
    recovery: RecoveryPolicy,
    max_fatal_streak: u32,
    /// Next telemetry value; advances only after a successful publish.
    counter: u32,
    /// Consecutive keepalive rounds that ended with a fatal session.
    fatal_streak: u32,
    starving: bool,
}

impl<C, O, D, W> DeviceTasks<C, O, D, W>
where
    C: SecureChannel,
    O: OutputPort,
    D: StateDecoder,
    W: WatchdogPort,
{
    /// Take ownership of the client and watchdog; all outputs go off.
    pub fn new(mut client: DeviceClient<C, O, D>, watchdog: W, cfg: &ClientConfig) -> Self {
        client.handler_mut().outputs_mut().all_off();
        Self {
            client,
            watchdog,
            telemetry_key: cfg.telemetry_key.clone(),
            recovery: cfg.recovery,
            max_fatal_streak: cfg.max_fatal_streak,
            counter: 0,
            fatal_streak: 0,
            starving: false,
        }
    }

    pub fn client(&self) -> &DeviceClient<C, O, D> {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut DeviceClient<C, O, D> {
        &mut self.client
    }

    pub fn watchdog(&self) -> &W {
        &self.watchdog
    }

    /// Next value the telemetry task will publish.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn fatal_streak(&self) -> u32 {
        self.fatal_streak
    }

    /// Close the session and switch every output off.
    pub fn shutdown(&mut self) {
        self.client.close();
        self.client.handler_mut().outputs_mut().all_off();
        info!("Tasks: shut down (counter={})", self.counter);
    }

    // ── Task bodies ───────────────────────────────────────────

    fn keepalive(&mut self, now_ms: u64) {
        let recovering = self.client.session().is_fatal();
        let result = match (recovering, self.recovery) {
            (false, _) => self.client.ping().map(|_| ()),
            (true, RecoveryPolicy::Restart) => {
                warn!("Keepalive: session fatal, restarting");
                self.client.restart()
            }
            (true, RecoveryPolicy::WatchdogReset) => {
                Err(Error::Transport(TransportError::Fatal(ChannelError::NotConnected)))
            }
        };

        match result {
            Ok(()) => {
                if self.fatal_streak > 0 {
                    info!("Keepalive: link recovered after {} fatal round(s)", self.fatal_streak);
                }
                self.fatal_streak = 0;
            }
            Err(e) if is_fatal(&e) => {
                self.fatal_streak = self.fatal_streak.saturating_add(1);
                error!(
                    "Keepalive: {} (fatal streak {}/{})",
                    e, self.fatal_streak, self.max_fatal_streak
                );
            }
            Err(e) => warn!("Keepalive: {}", e),
        }

        info!(
            "Keepalive: {} | {} | {}",
            self.client.session().stats(),
            self.client.dispatcher().stats(),
            RuntimeMetrics::collect(now_ms / 1_000)
        );
    }

    fn poll(&mut self) {
        if self.client.session().is_fatal() {
            debug!("Poll: session fatal, skipped");
            return;
        }
        match self.client.poll() {
            Ok(report) if report.received > 0 => debug!("Poll: {:?}", report),
            Ok(_) => {}
            Err(e) if e.is_fatal() => error!("Poll: {}", e),
            Err(e) => warn!("Poll: {}", e),
        }
    }

    fn telemetry(&mut self) {
        if self.client.session().is_fatal() {
            debug!("Telemetry: session fatal, counter held at {}", self.counter);
            return;
        }
        let mut value: heapless::String<10> = heapless::String::new();
        // u32::MAX has 10 digits.
        let _ = write!(value, "{}", self.counter);

        match self
            .client
            .set(&self.telemetry_key, value.as_bytes(), ContentFormat::TextPlain)
        {
            Ok(id) => {
                debug!("Telemetry: {}={} (id={})", self.telemetry_key, value, id);
                self.counter = self.counter.wrapping_add(1);
            }
            Err(e) if is_fatal(&e) => error!("Telemetry: {}", e),
            Err(e) => warn!("Telemetry: {}", e),
        }
    }

    fn feed_watchdog(&mut self) {
        let withhold = (self.recovery == RecoveryPolicy::WatchdogReset
            && self.client.session().is_fatal())
            || self.fatal_streak >= self.max_fatal_streak;

        if withhold {
            if !self.starving {
                error!(
                    "Watchdog: withholding feed (policy {:?}, fatal streak {}), expecting reset",
                    self.recovery, self.fatal_streak
                );
            }
            self.starving = true;
            return;
        }
        self.starving = false;
        self.watchdog.feed();
    }
}

impl<C, O, D, W> SchedulerDelegate for DeviceTasks<C, O, D, W>
where
    C: SecureChannel,
    O: OutputPort,
    D: StateDecoder,
    W: WatchdogPort,
{
    fn on_task_due(&mut self, kind: TaskKind, now_ms: u64) {
        match kind {
            TaskKind::Keepalive => self.keepalive(now_ms),
            TaskKind::Poll => self.poll(),
            TaskKind::Telemetry => self.telemetry(),
            TaskKind::WatchdogFeed => self.feed_watchdog(),
        }
    }
}

fn is_fatal(e: &Error) -> bool {
    matches!(e, Error::Transport(t) if t.is_fatal())
}
