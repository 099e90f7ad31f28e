//! LightDB Node Firmware — Main Entry Point
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  DtlsChannel    NvsAdapter    WifiAdapter    MonotonicClock    │
//! │  (SecureChannel)(ConfigPort)  (Connectivity) (Clock)           │
//! │  LedBank (OutputPort)         Watchdog (WatchdogPort)          │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │  LightDbClient: TransportSession · MessageDispatcher   │    │
//! │  │  OutputStateHandler (JSON state → LEDs)                │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  Scheduler → DeviceTasks (keepalive · poll · telemetry · wdt)  │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use core::time::Duration;

use anyhow::Result;
use log::{info, warn};

use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::gpio::{OutputPin, PinDriver};
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{BlockingWifi, EspWifi};

use lightdb_node::adapters::dtls_channel::DtlsChannel;
use lightdb_node::adapters::nvs::NvsAdapter;
use lightdb_node::adapters::time::MonotonicClock;
use lightdb_node::adapters::wifi::{DEFAULT_MAX_ATTEMPTS, WifiAdapter};
use lightdb_node::app::decoder::JsonStateDecoder;
use lightdb_node::app::handler::OutputStateHandler;
use lightdb_node::app::ports::{ConfigPort, ConnectivityPort};
use lightdb_node::client::{LightDbClient, MessageDispatcher, MessageIdAllocator, TransportSession};
use lightdb_node::config::ClientConfig;
use lightdb_node::drivers::leds::LedBank;
use lightdb_node::drivers::watchdog::Watchdog;
use lightdb_node::error::{ConfigError, Error};
use lightdb_node::scheduler::Scheduler;
use lightdb_node::tasks::DeviceTasks;
use lightdb_node::{diagnostics, runtime};

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  LightDB node v{}                    ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    diagnostics::install_panic_handler();

    // ── 2. Configuration: NVS → build env → defaults ─────────
    let nvs = NvsAdapter::new().map_err(Error::from)?;
    let (config, stored) = match nvs.load() {
        Ok(cfg) => {
            info!("Config loaded from NVS");
            (cfg, true)
        }
        Err(ConfigError::NotFound) => (ClientConfig::default(), false),
        Err(e) => {
            warn!("NVS config load failed ({}), using defaults", e);
            (ClientConfig::default(), false)
        }
    };
    let config = config.with_build_env();
    config.validate().map_err(Error::from)?;
    if !stored {
        if let Err(e) = nvs.save(&config) {
            warn!("Config not persisted ({})", e);
        }
    }

    // ── 3. Wi-Fi association ──────────────────────────────────
    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    let wifi = BlockingWifi::wrap(
        EspWifi::new(peripherals.modem, sysloop.clone(), Some(nvs_partition))?,
        sysloop,
    )?;
    let mut wifi = WifiAdapter::new(wifi, DEFAULT_MAX_ATTEMPTS);
    wifi.associate(&config.wifi_ssid, &config.wifi_password)?;

    // ── 4. Outputs + watchdog ─────────────────────────────────
    // Four LEDs, sinking current through the GPIO (active-low).
    let leds = LedBank::new(
        [
            PinDriver::output(peripherals.pins.gpio5.downgrade_output())?,
            PinDriver::output(peripherals.pins.gpio18.downgrade_output())?,
            PinDriver::output(peripherals.pins.gpio23.downgrade_output())?,
            PinDriver::output(peripherals.pins.gpio19.downgrade_output())?,
        ],
        true,
    );
    let watchdog = Watchdog::new(config.watchdog_timeout_ms);

    // ── 5. LightDB client ─────────────────────────────────────
    let remote = config.remote_addr().map_err(Error::from)?;
    let channel = DtlsChannel::new(Duration::from_millis(config.handshake_timeout_ms.into()));
    let session = TransportSession::new(
        channel,
        remote,
        config.credentials(),
        Duration::from_millis(config.read_timeout_ms.into()),
    );
    let dispatcher = MessageDispatcher::new(
        OutputStateHandler::new(leds, JsonStateDecoder),
        config.liveness_policy,
    );
    // SAFETY: esp_random reads the hardware RNG.
    let seed = unsafe { esp_idf_svc::sys::esp_random() } as u16;
    let client = LightDbClient::new(session, dispatcher, MessageIdAllocator::new(seed));

    let mut tasks = DeviceTasks::new(client, watchdog, &config);

    // ── 6. Connect + observe ──────────────────────────────────
    // A failed first connect is retried by the first read or write.
    if let Err(e) = tasks.client_mut().connect() {
        warn!("Initial connect failed ({}), tasks will retry", e);
    }
    if let Err(e) = tasks.client_mut().observe(&config.observe_key) {
        warn!("Observe .d/{} failed ({})", config.observe_key, e);
    }
    if config.observe_desired {
        if let Err(e) = tasks.client_mut().observe_desired() {
            warn!("Observe .u/desired failed ({})", e);
        }
    }

    // ── 7. Scheduler ──────────────────────────────────────────
    let mut scheduler = Scheduler::from_config(&config).map_err(Error::from)?;
    let clock = MonotonicClock::new();

    info!("System ready. Entering scheduler.");
    runtime::run_forever(&mut scheduler, &mut tasks, &clock)
}
