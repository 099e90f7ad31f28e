//! Device task bodies driven directly and through the runtime: telemetry
//! sequencing, keepalive recovery and the watchdog feed policy.

use lightdb_node::adapters::time::MonotonicClock;
use lightdb_node::app::decoder::JsonStateDecoder;
use lightdb_node::app::ports::SchedulerDelegate;
use lightdb_node::client::SessionState;
use lightdb_node::coap::MessageKind;
use lightdb_node::config::{ClientConfig, LivenessPolicy, RecoveryPolicy};
use lightdb_node::runtime;
use lightdb_node::scheduler::{Scheduler, TaskKind, TaskSpec};
use lightdb_node::tasks::DeviceTasks;

use crate::mock_io::*;

type Tasks = DeviceTasks<MockChannel, MockOutputs, JsonStateDecoder, MockWatchdog>;

struct Rig {
    net: MockChannel,
    outputs: MockOutputs,
    watchdog: MockWatchdog,
    tasks: Tasks,
}

fn rig(cfg: &ClientConfig) -> Rig {
    let net = MockChannel::default();
    let outputs = MockOutputs::default();
    let watchdog = MockWatchdog::default();
    let mut client = client(&net, &outputs, LivenessPolicy::Suppress);
    client.connect().unwrap();
    let tasks = DeviceTasks::new(client, watchdog.clone(), cfg);
    Rig {
        net,
        outputs,
        watchdog,
        tasks,
    }
}

/// Payloads of every datagram written so far.
fn payloads(net: &MockChannel) -> Vec<String> {
    net.sent()
        .iter()
        .map(|d| String::from_utf8_lossy(decode(d).payload).into_owned())
        .collect()
}

/// Turn the session fatal with a telemetry publish that fails twice.
fn make_fatal(r: &mut Rig) {
    r.net.fail_writes(2);
    r.tasks.on_task_due(TaskKind::Telemetry, 0);
    assert_eq!(r.tasks.client().state(), SessionState::Fatal);
}

// ── Construction / shutdown ───────────────────────────────────

#[test]
fn new_switches_every_output_off() {
    let r = rig(&config());
    assert_eq!(r.outputs.writes(), 4);
    assert_eq!(r.outputs.levels(), [false; 4]);
}

#[test]
fn shutdown_closes_session_and_clears_outputs() {
    let mut r = rig(&config());
    let id = r.tasks.client_mut().observe("led").unwrap();
    r.net.push_inbound(notification(0x2000, id.value(), 1, br#"{"0":true,"1":true}"#));
    r.tasks.on_task_due(TaskKind::Poll, 0);
    assert_eq!(r.outputs.levels(), [true, true, false, false]);

    r.tasks.shutdown();

    assert_eq!(r.outputs.levels(), [false; 4]);
    assert!(!r.net.0.borrow().connected);
    assert_eq!(r.tasks.client().dispatcher().observation_count(), 0);
}

// ── Telemetry ─────────────────────────────────────────────────

#[test]
fn telemetry_publishes_sequential_counter() {
    let mut r = rig(&config());
    for _ in 0..5 {
        r.tasks.on_task_due(TaskKind::Telemetry, 0);
    }

    assert_eq!(payloads(&r.net), ["0", "1", "2", "3", "4"]);
    assert!(r.net.sent().iter().all(|d| uri_path(d) == ".d/counter"));
    assert_eq!(r.tasks.counter(), 5);
}

#[test]
fn telemetry_holds_counter_until_restart() {
    let mut r = rig(&config());
    r.tasks.on_task_due(TaskKind::Telemetry, 0);
    make_fatal(&mut r);
    assert_eq!(r.tasks.counter(), 1);

    // Skipped while fatal: nothing reaches the channel.
    let attempts = r.net.write_attempts();
    r.tasks.on_task_due(TaskKind::Telemetry, 0);
    assert_eq!(r.net.write_attempts(), attempts);

    r.tasks.on_task_due(TaskKind::Keepalive, 10_000);
    assert_eq!(r.tasks.client().state(), SessionState::Connected);

    r.tasks.on_task_due(TaskKind::Telemetry, 10_000);
    assert_eq!(payloads(&r.net), ["0", "1"]);
    assert_eq!(r.tasks.counter(), 2);
}

// ── Keepalive / poll ──────────────────────────────────────────

#[test]
fn keepalive_sends_ping() {
    let mut r = rig(&config());
    r.tasks.on_task_due(TaskKind::Keepalive, 0);

    let sent = r.net.sent();
    assert_eq!(sent.len(), 1);
    let p = decode(&sent[0]);
    assert_eq!(p.kind, MessageKind::Confirmable);
    assert!(p.code.is_empty());
    assert_eq!(r.tasks.fatal_streak(), 0);
}

#[test]
fn poll_skipped_while_fatal() {
    let mut r = rig(&config());
    make_fatal(&mut r);
    r.net.push_inbound(server_packet(1, 0x2100, &[], None, b"OK"));

    r.tasks.on_task_due(TaskKind::Poll, 0);

    assert_eq!(r.net.0.borrow().inbound.len(), 1);
}

#[test]
fn failed_restart_is_retried_and_re_observes() {
    let mut r = rig(&config());
    r.tasks.client_mut().observe("led").unwrap();
    make_fatal(&mut r);
    r.net.fail_connects(1);

    r.tasks.on_task_due(TaskKind::Keepalive, 0);
    assert_eq!(r.tasks.client().state(), SessionState::Fatal);
    assert_eq!(r.tasks.fatal_streak(), 1);

    // Nothing reconnects behind the keepalive's back.
    r.tasks.on_task_due(TaskKind::Poll, 500);
    assert_eq!(r.tasks.client().state(), SessionState::Fatal);
    r.net.take_sent();

    r.tasks.on_task_due(TaskKind::Keepalive, 10_000);
    assert_eq!(r.tasks.client().state(), SessionState::Connected);
    assert_eq!(r.tasks.fatal_streak(), 0);

    let sent = r.net.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(uri_path(&sent[0]), ".d/led");
    let observe_id = decode(&sent[0]).message_id;

    r.net.push_inbound(notification(0x2400, observe_id, 2, br#"{"3":true}"#));
    r.tasks.on_task_due(TaskKind::Poll, 10_500);
    assert!(r.outputs.levels()[3]);
    assert_eq!(r.tasks.client().dispatcher().stats().uncorrelated, 0);
}

// ── Watchdog ──────────────────────────────────────────────────

#[test]
fn watchdog_fed_while_healthy() {
    let mut r = rig(&config());
    for _ in 0..3 {
        r.tasks.on_task_due(TaskKind::WatchdogFeed, 0);
    }
    assert_eq!(r.watchdog.feeds(), 3);
}

#[test]
fn watchdog_reset_policy_withholds_feed_once_fatal() {
    let mut cfg = config();
    cfg.recovery = RecoveryPolicy::WatchdogReset;
    let mut r = rig(&cfg);
    r.tasks.on_task_due(TaskKind::WatchdogFeed, 0);
    make_fatal(&mut r);

    r.tasks.on_task_due(TaskKind::WatchdogFeed, 0);
    r.tasks.on_task_due(TaskKind::Keepalive, 0);
    r.tasks.on_task_due(TaskKind::WatchdogFeed, 0);

    assert_eq!(r.watchdog.feeds(), 1);
    // No restart under this policy.
    assert_eq!(r.tasks.client().state(), SessionState::Fatal);
    assert_eq!(r.tasks.fatal_streak(), 1);
}

#[test]
fn fatal_streak_starves_watchdog_until_recovery() {
    let mut cfg = config();
    cfg.max_fatal_streak = 2;
    let mut r = rig(&cfg);
    make_fatal(&mut r);
    r.net.fail_connects(10);

    // Each keepalive attempts a restart and fails.
    r.tasks.on_task_due(TaskKind::Keepalive, 0);
    assert_eq!(r.tasks.fatal_streak(), 1);
    r.tasks.on_task_due(TaskKind::WatchdogFeed, 0);
    assert_eq!(r.watchdog.feeds(), 1);

    r.tasks.on_task_due(TaskKind::Keepalive, 10_000);
    assert_eq!(r.tasks.fatal_streak(), 2);
    r.tasks.on_task_due(TaskKind::WatchdogFeed, 10_000);
    assert_eq!(r.watchdog.feeds(), 1);

    r.net.fail_connects(0);
    r.tasks.on_task_due(TaskKind::Keepalive, 20_000);
    assert_eq!(r.tasks.fatal_streak(), 0);
    r.tasks.on_task_due(TaskKind::WatchdogFeed, 20_000);
    assert_eq!(r.watchdog.feeds(), 2);
}

// ── Runtime ───────────────────────────────────────────────────

#[test]
fn runtime_drives_telemetry_in_order() {
    let mut r = rig(&config());
    let clock = MonotonicClock::new();
    let mut sched = Scheduler::new(&[
        TaskSpec::new(TaskKind::WatchdogFeed, 10),
        TaskSpec::new(TaskKind::Telemetry, 20),
    ])
    .unwrap();

    runtime::run_for(&mut sched, &mut r.tasks, &clock, 100);

    let fires = sched.fire_count(TaskKind::Telemetry);
    assert!(fires >= 5, "telemetry fired {} times", fires);
    let expected: Vec<String> = (0..fires).map(|n| n.to_string()).collect();
    assert_eq!(payloads(&r.net), expected);
    assert_eq!(u64::from(r.watchdog.feeds()), sched.fire_count(TaskKind::WatchdogFeed));
}
