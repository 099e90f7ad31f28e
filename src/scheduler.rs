//! Cooperative periodic task scheduler.
//!
//! Every task is "run the action, then sleep one period".  The scheduler
//! keeps one wake time per task and is advanced by a single driver loop
//! ([`runtime`](crate::runtime)); the only suspension point is the driver's
//! timer between ticks, so no task body is ever interleaved with another.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Driver loop                           │
//! │                                                              │
//! │   now ──▶ Scheduler::tick ──▶ earliest due task first        │
//! │                  │                                           │
//! │   ┌───────────┐  ┌──────────┐  ┌───────────┐  ┌──────────┐   │
//! │   │ Keepalive │  │  Poll    │  │ Telemetry │  │ Watchdog │   │
//! │   │   10 s    │  │  500 ms  │  │    5 s    │  │  ≤ T/2   │   │
//! │   └─────┬─────┘  └────┬─────┘  └─────┬─────┘  └────┬─────┘   │
//! │         ▼             ▼              ▼             ▼         │
//! │   ┌──────────────────────────────────────────────────────┐   │
//! │   │        SchedulerDelegate::on_task_due                │   │
//! │   └──────────────────────────────────────────────────────┘   │
//! │                                                              │
//! │   sleep until Scheduler::next_wake_ms                        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! All tasks fire once at start.  A period missed while another body ran
//! long is caught up on the next tick, so over any run of length `T` each
//! task fires at least `floor(T / period)` times.

use log::{debug, info};

use crate::app::ports::SchedulerDelegate;
use crate::config::ClientConfig;
use crate::error::ConfigError;

// ═══════════════════════════════════════════════════════════════
//  Task types
// ═══════════════════════════════════════════════════════════════

/// The fixed task set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Liveness probe through the session.
    Keepalive,
    /// Non-blocking inbound drain into the dispatcher.
    Poll,
    /// Publish the monotonic counter.
    Telemetry,
    /// Service the hardware watchdog.
    WatchdogFeed,
}

impl TaskKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Keepalive => "keepalive",
            Self::Poll => "poll",
            Self::Telemetry => "telemetry",
            Self::WatchdogFeed => "watchdog",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSpec {
    pub kind: TaskKind,
    pub period_ms: u32,
}

impl TaskSpec {
    pub const fn new(kind: TaskKind, period_ms: u32) -> Self {
        Self { kind, period_ms }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Scheduler engine
// ═══════════════════════════════════════════════════════════════

/// Maximum number of tasks (stack-allocated).
pub const MAX_TASKS: usize = 4;

#[derive(Debug, Clone)]
struct TaskEntry {
    spec: TaskSpec,
    next_due_ms: u64,
    fires: u64,
}

pub struct Scheduler {
    tasks: heapless::Vec<TaskEntry, MAX_TASKS>,
    started: bool,
}

impl Scheduler {
    /// Build the fixed task set.  Zero periods, duplicate kinds and more
    /// than [`MAX_TASKS`] tasks are rejected.
    pub fn new(specs: &[TaskSpec]) -> Result<Self, ConfigError> {
        let mut tasks = heapless::Vec::new();
        for spec in specs {
            if spec.period_ms == 0 {
                return Err(ConfigError::ValidationFailed("task period must be non-zero"));
            }
            if tasks.iter().any(|t: &TaskEntry| t.spec.kind == spec.kind) {
                return Err(ConfigError::ValidationFailed("duplicate task kind"));
            }
            tasks
                .push(TaskEntry {
                    spec: *spec,
                    next_due_ms: 0,
                    fires: 0,
                })
                .map_err(|_| ConfigError::ValidationFailed("too many tasks"))?;
        }
        Ok(Self {
            tasks,
            started: false,
        })
    }

    /// The reference task set with the configured periods.
    pub fn from_config(cfg: &ClientConfig) -> Result<Self, ConfigError> {
        Self::new(&[
            TaskSpec::new(TaskKind::WatchdogFeed, cfg.watchdog_feed_period_ms),
            TaskSpec::new(TaskKind::Poll, cfg.poll_period_ms),
            TaskSpec::new(TaskKind::Keepalive, cfg.keepalive_period_ms),
            TaskSpec::new(TaskKind::Telemetry, cfg.telemetry_period_ms),
        ])
    }

    /// Make every task due at `now_ms`.
    pub fn start(&mut self, now_ms: u64) {
        for t in &mut self.tasks {
            t.next_due_ms = now_ms;
        }
        self.started = true;
        info!("Scheduler: started {} task(s) at {}ms", self.tasks.len(), now_ms);
    }

    /// Run every task that is due at `now_ms`, earliest wake time first
    /// (declaration order breaks ties).  Returns the number of bodies run.
    pub fn tick(&mut self, now_ms: u64, delegate: &mut impl SchedulerDelegate) -> usize {
        if !self.started {
            self.start(now_ms);
        }
        let mut ran = 0;
        while let Some(i) = self.earliest_due(now_ms) {
            let entry = &mut self.tasks[i];
            let kind = entry.spec.kind;
            let behind = now_ms - entry.next_due_ms;
            entry.fires += 1;
            entry.next_due_ms += u64::from(entry.spec.period_ms);
            if behind >= u64::from(entry.spec.period_ms) {
                debug!("Scheduler: '{}' catching up ({}ms behind)", kind.label(), behind);
            }
            delegate.on_task_due(kind, now_ms);
            ran += 1;
        }
        ran
    }

    /// Earliest wake time over all tasks (`None` for an empty set).
    pub fn next_wake_ms(&self) -> Option<u64> {
        self.tasks.iter().map(|t| t.next_due_ms).min()
    }

    pub fn fire_count(&self, kind: TaskKind) -> u64 {
        self.entry(kind).map_or(0, |t| t.fires)
    }

    pub fn period_ms(&self, kind: TaskKind) -> Option<u32> {
        self.entry(kind).map(|t| t.spec.period_ms)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    fn entry(&self, kind: TaskKind) -> Option<&TaskEntry> {
        self.tasks.iter().find(|t| t.spec.kind == kind)
    }

    fn earliest_due(&self, now_ms: u64) -> Option<usize> {
        self.tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.next_due_ms <= now_ms)
            .min_by_key(|(_, t)| t.next_due_ms)
            .map(|(i, _)| i)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
