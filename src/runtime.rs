//! Single-threaded driver for the [`Scheduler`].
//!
//! `futures_lite::future::block_on` drives one future; its only `.await`
//! is an `async_io_mini::Timer` that sleeps until the next task is due.
//! Task bodies are plain synchronous calls made from
//! [`Scheduler::tick`], so a body always runs to completion before
//! anything else does.

use core::time::Duration;

use async_io_mini::Timer;
use futures_lite::future;

use crate::app::ports::{Clock, SchedulerDelegate};
use crate::scheduler::Scheduler;

/// Sleep used when the task set is empty.
const IDLE_SLEEP_MS: u64 = 1_000;

/// Drive the scheduler until `deadline_ms` (inclusive: tasks due at the
/// deadline still run).  `None` runs forever.
pub async fn drive(
    scheduler: &mut Scheduler,
    delegate: &mut impl SchedulerDelegate,
    clock: &impl Clock,
    deadline_ms: Option<u64>,
) {
    loop {
        let now = clock.now_ms();
        scheduler.tick(now, delegate);
        if deadline_ms.is_some_and(|d| now >= d) {
            return;
        }

        let mut wake = scheduler.next_wake_ms().unwrap_or(now + IDLE_SLEEP_MS);
        if let Some(d) = deadline_ms {
            wake = wake.min(d);
        }
        let now = clock.now_ms();
        if wake > now {
            Timer::after(Duration::from_millis(wake - now)).await;
        }
    }
}

/// Block the current thread driving the scheduler for `duration_ms`.
pub fn run_for(
    scheduler: &mut Scheduler,
    delegate: &mut impl SchedulerDelegate,
    clock: &impl Clock,
    duration_ms: u64,
) {
    let deadline = clock.now_ms() + duration_ms;
    future::block_on(drive(scheduler, delegate, clock, Some(deadline)));
}

/// Block the current thread driving the scheduler forever.
pub fn run_forever(
    scheduler: &mut Scheduler,
    delegate: &mut impl SchedulerDelegate,
    clock: &impl Clock,
) -> ! {
    loop {
        future::block_on(drive(scheduler, delegate, clock, None));
    }
}
