//! Peripheral drivers: LED outputs and the task watchdog.

pub mod leds;
pub mod watchdog;
