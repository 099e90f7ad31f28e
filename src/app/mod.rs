//! Application layer — port traits and the output-state handler.
//!
//! Everything here is pure logic.  Hardware is reached only through the
//! **port traits** in [`ports`], so the handler runs unchanged against
//! LEDs on the board and against test doubles on the host.

pub mod decoder;
pub mod handler;
pub mod ports;
