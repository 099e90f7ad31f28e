//! Indexed LED bank.
//!
//! Wraps `N` GPIO outputs behind [`OutputPort`].  Index `i` is the
//! `i`-th pin given to [`LedBank::new`].  Boards that sink current
//! through the GPIO set `active_low`.

use embedded_hal::digital::{OutputPin, PinState};
use log::warn;

use crate::app::ports::OutputPort;

pub struct LedBank<P: OutputPin, const N: usize> {
    pins: [P; N],
    levels: [bool; N],
    active_low: bool,
}

impl<P: OutputPin, const N: usize> LedBank<P, N> {
    /// Take ownership of the pins and drive them all off.
    pub fn new(pins: [P; N], active_low: bool) -> Self {
        let mut bank = Self {
            pins,
            levels: [false; N],
            active_low,
        };
        bank.all_off();
        bank
    }

    /// Last level written to each LED (`true` = lit).
    pub fn levels(&self) -> &[bool; N] {
        &self.levels
    }

    pub fn is_on(&self, index: usize) -> bool {
        self.levels.get(index).copied().unwrap_or(false)
    }
}

impl<P: OutputPin, const N: usize> OutputPort for LedBank<P, N> {
    fn output_count(&self) -> usize {
        N
    }

    fn set_output(&mut self, index: usize, on: bool) {
        let Some(pin) = self.pins.get_mut(index) else {
            warn!("LEDs: index {} out of range (have {})", index, N);
            return;
        };
        let state = PinState::from(on != self.active_low);
        match pin.set_state(state) {
            Ok(()) => self.levels[index] = on,
            Err(e) => warn!("LEDs: write to LED {} failed: {:?}", index, e),
        }
    }
}
