//! Outbound message id allocation.
//!
//! Ids come from a wrapping `u16` counter seeded once at start-up (RFC 7252
//! §4.4 recommends a randomised start).  After 65 536 requests the counter
//! wraps; an id that still keys a live observation is skipped so a
//! notification can never be attributed to the wrong request.

use crate::coap::MessageId;

#[derive(Debug, Clone)]
pub struct MessageIdAllocator {
    next: u16,
}

impl MessageIdAllocator {
    pub fn new(seed: u16) -> Self {
        Self { next: seed }
    }

    /// The id the next call would try first.
    pub fn peek(&self) -> u16 {
        self.next
    }

    /// Allocate the next id for which `in_use` is false.
    pub fn allocate(&mut self, mut in_use: impl FnMut(u16) -> bool) -> MessageId {
        for _ in 0..=u16::MAX {
            let candidate = self.next;
            self.next = self.next.wrapping_add(1);
            if !in_use(candidate) {
                return MessageId::new(candidate);
            }
        }
        // Every id is taken; the observation table is far smaller than the
        // id space, so this is unreachable in practice.
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        MessageId::new(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_up_from_seed() {
        let mut ids = MessageIdAllocator::new(100);
        assert_eq!(ids.allocate(|_| false).value(), 100);
        assert_eq!(ids.allocate(|_| false).value(), 101);
        assert_eq!(ids.peek(), 102);
    }

    #[test]
    fn wraps_at_u16_max() {
        let mut ids = MessageIdAllocator::new(u16::MAX);
        assert_eq!(ids.allocate(|_| false).value(), u16::MAX);
        assert_eq!(ids.allocate(|_| false).value(), 0);
    }

    #[test]
    fn skips_ids_in_use() {
        let mut ids = MessageIdAllocator::new(u16::MAX - 1);
        let live = [u16::MAX - 1, u16::MAX, 0];
        assert_eq!(ids.allocate(|id| live.contains(&id)).value(), 1);
        assert_eq!(ids.peek(), 2);
    }
}
