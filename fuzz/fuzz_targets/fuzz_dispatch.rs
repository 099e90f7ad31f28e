//! Fuzz target: decode → `MessageDispatcher::on_packet` → JSON output handler
//!
//! Arbitrary datagrams run through the full inbound path against two
//! observations.  Dispatch must never panic and must never drive an output
//! index outside the bank.
//!
//! cargo fuzz run fuzz_dispatch

#![no_main]

use libfuzzer_sys::fuzz_target;
use lightdb_node::app::decoder::JsonStateDecoder;
use lightdb_node::app::handler::OutputStateHandler;
use lightdb_node::app::ports::OutputPort;
use lightdb_node::client::{MessageDispatcher, MessageIdAllocator};
use lightdb_node::coap;
use lightdb_node::config::LivenessPolicy;

struct Bank([bool; 4]);

impl OutputPort for Bank {
    fn output_count(&self) -> usize {
        self.0.len()
    }

    fn set_output(&mut self, index: usize, on: bool) {
        // Indexing panics on an out-of-range write.
        self.0[index] = on;
    }
}

fuzz_target!(|data: &[u8]| {
    let sender = "10.0.0.1:5684".parse().unwrap();
    let Ok(packet) = coap::decode(data, sender) else {
        return;
    };

    let mut dispatcher = MessageDispatcher::new(
        OutputStateHandler::new(Bank([false; 4]), JsonStateDecoder),
        LivenessPolicy::Notify,
    );
    let mut ids = MessageIdAllocator::new(0);
    let _ = dispatcher.register_observation(ids.allocate(|_| false), ".d/led");
    let _ = dispatcher.register_observation(ids.allocate(|_| false), ".u/desired");

    let _ = dispatcher.on_packet(&packet);
    // A replay is always suppressed or ignored, never re-dispatched.
    let _ = dispatcher.on_packet(&packet);
    assert!(dispatcher.stats().delivered + dispatcher.stats().rejected <= packet.payload.len() as u32);
});
