//! Fuzz target: `coap::decode`
//!
//! Feeds arbitrary datagrams to the CoAP decoder and asserts that it never
//! panics and that every decoded view lies inside the input.
//!
//! cargo fuzz run fuzz_coap_decode

#![no_main]

use libfuzzer_sys::fuzz_target;
use lightdb_node::coap;

fuzz_target!(|data: &[u8]| {
    let sender = "10.0.0.1:5684".parse().unwrap();
    if let Ok(packet) = coap::decode(data, sender) {
        assert!(data.len() >= 4, "decoded a datagram shorter than its header");
        assert!(packet.token.len() <= 8, "token longer than 8 bytes");
        assert!(packet.payload.len() <= data.len() - 4, "payload outside the datagram");
    }
});
