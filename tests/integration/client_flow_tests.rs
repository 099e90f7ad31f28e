//! End-to-end client flows against the mock secure channel: requests on
//! the wire, notification dispatch into the outputs, confirmable replies
//! and the reconnect-once session policy.

use lightdb_node::client::SessionState;
use lightdb_node::coap::{Code, ContentFormat, MessageKind, Method};
use lightdb_node::config::LivenessPolicy;
use lightdb_node::error::{ChannelError, Error, TransportError};

use crate::mock_io::*;

fn connected(liveness: LivenessPolicy) -> (MockChannel, MockOutputs, TestClient) {
    let net = MockChannel::default();
    let outputs = MockOutputs::default();
    let mut client = client(&net, &outputs, liveness);
    client.connect().unwrap();
    (net, outputs, client)
}

// ── Requests on the wire ──────────────────────────────────────

#[test]
fn observe_sends_confirmable_get_with_token_and_observe() {
    let (net, _, mut client) = connected(LivenessPolicy::Suppress);
    let id = client.observe("led").unwrap();
    assert_eq!(id.value(), SEED);

    let sent = net.sent();
    assert_eq!(sent.len(), 1);
    let p = decode(&sent[0]);
    assert_eq!(p.kind, MessageKind::Confirmable);
    assert_eq!(p.code, Code::from(Method::Get));
    assert_eq!(p.message_id, SEED);
    assert_eq!(p.token_id(), Some(SEED));
    assert_eq!(p.observe, Some(0));
    assert_eq!(uri_path(&sent[0]), ".d/led");
    assert_eq!(client.dispatcher().observation(id), Some(".d/led"));
}

#[test]
fn set_posts_value_with_content_format() {
    let (net, _, mut client) = connected(LivenessPolicy::Suppress);
    client.set("counter", b"42", ContentFormat::TextPlain).unwrap();
    client.set("blob", b"{}", ContentFormat::Json).unwrap();

    let sent = net.sent();
    let p = decode(&sent[0]);
    assert_eq!(p.code, Code::from(Method::Post));
    assert_eq!(p.content_format, Some(0));
    assert_eq!(p.payload, b"42");
    assert_eq!(uri_path(&sent[0]), ".d/counter");
    assert_eq!(decode(&sent[1]).content_format, Some(50));
}

#[test]
fn get_is_plain_read() {
    let (net, _, mut client) = connected(LivenessPolicy::Suppress);
    let id = client.get("counter").unwrap();
    let sent = net.sent();
    let p = decode(&sent[0]);
    assert_eq!(p.code, Code::from(Method::Get));
    assert_eq!(p.observe, None);
    assert_eq!(uri_path(&sent[0]), ".d/counter");
    assert_eq!(client.dispatcher().observation(id), None);
}

#[test]
fn observe_desired_targets_update_stream() {
    let (net, _, mut client) = connected(LivenessPolicy::Suppress);
    let id = client.observe_desired().unwrap();
    assert_eq!(uri_path(&net.sent()[0]), ".u/desired");

    net.push_inbound(notification(0x2000, id.value(), 1, br#"{"sequenceNumber":3}"#));
    client.poll().unwrap();
    assert_eq!(client.handler().desired_updates(), 1);
}

#[test]
fn ping_is_empty_confirmable() {
    let (net, _, mut client) = connected(LivenessPolicy::Suppress);
    let id = client.ping().unwrap();
    let sent = net.sent();
    assert_eq!(sent[0].len(), 4);
    let p = decode(&sent[0]);
    assert_eq!(p.kind, MessageKind::Confirmable);
    assert!(p.code.is_empty());
    assert_eq!(p.message_id, id.value());
}

#[test]
fn invalid_key_is_rejected_before_sending() {
    let (net, _, mut client) = connected(LivenessPolicy::Suppress);
    assert!(matches!(client.set("", b"1", ContentFormat::TextPlain), Err(Error::Protocol(_))));
    assert!(matches!(client.observe("a b"), Err(Error::Protocol(_))));
    assert!(net.sent().is_empty());
}

// ── Dispatch ──────────────────────────────────────────────────

#[test]
fn notification_drives_outputs() {
    let (net, outputs, mut client) = connected(LivenessPolicy::Suppress);
    let id = client.observe("led").unwrap();

    net.push_inbound(notification(0x2000, id.value(), 1, br#"{"0":true,"3":true}"#));
    let report = client.poll().unwrap();

    assert_eq!(report.received, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(outputs.levels(), [true, false, false, true]);
    assert_eq!(client.dispatcher().stats().uncorrelated, 0);
}

#[test]
fn batch_is_dispatched_in_order() {
    let (net, outputs, mut client) = connected(LivenessPolicy::Suppress);
    let id = client.observe("led").unwrap();

    net.push_inbound(notification(
        0x2000,
        id.value(),
        1,
        br#"{"0":true}`{"0":false}`{"1":true}"#,
    ));
    let report = client.poll().unwrap();

    assert_eq!(report.delivered, 3);
    assert_eq!(outputs.writes(), 3);
    // Last write to output 0 wins only if fragments ran in order.
    assert_eq!(outputs.levels(), [false, true, false, false]);
}

#[test]
fn malformed_fragment_does_not_stop_batch() {
    let (net, outputs, mut client) = connected(LivenessPolicy::Suppress);
    let id = client.observe("led").unwrap();

    net.push_inbound(notification(0x2000, id.value(), 1, br#"{bad`{"2":true}"#));
    let report = client.poll().unwrap();

    assert_eq!(report.rejected, 1);
    assert_eq!(report.delivered, 1);
    assert!(outputs.levels()[2]);
}

#[test]
fn ok_acknowledgment_never_drives_outputs() {
    for policy in [LivenessPolicy::Suppress, LivenessPolicy::Notify] {
        let (net, outputs, mut client) = connected(policy);
        net.push_inbound(server_packet(1, 0x2100, &[], None, b"OK"));
        let report = client.poll().unwrap();

        assert_eq!(report.liveness, 1);
        assert_eq!(report.delivered, 0);
        assert_eq!(outputs.writes(), 0);
        let expected = u32::from(policy == LivenessPolicy::Notify);
        assert_eq!(client.handler().liveness_acks(), expected);
    }
}

#[test]
fn retransmitted_notification_is_dispatched_once() {
    let (net, outputs, mut client) = connected(LivenessPolicy::Suppress);
    let id = client.observe("led").unwrap();
    let packet = notification(0x2000, id.value(), 1, br#"{"1":true}"#);

    net.push_inbound(packet.clone());
    net.push_inbound(packet);
    let report = client.poll().unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(report.duplicates, 1);
    assert_eq!(outputs.writes(), 1);
}

#[test]
fn piggybacked_response_correlates_by_token() {
    let (net, _, mut client) = connected(LivenessPolicy::Suppress);
    let id = client.observe("led").unwrap();

    net.push_inbound(server_packet(2, id.value(), &id.value().to_be_bytes(), Some(0), br#"{}"#));
    net.push_inbound(notification(0x2200, 0x7777, 1, br#"{}"#));
    client.poll().unwrap();

    assert_eq!(client.dispatcher().stats().uncorrelated, 1);
    assert_eq!(client.dispatcher().stats().delivered, 2);
}

#[test]
fn malformed_datagram_is_counted_and_skipped() {
    let (net, outputs, mut client) = connected(LivenessPolicy::Suppress);
    let id = client.observe("led").unwrap();

    net.push_inbound(vec![0x40, 0x45]);
    net.push_inbound(notification(0x2000, id.value(), 1, br#"{"0":true}"#));
    let report = client.poll().unwrap();

    assert_eq!(report.malformed, 1);
    assert_eq!(report.delivered, 1);
    assert!(outputs.levels()[0]);
}

#[test]
fn poll_drains_at_most_eight_datagrams() {
    let (net, _, mut client) = connected(LivenessPolicy::Suppress);
    for mid in 0..10u16 {
        net.push_inbound(server_packet(1, 0x3000 + mid, &[], None, b"OK"));
    }
    assert_eq!(client.poll().unwrap().received, 8);
    assert_eq!(client.poll().unwrap().received, 2);
    assert_eq!(client.poll().unwrap().received, 0);
}

// ── Confirmable replies ───────────────────────────────────────

#[test]
fn confirmable_notification_is_acknowledged() {
    let (net, _, mut client) = connected(LivenessPolicy::Suppress);
    let id = client.observe("led").unwrap();
    net.take_sent();

    net.push_inbound(server_packet(0, 0x4000, &id.value().to_be_bytes(), Some(2), br#"{"0":true}"#));
    let report = client.poll().unwrap();

    assert_eq!(report.replies, 1);
    let sent = net.sent();
    assert_eq!(sent.len(), 1);
    let ack = decode(&sent[0]);
    assert_eq!(ack.kind, MessageKind::Acknowledgement);
    assert_eq!(ack.message_id, 0x4000);
    assert!(ack.code.is_empty());
}

#[test]
fn server_ping_is_answered_with_reset() {
    let (net, _, mut client) = connected(LivenessPolicy::Suppress);
    net.push_inbound(server_packet(0, 0x4001, &[], None, &[]));
    client.poll().unwrap();

    let sent = net.sent();
    let rst = decode(&sent[0]);
    assert_eq!(rst.kind, MessageKind::Reset);
    assert_eq!(rst.message_id, 0x4001);
}

#[test]
fn server_reset_cancels_observation() {
    let (net, _, mut client) = connected(LivenessPolicy::Suppress);
    let id = client.observe("led").unwrap();
    net.push_inbound(server_packet(3, id.value(), &[], None, &[]));
    client.poll().unwrap();

    assert_eq!(client.dispatcher().observation_count(), 0);
}

// ── Session policy ────────────────────────────────────────────

#[test]
fn one_write_failure_reconnects_and_retries() {
    let (net, _, mut client) = connected(LivenessPolicy::Suppress);
    net.fail_writes(1);

    client.set("counter", b"0", ContentFormat::TextPlain).unwrap();

    assert_eq!(net.connects(), 2);
    assert_eq!(net.write_attempts(), 2);
    assert_eq!(net.sent().len(), 1);
    assert_eq!(client.state(), SessionState::Connected);
    assert_eq!(client.session().stats().reconnects, 1);
}

#[test]
fn two_write_failures_are_fatal_without_third_attempt() {
    let (net, _, mut client) = connected(LivenessPolicy::Suppress);
    net.fail_writes(2);

    let err = client.set("counter", b"0", ContentFormat::TextPlain).unwrap_err();
    assert_eq!(err, Error::Transport(TransportError::Fatal(ChannelError::Io)));
    assert_eq!(net.write_attempts(), 2);
    assert_eq!(client.state(), SessionState::Fatal);

    // Fatal is sticky: nothing reaches the channel until restart.
    assert!(client.ping().is_err());
    assert_eq!(net.write_attempts(), 2);
}

#[test]
fn read_failure_reconnects_and_still_delivers() {
    let (net, outputs, mut client) = connected(LivenessPolicy::Suppress);
    let id = client.observe("led").unwrap();
    net.fail_reads(1);
    net.push_inbound(notification(0x2000, id.value(), 1, br#"{"1":true}"#));

    let report = client.poll().unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(net.connects(), 2);
    assert!(outputs.levels()[1]);
}

#[test]
fn restart_re_registers_observations() {
    let (net, outputs, mut client) = connected(LivenessPolicy::Suppress);
    let old = client.observe("led").unwrap();
    net.fail_writes(2);
    assert!(client.ping().is_err());
    net.take_sent();

    client.restart().unwrap();

    assert_eq!(client.state(), SessionState::Connected);
    let sent = net.sent();
    assert_eq!(sent.len(), 1);
    let p = decode(&sent[0]);
    assert_eq!(p.observe, Some(0));
    assert_eq!(uri_path(&sent[0]), ".d/led");
    assert_ne!(p.message_id, old.value());
    assert_eq!(client.dispatcher().observation_count(), 1);

    // Notifications now correlate to the new registration.
    net.push_inbound(notification(0x2300, p.message_id, 1, br#"{"2":true}"#));
    client.poll().unwrap();
    assert!(outputs.levels()[2]);
    assert_eq!(client.dispatcher().stats().uncorrelated, 0);
}

#[test]
fn failed_restart_keeps_observations_for_next_attempt() {
    let (net, _, mut client) = connected(LivenessPolicy::Suppress);
    client.observe("led").unwrap();
    net.fail_writes(2);
    assert!(client.ping().is_err());

    net.fail_connects(1);
    assert!(client.restart().unwrap_err().to_string().contains("fatal"));
    assert_eq!(client.state(), SessionState::Fatal);
    assert_eq!(client.dispatcher().observation_count(), 1);

    net.take_sent();
    client.restart().unwrap();
    assert_eq!(uri_path(&net.sent()[0]), ".d/led");
}

#[test]
fn close_drops_observations() {
    let (net, _, mut client) = connected(LivenessPolicy::Suppress);
    client.observe("led").unwrap();
    client.close();

    assert_eq!(client.dispatcher().observation_count(), 0);
    assert_eq!(client.state(), SessionState::Disconnected);
    assert!(!net.0.borrow().connected);
}
