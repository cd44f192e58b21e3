//! Channel bridge integration tests

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{config, connected_pair_with, echo, inline_config, tag};
use tether_endpoint::{bridge, ChannelName, Endpoint, EndpointError, LinkState, Responder, RoutingKey};
use tether_hal::{ChannelHandoff, PortError, PortEvent};
use tether_hal_mock::{MockChannelFactory, MockPort};

fn handoff(channel: &ChannelName, port: MockPort) -> ChannelHandoff {
    ChannelHandoff {
        channel: channel.clone(),
        routing_key: RoutingKey::new("test"),
        port: Box::new(port),
    }
}

/// Inline endpoint with nothing on the other side of its primary port
fn lone_endpoint(name: &str) -> Endpoint {
    Endpoint::attach(Box::new(MockPort::detached(name)), inline_config(name)).unwrap()
}

#[test]
fn test_bridge_connects_two_workers() {
    let logs = ChannelName::new("logs");
    let (to_a, worker_a) = connected_pair_with(config("broker-a"), config("a"), |_| {});
    let (to_b, worker_b) = connected_pair_with(config("broker-b"), config("b"), |w| {
        // Registered before the channel exists
        w.register_handler_on(&"logs".into(), tag("append"), |payload: Vec<u8>, r: Responder| {
            let mut line = b"logged:".to_vec();
            line.extend(payload);
            r.reply(Some(line)).unwrap();
        });
    });

    let (tx, rx) = mpsc::channel();
    for worker in [&worker_a, &worker_b] {
        let tx = tx.clone();
        let name = worker.name().to_string();
        worker.on_channel_ready("logs", move |channel| {
            tx.send((name, channel.clone())).unwrap();
        });
    }

    let factory = MockChannelFactory::new();
    bridge(&factory, &to_a, &to_b, &logs, &RoutingKey::new("k1")).unwrap();
    assert_eq!(factory.created(), 1);

    let mut ready: Vec<String> = (0..2)
        .map(|_| {
            let (name, channel) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
            assert_eq!(channel, logs);
            name
        })
        .collect();
    ready.sort();
    assert_eq!(ready, vec!["a", "b"]);

    let reply = worker_a.request_on(&logs, tag("append"), b"x".to_vec()).unwrap();
    assert_eq!(reply, Some(b"logged:x".to_vec()));

    assert_eq!(worker_a.channels(), vec![logs.clone()]);
    assert_eq!(worker_b.channel_routing_key(&logs), Some(RoutingKey::new("k1")));
    assert_eq!(worker_a.channel_link_state(&logs), Some(LinkState::Up));
    // The broker only relays; it holds no channel itself
    assert!(to_a.channels().is_empty());
}

#[test]
fn test_channel_ready_after_established_runs_immediately() {
    let endpoint = lone_endpoint("solo");
    let metrics = ChannelName::new("metrics");
    let (ours, _theirs) = MockPort::pair("metrics#1", "metrics#2");
    endpoint.adopt_channel(handoff(&metrics, ours));

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    let caller = thread::current().id();
    endpoint.on_channel_ready(metrics.clone(), move |_| {
        assert_eq!(thread::current().id(), caller);
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_send_on_unestablished_channel() {
    let endpoint = lone_endpoint("solo");
    let missing = ChannelName::new("missing");

    match endpoint.send_on(&missing, tag("x"), vec![]) {
        Err(EndpointError::ChannelNotReady(name)) => assert_eq!(name, missing),
        other => panic!("expected ChannelNotReady, got {:?}", other),
    }
    assert!(matches!(
        endpoint.send_no_response_on(&missing, tag("x"), vec![]),
        Err(EndpointError::ChannelNotReady(_))
    ));
    assert_eq!(endpoint.channel_link_state(&missing), None);
}

#[test]
fn test_channel_end_can_be_another_endpoints_primary() {
    let endpoint = lone_endpoint("solo");
    let direct = ChannelName::new("direct");
    let (ours, theirs) = MockPort::pair("direct#1", "direct#2");

    let peer = Endpoint::attach(Box::new(theirs), inline_config("peer")).unwrap();
    peer.register_handler(tag("echo"), echo);
    endpoint.adopt_channel(handoff(&direct, ours));

    let reply = endpoint.request_on(&direct, tag("echo"), b"over channel".to_vec()).unwrap();
    assert_eq!(reply, Some(b"over channel".to_vec()));
}

#[test]
fn test_repeated_handoff_replaces_port_without_refiring() {
    let endpoint = lone_endpoint("solo");
    let name = ChannelName::new("swap");

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    endpoint.on_channel_ready(name.clone(), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let (first, _first_peer) = MockPort::pair("swap#1", "swap#2");
    let first_handle = first.handle();
    endpoint.adopt_channel(handoff(&name, first));
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    let (second, theirs) = MockPort::pair("swap#3", "swap#4");
    let peer = Endpoint::attach(Box::new(theirs), inline_config("peer")).unwrap();
    peer.register_handler(tag("echo"), echo);
    endpoint.adopt_channel(handoff(&name, second));

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(first_handle.is_closed());
    assert_eq!(
        endpoint.request_on(&name, tag("echo"), b"new".to_vec()).unwrap(),
        Some(b"new".to_vec())
    );
}

#[test]
fn test_channel_transport_error_degrades_only_channel() {
    let endpoint = lone_endpoint("solo");
    let name = ChannelName::new("flaky");
    let (ours, _theirs) = MockPort::pair("flaky#1", "flaky#2");
    let inbox = ours.handle();
    endpoint.adopt_channel(handoff(&name, ours));

    inbox.inject(PortEvent::TransportError("peer crashed".into()));
    assert_eq!(
        endpoint.channel_link_state(&name),
        Some(LinkState::Degraded("peer crashed".into()))
    );
    assert_eq!(endpoint.link_state(), LinkState::Up);
}

#[test]
fn test_bridge_reports_handoff_failure() {
    let (port, _raw) = MockPort::pair("broker-a", "a");
    let handle = port.handle();
    let to_a = Endpoint::attach(Box::new(port), config("broker-a")).unwrap();
    let to_b = Endpoint::attach(Box::new(MockPort::detached("broker-b")), config("broker-b")).unwrap();

    handle.set_fail_posts(true);
    let err = bridge(
        &MockChannelFactory::new(),
        &to_a,
        &to_b,
        &ChannelName::new("logs"),
        &RoutingKey::default(),
    )
    .unwrap_err();
    assert!(matches!(err, EndpointError::Transport(PortError::PostFailed(_))));
}

#[test]
fn test_waiters_dropped_on_terminate() {
    let endpoint = lone_endpoint("solo");
    let fired = Arc::new(AtomicUsize::new(0));

    let counter = fired.clone();
    endpoint.on_channel_ready("late", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    endpoint.terminate();

    let (ours, _theirs) = MockPort::pair("late#1", "late#2");
    let handle = ours.handle();
    endpoint.adopt_channel(handoff(&ChannelName::new("late"), ours));

    assert_eq!(fired.load(Ordering::SeqCst), 0);
    // A handoff arriving after terminate is closed, not installed
    assert!(handle.is_closed());
    assert!(endpoint.channels().is_empty());
}
