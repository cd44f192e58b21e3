//! Shared helpers for the endpoint integration tests

#![allow(dead_code)]

use std::time::{Duration, Instant};

use tether_endpoint::{DispatchMode, Endpoint, EndpointConfig, Responder, Tag};
use tether_hal_mock::MockPort;

pub fn tag(name: &str) -> Tag {
    Tag::new(name).unwrap()
}

/// Generous timeouts, fast reaping
pub fn config(name: &str) -> EndpointConfig {
    EndpointConfig::new(name)
        .with_response_timeout(Duration::from_secs(5))
        .with_connect_timeout(Duration::from_secs(5))
        .with_reap_interval(Duration::from_millis(10))
}

pub fn inline_config(name: &str) -> EndpointConfig {
    config(name).with_dispatch(DispatchMode::Inline)
}

/// Spawning side connected to a worker side over a mock pair.
///
/// `setup` runs on the worker endpoint before it signals ready.
pub fn connected_pair_with(
    main_config: EndpointConfig,
    worker_config: EndpointConfig,
    setup: impl FnOnce(&Endpoint),
) -> (Endpoint, Endpoint) {
    let (main_port, worker_port) = MockPort::pair("main", "worker");
    let connecting = Endpoint::connect(Box::new(main_port), main_config).unwrap();
    let worker = Endpoint::attach(Box::new(worker_port), worker_config).unwrap();
    setup(&worker);
    worker.signal_ready().unwrap();
    (connecting.wait().unwrap(), worker)
}

pub fn connected_pair(setup: impl FnOnce(&Endpoint)) -> (Endpoint, Endpoint) {
    connected_pair_with(config("main"), config("worker"), setup)
}

/// Handler that replies with the request payload
pub fn echo(payload: Vec<u8>, responder: Responder) {
    responder.reply(Some(payload)).unwrap();
}

/// Poll `condition` for up to two seconds
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
