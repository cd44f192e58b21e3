//! Browser transport tests. Run with `wasm-pack test --headless --chrome`.

#![cfg(all(target_arch = "wasm32", target_os = "unknown"))]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use js_sys::{Array, Date, Function, Object, Promise, Reflect, Uint8Array};
use tether_endpoint::{
    ChannelName, DispatchMode, Endpoint, EndpointConfig, EndpointError, Responder, RoutingKey, Tag,
};
use tether_hal::{ChannelFactory, ChannelHandoff, Port, PortEvent};
use tether_ipc::handoff;
use tether_web::{ThreadManager, WebChannelFactory, WebPort, WorkerManager};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;
use wasm_bindgen_test::*;
use web_sys::MessageChannel;

wasm_bindgen_test_configure!(run_in_dedicated_worker);

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_name = setTimeout)]
    fn set_timeout(handler: &js_sys::Function, timeout: i32) -> i32;
}

async fn sleep(millis: i32) {
    let promise = Promise::new(&mut |resolve, _reject| {
        set_timeout(&resolve, millis);
    });
    let _ = JsFuture::from(promise).await;
}

fn config(name: &str) -> EndpointConfig {
    EndpointConfig::new(name)
        .with_dispatch(DispatchMode::Inline)
        .with_response_timeout(Duration::from_millis(500))
}

fn tag(name: &str) -> Tag {
    Tag::new(name).unwrap()
}

fn echo(payload: Vec<u8>, responder: Responder) {
    responder.reply(Some(payload)).unwrap();
}

/// A JS handler taking the payload as `bytes`
fn js_handler(body: &str) -> Function {
    Function::new_with_args("bytes", body)
}

/// A thread manager on one end of a fresh `MessageChannel` with `handlers`
/// registered, and a worker manager connected to it through the other end
async fn linked_managers(handlers: &[(&str, &str)]) -> (WorkerManager, ThreadManager) {
    let channel = MessageChannel::new().unwrap();
    let thread = ThreadManager::attach(WebPort::message_port(channel.port2(), "thread"), config("thread")).unwrap();
    for (name, body) in handlers {
        thread.register_handler(name, js_handler(body)).unwrap();
    }
    thread.signal_ready().unwrap();

    let manager = WorkerManager::connect(
        WebPort::message_port(channel.port1(), "manager"),
        config("manager").with_response_timeout(Duration::from_millis(100)),
    )
    .await
    .unwrap();
    (manager, thread)
}

async fn call(manager: &WorkerManager, name: &str, payload: &[u8]) -> Result<JsValue, JsValue> {
    let promise = manager.send(name, Uint8Array::from(payload).into())?;
    JsFuture::from(promise).await
}

fn assert_timed_out(result: Result<JsValue, JsValue>) {
    let message = result.unwrap_err().as_string().unwrap_or_default();
    assert!(message.starts_with("no reply for"), "unexpected rejection: {}", message);
}

// ============================================================================
// Endpoints over MessageChannel
// ============================================================================

#[wasm_bindgen_test]
async fn test_echo_over_message_channel() {
    let (ours, theirs) = WebChannelFactory.create_channel("echo").unwrap();
    let server = Endpoint::attach(theirs, config("server")).unwrap();
    server.register_handler(tag("echo"), echo);
    let client = Endpoint::attach(ours, config("client")).unwrap();

    let reply = client.send(tag("echo"), b"hello".to_vec()).unwrap().await.unwrap();
    assert_eq!(reply, Some(b"hello".to_vec()));
    assert_eq!(client.stats().replies_delivered, 1);
}

#[wasm_bindgen_test]
async fn test_reply_timeout_fires_on_schedule() {
    let (ours, theirs) = WebChannelFactory.create_channel("silent").unwrap();
    let _server = Endpoint::attach(theirs, config("server")).unwrap();
    let client = Endpoint::attach(ours, config("client").with_response_timeout(Duration::from_millis(50)))
        .unwrap();

    // Nothing but the port's own timer fails the request
    let start = Date::now();
    let pending = client.send(tag("nobody"), vec![]).unwrap();
    assert!(pending.await.unwrap_err().is_timeout());
    let elapsed = Date::now() - start;
    assert!(elapsed >= 49.0, "fired early after {}ms", elapsed);
    assert!(elapsed < 150.0, "fired late after {}ms", elapsed);
}

#[wasm_bindgen_test]
async fn test_callback_timeout_fires_on_schedule() {
    let (ours, _theirs) = WebChannelFactory.create_channel("silent").unwrap();
    let client = Endpoint::attach(ours, config("client").with_response_timeout(Duration::from_millis(50)))
        .unwrap();

    let outcome: Arc<Mutex<Option<bool>>> = Arc::new(Mutex::new(None));
    let seen = outcome.clone();
    client
        .send_with_callback(tag("nobody"), vec![], move |reply| {
            *seen.lock().unwrap() = Some(reply.is_err());
        })
        .unwrap();

    sleep(150).await;
    assert_eq!(*outcome.lock().unwrap(), Some(true));
    assert_eq!(client.stats().timeouts, 1);
}

#[wasm_bindgen_test]
async fn test_channel_handoff_over_message_port() {
    let (to_worker, from_broker) = WebChannelFactory.create_channel("primary").unwrap();
    let broker = Endpoint::attach(to_worker, config("broker")).unwrap();
    let worker = Endpoint::attach(from_broker, config("worker")).unwrap();

    let (end_worker, end_peer) = WebChannelFactory.create_channel("logs").unwrap();
    let peer = Endpoint::attach(end_peer, config("peer")).unwrap();
    peer.register_handler(tag("echo"), echo);

    let logs = ChannelName::new("logs");
    broker
        .offer_channel(ChannelHandoff {
            channel: logs.clone(),
            routing_key: RoutingKey::new("k1"),
            port: end_worker,
        })
        .unwrap();

    for _ in 0..50 {
        if !worker.channels().is_empty() {
            break;
        }
        sleep(10).await;
    }
    assert_eq!(worker.channels(), vec![logs.clone()]);
    assert_eq!(worker.channel_routing_key(&logs), Some(RoutingKey::new("k1")));

    let reply = worker.send_on(&logs, tag("echo"), b"via channel".to_vec()).unwrap().await.unwrap();
    assert_eq!(reply, Some(b"via channel".to_vec()));
}

#[wasm_bindgen_test]
async fn test_send_after_terminate_fails() {
    let (ours, _theirs) = WebChannelFactory.create_channel("closed").unwrap();
    let client = Endpoint::attach(ours, config("client")).unwrap();
    client.terminate();
    assert!(matches!(
        client.send(tag("echo"), vec![]),
        Err(EndpointError::Terminated)
    ));
}

// ============================================================================
// Unreadable messages
// ============================================================================

#[wasm_bindgen_test]
async fn test_plain_object_is_decode_error() {
    let channel = MessageChannel::new().unwrap();
    let port = WebPort::message_port(channel.port2(), "raw");
    let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = events.clone();
    let _subscription = port
        .subscribe(Arc::new(move |event: PortEvent| {
            seen.lock().unwrap().push(format!("{:?}", event));
        }))
        .unwrap();

    channel.port1().post_message(&Object::new()).unwrap();
    sleep(50).await;

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert!(
        events[0].starts_with("DecodeError(unsupported message payload"),
        "unexpected event: {}",
        events[0]
    );
}

#[wasm_bindgen_test]
async fn test_handoff_without_port_is_dropped() {
    let channel = MessageChannel::new().unwrap();
    let endpoint = Endpoint::attach(Box::new(WebPort::message_port(channel.port2(), "raw")), config("worker"))
        .unwrap();

    let fake = Object::new();
    Reflect::set(&fake, &handoff::CHANNEL_FIELD.into(), &"logs".into()).unwrap();
    channel.port1().post_message(&fake).unwrap();
    channel.port1().post_message(&JsValue::from_f64(42.0)).unwrap();
    sleep(50).await;

    assert_eq!(endpoint.stats().dropped, 2);
    assert!(endpoint.channels().is_empty());
    assert_eq!(endpoint.link_state(), tether_endpoint::LinkState::Up);
}

// ============================================================================
// Managers and JS handlers
// ============================================================================

#[wasm_bindgen_test]
async fn test_handshake_then_js_echo() {
    let (manager, thread) = linked_managers(&[("echo", "return bytes;")]).await;
    assert_eq!(manager.name(), "manager");
    assert_eq!(thread.name(), "thread");

    let reply = call(&manager, "echo", b"over the wire").await.unwrap();
    assert_eq!(Uint8Array::new(&reply).to_vec(), b"over the wire".to_vec());
}

#[wasm_bindgen_test]
async fn test_js_null_replies_without_data() {
    let (manager, _thread) = linked_managers(&[("nothing", "return null;")]).await;
    let reply = call(&manager, "nothing", b"").await.unwrap();
    assert!(reply.is_null());
}

#[wasm_bindgen_test]
async fn test_js_undefined_sends_no_reply() {
    let (manager, _thread) = linked_managers(&[("quiet", "bytes.length;")]).await;
    assert_timed_out(call(&manager, "quiet", b"x").await);
}

#[wasm_bindgen_test]
async fn test_js_promise_settles_before_reply() {
    let (manager, _thread) = linked_managers(&[(
        "later",
        "return new Promise((resolve) => setTimeout(() => resolve('later'), 10));",
    )])
    .await;
    let reply = call(&manager, "later", b"").await.unwrap();
    assert_eq!(Uint8Array::new(&reply).to_vec(), b"later".to_vec());
}

#[wasm_bindgen_test]
async fn test_js_rejected_promise_sends_no_reply() {
    let (manager, _thread) = linked_managers(&[("refuse", "return Promise.reject(new Error('nope'));")]).await;
    assert_timed_out(call(&manager, "refuse", b"").await);
}

#[wasm_bindgen_test]
async fn test_js_throw_sends_no_reply() {
    let (manager, _thread) = linked_managers(&[("boom", "throw new Error('boom');")]).await;
    assert_timed_out(call(&manager, "boom", b"").await);
}

#[wasm_bindgen_test]
async fn test_connect_times_out_without_ready() {
    let channel = MessageChannel::new().unwrap();
    let _thread = ThreadManager::attach(WebPort::message_port(channel.port2(), "thread"), config("thread")).unwrap();

    let start = Date::now();
    let connected = WorkerManager::connect(
        WebPort::message_port(channel.port1(), "manager"),
        config("manager").with_connect_timeout(Duration::from_millis(100)),
    )
    .await;
    let Err(err) = connected else {
        panic!("connected without a ready signal");
    };
    let message = err.as_string().unwrap_or_default();
    assert!(message.contains("did not signal ready"), "unexpected rejection: {}", message);
    assert!(Date::now() - start < 300.0);
}

#[wasm_bindgen_test]
async fn test_js_handler_receives_payload_bytes() {
    let (manager, _thread) = linked_managers(&[(
        "length",
        "return new TextEncoder().encode(String(bytes instanceof Uint8Array) + ':' + bytes.length);",
    )])
    .await;
    let reply = call(&manager, "length", b"four").await.unwrap();
    assert_eq!(Uint8Array::new(&reply).to_vec(), b"true:4".to_vec());
}

#[wasm_bindgen_test]
fn test_payload_arrays_are_rejected_for_send() {
    let channel = MessageChannel::new().unwrap();
    let thread = ThreadManager::attach(WebPort::message_port(channel.port2(), "thread"), config("thread")).unwrap();
    assert!(thread.send("echo", Array::new().into()).is_err());
}
