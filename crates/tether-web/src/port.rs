//! Browser transports
//!
//! [`WebPort`] wraps one of the three message targets a browser context can
//! talk through:
//!
//! | Target                       | Used by                          |
//! |------------------------------|----------------------------------|
//! | `Worker`                     | The spawning side                |
//! | `DedicatedWorkerGlobalScope` | Code running inside the worker   |
//! | `MessagePort`                | Bridged channels                 |
//!
//! Envelope bytes are posted as a transferred `ArrayBuffer`. A channel handoff
//! is posted as a small object naming the channel, with the `MessagePort` in
//! the transfer list.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use js_sys::{Array, ArrayBuffer, Object, Reflect, Uint8Array};
use tether_hal::{ChannelHandoff, EventSink, Port, PortError, PortEvent, Subscription, Timer};
use tether_ipc::{handoff, ChannelName, RoutingKey};
use tracing::debug;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{DedicatedWorkerGlobalScope, MessageEvent, MessagePort, Worker, WorkerOptions, WorkerType};

use crate::timer::WebTimer;

enum Target {
    Worker(Worker),
    Port(MessagePort),
    Scope(DedicatedWorkerGlobalScope),
}

/// Event listeners attached to a target.
///
/// Closures must be stored to prevent garbage collection.
struct Listeners {
    _message: Closure<dyn FnMut(MessageEvent)>,
    _message_error: Closure<dyn FnMut(MessageEvent)>,
    _error: Option<Closure<dyn FnMut(JsValue)>>,
}

struct Shared {
    label: String,
    target: Target,
    closed: AtomicBool,
    listeners: Mutex<Option<Listeners>>,
}

// Safety: In WASM there's only one thread. The JS handles inside are never
// touched from anywhere else.
unsafe impl Send for Shared {}
unsafe impl Sync for Shared {}

impl Shared {
    fn post(&self, message: &JsValue, transfer: &Array) -> Result<(), JsValue> {
        match &self.target {
            Target::Worker(worker) => worker.post_message_with_transfer(message, transfer),
            Target::Port(port) => port.post_message_with_transferable(message, transfer),
            Target::Scope(scope) => scope.post_message_with_transfer(message, transfer),
        }
    }

    fn detach(&self) {
        match &self.target {
            Target::Worker(worker) => {
                worker.set_onmessage(None);
                worker.set_onmessageerror(None);
                worker.set_onerror(None);
            }
            Target::Port(port) => {
                port.set_onmessage(None);
                port.set_onmessageerror(None);
            }
            Target::Scope(scope) => {
                scope.set_onmessage(None);
                scope.set_onmessageerror(None);
            }
        }
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listeners) = listeners {
            // Detaching can happen from inside one of these listeners; free
            // them once the current event has finished.
            wasm_bindgen_futures::spawn_local(async move { drop(listeners) });
        }
    }
}

/// A [`Port`] over a browser message target
#[derive(Clone)]
pub struct WebPort {
    shared: Arc<Shared>,
}

impl WebPort {
    fn new(label: impl Into<String>, target: Target) -> Self {
        Self {
            shared: Arc::new(Shared {
                label: label.into(),
                target,
                closed: AtomicBool::new(false),
                listeners: Mutex::new(None),
            }),
        }
    }

    /// Start a module worker from `script_url`
    pub fn spawn_worker(script_url: &str, name: &str) -> Result<Self, PortError> {
        let options = WorkerOptions::new();
        options.set_type(WorkerType::Module);
        options.set_name(name);
        let worker = Worker::new_with_options(script_url, &options)
            .map_err(|e| PortError::CreateFailed(format!("{} ({:?})", script_url, e)))?;
        Ok(Self::new(name, Target::Worker(worker)))
    }

    /// The port a worker uses to talk back to its spawner
    pub fn global_scope(label: &str) -> Result<Self, PortError> {
        let scope = js_sys::global()
            .dyn_into::<DedicatedWorkerGlobalScope>()
            .map_err(|_| PortError::CreateFailed("not running in a dedicated worker".into()))?;
        Ok(Self::new(label, Target::Scope(scope)))
    }

    pub fn message_port(port: MessagePort, label: impl Into<String>) -> Self {
        Self::new(label, Target::Port(port))
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    fn transferable_port(&self) -> Option<&MessagePort> {
        match &self.shared.target {
            Target::Port(port) => Some(port),
            _ => None,
        }
    }
}

impl Port for WebPort {
    fn label(&self) -> &str {
        &self.shared.label
    }

    fn post(&self, bytes: Vec<u8>) -> Result<(), PortError> {
        if self.is_closed() {
            return Err(PortError::Closed);
        }
        let buffer = Uint8Array::from(bytes.as_slice()).buffer();
        self.shared
            .post(&buffer, &Array::of1(&buffer))
            .map_err(|e| PortError::PostFailed(format!("{:?}", e)))
    }

    fn post_handoff(&self, handoff: ChannelHandoff) -> Result<(), PortError> {
        if self.is_closed() {
            return Err(PortError::Closed);
        }
        let Some(web_port) = handoff.port.as_any().downcast_ref::<WebPort>() else {
            return Err(PortError::Incompatible(handoff.port.label().to_string()));
        };
        let Some(channel_port) = web_port.transferable_port() else {
            return Err(PortError::Incompatible(format!(
                "{} is not a MessagePort",
                web_port.label()
            )));
        };

        let message = Object::new();
        let set = |key: &str, value: &str| {
            Reflect::set(&message, &JsValue::from_str(key), &JsValue::from_str(value))
                .map(|_| ())
                .map_err(|e| PortError::PostFailed(format!("{:?}", e)))
        };
        set(handoff::CHANNEL_FIELD, handoff.channel.as_str())?;
        set(handoff::ROUTING_KEY_FIELD, handoff.routing_key.as_str())?;

        // The local MessagePort is neutered once transferred
        self.shared
            .post(&message, &Array::of1(channel_port))
            .map_err(|e| PortError::PostFailed(format!("{:?}", e)))
    }

    fn subscribe(&self, sink: EventSink) -> Result<Subscription, PortError> {
        if self.is_closed() {
            return Err(PortError::Closed);
        }
        let mut live = self
            .shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if live.is_some() {
            return Err(PortError::AlreadySubscribed);
        }

        let on_message = {
            let sink = sink.clone();
            Closure::wrap(Box::new(move |event: MessageEvent| {
                sink(classify(&event));
            }) as Box<dyn FnMut(MessageEvent)>)
        };
        let on_message_error = {
            let sink = sink.clone();
            Closure::wrap(Box::new(move |_event: MessageEvent| {
                sink(PortEvent::DecodeError(
                    "message could not be deserialized".into(),
                ));
            }) as Box<dyn FnMut(MessageEvent)>)
        };

        let mut on_error = None;
        match &self.shared.target {
            Target::Worker(worker) => {
                let error = Closure::wrap(Box::new(move |event: JsValue| {
                    sink(PortEvent::TransportError(error_message(&event)));
                }) as Box<dyn FnMut(JsValue)>);
                worker.set_onmessage(Some(on_message.as_ref().unchecked_ref()));
                worker.set_onmessageerror(Some(on_message_error.as_ref().unchecked_ref()));
                worker.set_onerror(Some(error.as_ref().unchecked_ref()));
                on_error = Some(error);
            }
            Target::Port(port) => {
                port.set_onmessage(Some(on_message.as_ref().unchecked_ref()));
                port.set_onmessageerror(Some(on_message_error.as_ref().unchecked_ref()));
                port.start();
            }
            Target::Scope(scope) => {
                scope.set_onmessage(Some(on_message.as_ref().unchecked_ref()));
                scope.set_onmessageerror(Some(on_message_error.as_ref().unchecked_ref()));
            }
        }

        *live = Some(Listeners {
            _message: on_message,
            _message_error: on_message_error,
            _error: on_error,
        });
        drop(live);
        debug!(port = %self.shared.label, "listening");

        let shared = self.shared.clone();
        Ok(Subscription::new(move || shared.detach()))
    }

    fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        match &self.shared.target {
            Target::Worker(worker) => worker.terminate(),
            Target::Port(port) => port.close(),
            Target::Scope(scope) => scope.close(),
        }
        debug!(port = %self.shared.label, "closed");
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn timer(&self) -> Option<Arc<dyn Timer>> {
        Some(Arc::new(WebTimer))
    }
}

/// Turn a `message` event into a port event
fn classify(event: &MessageEvent) -> PortEvent {
    let data = event.data();
    if let Some(buffer) = data.dyn_ref::<ArrayBuffer>() {
        return PortEvent::Message(Uint8Array::new(buffer).to_vec());
    }
    if let Some(view) = data.dyn_ref::<Uint8Array>() {
        return PortEvent::Message(view.to_vec());
    }
    if let Some(text) = data.as_string() {
        return PortEvent::Message(text.into_bytes());
    }

    let channel = Reflect::get(&data, &JsValue::from_str(handoff::CHANNEL_FIELD))
        .ok()
        .and_then(|value| value.as_string());
    let Some(channel) = channel else {
        return PortEvent::DecodeError(format!(
            "unsupported message payload ({})",
            data.js_typeof().as_string().unwrap_or_default()
        ));
    };

    let ports = event.ports();
    if ports.length() != 1 {
        return PortEvent::DecodeError(format!(
            "handoff of {} carried {} ports",
            channel,
            ports.length()
        ));
    }
    let Ok(port) = ports.get(0).dyn_into::<MessagePort>() else {
        return PortEvent::DecodeError(format!("handoff of {} carried a non-port", channel));
    };
    let routing_key = Reflect::get(&data, &JsValue::from_str(handoff::ROUTING_KEY_FIELD))
        .ok()
        .and_then(|value| value.as_string())
        .unwrap_or_default();

    PortEvent::Handoff(ChannelHandoff {
        port: Box::new(WebPort::message_port(port, channel.clone())),
        channel: ChannelName::new(channel),
        routing_key: RoutingKey::new(routing_key),
    })
}

fn error_message(event: &JsValue) -> String {
    Reflect::get(event, &JsValue::from_str("message"))
        .ok()
        .and_then(|message| message.as_string())
        .unwrap_or_else(|| "worker raised an error".to_string())
}
