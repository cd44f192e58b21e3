//! Conversions between JS values and endpoint types

use std::fmt;

use js_sys::{Array, ArrayBuffer, Function, Promise, Uint8Array};
use tether_endpoint::{
    ChannelName, DispatchMode, Endpoint, EndpointConfig, EndpointError, Handler, LinkState,
    PendingReply, Responder, Tag,
};
use tracing::{debug, error, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{future_to_promise, JsFuture};

pub(crate) fn js_err(err: impl fmt::Display) -> JsValue {
    JsValue::from_str(&err.to_string())
}

pub(crate) fn parse_tag(name: &str) -> Result<Tag, JsValue> {
    Tag::new(name).map_err(js_err)
}

/// Parse an optional JSON config
pub(crate) fn web_config(json: Option<String>, fallback_name: &str) -> Result<EndpointConfig, JsValue> {
    let config = match json {
        Some(json) => EndpointConfig::from_json(&json).map_err(js_err)?,
        None => EndpointConfig::new(fallback_name),
    };
    Ok(inline(config))
}

/// Browser endpoints always dispatch inline
pub(crate) fn inline(config: EndpointConfig) -> EndpointConfig {
    if config.dispatch != DispatchMode::Inline {
        debug!(endpoint = %config.name, "no dispatcher thread in the browser, dispatching inline");
    }
    config.with_dispatch(DispatchMode::Inline)
}

/// Bytes carried by a `Uint8Array`, `ArrayBuffer` or string
pub(crate) fn to_bytes(value: &JsValue) -> Option<Vec<u8>> {
    if let Some(view) = value.dyn_ref::<Uint8Array>() {
        return Some(view.to_vec());
    }
    if let Some(buffer) = value.dyn_ref::<ArrayBuffer>() {
        return Some(Uint8Array::new(buffer).to_vec());
    }
    value.as_string().map(String::into_bytes)
}

/// Request payload from JS; `undefined` and `null` send an empty payload
pub(crate) fn payload(value: &JsValue) -> Result<Vec<u8>, JsValue> {
    if value.is_undefined() || value.is_null() {
        return Ok(Vec::new());
    }
    to_bytes(value)
        .ok_or_else(|| JsValue::from_str("payload must be a Uint8Array, ArrayBuffer or string"))
}

/// Resolve to the reply bytes (`Uint8Array`, or `null` for a reply without
/// data); reject with the error message.
pub(crate) fn reply_promise(pending: Result<PendingReply, EndpointError>) -> Promise {
    future_to_promise(async move {
        let reply = pending.map_err(js_err)?.await.map_err(js_err)?;
        Ok(match reply {
            Some(bytes) => Uint8Array::from(bytes.as_slice()).into(),
            None => JsValue::NULL,
        })
    })
}

pub(crate) fn link_state(state: &LinkState) -> String {
    match state {
        LinkState::Up => "up".to_string(),
        LinkState::Degraded(reason) => format!("degraded: {}", reason),
        LinkState::Closed => "closed".to_string(),
    }
}

pub(crate) fn stats_json(endpoint: &Endpoint) -> String {
    serde_json::to_string(&endpoint.stats()).unwrap_or_else(|_| "{}".to_string())
}

pub(crate) fn channel_names(endpoint: &Endpoint) -> Array {
    endpoint
        .channels()
        .iter()
        .map(|name| JsValue::from_str(name.as_str()))
        .collect()
}

/// Run `callback(channelName)` once `channel` is established
pub(crate) fn on_channel_ready(endpoint: &Endpoint, channel: &str, callback: Function) {
    let callback = JsFunction(callback);
    endpoint.on_channel_ready(channel, move |name: &ChannelName| {
        if let Err(err) = callback.0.call1(&JsValue::NULL, &JsValue::from_str(name.as_str())) {
            error!(channel = %name, "channel ready callback threw: {:?}", err);
        }
    });
}

struct JsFunction(Function);

// Safety: In WASM there's only one thread
unsafe impl Send for JsFunction {}
unsafe impl Sync for JsFunction {}

/// A request handler implemented by a JS function.
///
/// The function receives the payload as a `Uint8Array`. Its return value
/// decides the reply:
///
/// - `Uint8Array` / `ArrayBuffer` / string: reply with those bytes
/// - `null`: reply without data
/// - `undefined`: no reply
/// - a `Promise`: settled first, then the same rules apply
pub(crate) struct JsHandler {
    callback: JsFunction,
}

impl JsHandler {
    pub(crate) fn new(callback: Function) -> Self {
        Self {
            callback: JsFunction(callback),
        }
    }
}

impl Handler for JsHandler {
    fn handle(&self, payload: Vec<u8>, responder: Responder) {
        let arg = Uint8Array::from(payload.as_slice());
        match self.callback.0.call1(&JsValue::NULL, &arg) {
            Ok(result) => match result.dyn_into::<Promise>() {
                Ok(promise) => {
                    wasm_bindgen_futures::spawn_local(async move {
                        match JsFuture::from(promise).await {
                            Ok(result) => respond(&result, responder),
                            Err(err) => warn!(
                                tag = %responder.tag(),
                                id = responder.id(),
                                "handler promise rejected, not replying: {:?}",
                                err
                            ),
                        }
                    });
                }
                Err(result) => respond(&result, responder),
            },
            Err(err) => warn!(
                tag = %responder.tag(),
                id = responder.id(),
                "handler threw, not replying: {:?}",
                err
            ),
        }
    }
}

fn respond(result: &JsValue, responder: Responder) {
    if result.is_undefined() {
        return;
    }
    let data = if result.is_null() {
        None
    } else {
        match to_bytes(result) {
            Some(bytes) => Some(bytes),
            None => {
                warn!(
                    tag = %responder.tag(),
                    "handler returned an unsupported value, replying without data"
                );
                None
            }
        }
    };
    let tag = responder.tag().clone();
    if let Err(err) = responder.reply(data) {
        warn!(tag = %tag, "reply failed: {}", err);
    }
}
