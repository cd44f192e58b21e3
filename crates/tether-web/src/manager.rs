//! Spawning-side bindings
//!
//! ```js
//! const worker = await WorkerManager.spawn("./worker.js", '{"name":"indexer"}');
//! const reply = await worker.send("search", new TextEncoder().encode("rust"));
//! ```

use js_sys::{Array, Function, Promise};
use tether_endpoint::{bridge as bridge_endpoints, ChannelName, Endpoint, EndpointConfig, RoutingKey};
use wasm_bindgen::prelude::*;

use crate::channel::WebChannelFactory;
use crate::js::{self, js_err, parse_tag, JsHandler};
use crate::port::WebPort;

/// A worker spawned from the current context, plus the endpoint talking to it
#[wasm_bindgen]
pub struct WorkerManager {
    endpoint: Endpoint,
}

impl WorkerManager {
    /// Connect over an existing port (a `MessagePort`, say) and wait for the
    /// other side's ready signal, as [`WorkerManager::spawn`] does for a
    /// worker it starts itself
    pub async fn connect(port: WebPort, config: EndpointConfig) -> Result<WorkerManager, JsValue> {
        let connecting = Endpoint::connect(Box::new(port), js::inline(config)).map_err(js_err)?;
        let endpoint = connecting.await.map_err(js_err)?;
        Ok(WorkerManager { endpoint })
    }
}

#[wasm_bindgen]
impl WorkerManager {
    /// Start a module worker from `script_url` and wait for it to signal ready.
    ///
    /// Rejects if the worker cannot be created or stays silent past the
    /// connect timeout.
    pub async fn spawn(script_url: String, config_json: Option<String>) -> Result<WorkerManager, JsValue> {
        #[cfg(feature = "console_error_panic_hook")]
        console_error_panic_hook::set_once();

        let config = js::web_config(config_json, "worker")?;
        let port = WebPort::spawn_worker(&script_url, &config.name).map_err(js_err)?;
        WorkerManager::connect(port, config).await
    }

    #[wasm_bindgen(getter)]
    pub fn name(&self) -> String {
        self.endpoint.name().to_string()
    }

    /// Send a request; the promise resolves to the reply bytes or `null`
    pub fn send(&self, tag: &str, payload: JsValue) -> Result<Promise, JsValue> {
        let tag = parse_tag(tag)?;
        let payload = js::payload(&payload)?;
        Ok(js::reply_promise(self.endpoint.send(tag, payload)))
    }

    #[wasm_bindgen(js_name = sendNoResponse)]
    pub fn send_no_response(&self, tag: &str, payload: JsValue) -> Result<(), JsValue> {
        self.endpoint
            .send_no_response(parse_tag(tag)?, js::payload(&payload)?)
            .map_err(js_err)
    }

    #[wasm_bindgen(js_name = registerHandler)]
    pub fn register_handler(&self, tag: &str, handler: Function) -> Result<(), JsValue> {
        self.endpoint.register_handler(parse_tag(tag)?, JsHandler::new(handler));
        Ok(())
    }

    #[wasm_bindgen(js_name = unregisterHandler)]
    pub fn unregister_handler(&self, tag: &str) -> Result<bool, JsValue> {
        Ok(self.endpoint.unregister_handler(&parse_tag(tag)?))
    }

    #[wasm_bindgen(js_name = sendOn)]
    pub fn send_on(&self, channel: &str, tag: &str, payload: JsValue) -> Result<Promise, JsValue> {
        let tag = parse_tag(tag)?;
        let payload = js::payload(&payload)?;
        Ok(js::reply_promise(
            self.endpoint.send_on(&ChannelName::new(channel), tag, payload),
        ))
    }

    #[wasm_bindgen(js_name = sendNoResponseOn)]
    pub fn send_no_response_on(&self, channel: &str, tag: &str, payload: JsValue) -> Result<(), JsValue> {
        self.endpoint
            .send_no_response_on(&ChannelName::new(channel), parse_tag(tag)?, js::payload(&payload)?)
            .map_err(js_err)
    }

    #[wasm_bindgen(js_name = registerHandlerOn)]
    pub fn register_handler_on(&self, channel: &str, tag: &str, handler: Function) -> Result<(), JsValue> {
        self.endpoint
            .register_handler_on(&ChannelName::new(channel), parse_tag(tag)?, JsHandler::new(handler));
        Ok(())
    }

    #[wasm_bindgen(js_name = onChannelReady)]
    pub fn on_channel_ready(&self, channel: &str, callback: Function) {
        js::on_channel_ready(&self.endpoint, channel, callback);
    }

    pub fn channels(&self) -> Array {
        js::channel_names(&self.endpoint)
    }

    /// `"up"`, `"degraded: <reason>"` or `"closed"`
    #[wasm_bindgen(js_name = linkState)]
    pub fn link_state(&self) -> String {
        js::link_state(&self.endpoint.link_state())
    }

    /// Get traffic counters as JSON
    #[wasm_bindgen(js_name = statsJson)]
    pub fn stats_json(&self) -> String {
        js::stats_json(&self.endpoint)
    }

    /// Terminate the worker and fail everything still waiting on it
    pub fn terminate(&self) {
        self.endpoint.terminate();
    }
}

/// Give the workers behind `a` and `b` a direct channel named `channel`
#[wasm_bindgen]
pub fn bridge(a: &WorkerManager, b: &WorkerManager, channel: &str, routing_key: &str) -> Result<(), JsValue> {
    bridge_endpoints(
        &WebChannelFactory,
        &a.endpoint,
        &b.endpoint,
        &ChannelName::new(channel),
        &RoutingKey::new(routing_key),
    )
    .map_err(js_err)
}
