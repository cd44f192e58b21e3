//! Worker-side bindings
//!
//! ```js
//! const thread = new ThreadManager('{"name":"indexer"}');
//! thread.registerHandler("search", (bytes) => index.search(bytes));
//! thread.signalReady();
//! ```

use js_sys::{Array, Function, Promise};
use tether_endpoint::{ChannelName, Endpoint, EndpointConfig};
use wasm_bindgen::prelude::*;

use crate::js::{self, js_err, parse_tag, JsHandler};
use crate::port::WebPort;

/// The endpoint a worker uses to talk to whoever spawned it
#[wasm_bindgen]
pub struct ThreadManager {
    endpoint: Endpoint,
}

impl ThreadManager {
    /// Attach to an existing port instead of the worker's global scope
    pub fn attach(port: WebPort, config: EndpointConfig) -> Result<ThreadManager, JsValue> {
        let endpoint = Endpoint::attach(Box::new(port), js::inline(config)).map_err(js_err)?;
        Ok(ThreadManager { endpoint })
    }
}

#[wasm_bindgen]
impl ThreadManager {
    /// Attach to the worker's global scope. Register handlers, then call
    /// `signalReady`.
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: Option<String>) -> Result<ThreadManager, JsValue> {
        #[cfg(feature = "console_error_panic_hook")]
        console_error_panic_hook::set_once();

        let config = js::web_config(config_json, "thread")?;
        let port = WebPort::global_scope(&config.name).map_err(js_err)?;
        ThreadManager::attach(port, config)
    }

    #[wasm_bindgen(getter)]
    pub fn name(&self) -> String {
        self.endpoint.name().to_string()
    }

    /// Tell the spawner this worker is ready for traffic
    #[wasm_bindgen(js_name = signalReady)]
    pub fn signal_ready(&self) -> Result<(), JsValue> {
        self.endpoint.signal_ready().map_err(js_err)
    }

    #[wasm_bindgen(js_name = registerHandler)]
    pub fn register_handler(&self, tag: &str, handler: Function) -> Result<(), JsValue> {
        self.endpoint.register_handler(parse_tag(tag)?, JsHandler::new(handler));
        Ok(())
    }

    #[wasm_bindgen(js_name = registerHandlerOn)]
    pub fn register_handler_on(&self, channel: &str, tag: &str, handler: Function) -> Result<(), JsValue> {
        self.endpoint
            .register_handler_on(&ChannelName::new(channel), parse_tag(tag)?, JsHandler::new(handler));
        Ok(())
    }

    #[wasm_bindgen(js_name = unregisterHandler)]
    pub fn unregister_handler(&self, tag: &str) -> Result<bool, JsValue> {
        Ok(self.endpoint.unregister_handler(&parse_tag(tag)?))
    }

    pub fn send(&self, tag: &str, payload: JsValue) -> Result<Promise, JsValue> {
        let tag = parse_tag(tag)?;
        let payload = js::payload(&payload)?;
        Ok(js::reply_promise(self.endpoint.send(tag, payload)))
    }

    #[wasm_bindgen(js_name = sendOn)]
    pub fn send_on(&self, channel: &str, tag: &str, payload: JsValue) -> Result<Promise, JsValue> {
        let tag = parse_tag(tag)?;
        let payload = js::payload(&payload)?;
        Ok(js::reply_promise(
            self.endpoint.send_on(&ChannelName::new(channel), tag, payload),
        ))
    }

    #[wasm_bindgen(js_name = sendNoResponse)]
    pub fn send_no_response(&self, tag: &str, payload: JsValue) -> Result<(), JsValue> {
        self.endpoint
            .send_no_response(parse_tag(tag)?, js::payload(&payload)?)
            .map_err(js_err)
    }

    #[wasm_bindgen(js_name = sendNoResponseOn)]
    pub fn send_no_response_on(&self, channel: &str, tag: &str, payload: JsValue) -> Result<(), JsValue> {
        self.endpoint
            .send_no_response_on(&ChannelName::new(channel), parse_tag(tag)?, js::payload(&payload)?)
            .map_err(js_err)
    }

    #[wasm_bindgen(js_name = onChannelReady)]
    pub fn on_channel_ready(&self, channel: &str, callback: Function) {
        js::on_channel_ready(&self.endpoint, channel, callback);
    }

    pub fn channels(&self) -> Array {
        js::channel_names(&self.endpoint)
    }

    /// Routing key the broker attached to `channel`, if established
    #[wasm_bindgen(js_name = channelRoutingKey)]
    pub fn channel_routing_key(&self, channel: &str) -> Option<String> {
        self.endpoint
            .channel_routing_key(&ChannelName::new(channel))
            .map(|key| key.as_str().to_string())
    }

    #[wasm_bindgen(js_name = linkState)]
    pub fn link_state(&self) -> String {
        js::link_state(&self.endpoint.link_state())
    }

    #[wasm_bindgen(js_name = statsJson)]
    pub fn stats_json(&self) -> String {
        js::stats_json(&self.endpoint)
    }

    /// Close this worker's scope
    pub fn terminate(&self) {
        self.endpoint.terminate();
    }
}
