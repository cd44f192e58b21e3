//! `setTimeout` as a [`Timer`]

use std::time::Duration;

use tether_hal::Timer;
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_name = setTimeout)]
    fn set_timeout(handler: &JsValue, timeout: i32) -> i32;
}

/// Schedules tasks on the current context's event loop.
///
/// Endpoints hold their own state weakly inside each task, so a pending
/// timeout never keeps an endpoint alive.
pub(crate) struct WebTimer;

impl Timer for WebTimer {
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) {
        let callback = Closure::once_into_js(move || task());
        set_timeout(&callback, millis_ceil(delay));
    }
}

/// Whole milliseconds, rounded up so the task never runs early
fn millis_ceil(delay: Duration) -> i32 {
    let millis = delay.as_micros().div_ceil(1000);
    i32::try_from(millis).unwrap_or(i32::MAX)
}
