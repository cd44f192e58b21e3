//! Console logging for `tracing` events
//!
//! The endpoint core logs through `tracing`. In the browser nothing is
//! printed until the page's entry point creates a [`LoggingSubsystem`], which
//! installs a console subscriber for as long as it is alive. Only one may be
//! live at a time; a second `init` fails until the first is shut down.
//!
//! ```js
//! const logging = LoggingSubsystem.init("debug");
//! // ...
//! logging.shutdown();
//! ```

use std::fmt::{self, Write};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use tracing::dispatcher::DefaultGuard;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use wasm_bindgen::prelude::*;

/// Set while a subsystem holds the console subscriber
static ACTIVE: AtomicBool = AtomicBool::new(false);

#[derive(Debug, PartialEq, Eq, Error)]
pub(crate) enum LoggingError {
    #[error("unknown log level: {0}")]
    UnknownLevel(String),
    #[error("logging is already initialized; shut the active subsystem down first")]
    AlreadyActive,
}

/// Owns the console subscriber. Logging stops at `shutdown` or when the
/// object is freed.
#[wasm_bindgen]
pub struct LoggingSubsystem {
    level: LevelFilter,
    guard: Option<DefaultGuard>,
}

#[wasm_bindgen]
impl LoggingSubsystem {
    /// Start logging at `level`: `off`, `error`, `warn`, `info` (default),
    /// `debug` or `trace`. Throws while another subsystem is active.
    pub fn init(level: Option<String>) -> Result<LoggingSubsystem, JsValue> {
        Self::start(level.as_deref()).map_err(|e| JsValue::from_str(&e.to_string()))
    }

    #[wasm_bindgen(getter)]
    pub fn level(&self) -> String {
        self.level.to_string()
    }

    #[wasm_bindgen(getter, js_name = isActive)]
    pub fn is_active(&self) -> bool {
        self.guard.is_some()
    }

    /// Stop logging. Idempotent.
    pub fn shutdown(&mut self) {
        if self.guard.take().is_some() {
            ACTIVE.store(false, Ordering::SeqCst);
        }
    }
}

impl LoggingSubsystem {
    fn start(level: Option<&str>) -> Result<LoggingSubsystem, LoggingError> {
        let level = match level {
            Some(level) => parse_level(level)?,
            None => LevelFilter::INFO,
        };
        // Nested default guards would restore each other out of order
        if ACTIVE.swap(true, Ordering::SeqCst) {
            return Err(LoggingError::AlreadyActive);
        }
        let subscriber = tracing_subscriber::registry().with(level).with(ConsoleLayer);
        let guard = tracing::subscriber::set_default(subscriber);
        Ok(LoggingSubsystem {
            level,
            guard: Some(guard),
        })
    }
}

impl Drop for LoggingSubsystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn parse_level(level: &str) -> Result<LevelFilter, LoggingError> {
    LevelFilter::from_str(level).map_err(|_| LoggingError::UnknownLevel(level.to_string()))
}

/// Writes each event as one console line
struct ConsoleLayer;

impl<S: Subscriber> Layer<S> for ConsoleLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut fields = FieldVisitor::default();
        event.record(&mut fields);
        let line = JsValue::from_str(&format_line(*metadata.level(), metadata.target(), &fields));

        match *metadata.level() {
            Level::ERROR => web_sys::console::error_1(&line),
            Level::WARN => web_sys::console::warn_1(&line),
            Level::INFO => web_sys::console::info_1(&line),
            _ => web_sys::console::debug_1(&line),
        }
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: Vec<(&'static str, String)>,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push((field.name(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push((field.name(), format!("{:?}", value)));
        }
    }
}

/// `[tether] LEVEL target: message key=value ...`
fn format_line(level: Level, target: &str, fields: &FieldVisitor) -> String {
    let mut line = format!("[tether] {} {}: {}", level.as_str(), target, fields.message);
    for (name, value) in &fields.fields {
        let _ = write!(line, " {}={}", name, value);
    }
    line
}
