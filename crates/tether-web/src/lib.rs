//! Browser bindings for tether
//!
//! This crate runs the endpoint core over real browser transports and
//! exposes it to JavaScript:
//!
//! - [`WorkerManager`]: spawns a module worker and waits for its ready signal
//! - [`ThreadManager`]: runs inside the worker and answers its spawner
//! - [`bridge`]: gives two workers a direct `MessageChannel`
//! - [`LoggingSubsystem`]: routes `tracing` output to the devtools console
//!
//! Rust callers can use [`WebPort`] and [`WebChannelFactory`] directly with
//! `tether_endpoint::Endpoint`.
//!
//! ## Dispatch
//!
//! There is no dispatcher thread in the browser. Endpoints created here
//! always dispatch inline from the port's `message` listener. [`WebPort`]
//! supplies `setTimeout` as the endpoint's timer, which fails each request
//! whose reply never arrives at its own deadline.

mod channel;
mod js;
mod logging;
mod manager;
mod port;
mod thread;
mod timer;

pub use channel::WebChannelFactory;
pub use logging::LoggingSubsystem;
pub use manager::{bridge, WorkerManager};
pub use port::WebPort;
pub use thread::ThreadManager;
