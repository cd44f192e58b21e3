//! Request/Reply Endpoint Core for tether
//!
//! An [`Endpoint`] owns one [`Port`](tether_hal::Port) and turns the raw,
//! unreliable byte transport underneath it into tagged, correlated
//! request/reply messaging. The same type plays both roles:
//!
//! - **Spawning side** (`Endpoint::connect` / `Endpoint::open`): attaches to a
//!   freshly created worker and waits for its `ready` signal
//! - **Worker side** (`Endpoint::attach` + `signal_ready`): registers handlers,
//!   then tells the spawner it can take traffic
//!
//! ```rust
//! use tether_endpoint::{Endpoint, EndpointConfig, Responder, Tag};
//! use tether_hal_mock::MockPort;
//!
//! let (main_port, worker_port) = MockPort::pair("main", "worker");
//! let connecting = Endpoint::connect(Box::new(main_port), EndpointConfig::new("main"))?;
//!
//! let worker = Endpoint::attach(Box::new(worker_port), EndpointConfig::new("worker"))?;
//! worker.register_handler(Tag::new("echo")?, |payload: Vec<u8>, r: Responder| {
//!     let _ = r.reply(Some(payload));
//! });
//! worker.signal_ready()?;
//!
//! let main = connecting.wait()?;
//! assert_eq!(main.request(Tag::new("echo")?, b"hi".to_vec())?, Some(b"hi".to_vec()));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Module Structure
//!
//! - `config` - `EndpointConfig` (timeouts, queue bounds, dispatch mode)
//! - `registry` - per-route callback registries and correlation IDs
//! - `reply` - one-shot reply slots (`PendingReply`, blocking or `Future`)
//! - `handler` - request handlers and the `Responder` they reply through
//! - `queue` - bounded inbound FIFO
//! - `dispatch` - the single-consumer dispatch loop
//! - `channel` - bridged `MessageChannel` registration and `bridge()`
//! - `stats` - traffic counters
//! - `timer` - deadline timer thread for ports without a platform timer
//!
//! ## Ordering
//!
//! Inbound events on one endpoint are processed strictly in arrival order by
//! exactly one consumer at a time. A handler runs to completion (including
//! any synchronous reply) before the next event is dispatched, so handlers
//! must not block waiting on replies from the same endpoint.
//!
//! ## Timeouts
//!
//! Every wait is bounded. Each request schedules a reap at its deadline on
//! the endpoint's timer: the port's own timer when it has one (`setTimeout`
//! in the browser), otherwise a timer thread started with the endpoint.
//! Futures and callbacks therefore time out on schedule in both dispatch
//! modes. Blocking waiters also remove their own registration at the
//! deadline. A reply arriving after either is logged as unroutable and
//! dropped.

mod channel;
mod config;
mod dispatch;
mod endpoint;
mod error;
mod handler;
mod queue;
mod registry;
mod reply;
mod stats;
mod timer;

pub use channel::bridge;
pub use config::{DispatchMode, EndpointConfig};
pub use endpoint::{Connecting, Endpoint, LinkState, Route, WeakEndpoint};
pub use error::EndpointError;
pub use handler::{Handler, Responder};
pub use reply::{PendingReply, Reply};
pub use stats::EndpointStats;

pub use tether_ipc::{ChannelName, RoutingKey, Tag};
