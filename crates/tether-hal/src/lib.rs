//! Transport Abstraction Layer for tether
//!
//! This crate defines the [`Port`] trait that lets the endpoint core run over
//! any transport that can post a byte buffer to a remote context and push
//! back a stream of inbound events.
//!
//! # Platform Implementations
//!
//! - **Browser**: `Worker`, `MessagePort`, and the worker's own global scope
//!   (`tether-web`). Bytes travel as transferred `ArrayBuffer`s.
//! - **Tests**: in-memory port pairs (`tether-hal-mock`).
//!
//! # Event Classes
//!
//! A port reports four kinds of inbound event:
//!
//! | Event            | Browser source                       | Endpoint treatment   |
//! |------------------|--------------------------------------|----------------------|
//! | `Message`        | `message` with an `ArrayBuffer`      | Routable traffic     |
//! | `Handoff`        | `message` with a transferred port    | Channel registration |
//! | `TransportError` | `error` (remote threw or crashed)    | Logged, link degraded|
//! | `DecodeError`    | `messageerror` / unparseable payload | Logged, dropped      |

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tether_ipc::{ChannelName, RoutingKey};
use thiserror::Error;

/// Callback a port pushes inbound events into.
///
/// Must not block: it runs inside the platform's event listener.
pub type EventSink = Arc<dyn Fn(PortEvent) + Send + Sync>;

/// Transport abstraction trait
///
/// Implementations wrap one platform object capable of posting messages and
/// emitting `message` / `error` / `messageerror` events.
///
/// # Ownership
///
/// The underlying platform object is owned by the platform. A port holds a
/// reference sufficient to post and listen, and only ends its life through
/// [`Port::close`].
pub trait Port: Send + Sync + 'static {
    /// Human-readable label for logging (worker name, channel name)
    fn label(&self) -> &str;

    /// Post a byte buffer to the remote context
    ///
    /// # Returns
    /// * `Ok(())` - The platform accepted the buffer (not proof of delivery)
    /// * `Err(PortError::Closed)` - Port was closed
    /// * `Err(PortError::PostFailed)` - The platform's post call threw
    fn post(&self, bytes: Vec<u8>) -> Result<(), PortError>;

    /// Transfer one end of a channel to the remote context
    ///
    /// # Returns
    /// * `Err(PortError::Incompatible)` - The handed-off port belongs to a
    ///   different platform than this one
    fn post_handoff(&self, handoff: ChannelHandoff) -> Result<(), PortError>;

    /// Start pushing inbound events into `sink`
    ///
    /// Only one subscription may be live at a time. Dropping the returned
    /// [`Subscription`] detaches the listeners; no events are pushed after
    /// that.
    fn subscribe(&self, sink: EventSink) -> Result<Subscription, PortError>;

    /// Tear down the transport (terminate the Worker, close the MessagePort)
    fn close(&self);

    /// Downcast support, used when a port must be unwrapped for transfer
    fn as_any(&self) -> &dyn Any;

    /// The platform's own one-shot timer, if it has one.
    ///
    /// Endpoints use it to fail requests at their deadline. With `None` the
    /// endpoint runs a timer thread instead, which needs a platform that can
    /// spawn threads.
    fn timer(&self) -> Option<Arc<dyn Timer>> {
        None
    }
}

/// One-shot deferred execution (`setTimeout` in the browser)
pub trait Timer: Send + Sync {
    /// Run `task` once, no earlier than `delay` from now.
    ///
    /// Tasks may run late and must tolerate the state they act on being gone.
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + Send>);
}

/// Inbound event pushed by a port
pub enum PortEvent {
    /// Raw envelope bytes
    Message(Vec<u8>),
    /// A new channel end transferred by a broker
    Handoff(ChannelHandoff),
    /// The remote context raised an error (crash, uncaught exception)
    TransportError(String),
    /// A message arrived that the transport could not structurally parse
    DecodeError(String),
}

impl fmt::Debug for PortEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortEvent::Message(bytes) => write!(f, "Message({} bytes)", bytes.len()),
            PortEvent::Handoff(handoff) => write!(f, "Handoff({:?})", handoff),
            PortEvent::TransportError(msg) => write!(f, "TransportError({})", msg),
            PortEvent::DecodeError(msg) => write!(f, "DecodeError({})", msg),
        }
    }
}

/// One end of a freshly created channel, addressed to a named slot
pub struct ChannelHandoff {
    pub channel: ChannelName,
    pub routing_key: RoutingKey,
    pub port: Box<dyn Port>,
}

impl fmt::Debug for ChannelHandoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandoff")
            .field("channel", &self.channel)
            .field("routing_key", &self.routing_key)
            .field("port", &self.port.label())
            .finish()
    }
}

/// Creates linked port pairs (`MessageChannel` in the browser)
pub trait ChannelFactory: Send + Sync {
    /// Create a new two-ended channel
    ///
    /// Anything posted on one end arrives on the other.
    fn create_channel(&self, label: &str) -> Result<(Box<dyn Port>, Box<dyn Port>), PortError>;
}

/// Live listener registration on a port.
///
/// Detaches on drop or on [`Subscription::cancel`].
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Detach now
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Port errors
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PortError {
    /// Port was closed or the remote context terminated
    #[error("port closed")]
    Closed,
    /// The platform's post call failed
    #[error("post failed: {0}")]
    PostFailed(String),
    /// Listeners could not be attached
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),
    /// A subscription is already live on this port
    #[error("port already has a live subscription")]
    AlreadySubscribed,
    /// A handed-off port belongs to a different platform
    #[error("incompatible port: {0}")]
    Incompatible(String),
    /// Channel or worker creation failed
    #[error("transport creation failed: {0}")]
    CreateFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_subscription_cancels_once() {
        let count = Arc::new(AtomicUsize::new(0));

        let counter = count.clone();
        let sub = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sub.cancel();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let counter = count.clone();
        drop(Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_port_event_debug_hides_payload() {
        let event = PortEvent::Message(vec![0u8; 64]);
        assert_eq!(format!("{:?}", event), "Message(64 bytes)");
    }
}
