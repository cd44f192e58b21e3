//! Wire Protocol for tether
//!
//! This crate defines:
//! - **Tags** (message kinds, the routing key on both ends of a port)
//! - **Envelopes** (the `{tag, id, isResponse, deleteCB, data}` wire struct)
//! - **Reserved tags** (handshake traffic that application code cannot forge)
//! - **Handoff fields** (the marker object used to transfer a `MessagePort`)
//!
//! It is the **single source of truth** for everything that crosses a
//! `postMessage` boundary, shared by the endpoint core and the browser layer.
//!
//! # Tag Namespaces
//!
//! | Prefix        | Owner                                          |
//! |---------------|------------------------------------------------|
//! | `__tether/`   | Reserved - handshake and protocol control      |
//! | anything else | Application subsystems (storage, logging, ...) |
//!
//! # Usage
//!
//! ```rust
//! use tether_ipc::{decode, encode, Envelope, Tag};
//!
//! let tag = Tag::new("echo").unwrap();
//! let request = Envelope::request(tag, 7, b"hello".to_vec());
//! let bytes = encode(&request).unwrap();
//! assert_eq!(decode(&bytes).unwrap(), request);
//! ```

mod envelope;
mod tag;

pub use envelope::{decode, encode, CodecError, Envelope};
pub use tag::{ChannelName, RoutingKey, Tag, TagError, RESERVED_PREFIX};

// =============================================================================
// Reserved Tags (protocol control)
// =============================================================================

/// Tags reserved for protocol control traffic.
///
/// These can only be built here; `Tag::new` refuses the reserved prefix, so an
/// application tag can never alias one of them.
pub mod reserved {
    use crate::Tag;

    /// Name of the handshake tag (without the reserved prefix).
    pub const READY: &str = "ready";

    /// Sent once by the remote context after all of its listeners are attached.
    pub fn ready() -> Tag {
        Tag::reserved(READY)
    }
}

// =============================================================================
// Channel Handoff (MessagePort transfer)
// =============================================================================

/// Field names of the object posted alongside a transferred `MessagePort`.
///
/// A handoff is recognized structurally: the message data is a plain object
/// carrying [`CHANNEL_FIELD`] and exactly one transferred port. Envelope
/// traffic is always an `ArrayBuffer`, so the two never overlap.
pub mod handoff {
    /// Channel name the port should be registered under
    pub const CHANNEL_FIELD: &str = "__tetherChannel";
    /// Opaque routing key chosen by the broker
    pub const ROUTING_KEY_FIELD: &str = "__tetherRoutingKey";
}
