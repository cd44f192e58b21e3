//! Endpoint errors

use std::time::Duration;

use tether_hal::PortError;
use tether_ipc::{ChannelName, CodecError, Tag};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EndpointError {
    /// No reply arrived within the response timeout
    #[error("no reply for '{tag}' #{id} within {after:?}")]
    Timeout { tag: Tag, id: u64, after: Duration },

    /// The remote context never signalled ready
    #[error("'{name}' did not signal ready within {after:?}")]
    ConnectTimeout { name: String, after: Duration },

    /// The endpoint was terminated (before or while waiting)
    #[error("endpoint terminated")]
    Terminated,

    #[error("transport error: {0}")]
    Transport(#[from] PortError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Too many outstanding requests
    #[error("too many pending requests (limit {limit})")]
    ResourceExhausted { limit: usize },

    /// Sent on a channel that has not been handed to this endpoint yet
    #[error("channel '{0}' is not established")]
    ChannelNotReady(ChannelName),

    /// The dispatcher thread could not be started
    #[error("failed to spawn dispatcher: {0}")]
    Spawn(String),
}

impl EndpointError {
    /// Whether the error is one of the two timeout kinds
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            EndpointError::Timeout { .. } | EndpointError::ConnectTimeout { .. }
        )
    }
}
