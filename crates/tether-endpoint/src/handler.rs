//! Request handlers

use std::sync::Weak;

use tether_ipc::{Envelope, Tag};

use crate::endpoint::{Inner, Route};
use crate::EndpointError;

/// Handles inbound requests for one tag.
///
/// Runs on the dispatching context and must not block waiting on replies
/// from the same endpoint: the next inbound event (possibly that reply) is
/// only dispatched after the handler returns.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, payload: Vec<u8>, responder: Responder);
}

impl<F> Handler for F
where
    F: Fn(Vec<u8>, Responder) + Send + Sync + 'static,
{
    fn handle(&self, payload: Vec<u8>, responder: Responder) {
        self(payload, responder)
    }
}

/// Sends the reply to one inbound request.
///
/// Replying is optional and happens at most once, which the by-value
/// [`Responder::reply`] enforces. A responder may be moved to another thread
/// and used after the handler has returned.
pub struct Responder {
    endpoint: Weak<Inner>,
    route: Route,
    tag: Tag,
    id: u64,
}

impl Responder {
    pub(crate) fn new(endpoint: Weak<Inner>, route: Route, tag: Tag, id: u64) -> Self {
        Self {
            endpoint,
            route,
            tag,
            id,
        }
    }

    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Which port the request came in on
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Send the reply. `None` means "done, nothing to return".
    pub fn reply(self, data: Option<Vec<u8>>) -> Result<(), EndpointError> {
        let inner = self.endpoint.upgrade().ok_or(EndpointError::Terminated)?;
        inner.post_envelope(&self.route, Envelope::response(self.tag, self.id, data))
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("tag", &self.tag)
            .field("id", &self.id)
            .field("route", &self.route)
            .finish()
    }
}
