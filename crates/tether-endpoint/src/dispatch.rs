//! Inbound dispatch
//!
//! Exactly one consumer drains the inbound queue at a time, which is what
//! gives per-endpoint FIFO delivery:
//!
//! - `Thread` mode: a dedicated thread pops with a timeout and reaps expired
//!   requests between pops
//! - `Inline` mode: whichever listener enqueued an event drains the queue,
//!   guarded by `dispatching`. A listener that finds the guard taken leaves its
//!   event for the current drainer, which re-checks the queue after releasing
//!   the guard so nothing is stranded.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tether_hal::PortEvent;
use tether_ipc::{decode, Envelope};
use tracing::{debug, error, warn};
use web_time::Instant;

use crate::endpoint::{Inner, Route};
use crate::handler::Responder;
use crate::queue::Inbound;

impl Inner {
    /// Drain the queue inline unless another consumer is already doing so
    pub(crate) fn drain(self: &Arc<Self>) {
        loop {
            if self
                .dispatching
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            while let Some(inbound) = self.queue.try_pop() {
                self.dispatch(inbound);
            }
            self.dispatching.store(false, Ordering::Release);

            if self.queue.is_empty() {
                return;
            }
        }
    }

    /// Body of the `Thread` mode dispatcher
    pub(crate) fn run_dispatcher(endpoint: Weak<Inner>, tick: Duration) {
        let mut last_reap = Instant::now();
        loop {
            let Some(inner) = endpoint.upgrade() else {
                break;
            };
            if inner.is_terminated() {
                break;
            }
            if let Some(inbound) = inner.queue.pop_timeout(tick) {
                inner.dispatch(inbound);
            }
            if last_reap.elapsed() >= tick {
                inner.reap_expired();
                last_reap = Instant::now();
            }
        }
        debug!("dispatcher exiting");
    }

    pub(crate) fn dispatch(self: &Arc<Self>, inbound: Inbound) {
        let Inbound { route, event } = inbound;
        match event {
            PortEvent::Message(bytes) => self.dispatch_bytes(&route, &bytes),
            PortEvent::Handoff(handoff) => self.install_channel(&route, handoff),
            PortEvent::TransportError(reason) => {
                error!(
                    endpoint = %self.config.name,
                    route = %route,
                    "transport error: {}",
                    reason
                );
                self.degrade(&route, reason);
            }
            PortEvent::DecodeError(reason) => {
                warn!(
                    endpoint = %self.config.name,
                    route = %route,
                    "dropping unreadable message: {}",
                    reason
                );
                self.counters.dropped();
            }
        }
    }

    fn dispatch_bytes(self: &Arc<Self>, route: &Route, bytes: &[u8]) {
        let envelope = match decode(bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(
                    endpoint = %self.config.name,
                    route = %route,
                    len = bytes.len(),
                    "dropping undecodable envelope: {}",
                    err
                );
                self.counters.dropped();
                return;
            }
        };
        self.counters.received();
        self.log_envelope("recv", route, &envelope);

        if envelope.is_response {
            self.deliver_reply(route, envelope);
        } else {
            self.deliver_request(route, envelope);
        }
    }

    fn deliver_reply(&self, route: &Route, envelope: Envelope) {
        let pending = {
            let mut state = self.lock();
            state
                .routes
                .get_mut(route)
                .and_then(|route_state| route_state.registry.take_pending(&envelope.tag, envelope.id))
        };
        match pending {
            Some(pending) => {
                // Removing the entry made us the only completer
                self.counters.reply_delivered();
                pending.slot.complete(Ok(envelope.data));
            }
            None => {
                // Unknown ID, or the waiter already gave up
                warn!(
                    endpoint = %self.config.name,
                    route = %route,
                    tag = %envelope.tag,
                    id = envelope.id,
                    "dropping unroutable reply"
                );
                self.counters.dropped();
            }
        }
    }

    fn deliver_request(self: &Arc<Self>, route: &Route, envelope: Envelope) {
        let handler = {
            let state = self.lock();
            state
                .routes
                .get(route)
                .and_then(|route_state| route_state.registry.handler(&envelope.tag))
        };
        let Some(handler) = handler else {
            warn!(
                endpoint = %self.config.name,
                route = %route,
                tag = %envelope.tag,
                id = envelope.id,
                "no handler registered, dropping request"
            );
            self.counters.dropped();
            return;
        };

        let responder = Responder::new(
            Arc::downgrade(self),
            route.clone(),
            envelope.tag,
            envelope.id,
        );
        handler.handle(envelope.data.unwrap_or_default(), responder);
    }
}
