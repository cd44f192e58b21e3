//! Endpoint - one side of a request/reply link
//!
//! All mutable state (routes, registries, channel waiters, handshake) sits
//! behind a single mutex. Posting to a port never happens while that mutex is
//! held: the port is cloned out under the lock and used after release.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::thread::JoinHandle;

use tether_hal::{EventSink, Port, PortEvent, Subscription, Timer};
use tether_ipc::{encode, reserved, ChannelName, Envelope, RoutingKey, Tag};
use tracing::{debug, error, info, warn};
use web_time::Instant;

use crate::config::{DispatchMode, EndpointConfig};
use crate::handler::{Handler, Responder};
use crate::queue::{Inbound, InboundQueue, Rejected};
use crate::registry::{Pending, Registry};
use crate::reply::{PendingReply, Reply, ReplySlot};
use crate::stats::{Counters, EndpointStats};
use crate::timer::ThreadTimer;
use crate::EndpointError;

/// Which port a message travels on
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Route {
    /// The port the endpoint was created with
    Primary,
    /// A bridged channel, by name
    Channel(ChannelName),
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Primary => f.write_str("primary"),
            Route::Channel(name) => write!(f, "channel:{}", name),
        }
    }
}

/// Health of a route's transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkState {
    Up,
    /// The transport reported an error or a post failed. Traffic is still
    /// attempted; the remote may be gone.
    Degraded(String),
    /// The endpoint was terminated
    Closed,
}

pub(crate) type ReadyCallback = Box<dyn FnOnce(&ChannelName) + Send>;

pub(crate) struct RouteState {
    pub port: Option<Arc<dyn Port>>,
    pub subscription: Option<Subscription>,
    pub routing_key: Option<RoutingKey>,
    pub link: LinkState,
    pub registry: Registry,
}

impl RouteState {
    pub fn new(port: Option<Arc<dyn Port>>) -> Self {
        Self {
            port,
            subscription: None,
            routing_key: None,
            link: LinkState::Up,
            registry: Registry::default(),
        }
    }
}

pub(crate) struct Handshake {
    pub slot: Arc<ReplySlot>,
    pub deadline: Instant,
}

pub(crate) struct State {
    pub routes: HashMap<Route, RouteState>,
    pub channel_waiters: HashMap<ChannelName, Vec<ReadyCallback>>,
    pub handshake: Option<Handshake>,
    pub dispatcher: Option<JoinHandle<()>>,
    /// Fails requests at their deadline. Set once the endpoint has started.
    pub timer: Option<Arc<dyn Timer>>,
}

impl State {
    fn pending_len(&self) -> usize {
        self.routes.values().map(|route| route.registry.pending_len()).sum()
    }
}

pub(crate) struct Inner {
    pub config: EndpointConfig,
    pub state: Mutex<State>,
    pub queue: InboundQueue,
    pub counters: Counters,
    /// Single-consumer guard for inline dispatch
    pub dispatching: AtomicBool,
    terminated: AtomicBool,
}

impl Inner {
    fn new(config: EndpointConfig, port: Arc<dyn Port>) -> Self {
        let mut routes = HashMap::new();
        routes.insert(Route::Primary, RouteState::new(Some(port)));
        Self {
            queue: InboundQueue::new(config.queue_capacity),
            config,
            state: Mutex::new(State {
                routes,
                channel_waiters: HashMap::new(),
                handshake: None,
                dispatcher: None,
                timer: None,
            }),
            counters: Counters::default(),
            dispatching: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Event sink handed to a port. Holds the endpoint weakly.
    pub fn sink(self: &Arc<Self>, route: Route) -> EventSink {
        let endpoint = Arc::downgrade(self);
        Arc::new(move |event: PortEvent| {
            if let Some(inner) = endpoint.upgrade() {
                inner.accept(route.clone(), event);
            }
        })
    }

    /// Enqueue an inbound event (never blocks) and, inline, drain the queue
    pub fn accept(self: &Arc<Self>, route: Route, event: PortEvent) {
        if self.is_terminated() {
            discard(event);
            return;
        }
        match self.queue.push(Inbound { route, event }) {
            Ok(()) => {}
            Err(Rejected::Full(rejected)) => {
                self.counters.dropped();
                warn!(
                    endpoint = %self.config.name,
                    route = %rejected.route,
                    "inbound queue full, dropping {:?}",
                    rejected.event
                );
                discard(rejected.event);
            }
            // Lost the race with terminate
            Err(Rejected::Closed(rejected)) => {
                debug!(
                    endpoint = %self.config.name,
                    route = %rejected.route,
                    "endpoint terminated, discarding {:?}",
                    rejected.event
                );
                discard(rejected.event);
                return;
            }
        }
        if self.config.dispatch == DispatchMode::Inline {
            self.drain();
        }
    }

    /// Remove a request's registration if it still belongs to `slot`
    pub fn withdraw(&self, route: &Route, tag: &Tag, id: u64, slot: &Arc<ReplySlot>) -> bool {
        let mut state = self.lock();
        state
            .routes
            .get_mut(route)
            .is_some_and(|route_state| route_state.registry.withdraw(tag, id, slot))
    }

    pub fn port_for(&self, route: &Route) -> Result<Arc<dyn Port>, EndpointError> {
        let state = self.lock();
        state
            .routes
            .get(route)
            .and_then(|route_state| route_state.port.clone())
            .ok_or_else(|| not_ready(route))
    }

    /// Encode and post one envelope on `route`
    pub fn post_envelope(&self, route: &Route, envelope: Envelope) -> Result<(), EndpointError> {
        if self.is_terminated() {
            return Err(EndpointError::Terminated);
        }
        let port = self.port_for(route)?;
        self.post(route, &port, &envelope)
    }

    pub fn post(
        &self,
        route: &Route,
        port: &Arc<dyn Port>,
        envelope: &Envelope,
    ) -> Result<(), EndpointError> {
        let bytes = encode(envelope)?;
        self.log_envelope("send", route, envelope);
        if let Err(err) = port.post(bytes) {
            error!(
                endpoint = %self.config.name,
                route = %route,
                tag = %envelope.tag,
                id = envelope.id,
                "post failed: {}",
                err
            );
            self.degrade(route, err.to_string());
            return Err(err.into());
        }
        self.counters.sent();
        Ok(())
    }

    pub fn log_envelope(&self, direction: &str, route: &Route, envelope: &Envelope) {
        if self.config.message_logging {
            info!(
                endpoint = %self.config.name,
                route = %route,
                tag = %envelope.tag,
                id = envelope.id,
                response = envelope.is_response,
                bytes = envelope.payload_len(),
                "{}",
                direction
            );
        } else {
            debug!(
                endpoint = %self.config.name,
                route = %route,
                tag = %envelope.tag,
                id = envelope.id,
                response = envelope.is_response,
                "{}",
                direction
            );
        }
    }

    pub fn degrade(&self, route: &Route, reason: String) {
        let mut state = self.lock();
        if let Some(route_state) = state.routes.get_mut(route) {
            route_state.link = LinkState::Degraded(reason);
        }
    }

    /// Reap at `deadline`, so a waiter that is a future or a callback times
    /// out on schedule without anyone polling
    ///
    /// Tasks hold the endpoint weakly and never hold the timer, so a
    /// terminated endpoint's timer stops without waiting for its deadlines.
    pub fn arm(self: &Arc<Self>, deadline: Instant) {
        let Some(timer) = self.lock().timer.clone() else {
            return;
        };
        let endpoint = Arc::downgrade(self);
        timer.schedule(
            deadline.saturating_duration_since(Instant::now()),
            Box::new(move || {
                let Some(inner) = endpoint.upgrade() else {
                    return;
                };
                // Platform timers may round the delay down
                if Instant::now() < deadline {
                    inner.arm(deadline);
                } else {
                    inner.reap_expired();
                }
            }),
        );
    }

    /// Fail every registration whose deadline has passed
    pub fn reap_expired(&self) -> usize {
        let now = Instant::now();
        let (expired, handshake) = {
            let mut state = self.lock();
            let mut expired = Vec::new();
            for route_state in state.routes.values_mut() {
                expired.extend(route_state.registry.take_expired(now));
            }
            let handshake_expired = state
                .handshake
                .as_ref()
                .is_some_and(|handshake| handshake.deadline <= now);
            let handshake = if handshake_expired {
                state.handshake.take()
            } else {
                None
            };
            (expired, handshake)
        };

        let mut reaped = 0;
        let after = self.config.response_timeout();
        for (tag, id, Pending { slot, .. }) in expired {
            reaped += 1;
            self.counters.timed_out();
            warn!(
                endpoint = %self.config.name,
                tag = %tag,
                id,
                "request timed out after {:?}",
                after
            );
            slot.complete(Err(EndpointError::Timeout { tag, id, after }));
        }
        if let Some(handshake) = handshake {
            handshake.slot.complete(Err(EndpointError::ConnectTimeout {
                name: self.config.name.clone(),
                after: self.config.connect_timeout(),
            }));
        }
        reaped
    }

    /// Stop everything. Returns the dispatcher thread for the caller to join.
    pub fn shutdown(&self) -> Option<JoinHandle<()>> {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return None;
        }
        let (routes, handshake, dispatcher, _timer) = {
            let mut state = self.lock();
            state.channel_waiters.clear();
            (
                std::mem::take(&mut state.routes),
                state.handshake.take(),
                state.dispatcher.take(),
                state.timer.take(),
            )
        };

        let mut failed = 0;
        for (_, mut route_state) in routes {
            drop(route_state.subscription.take());
            if let Some(port) = route_state.port.take() {
                port.close();
            }
            for pending in route_state.registry.drain_pending() {
                if pending.slot.complete(Err(EndpointError::Terminated)) {
                    failed += 1;
                }
            }
        }
        if let Some(handshake) = handshake {
            handshake.slot.complete(Err(EndpointError::Terminated));
        }
        for inbound in self.queue.close() {
            discard(inbound.event);
        }

        info!(
            endpoint = %self.config.name,
            failed_requests = failed,
            "endpoint terminated"
        );
        dispatcher
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // A dispatcher thread left behind exits on its next tick
        let _ = self.shutdown();
    }
}

/// Close the port carried by a handoff that will never be installed
pub(crate) fn discard(event: PortEvent) {
    if let PortEvent::Handoff(handoff) = event {
        handoff.port.close();
    }
}

pub(crate) fn not_ready(route: &Route) -> EndpointError {
    match route {
        Route::Primary => EndpointError::Terminated,
        Route::Channel(name) => EndpointError::ChannelNotReady(name.clone()),
    }
}

/// One side of a request/reply link over a [`Port`].
///
/// Cheap to clone; every clone drives the same endpoint. The endpoint is
/// terminated by [`Endpoint::terminate`] or when the last clone is dropped.
#[derive(Clone)]
pub struct Endpoint {
    pub(crate) inner: Arc<Inner>,
}

impl Endpoint {
    fn build(port: Box<dyn Port>, config: EndpointConfig) -> Self {
        Self {
            inner: Arc::new(Inner::new(config, Arc::from(port))),
        }
    }

    /// Attach to `port` without waiting for the remote.
    ///
    /// This is the worker-side constructor: register handlers, then call
    /// [`Endpoint::signal_ready`].
    pub fn attach(port: Box<dyn Port>, config: EndpointConfig) -> Result<Self, EndpointError> {
        let endpoint = Self::build(port, config);
        endpoint.start()?;
        Ok(endpoint)
    }

    /// Attach to a freshly spawned remote and wait for its ready signal.
    ///
    /// The returned [`Connecting`] resolves to the endpoint, or fails with
    /// `ConnectTimeout` after the connect timeout. On failure the endpoint is
    /// terminated.
    pub fn connect(port: Box<dyn Port>, config: EndpointConfig) -> Result<Connecting, EndpointError> {
        let endpoint = Self::build(port, config);
        let slot = ReplySlot::new();
        let deadline = Instant::now() + endpoint.inner.config.connect_timeout();

        let ready_slot = slot.clone();
        let name = endpoint.inner.config.name.clone();
        let on_ready = move |_payload: Vec<u8>, _responder: Responder| {
            if ready_slot.complete(Ok(None)) {
                info!(endpoint = %name, "remote signalled ready");
            } else {
                debug!(endpoint = %name, "ignoring repeated ready signal");
            }
        };

        {
            let mut state = endpoint.inner.lock();
            state.handshake = Some(Handshake {
                slot: slot.clone(),
                deadline,
            });
            if let Some(primary) = state.routes.get_mut(&Route::Primary) {
                primary.registry.set_handler(reserved::ready(), Arc::new(on_ready));
            }
        }

        endpoint.start()?;
        endpoint.inner.arm(deadline);
        Ok(Connecting {
            endpoint: Some(endpoint),
            slot,
            deadline,
        })
    }

    /// Blocking [`Endpoint::connect`]
    pub fn open(port: Box<dyn Port>, config: EndpointConfig) -> Result<Self, EndpointError> {
        Self::connect(port, config)?.wait()
    }

    fn start(&self) -> Result<(), EndpointError> {
        if let Err(err) = self.try_start() {
            error!(endpoint = %self.name(), "failed to start: {}", err);
            self.terminate();
            return Err(err);
        }
        debug!(
            endpoint = %self.name(),
            dispatch = ?self.inner.config.dispatch,
            "endpoint attached"
        );
        Ok(())
    }

    fn try_start(&self) -> Result<(), EndpointError> {
        let port = self.inner.port_for(&Route::Primary)?;
        let timer: Arc<dyn Timer> = match port.timer() {
            Some(timer) => timer,
            None => Arc::new(
                ThreadTimer::spawn(self.name()).map_err(|e| EndpointError::Spawn(e.to_string()))?,
            ),
        };
        self.inner.lock().timer = Some(timer);

        let subscription = port.subscribe(self.inner.sink(Route::Primary))?;
        {
            let mut state = self.inner.lock();
            if let Some(primary) = state.routes.get_mut(&Route::Primary) {
                primary.subscription = Some(subscription);
            }
        }

        if self.inner.config.dispatch == DispatchMode::Thread {
            let endpoint = Arc::downgrade(&self.inner);
            let tick = self.inner.config.reap_interval();
            let dispatch = tracing::dispatcher::get_default(|current| current.clone());
            let handle = std::thread::Builder::new()
                .name(format!("tether-{}", self.name()))
                .spawn(move || {
                    tracing::dispatcher::with_default(&dispatch, || {
                        Inner::run_dispatcher(endpoint, tick)
                    })
                })
                .map_err(|e| EndpointError::Spawn(e.to_string()))?;
            self.inner.lock().dispatcher = Some(handle);
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.inner.config
    }

    /// Tell the spawning side that every handler is registered
    pub fn signal_ready(&self) -> Result<(), EndpointError> {
        debug!(endpoint = %self.name(), "signalling ready");
        self.inner
            .post_envelope(&Route::Primary, Envelope::request(reserved::ready(), 0, Vec::new()))
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Post a request and return a handle to its reply
    pub fn send(&self, tag: Tag, payload: Vec<u8>) -> Result<PendingReply, EndpointError> {
        self.send_route(Route::Primary, tag, payload)
    }

    /// Post a request and block for the reply
    pub fn request(&self, tag: Tag, payload: Vec<u8>) -> Reply {
        self.send(tag, payload)?.wait()
    }

    /// Post a message that expects no reply
    pub fn send_no_response(&self, tag: Tag, payload: Vec<u8>) -> Result<(), EndpointError> {
        self.send_one_way(Route::Primary, tag, payload)
    }

    /// Post a request and run `callback` exactly once with its outcome.
    ///
    /// If this returns an error the callback is dropped without running.
    /// Returns the request's correlation ID.
    pub fn send_with_callback<F>(&self, tag: Tag, payload: Vec<u8>, callback: F) -> Result<u64, EndpointError>
    where
        F: FnOnce(Reply) + Send + 'static,
    {
        self.callback_route(Route::Primary, tag, payload, callback)
    }

    pub(crate) fn send_route(
        &self,
        route: Route,
        tag: Tag,
        payload: Vec<u8>,
    ) -> Result<PendingReply, EndpointError> {
        let slot = ReplySlot::new();
        let (id, deadline) = self.start_request(&route, &tag, payload, &slot)?;
        Ok(PendingReply::new(
            tag,
            id,
            route,
            self.inner.config.response_timeout(),
            deadline,
            slot,
            Arc::downgrade(&self.inner),
        ))
    }

    pub(crate) fn callback_route<F>(
        &self,
        route: Route,
        tag: Tag,
        payload: Vec<u8>,
        callback: F,
    ) -> Result<u64, EndpointError>
    where
        F: FnOnce(Reply) + Send + 'static,
    {
        let slot = ReplySlot::with_callback(Box::new(callback));
        let (id, _) = self.start_request(&route, &tag, payload, &slot)?;
        Ok(id)
    }

    pub(crate) fn send_one_way(&self, route: Route, tag: Tag, payload: Vec<u8>) -> Result<(), EndpointError> {
        if self.inner.is_terminated() {
            return Err(EndpointError::Terminated);
        }
        let (port, id) = {
            let mut state = self.inner.lock();
            let route_state = state.routes.get_mut(&route);
            let Some((route_state, port)) = route_state.and_then(|rs| {
                let port = rs.port.clone()?;
                Some((rs, port))
            }) else {
                return Err(not_ready(&route));
            };
            (port, route_state.registry.allocate_id(&tag))
        };
        self.inner.post(&route, &port, &Envelope::request(tag, id, payload))
    }

    /// Register the waiter, then post. The registration is undone if the post fails.
    fn start_request(
        &self,
        route: &Route,
        tag: &Tag,
        payload: Vec<u8>,
        slot: &Arc<ReplySlot>,
    ) -> Result<(u64, Instant), EndpointError> {
        let inner = &self.inner;
        if inner.is_terminated() {
            return Err(EndpointError::Terminated);
        }
        let deadline = Instant::now() + inner.config.response_timeout();
        let limit = inner.config.max_pending_requests;

        let (port, id) = {
            let mut state = inner.lock();
            if state.pending_len() >= limit {
                warn!(endpoint = %inner.config.name, tag = %tag, "too many pending requests");
                return Err(EndpointError::ResourceExhausted { limit });
            }
            let route_state = state.routes.get_mut(route);
            let Some((route_state, port)) = route_state.and_then(|rs| {
                let port = rs.port.clone()?;
                Some((rs, port))
            }) else {
                return Err(not_ready(route));
            };
            let id = route_state.registry.allocate_id(tag);
            route_state.registry.insert_pending(
                tag.clone(),
                id,
                Pending {
                    slot: slot.clone(),
                    deadline,
                },
            );
            (port, id)
        };

        if let Err(err) = inner.post(route, &port, &Envelope::request(tag.clone(), id, payload)) {
            inner.withdraw(route, tag, id, slot);
            return Err(err);
        }
        inner.arm(deadline);
        Ok((id, deadline))
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    /// Register the handler for inbound requests carrying `tag`, replacing
    /// any earlier one
    pub fn register_handler(&self, tag: Tag, handler: impl Handler) {
        self.set_handler(Route::Primary, tag, Arc::new(handler));
    }

    /// Remove the handler for `tag`. Returns whether one was registered.
    pub fn unregister_handler(&self, tag: &Tag) -> bool {
        let mut state = self.inner.lock();
        state
            .routes
            .get_mut(&Route::Primary)
            .is_some_and(|primary| primary.registry.remove_handler(tag))
    }

    pub(crate) fn set_handler(&self, route: Route, tag: Tag, handler: Arc<dyn Handler>) {
        if self.inner.is_terminated() {
            return;
        }
        let mut state = self.inner.lock();
        state
            .routes
            .entry(route)
            .or_insert_with(|| RouteState::new(None))
            .registry
            .set_handler(tag, handler);
    }

    // =========================================================================
    // Lifecycle and introspection
    // =========================================================================

    /// Fail every request whose deadline has passed. Returns how many.
    ///
    /// Each request already schedules its own reap on the endpoint's timer,
    /// so calling this is only needed to sweep early.
    pub fn reap_expired(&self) -> usize {
        self.inner.reap_expired()
    }

    pub fn link_state(&self) -> LinkState {
        self.route_link(&Route::Primary).unwrap_or(LinkState::Closed)
    }

    pub(crate) fn route_link(&self, route: &Route) -> Option<LinkState> {
        if self.inner.is_terminated() {
            return Some(LinkState::Closed);
        }
        let state = self.inner.lock();
        state
            .routes
            .get(route)
            .filter(|route_state| route_state.port.is_some())
            .map(|route_state| route_state.link.clone())
    }

    pub fn stats(&self) -> EndpointStats {
        let pending = self.inner.lock().pending_len();
        self.inner.counters.snapshot(pending)
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }

    /// A handle for timers and callbacks that must not keep the endpoint alive
    pub fn downgrade(&self) -> WeakEndpoint {
        WeakEndpoint {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Stop dispatch, close every port, and fail everything in flight.
    ///
    /// Idempotent. Later sends fail with `Terminated`.
    pub fn terminate(&self) {
        if let Some(handle) = self.inner.shutdown() {
            // Terminating from a handler on the dispatcher itself: it exits on return
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// Non-owning handle to an [`Endpoint`]; does not keep it alive
#[derive(Clone)]
pub struct WeakEndpoint {
    inner: Weak<Inner>,
}

impl WeakEndpoint {
    pub fn upgrade(&self) -> Option<Endpoint> {
        self.inner.upgrade().map(|inner| Endpoint { inner })
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.inner.config.name)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

/// An endpoint waiting for its remote's ready signal.
///
/// Block with [`Connecting::wait`] or `.await` it. Dropping it abandons the
/// connection and terminates the endpoint.
#[must_use = "dropping a Connecting terminates the endpoint"]
pub struct Connecting {
    endpoint: Option<Endpoint>,
    slot: Arc<ReplySlot>,
    deadline: Instant,
}

impl Connecting {
    /// The endpoint being connected, for registering handlers before the
    /// remote is ready
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn wait(mut self) -> Result<Endpoint, EndpointError> {
        let outcome = match self.slot.wait_until(Some(self.deadline)) {
            Some(outcome) => outcome,
            None => self.expire(),
        };
        self.finish(outcome)
    }

    /// Claim the timeout, unless the ready signal won the race
    fn expire(&self) -> Reply {
        let timeout = self.timeout_error();
        if self.slot.complete(Err(timeout)) {
            return Err(self.timeout_error());
        }
        self.slot
            .wait_until(None)
            .unwrap_or(Err(EndpointError::Terminated))
    }

    fn timeout_error(&self) -> EndpointError {
        match &self.endpoint {
            Some(endpoint) => EndpointError::ConnectTimeout {
                name: endpoint.name().to_string(),
                after: endpoint.inner.config.connect_timeout(),
            },
            None => EndpointError::Terminated,
        }
    }

    fn finish(&mut self, outcome: Reply) -> Result<Endpoint, EndpointError> {
        let endpoint = self.endpoint.take().ok_or(EndpointError::Terminated)?;
        match outcome {
            Ok(_) => {
                endpoint.inner.lock().handshake = None;
                Ok(endpoint)
            }
            Err(err) => {
                warn!(endpoint = %endpoint.name(), "connect failed: {}", err);
                endpoint.terminate();
                Err(err)
            }
        }
    }
}

impl Future for Connecting {
    type Output = Result<Endpoint, EndpointError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(outcome) = this.slot.poll_outcome(cx) {
            return Poll::Ready(this.finish(outcome));
        }
        if Instant::now() >= this.deadline {
            let timeout = this.timeout_error();
            if this.slot.complete(Err(timeout)) {
                let err = this.timeout_error();
                return Poll::Ready(this.finish(Err(err)));
            }
        }
        Poll::Pending
    }
}

impl Drop for Connecting {
    fn drop(&mut self) {
        if let Some(endpoint) = self.endpoint.take() {
            endpoint.terminate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_hal::ChannelHandoff;
    use tether_hal_mock::MockPort;
    use tether_ipc::RoutingKey;

    #[test]
    fn test_route_display() {
        assert_eq!(Route::Primary.to_string(), "primary");
        assert_eq!(
            Route::Channel(ChannelName::new("logs")).to_string(),
            "channel:logs"
        );
    }

    #[test]
    fn test_not_ready_names_channel() {
        assert!(matches!(not_ready(&Route::Primary), EndpointError::Terminated));
        assert!(matches!(
            not_ready(&Route::Channel("logs".into())),
            EndpointError::ChannelNotReady(name) if name.as_str() == "logs"
        ));
    }

    #[test]
    fn test_event_after_queue_close_is_not_a_drop() {
        let endpoint = Endpoint::attach(
            Box::new(MockPort::detached("void")),
            EndpointConfig::new("closing").with_dispatch(DispatchMode::Inline),
        )
        .unwrap();
        // The window between the queue closing and the listener detaching
        let _ = endpoint.inner.queue.close();

        let offered = MockPort::detached("offered");
        let offered_handle = offered.handle();
        endpoint.inner.accept(
            Route::Primary,
            PortEvent::Handoff(ChannelHandoff {
                channel: ChannelName::new("logs"),
                routing_key: RoutingKey::new("k1"),
                port: Box::new(offered),
            }),
        );

        assert!(offered_handle.is_closed());
        assert_eq!(endpoint.stats().dropped, 0);
        assert!(endpoint.channels().is_empty());
    }
}
