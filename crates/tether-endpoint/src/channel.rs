//! Bridged channels
//!
//! A broker that holds endpoints to two remotes can connect them directly:
//! [`bridge`] creates a channel pair and hands one end to each remote over its
//! primary port. The receiving endpoint registers the new port under the
//! channel name, after which `send_on` / `register_handler_on` address it
//! exactly like the primary port.
//!
//! ```text
//!   broker                       worker A                worker B
//!     |  create_channel()           |                       |
//!     |-- Handoff(end_a) ---------->| install "logs"        |
//!     |-- Handoff(end_b) ------------------------------------>| install "logs"
//!     |                             |<====== channel ======>|
//! ```

use std::sync::Arc;

use tether_hal::{ChannelFactory, ChannelHandoff, Port, PortEvent};
use tether_ipc::{ChannelName, RoutingKey, Tag};
use tracing::{error, info, warn};

use crate::endpoint::{Endpoint, Inner, LinkState, Route, RouteState};
use crate::handler::Handler;
use crate::reply::{PendingReply, Reply};
use crate::EndpointError;

/// Connect the remotes behind `a` and `b` with a dedicated channel.
///
/// Both remotes register the channel under `channel` and see `routing_key`
/// alongside it.
pub fn bridge(
    factory: &dyn ChannelFactory,
    a: &Endpoint,
    b: &Endpoint,
    channel: &ChannelName,
    routing_key: &RoutingKey,
) -> Result<(), EndpointError> {
    let (end_a, end_b) = factory.create_channel(channel.as_str())?;
    info!(
        channel = %channel,
        routing_key = %routing_key,
        a = %a.name(),
        b = %b.name(),
        "bridging"
    );
    if let Err(err) = a.offer_channel(ChannelHandoff {
        channel: channel.clone(),
        routing_key: routing_key.clone(),
        port: end_a,
    }) {
        end_b.close();
        return Err(err);
    }
    b.offer_channel(ChannelHandoff {
        channel: channel.clone(),
        routing_key: routing_key.clone(),
        port: end_b,
    })
}

impl Inner {
    /// Register a handed-off port as a channel route
    pub(crate) fn install_channel(self: &Arc<Self>, via: &Route, handoff: ChannelHandoff) {
        let ChannelHandoff {
            channel,
            routing_key,
            port,
        } = handoff;
        if self.is_terminated() {
            port.close();
            return;
        }
        let port: Arc<dyn Port> = Arc::from(port);
        let route = Route::Channel(channel.clone());

        let subscription = match port.subscribe(self.sink(route.clone())) {
            Ok(subscription) => subscription,
            Err(err) => {
                error!(
                    endpoint = %self.config.name,
                    channel = %channel,
                    "failed to listen on channel: {}",
                    err
                );
                port.close();
                return;
            }
        };

        let (replaced, waiters) = {
            let mut state = self.lock();
            let route_state = state
                .routes
                .entry(route)
                .or_insert_with(|| RouteState::new(None));
            let replaced = route_state.port.replace(port);
            drop(route_state.subscription.replace(subscription));
            route_state.routing_key = Some(routing_key.clone());
            route_state.link = LinkState::Up;
            let waiters = state.channel_waiters.remove(&channel).unwrap_or_default();
            (replaced, waiters)
        };

        match replaced {
            Some(old) => {
                warn!(
                    endpoint = %self.config.name,
                    channel = %channel,
                    "channel handed off again, replacing port"
                );
                old.close();
            }
            None => info!(
                endpoint = %self.config.name,
                channel = %channel,
                routing_key = %routing_key,
                via = %via,
                "channel established"
            ),
        }

        for callback in waiters {
            callback(&channel);
        }
    }
}

impl Endpoint {
    /// Transfer one end of a channel to the remote over the primary port
    pub fn offer_channel(&self, handoff: ChannelHandoff) -> Result<(), EndpointError> {
        if self.is_terminated() {
            handoff.port.close();
            return Err(EndpointError::Terminated);
        }
        let port = self.inner.port_for(&Route::Primary)?;
        let channel = handoff.channel.clone();
        if let Err(err) = port.post_handoff(handoff) {
            error!(endpoint = %self.name(), channel = %channel, "handoff failed: {}", err);
            self.inner.degrade(&Route::Primary, err.to_string());
            return Err(err.into());
        }
        Ok(())
    }

    /// Install a channel end locally, as if a broker had handed it over.
    ///
    /// Goes through the inbound queue so it is ordered with other traffic.
    pub fn adopt_channel(&self, handoff: ChannelHandoff) {
        self.inner.accept(Route::Primary, PortEvent::Handoff(handoff));
    }

    /// Run `callback` once `channel` is established.
    ///
    /// Runs immediately (on the calling thread) if it already is; otherwise on
    /// the dispatching context right after the handoff is installed. A later
    /// replacement of the same channel does not run it again.
    pub fn on_channel_ready<F>(&self, channel: impl Into<ChannelName>, callback: F)
    where
        F: FnOnce(&ChannelName) + Send + 'static,
    {
        let channel = channel.into();
        let callback = {
            let mut state = self.inner.lock();
            let established = state
                .routes
                .get(&Route::Channel(channel.clone()))
                .is_some_and(|route_state| route_state.port.is_some());
            if established {
                Some(callback)
            } else {
                if !self.is_terminated() {
                    state
                        .channel_waiters
                        .entry(channel.clone())
                        .or_default()
                        .push(Box::new(callback));
                }
                None
            }
        };
        if let Some(callback) = callback {
            callback(&channel);
        }
    }

    /// Names of every established channel
    pub fn channels(&self) -> Vec<ChannelName> {
        let state = self.inner.lock();
        let mut names: Vec<ChannelName> = state
            .routes
            .iter()
            .filter(|(_, route_state)| route_state.port.is_some())
            .filter_map(|(route, _)| match route {
                Route::Channel(name) => Some(name.clone()),
                Route::Primary => None,
            })
            .collect();
        names.sort();
        names
    }

    /// Routing key the broker attached to `channel`
    pub fn channel_routing_key(&self, channel: &ChannelName) -> Option<RoutingKey> {
        let state = self.inner.lock();
        state
            .routes
            .get(&Route::Channel(channel.clone()))
            .and_then(|route_state| route_state.routing_key.clone())
    }

    /// `None` if the channel is not established
    pub fn channel_link_state(&self, channel: &ChannelName) -> Option<LinkState> {
        self.route_link(&Route::Channel(channel.clone()))
    }

    pub fn send_on(
        &self,
        channel: &ChannelName,
        tag: Tag,
        payload: Vec<u8>,
    ) -> Result<PendingReply, EndpointError> {
        self.send_route(Route::Channel(channel.clone()), tag, payload)
    }

    pub fn request_on(&self, channel: &ChannelName, tag: Tag, payload: Vec<u8>) -> Reply {
        self.send_on(channel, tag, payload)?.wait()
    }

    pub fn send_no_response_on(
        &self,
        channel: &ChannelName,
        tag: Tag,
        payload: Vec<u8>,
    ) -> Result<(), EndpointError> {
        self.send_one_way(Route::Channel(channel.clone()), tag, payload)
    }

    pub fn send_with_callback_on<F>(
        &self,
        channel: &ChannelName,
        tag: Tag,
        payload: Vec<u8>,
        callback: F,
    ) -> Result<u64, EndpointError>
    where
        F: FnOnce(Reply) + Send + 'static,
    {
        self.callback_route(Route::Channel(channel.clone()), tag, payload, callback)
    }

    /// Register a handler on a channel. Allowed before the channel exists.
    pub fn register_handler_on(&self, channel: &ChannelName, tag: Tag, handler: impl Handler) {
        self.set_handler(Route::Channel(channel.clone()), tag, Arc::new(handler));
    }
}
