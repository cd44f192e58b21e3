//! Bounded inbound FIFO
//!
//! Producers are port event listeners and must never block, so `push` fails
//! instead of waiting when the queue is full.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tether_hal::PortEvent;

use crate::endpoint::Route;

/// One inbound event tagged with the route it arrived on
pub(crate) struct Inbound {
    pub route: Route,
    pub event: PortEvent,
}

/// Why `push` handed an item back
pub(crate) enum Rejected {
    /// At capacity; the event is lost traffic
    Full(Inbound),
    /// The endpoint is shutting down
    Closed(Inbound),
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<Inbound>,
    closed: bool,
}

pub(crate) struct InboundQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    capacity: usize,
}

impl InboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            available: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue without blocking. Hands the item back if full or closed.
    pub fn push(&self, item: Inbound) -> Result<(), Rejected> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(Rejected::Closed(item));
            }
            if state.items.len() >= self.capacity {
                return Err(Rejected::Full(item));
            }
            state.items.push_back(item);
        }
        self.available.notify_one();
        Ok(())
    }

    pub fn try_pop(&self) -> Option<Inbound> {
        self.lock().items.pop_front()
    }

    /// Wait up to `timeout` for an item. Returns early when closed.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Inbound> {
        let mut state = self.lock();
        if state.items.is_empty() && !state.closed {
            state = self
                .available
                .wait_timeout(state, timeout)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        state.items.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Refuse further pushes, wake the consumer, and return what was queued
    pub fn close(&self) -> Vec<Inbound> {
        let drained = {
            let mut state = self.lock();
            state.closed = true;
            state.items.drain(..).collect()
        };
        self.available.notify_all();
        drained
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
