//! Traffic counters
//!
//! Kept as atomics next to the endpoint state so the hot path never takes
//! the registry lock just to count.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time snapshot of an endpoint's counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EndpointStats {
    /// Envelopes posted (requests, one-way messages and replies)
    pub sent: u64,
    /// Envelopes decoded from the transport
    pub received: u64,
    /// Replies matched to a waiting sender
    pub replies_delivered: u64,
    /// Inbound events discarded (no handler, unknown id, undecodable, queue full)
    pub dropped: u64,
    /// Requests that gave up waiting
    pub timeouts: u64,
    /// Requests currently awaiting a reply
    pub pending: u64,
}

#[derive(Default)]
pub(crate) struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    replies_delivered: AtomicU64,
    dropped: AtomicU64,
    timeouts: AtomicU64,
}

impl Counters {
    pub fn sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reply_delivered(&self) {
        self.replies_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn timed_out(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, pending: usize) -> EndpointStats {
        EndpointStats {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            replies_delivered: self.replies_delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            pending: pending as u64,
        }
    }
}
