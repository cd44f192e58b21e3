//! One-shot reply slots
//!
//! Every outstanding request owns a [`ReplySlot`]. Whoever removes the
//! request's registry entry (the dispatcher on a reply, a deadline reap, a
//! waiter at its deadline, or `terminate`) is the only party allowed to
//! complete it, so a slot is completed at most once.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use tether_ipc::Tag;
use tracing::warn;
use web_time::Instant;

use crate::endpoint::{Inner, Route};
use crate::EndpointError;

/// Outcome of a request: the reply payload (`None` = empty reply) or an error
pub type Reply = Result<Option<Vec<u8>>, EndpointError>;

pub(crate) type ReplyCallback = Box<dyn FnOnce(Reply) + Send>;

#[derive(Default)]
struct SlotState {
    completed: bool,
    outcome: Option<Reply>,
    waker: Option<Waker>,
    callback: Option<ReplyCallback>,
}

pub(crate) struct ReplySlot {
    state: Mutex<SlotState>,
    done: Condvar,
}

impl ReplySlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SlotState::default()),
            done: Condvar::new(),
        })
    }

    pub fn with_callback(callback: ReplyCallback) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SlotState {
                callback: Some(callback),
                ..SlotState::default()
            }),
            done: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Complete the slot. Returns false if it was already completed.
    ///
    /// A callback runs on the completing thread, outside the slot lock.
    pub fn complete(&self, outcome: Reply) -> bool {
        let (callback, waker) = {
            let mut state = self.lock();
            if state.completed {
                return false;
            }
            state.completed = true;
            match state.callback.take() {
                Some(callback) => (Some((callback, outcome)), None),
                None => {
                    state.outcome = Some(outcome);
                    (None, state.waker.take())
                }
            }
        };
        self.done.notify_all();
        if let Some((callback, outcome)) = callback {
            callback(outcome);
        }
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    pub fn is_completed(&self) -> bool {
        self.lock().completed
    }

    /// Block until completed, or until `deadline` passes (returns `None`)
    pub fn wait_until(&self, deadline: Option<Instant>) -> Option<Reply> {
        let mut state = self.lock();
        loop {
            if let Some(outcome) = state.outcome.take() {
                return Some(outcome);
            }
            match deadline {
                None => {
                    state = self.done.wait(state).unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    state = self
                        .done
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }

    /// Take the outcome if present, otherwise remember the task to wake
    pub fn poll_outcome(&self, cx: &mut Context<'_>) -> Option<Reply> {
        let mut state = self.lock();
        match state.outcome.take() {
            Some(outcome) => Some(outcome),
            None => {
                state.waker = Some(cx.waker().clone());
                None
            }
        }
    }
}

/// Handle to an outstanding request.
///
/// Either block on it with [`PendingReply::wait`] or `.await` it. Dropping it
/// unanswered withdraws the request; a reply arriving afterwards is logged and
/// dropped.
#[must_use = "a request whose reply is never awaited is withdrawn on drop"]
pub struct PendingReply {
    tag: Tag,
    id: u64,
    route: Route,
    timeout: Duration,
    deadline: Instant,
    slot: Arc<ReplySlot>,
    endpoint: Weak<Inner>,
}

impl PendingReply {
    pub(crate) fn new(
        tag: Tag,
        id: u64,
        route: Route,
        timeout: Duration,
        deadline: Instant,
        slot: Arc<ReplySlot>,
        endpoint: Weak<Inner>,
    ) -> Self {
        Self {
            tag,
            id,
            route,
            timeout,
            deadline,
            slot,
            endpoint,
        }
    }

    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    /// Correlation ID assigned to this request
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block the calling thread until the reply arrives or the timeout passes.
    ///
    /// Not for the browser main thread, which cannot block; `.await` instead.
    pub fn wait(self) -> Reply {
        if let Some(outcome) = self.slot.wait_until(Some(self.deadline)) {
            return outcome;
        }
        match self.withdraw() {
            Some(true) => self.timed_out(),
            // A completer already removed the entry and is about to fill the slot
            Some(false) => self.slot.wait_until(None).unwrap_or(Err(EndpointError::Terminated)),
            None => self
                .slot
                .wait_until(Some(Instant::now()))
                .unwrap_or(Err(EndpointError::Terminated)),
        }
    }

    /// Remove our registry entry. `None` if the endpoint is gone.
    fn withdraw(&self) -> Option<bool> {
        let inner = self.endpoint.upgrade()?;
        Some(inner.withdraw(&self.route, &self.tag, self.id, &self.slot))
    }

    fn timed_out(&self) -> Reply {
        if let Some(inner) = self.endpoint.upgrade() {
            inner.counters.timed_out();
            warn!(
                endpoint = %inner.config.name,
                tag = %self.tag,
                id = self.id,
                "request timed out after {:?}",
                self.timeout
            );
        }
        Err(EndpointError::Timeout {
            tag: self.tag.clone(),
            id: self.id,
            after: self.timeout,
        })
    }
}

impl Future for PendingReply {
    type Output = Reply;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Reply> {
        let this = self.get_mut();
        if let Some(outcome) = this.slot.poll_outcome(cx) {
            return Poll::Ready(outcome);
        }
        if Instant::now() >= this.deadline {
            match this.withdraw() {
                Some(true) => return Poll::Ready(this.timed_out()),
                Some(false) => {}
                None => return Poll::Ready(Err(EndpointError::Terminated)),
            }
        }
        // Woken by the reply, the deadline timer, or terminate
        Poll::Pending
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if !self.slot.is_completed() {
            let _ = self.withdraw();
        }
    }
}

impl std::fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingReply")
            .field("tag", &self.tag)
            .field("id", &self.id)
            .field("route", &self.route)
            .finish()
    }
}
