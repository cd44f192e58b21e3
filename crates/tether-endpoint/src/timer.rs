//! Deadline timer for platforms without one of their own
//!
//! A single thread per endpoint sleeps until the earliest scheduled task is
//! due, runs it, and goes back to sleep. Tasks run outside the timer's lock,
//! so a task may schedule more tasks.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tether_hal::Timer;
use tracing::debug;
use web_time::Instant;

type Task = Box<dyn FnOnce() + Send>;

struct Entry {
    at: Instant,
    seq: u64,
    task: Task,
}

// Reversed so the max-heap yields the earliest entry first; `seq` keeps
// same-instant entries in scheduling order
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.at.cmp(&self.at).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

#[derive(Default)]
struct TimerState {
    entries: BinaryHeap<Entry>,
    next_seq: u64,
    stopped: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<TimerState>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run(&self) {
        let mut state = self.lock();
        while !state.stopped {
            let now = Instant::now();
            match state.entries.peek().map(|entry| entry.at) {
                Some(at) if at <= now => {
                    if let Some(entry) = state.entries.pop() {
                        drop(state);
                        (entry.task)();
                        state = self.lock();
                    }
                }
                Some(at) => {
                    state = self
                        .changed
                        .wait_timeout(state, at - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
                None => {
                    state = self.changed.wait(state).unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
        debug!("timer exiting");
    }
}

/// [`Timer`] backed by a dedicated thread. Pending tasks are dropped unrun
/// when the timer is dropped.
pub(crate) struct ThreadTimer {
    shared: Arc<Shared>,
}

impl ThreadTimer {
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        let shared = Arc::new(Shared::default());
        let worker = shared.clone();
        let dispatch = tracing::dispatcher::get_default(|current| current.clone());
        std::thread::Builder::new()
            .name(format!("tether-{}-timer", name))
            .spawn(move || tracing::dispatcher::with_default(&dispatch, || worker.run()))?;
        Ok(Self { shared })
    }
}

impl Timer for ThreadTimer {
    fn schedule(&self, delay: Duration, task: Task) {
        {
            let mut state = self.shared.lock();
            if state.stopped {
                return;
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.entries.push(Entry {
                at: Instant::now() + delay,
                seq,
                task,
            });
        }
        self.shared.changed.notify_one();
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        // May run on the timer thread itself, from inside a task
        self.shared.lock().stopped = true;
        self.shared.changed.notify_one();
    }
}
