//! Mock port implementation for testing tether
//!
//! This provides an in-memory implementation of the [`Port`] trait so the
//! endpoint core can be tested without a browser. A [`MockPort::pair`] behaves
//! like the two ends of a `MessageChannel`:
//!
//! - Posting on one end delivers to the other end's subscriber, synchronously
//!   on the posting thread (the subscriber only enqueues)
//! - Events that arrive before anyone subscribes are held, the way a browser
//!   queues messages until `onmessage` is set
//! - Posts to a closed end are silently discarded
//!
//! Failure injection helpers let tests simulate a throwing `postMessage`, a
//! crashed remote, or raw bytes that are not an envelope.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tether_hal::{ChannelFactory, ChannelHandoff, EventSink, Port, PortError, PortEvent, Subscription};

/// One end's inbox
#[derive(Default)]
struct Inbox {
    sink: Option<EventSink>,
    /// Events received before a subscriber was attached
    backlog: Vec<PortEvent>,
    /// Bumped on every subscribe so a stale cancel can't detach a newer sink
    generation: u64,
}

struct End {
    label: String,
    inbox: Mutex<Inbox>,
    closed: AtomicBool,
    fail_posts: AtomicBool,
    /// Every buffer successfully posted from this end
    posted: Mutex<Vec<Vec<u8>>>,
}

impl End {
    fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            inbox: Mutex::new(Inbox::default()),
            closed: AtomicBool::new(false),
            fail_posts: AtomicBool::new(false),
            posted: Mutex::new(Vec::new()),
        })
    }

    fn deliver(&self, event: PortEvent) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let sink = match self.inbox.lock() {
            Ok(mut inbox) => match inbox.sink.clone() {
                Some(sink) => sink,
                None => {
                    inbox.backlog.push(event);
                    return;
                }
            },
            Err(_) => return,
        };
        sink(event);
    }
}

/// In-memory port
pub struct MockPort {
    end: Arc<End>,
    peer: Option<Arc<End>>,
}

impl MockPort {
    /// Create two linked ends
    pub fn pair(label_a: &str, label_b: &str) -> (MockPort, MockPort) {
        let a = End::new(label_a);
        let b = End::new(label_b);
        (
            MockPort {
                end: a.clone(),
                peer: Some(b.clone()),
            },
            MockPort {
                end: b,
                peer: Some(a),
            },
        )
    }

    /// Create a port whose posts go nowhere (a remote that never answers)
    pub fn detached(label: &str) -> MockPort {
        MockPort {
            end: End::new(label),
            peer: None,
        }
    }

    /// Make subsequent posts fail as if `postMessage` threw
    pub fn set_fail_posts(&self, fail: bool) {
        self.end.fail_posts.store(fail, Ordering::SeqCst);
    }

    /// Push an event into this end as if it came from the transport
    pub fn inject(&self, event: PortEvent) {
        self.end.deliver(event);
    }

    /// Copies of every buffer successfully posted from this end
    pub fn posted(&self) -> Vec<Vec<u8>> {
        self.end
            .posted
            .lock()
            .map(|posted| posted.clone())
            .unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.end.closed.load(Ordering::SeqCst)
    }

    pub fn is_subscribed(&self) -> bool {
        self.end
            .inbox
            .lock()
            .map(|inbox| inbox.sink.is_some())
            .unwrap_or(false)
    }

    /// A second handle to the same end (shares inbox, flags and post log)
    pub fn handle(&self) -> MockPort {
        MockPort {
            end: self.end.clone(),
            peer: self.peer.clone(),
        }
    }

    fn check_postable(&self) -> Result<(), PortError> {
        if self.end.closed.load(Ordering::SeqCst) {
            return Err(PortError::Closed);
        }
        if self.end.fail_posts.load(Ordering::SeqCst) {
            return Err(PortError::PostFailed(format!(
                "{}: injected post failure",
                self.end.label
            )));
        }
        Ok(())
    }
}

impl Port for MockPort {
    fn label(&self) -> &str {
        &self.end.label
    }

    fn post(&self, bytes: Vec<u8>) -> Result<(), PortError> {
        self.check_postable()?;
        if let Ok(mut posted) = self.end.posted.lock() {
            posted.push(bytes.clone());
        }
        if let Some(peer) = &self.peer {
            peer.deliver(PortEvent::Message(bytes));
        }
        Ok(())
    }

    fn post_handoff(&self, handoff: ChannelHandoff) -> Result<(), PortError> {
        self.check_postable()?;
        if handoff.port.as_any().downcast_ref::<MockPort>().is_none() {
            return Err(PortError::Incompatible(format!(
                "{} is not a mock port",
                handoff.port.label()
            )));
        }
        if let Some(peer) = &self.peer {
            peer.deliver(PortEvent::Handoff(handoff));
        }
        Ok(())
    }

    fn subscribe(&self, sink: EventSink) -> Result<Subscription, PortError> {
        if self.end.closed.load(Ordering::SeqCst) {
            return Err(PortError::Closed);
        }
        let (backlog, generation) = {
            let mut inbox = self
                .end
                .inbox
                .lock()
                .map_err(|_| PortError::SubscribeFailed("inbox poisoned".into()))?;
            if inbox.sink.is_some() {
                return Err(PortError::AlreadySubscribed);
            }
            inbox.sink = Some(sink.clone());
            inbox.generation += 1;
            (std::mem::take(&mut inbox.backlog), inbox.generation)
        };

        for event in backlog {
            sink(event);
        }

        let end = self.end.clone();
        Ok(Subscription::new(move || {
            if let Ok(mut inbox) = end.inbox.lock() {
                if inbox.generation == generation {
                    inbox.sink = None;
                }
            }
        }))
    }

    fn close(&self) {
        self.end.closed.store(true, Ordering::SeqCst);
        if let Ok(mut inbox) = self.end.inbox.lock() {
            inbox.sink = None;
            inbox.backlog.clear();
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Channel factory producing [`MockPort`] pairs
#[derive(Default)]
pub struct MockChannelFactory {
    created: AtomicUsize,
}

impl MockChannelFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of channels created so far
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl ChannelFactory for MockChannelFactory {
    fn create_channel(&self, label: &str) -> Result<(Box<dyn Port>, Box<dyn Port>), PortError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let (a, b) = MockPort::pair(&format!("{}#1", label), &format!("{}#2", label));
        Ok((Box::new(a), Box::new(b)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collecting_sink() -> (EventSink, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_by_sink = seen.clone();
        let sink: EventSink = Arc::new(move |event| {
            let text = match event {
                PortEvent::Message(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                other => format!("{:?}", other),
            };
            seen_by_sink.lock().unwrap().push(text);
        });
        (sink, seen)
    }

    #[test]
    fn test_pair_delivers_to_peer() {
        let (a, b) = MockPort::pair("a", "b");
        let (sink, seen) = collecting_sink();
        let _sub = b.subscribe(sink).unwrap();

        a.post(b"one".to_vec()).unwrap();
        a.post(b"two".to_vec()).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["one", "two"]);
        assert_eq!(a.posted().len(), 2);
    }

    #[test]
    fn test_backlog_flushed_on_subscribe() {
        let (a, b) = MockPort::pair("a", "b");
        a.post(b"early".to_vec()).unwrap();

        let (sink, seen) = collecting_sink();
        let _sub = b.subscribe(sink).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["early"]);
    }

    #[test]
    fn test_single_live_subscription() {
        let (_a, b) = MockPort::pair("a", "b");
        let (sink, _) = collecting_sink();
        let sub = b.subscribe(sink.clone()).unwrap();
        assert_eq!(b.subscribe(sink.clone()).unwrap_err(), PortError::AlreadySubscribed);

        drop(sub);
        assert!(!b.is_subscribed());
        assert!(b.subscribe(sink).is_ok());
    }

    #[test]
    fn test_injected_post_failure() {
        let (a, _b) = MockPort::pair("a", "b");
        a.set_fail_posts(true);
        assert!(matches!(a.post(vec![1]), Err(PortError::PostFailed(_))));
        assert!(a.posted().is_empty());
    }

    #[test]
    fn test_closed_end_discards() {
        let (a, b) = MockPort::pair("a", "b");
        b.close();
        // Posting toward a closed end succeeds but goes nowhere
        assert!(a.post(vec![1]).is_ok());
        assert_eq!(b.post(vec![1]), Err(PortError::Closed));
        assert!(b.subscribe(Arc::new(|_: PortEvent| {})).is_err());
    }

    #[test]
    fn test_factory_pairs_are_linked() {
        let factory = MockChannelFactory::new();
        let (x, y) = factory.create_channel("logs").unwrap();
        let (sink, seen) = collecting_sink();
        let _sub = y.subscribe(sink).unwrap();

        x.post(b"ping".to_vec()).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["ping"]);
        assert_eq!(factory.created(), 1);
        assert_eq!(x.label(), "logs#1");
    }
}
