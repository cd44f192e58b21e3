//! Callback registries for one route
//!
//! Each route (the primary port or one bridged channel) keeps three tables:
//!
//! | Table          | Key        | Value                           |
//! |----------------|------------|---------------------------------|
//! | `senders`      | tag, id    | waiter for the matching reply   |
//! | `receivers`    | tag        | handler for inbound requests    |
//! | `response_ids` | tag        | next correlation ID to hand out |

use std::collections::HashMap;
use std::sync::Arc;

use tether_ipc::Tag;
use web_time::Instant;

use crate::handler::Handler;
use crate::reply::ReplySlot;

/// An outstanding request
pub(crate) struct Pending {
    pub slot: Arc<ReplySlot>,
    pub deadline: Instant,
}

#[derive(Default)]
pub(crate) struct Registry {
    senders: HashMap<Tag, HashMap<u64, Pending>>,
    receivers: HashMap<Tag, Arc<dyn Handler>>,
    response_ids: HashMap<Tag, u64>,
}

impl Registry {
    /// Hand out the next correlation ID for `tag`.
    ///
    /// IDs start at 0, increase by one, wrap on overflow, and skip any ID
    /// still outstanding for the same tag.
    pub fn allocate_id(&mut self, tag: &Tag) -> u64 {
        let outstanding = self.senders.get(tag);
        let next = self.response_ids.entry(tag.clone()).or_insert(0);
        loop {
            let id = *next;
            *next = next.wrapping_add(1);
            if !outstanding.is_some_and(|ids| ids.contains_key(&id)) {
                return id;
            }
        }
    }

    pub fn insert_pending(&mut self, tag: Tag, id: u64, pending: Pending) {
        self.senders.entry(tag).or_default().insert(id, pending);
    }

    /// Remove and return the waiter for a reply
    pub fn take_pending(&mut self, tag: &Tag, id: u64) -> Option<Pending> {
        let ids = self.senders.get_mut(tag)?;
        let pending = ids.remove(&id);
        if ids.is_empty() {
            self.senders.remove(tag);
        }
        pending
    }

    /// Remove the entry only if it still belongs to `slot`
    pub fn withdraw(&mut self, tag: &Tag, id: u64, slot: &Arc<ReplySlot>) -> bool {
        let owned = self
            .senders
            .get(tag)
            .and_then(|ids| ids.get(&id))
            .is_some_and(|pending| Arc::ptr_eq(&pending.slot, slot));
        if owned {
            self.take_pending(tag, id);
        }
        owned
    }

    /// Remove every entry whose deadline has passed
    pub fn take_expired(&mut self, now: Instant) -> Vec<(Tag, u64, Pending)> {
        let mut expired = Vec::new();
        for (tag, ids) in self.senders.iter_mut() {
            let overdue: Vec<u64> = ids
                .iter()
                .filter(|(_, pending)| pending.deadline <= now)
                .map(|(id, _)| *id)
                .collect();
            for id in overdue {
                if let Some(pending) = ids.remove(&id) {
                    expired.push((tag.clone(), id, pending));
                }
            }
        }
        self.senders.retain(|_, ids| !ids.is_empty());
        expired
    }

    /// Remove every outstanding entry (terminate)
    pub fn drain_pending(&mut self) -> Vec<Pending> {
        self.senders
            .drain()
            .flat_map(|(_, ids)| ids.into_values())
            .collect()
    }

    pub fn pending_len(&self) -> usize {
        self.senders.values().map(HashMap::len).sum()
    }

    pub fn set_handler(&mut self, tag: Tag, handler: Arc<dyn Handler>) {
        self.receivers.insert(tag, handler);
    }

    pub fn remove_handler(&mut self, tag: &Tag) -> bool {
        self.receivers.remove(tag).is_some()
    }

    pub fn handler(&self, tag: &Tag) -> Option<Arc<dyn Handler>> {
        self.receivers.get(tag).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn tag(name: &str) -> Tag {
        Tag::new(name).unwrap()
    }

    fn pending(deadline: Instant) -> Pending {
        Pending {
            slot: ReplySlot::new(),
            deadline,
        }
    }

    #[test]
    fn test_ids_start_at_zero_per_tag() {
        let mut registry = Registry::default();
        assert_eq!(registry.allocate_id(&tag("a")), 0);
        assert_eq!(registry.allocate_id(&tag("a")), 1);
        assert_eq!(registry.allocate_id(&tag("b")), 0);
    }

    #[test]
    fn test_ids_skip_outstanding_after_wrap() {
        let mut registry = Registry::default();
        let t = tag("wrap");
        registry.insert_pending(t.clone(), 0, pending(Instant::now()));
        registry.insert_pending(t.clone(), 1, pending(Instant::now()));
        registry.response_ids.insert(t.clone(), u64::MAX);

        assert_eq!(registry.allocate_id(&t), u64::MAX);
        // Wrapped: 0 and 1 are still in flight
        assert_eq!(registry.allocate_id(&t), 2);
    }

    #[test]
    fn test_take_pending_once() {
        let mut registry = Registry::default();
        let t = tag("get");
        registry.insert_pending(t.clone(), 4, pending(Instant::now()));
        assert!(registry.take_pending(&t, 4).is_some());
        assert!(registry.take_pending(&t, 4).is_none());
        assert_eq!(registry.pending_len(), 0);
    }

    #[test]
    fn test_withdraw_checks_owner() {
        let mut registry = Registry::default();
        let t = tag("get");
        let entry = pending(Instant::now());
        let slot = entry.slot.clone();
        registry.insert_pending(t.clone(), 0, entry);

        assert!(!registry.withdraw(&t, 0, &ReplySlot::new()));
        assert!(registry.withdraw(&t, 0, &slot));
        assert!(!registry.withdraw(&t, 0, &slot));
    }

    #[test]
    fn test_take_expired() {
        let mut registry = Registry::default();
        let now = Instant::now();
        let t = tag("slow");
        registry.insert_pending(t.clone(), 0, pending(now - Duration::from_millis(1)));
        registry.insert_pending(t.clone(), 1, pending(now + Duration::from_secs(60)));

        let expired = registry.take_expired(now);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].1, 0);
        assert_eq!(registry.pending_len(), 1);
    }
}
