//! Short-lived record of recently dispatched feed items.
//!
//! Covers the gap between dispatch and the cursor write: an item is recorded
//! once every target had its attempt, so if the cycle fails before the cursor
//! moves, the next cycle skips what was already delivered and retries the
//! rest.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_CAPACITY: usize = 10_000;

type Key = (Uuid, String);

#[derive(Default)]
struct Entries {
    at: HashMap<Key, Instant>,
    order: VecDeque<(Key, Instant)>,
}

pub struct SeenCache {
    ttl: Duration,
    capacity: usize,
    entries: Mutex<Entries>,
}

impl Default for SeenCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_CAPACITY)
    }
}

impl SeenCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: Mutex::new(Entries::default()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `item_id` for `resource_id`. Returns false when it was already
    /// recorded within the TTL.
    pub fn insert(&self, resource_id: Uuid, item_id: &str, now: Instant) -> bool {
        let mut entries = self.entries();
        self.evict(&mut entries, now);

        let key = (resource_id, item_id.to_string());
        if entries.at.contains_key(&key) {
            return false;
        }
        while entries.at.len() >= self.capacity {
            match entries.order.pop_front() {
                Some((old, at)) => {
                    if entries.at.get(&old) == Some(&at) {
                        entries.at.remove(&old);
                    }
                }
                None => break,
            }
        }
        entries.at.insert(key.clone(), now);
        entries.order.push_back((key, now));
        true
    }

    /// Whether `item_id` was recorded for `resource_id` within the TTL.
    pub fn contains(&self, resource_id: Uuid, item_id: &str, now: Instant) -> bool {
        let mut entries = self.entries();
        self.evict(&mut entries, now);
        entries.at.contains_key(&(resource_id, item_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries().at.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict(&self, entries: &mut Entries, now: Instant) {
        while let Some((_, at)) = entries.order.front() {
            if now.saturating_duration_since(*at) < self.ttl {
                break;
            }
            if let Some((key, at)) = entries.order.pop_front() {
                if entries.at.get(&key) == Some(&at) {
                    entries.at.remove(&key);
                }
            }
        }
    }
}
