//! Novelty decisions for feed items.
//!
//! Ordered items are compared against a single monotonic cursor. Items
//! without a usable order (reposts) are decided by dedup keys in the store,
//! which is not part of this module.

use chrono::{DateTime, Utc};

use tidewatch_common::{FeedItem, ItemKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupPolicy {
    Monotonic,
    SetMembership,
}

pub fn policy_for(item: &FeedItem) -> DedupPolicy {
    match (item.kind, item.ordinal) {
        (ItemKind::Repost, _) | (_, None) => DedupPolicy::SetMembership,
        _ => DedupPolicy::Monotonic,
    }
}

/// What a batch means relative to the stored cursor.
#[derive(Debug, PartialEq)]
pub struct MonotonicDelta<'a> {
    /// Items strictly above the cursor, ascending by ordinal.
    pub fresh: Vec<&'a FeedItem>,
    /// Highest ordinal in the batch, when it is above the cursor.
    pub advance_to: Option<i64>,
}

/// Split a batch against `cursor`. Arrival order does not matter.
pub fn monotonic_delta<'a>(cursor: i64, items: &[&'a FeedItem]) -> MonotonicDelta<'a> {
    let mut fresh: Vec<&FeedItem> = items
        .iter()
        .copied()
        .filter(|item| item.ordinal.is_some_and(|o| o > cursor))
        .collect();
    fresh.sort_by(|a, b| a.ordinal.cmp(&b.ordinal).then_with(|| a.item_id.cmp(&b.item_id)));
    fresh.dedup_by(|a, b| a.item_id == b.item_id);

    let advance_to = items
        .iter()
        .filter_map(|item| item.ordinal)
        .max()
        .filter(|max| *max > cursor);

    MonotonicDelta { fresh, advance_to }
}

/// Cursor for a feed seen for the first time: "now", or the newest visible
/// item if the platform clock is ahead of ours.
pub fn initial_cursor(origin: i64, items: &[&FeedItem]) -> i64 {
    items
        .iter()
        .filter_map(|item| item.ordinal)
        .fold(origin, i64::max)
}

/// Whether an item is recent enough to announce.
pub fn is_fresh(item: &FeedItem, max_age: chrono::Duration, now: DateTime<Utc>) -> bool {
    now - item.published_at <= max_age
}
