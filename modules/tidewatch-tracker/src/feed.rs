//! Feed processing: decide which items are new, fan them out, then persist
//! the cursor.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use tidewatch_common::{DeliveryError, FeedItem, FeedSnapshot, SessionState, TrackedResource};
use tidewatch_store::{Result, TrackerStore};

use crate::cursor::{self, DedupPolicy};
use crate::dispatcher::{Delivery, DispatchReport, Dispatcher};
use crate::notify::NotificationSink;
use crate::render::{self, MentionContext};
use crate::resolver;
use crate::seen::SeenCache;

/// Per-platform feed parameters.
#[derive(Debug, Clone, Copy)]
pub struct FeedPolicy {
    pub max_item_age: chrono::Duration,
    /// Cursor value meaning "now" for a first observation.
    pub origin: i64,
}

pub async fn apply_feed<S, N>(
    store: &S,
    sink: &N,
    seen: &SeenCache,
    resource: &TrackedResource,
    snapshot: &FeedSnapshot,
    policy: FeedPolicy,
    now: DateTime<Utc>,
) -> Result<DispatchReport>
where
    S: TrackerStore + ?Sized,
    N: NotificationSink + ?Sized,
{
    let (ordered, unordered): (Vec<&FeedItem>, Vec<&FeedItem>) = snapshot
        .items
        .iter()
        .partition(|item| cursor::policy_for(item) == DedupPolicy::Monotonic);

    let Some(stored_cursor) = resource.cursor else {
        // First observation: everything visible is history.
        for item in &unordered {
            store.mark_seen(resource.id, &item.item_id).await?;
        }
        let initial = cursor::initial_cursor(policy.origin, &ordered);
        store.advance_cursor(resource.id, initial).await?;
        info!(resource = %resource.external_id, cursor = initial, "Feed cursor initialized");
        return Ok(DispatchReport {
            skipped: snapshot.items.len(),
            ..DispatchReport::default()
        });
    };

    let mut report = DispatchReport::default();
    let delta = cursor::monotonic_delta(stored_cursor, &ordered);
    let clock = Instant::now();

    let mut pending: Vec<Pending<'_>> = Vec::new();
    for item in delta.fresh {
        if !cursor::is_fresh(item, policy.max_item_age, now) {
            debug!(item_id = %item.item_id, "Skipping stale item");
            report.skipped += 1;
        } else if seen.contains(resource.id, &item.item_id, clock) {
            report.skipped += 1;
        } else {
            pending.push(Pending {
                item,
                policy: DedupPolicy::Monotonic,
            });
        }
    }
    let mut queued: HashSet<&str> = HashSet::new();
    for item in unordered {
        if !queued.insert(item.item_id.as_str()) || store.is_seen(resource.id, &item.item_id).await? {
            continue;
        }
        if cursor::is_fresh(item, policy.max_item_age, now) {
            pending.push(Pending {
                item,
                policy: DedupPolicy::SetMembership,
            });
        } else {
            store.mark_seen(resource.id, &item.item_id).await?;
            report.skipped += 1;
        }
    }

    if !pending.is_empty() {
        report.merge(fan_out(store, sink, seen, resource, &pending, now, clock).await?);
    }

    if let Some(next) = delta.advance_to {
        let stored = store.advance_cursor(resource.id, next).await?;
        debug!(resource = %resource.external_id, cursor = stored, "Feed cursor advanced");
    }
    Ok(report)
}

/// An item judged new, with the policy that decided it.
struct Pending<'a> {
    item: &'a FeedItem,
    policy: DedupPolicy,
}

/// Record an item as handled. Called only once every target had its attempt,
/// so a store failure mid-item leaves it eligible for the next cycle.
async fn remember<S>(
    store: &S,
    seen: &SeenCache,
    resource: &TrackedResource,
    pending: &Pending<'_>,
    clock: Instant,
) -> Result<()>
where
    S: TrackerStore + ?Sized,
{
    match pending.policy {
        DedupPolicy::Monotonic => {
            seen.insert(resource.id, &pending.item.item_id, clock);
        }
        DedupPolicy::SetMembership => {
            store.mark_seen(resource.id, &pending.item.item_id).await?;
        }
    }
    Ok(())
}

async fn fan_out<S, N>(
    store: &S,
    sink: &N,
    seen: &SeenCache,
    resource: &TrackedResource,
    items: &[Pending<'_>],
    now: DateTime<Utc>,
    clock: Instant,
) -> Result<DispatchReport>
where
    S: TrackerStore + ?Sized,
    N: NotificationSink + ?Sized,
{
    let dispatcher = Dispatcher::new(store, sink);
    let mut targets = resolver::targets_for(store, resource).await?;
    let mut report = DispatchReport::default();
    if targets.is_empty() {
        debug!(resource = %resource.external_id, items = items.len(), "No targets, nothing to deliver");
        for pending in items {
            remember(store, seen, resource, pending, clock).await?;
        }
        return Ok(report);
    }

    for pending in items {
        let item = pending.item;
        let mut dropped: HashSet<Uuid> = HashSet::new();
        for target in &targets {
            if !resolver::accepts_item(&target.filters, item) {
                report.skipped += 1;
                continue;
            }
            let ctx = MentionContext {
                name: resource.name(),
                url: &item.url,
                id: &item.item_id,
                at: item.published_at,
            };
            let mention = render::plan_mention(&target.filters, target.last_mention_at, None, &ctx, now);
            let content = render::post_message(resource, item, &mention);
            let delivery = dispatcher
                .create(target, &item.item_id, SessionState::Ended, &content)
                .await?;
            match &delivery {
                Delivery::Created(_) if mention.pings_role => {
                    store.touch_mention(target.id, now).await?;
                }
                Delivery::Failed(DeliveryError::DestinationGone(_) | DeliveryError::PermissionDenied(_)) => {
                    dropped.insert(target.id);
                }
                _ => {}
            }
            report.count_delivery(&delivery);
        }
        targets.retain(|t| !dropped.contains(&t.id));
        remember(store, seen, resource, pending, clock).await?;
    }

    info!(
        resource = %resource.external_id,
        items = items.len(),
        created = report.created,
        failed = report.failed,
        "Feed items delivered"
    );
    Ok(report)
}
