//! Maps a tracked resource to its subscriber targets and applies each
//! target's filter predicates independently.

use tidewatch_common::{FeedItem, FilterSettings, ItemKind, LiveSession, Target, TrackedResource};
use tidewatch_store::{Result, TrackerStore};

/// Enabled targets of a resource, in subscription order.
pub async fn targets_for<S: TrackerStore + ?Sized>(store: &S, resource: &TrackedResource) -> Result<Vec<Target>> {
    let targets = store.list_targets(resource.id).await?;
    Ok(targets.into_iter().filter(|t| t.enabled).collect())
}

fn accepts_category(filters: &FilterSettings, category: Option<&str>) -> bool {
    if filters.categories.is_empty() {
        return true;
    }
    match category {
        Some(category) => filters
            .categories
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(category)),
        None => false,
    }
}

pub fn accepts_session(filters: &FilterSettings, live: &LiveSession) -> bool {
    if live.members_only && !filters.include_members_only {
        return false;
    }
    accepts_category(filters, live.category.as_deref())
}

pub fn accepts_item(filters: &FilterSettings, item: &FeedItem) -> bool {
    let kind_ok = match item.kind {
        ItemKind::Post | ItemKind::Video => true,
        ItemKind::Repost => filters.include_reposts,
        ItemKind::Reply => filters.include_replies,
        ItemKind::Quote => filters.include_quotes,
    };
    kind_ok
        && (!filters.media_only || item.has_media)
        && (!item.members_only || filters.include_members_only)
        && accepts_category(filters, item.category.as_deref())
}
