//! Live session state machine: OFFLINE -> LIVE -> LIVE(updated) -> ENDED.
//!
//! Session identity comes from the upstream session id. A record for a
//! (target, session) pair is created once; after a restart the next poll finds
//! it again by that id instead of announcing the session a second time.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use tidewatch_common::{LiveSession, SessionState, SessionStats, StreamSnapshot, TrackedResource};
use tidewatch_store::{Result, TrackerStore};

use crate::dispatcher::{Delivery, DispatchReport, Dispatcher};
use crate::notify::NotificationSink;
use crate::render::{self, MentionContext};
use crate::resolver;

/// Apply one stream observation.
pub async fn apply_stream<S, N>(
    store: &S,
    sink: &N,
    resource: &TrackedResource,
    snapshot: &StreamSnapshot,
    now: DateTime<Utc>,
) -> Result<DispatchReport>
where
    S: TrackerStore + ?Sized,
    N: NotificationSink + ?Sized,
{
    let dispatcher = Dispatcher::new(store, sink);
    let stats = store.session_stats(resource.id).await?;

    let Some(live) = &snapshot.live else {
        let report = end_sessions(&dispatcher, store, resource, None, stats.as_ref(), now).await?;
        if stats.is_some() {
            store.clear_session_stats(resource.id).await?;
        }
        return Ok(report);
    };

    // Records of any other session belong to a broadcast that ended between polls.
    let mut report = end_sessions(
        &dispatcher,
        store,
        resource,
        Some(&live.session_id),
        stats.as_ref(),
        now,
    )
    .await?;

    let (stats, changed) = match stats {
        Some(mut stats) if stats.session_id == live.session_id => {
            let changed = stats.observe(live);
            (stats, changed)
        }
        _ => {
            info!(resource = %resource.external_id, session_id = %live.session_id, "Stream went live");
            (SessionStats::begin(resource.id, live), false)
        }
    };
    store.save_session_stats(&stats).await?;

    report.merge(announce(&dispatcher, store, resource, live, changed, now).await?);
    Ok(report)
}

/// Create missing records for this session and edit existing ones when the
/// title or category changed.
async fn announce<S, N>(
    dispatcher: &Dispatcher<'_, S, N>,
    store: &S,
    resource: &TrackedResource,
    live: &LiveSession,
    changed: bool,
    now: DateTime<Utc>,
) -> Result<DispatchReport>
where
    S: TrackerStore + ?Sized,
    N: NotificationSink + ?Sized,
{
    let mut report = DispatchReport::default();
    let throttle = chrono::Duration::minutes(render::STREAM_PING_THROTTLE_MINUTES);

    for target in resolver::targets_for(store, resource).await? {
        match store.find_record(target.id, &live.session_id).await? {
            Some(record) if record.is_active() => {
                if changed {
                    let ctx = MentionContext {
                        name: resource.name(),
                        url: &live.url,
                        id: &resource.external_id,
                        at: live.started_at,
                    };
                    let mention = render::carried_mention(&target.filters, &ctx, record.created_at);
                    let content = render::live_message(resource, live, &mention);
                    report.count_edit(&dispatcher.edit(&target, &record, &content).await?);
                }
            }
            Some(record) => {
                // Ended or deleted records are never announced again.
                debug!(record_id = %record.id, "Session already closed for target");
                report.skipped += 1;
            }
            None => {
                if !resolver::accepts_session(&target.filters, live) {
                    report.skipped += 1;
                    continue;
                }
                let ctx = MentionContext {
                    name: resource.name(),
                    url: &live.url,
                    id: &resource.external_id,
                    at: live.started_at,
                };
                let mention = render::plan_mention(
                    &target.filters,
                    target.last_mention_at,
                    Some(throttle),
                    &ctx,
                    now,
                );
                let content = render::live_message(resource, live, &mention);
                let delivery = dispatcher
                    .create(&target, &live.session_id, SessionState::Live, &content)
                    .await?;
                if matches!(delivery, Delivery::Created(_)) && mention.pings_role {
                    store.touch_mention(target.id, now).await?;
                }
                report.count_delivery(&delivery);
            }
        }
    }
    Ok(report)
}

/// Close every active record except those of session `keep`.
///
/// With statistics for the record's session the message becomes a summary
/// (or is deleted when the target turned summaries off). Without statistics
/// the session is abandoned and its messages are deleted.
async fn end_sessions<S, N>(
    dispatcher: &Dispatcher<'_, S, N>,
    store: &S,
    resource: &TrackedResource,
    keep: Option<&str>,
    stats: Option<&SessionStats>,
    now: DateTime<Utc>,
) -> Result<DispatchReport>
where
    S: TrackerStore + ?Sized,
    N: NotificationSink + ?Sized,
{
    let mut report = DispatchReport::default();
    let records: Vec<_> = store
        .active_records(resource.id)
        .await?
        .into_iter()
        .filter(|r| Some(r.session_id.as_str()) != keep)
        .collect();

    for record in records {
        let target = store.get_target(record.target_id).await?;
        let session_stats = stats.filter(|s| s.session_id == record.session_id);
        let summary = match session_stats {
            Some(stats) if target.as_ref().is_some_and(|t| t.filters.summaries) => {
                Some(render::summary_message(resource, stats, now))
            }
            Some(_) => None,
            None => {
                info!(
                    resource = %resource.external_id,
                    session_id = %record.session_id,
                    "No statistics for ended session, abandoning notification"
                );
                None
            }
        };
        dispatcher.retire(target.as_ref(), &record, summary.as_ref()).await?;
        report.retired += 1;
    }

    if report.retired > 0 {
        info!(resource = %resource.external_id, retired = report.retired, "Stream session closed");
    }
    Ok(report)
}
