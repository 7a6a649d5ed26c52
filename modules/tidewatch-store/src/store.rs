use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use tidewatch_common::{NotificationRecord, Platform, SessionState, SessionStats, Target, TrackedResource};

use crate::error::Result;

/// Persisted store contract used by the tracker.
///
/// Every method is one atomic step. Children of a resource (targets, records,
/// seen keys, session stats) are removed with it, and records are removed with
/// their target.
#[async_trait]
pub trait TrackerStore: Send + Sync {
    // --- Resources ---

    /// All tracked resources of one platform, oldest first.
    async fn list_resources(&self, platform: Platform) -> Result<Vec<TrackedResource>>;

    async fn get_resource(&self, id: Uuid) -> Result<Option<TrackedResource>>;

    async fn find_resource(&self, platform: Platform, external_id: &str) -> Result<Option<TrackedResource>>;

    /// Return the resource for (platform, external id), creating it if needed.
    async fn track(&self, platform: Platform, external_id: &str) -> Result<TrackedResource>;

    /// Administrative removal. Cascades to every child row.
    async fn delete_resource(&self, id: Uuid) -> Result<bool>;

    /// Resources the platform reported missing.
    async fn list_flagged(&self) -> Result<Vec<TrackedResource>>;

    /// Flag a resource as missing upstream. Keeps the first flag time.
    async fn flag_not_found(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Returns true when a flag was present.
    async fn clear_not_found(&self, id: Uuid) -> Result<bool>;

    async fn set_display_name(&self, id: Uuid, name: &str) -> Result<()>;

    /// Raise the cursor to `value` unless it is already higher.
    /// Returns the cursor as stored afterwards.
    async fn advance_cursor(&self, id: Uuid, value: i64) -> Result<i64>;

    /// Atomic insert-if-absent of a (resource, item) key.
    /// Returns true when the key was new, false when it was already known.
    async fn mark_seen(&self, resource_id: Uuid, item_id: &str) -> Result<bool>;

    async fn is_seen(&self, resource_id: Uuid, item_id: &str) -> Result<bool>;

    // --- Targets ---

    async fn list_targets(&self, resource_id: Uuid) -> Result<Vec<Target>>;

    async fn get_target(&self, id: Uuid) -> Result<Option<Target>>;

    /// Subscribe a destination. Re-subscribing the same channel replaces its
    /// filters and re-enables it. Returns the stored target.
    async fn add_target(&self, target: &Target) -> Result<Target>;

    async fn remove_target(&self, id: Uuid) -> Result<bool>;

    async fn set_target_enabled(&self, id: Uuid, enabled: bool) -> Result<()>;

    async fn touch_mention(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    // --- Notification records ---

    /// Live, not deleted records of a resource.
    async fn active_records(&self, resource_id: Uuid) -> Result<Vec<NotificationRecord>>;

    async fn find_record(&self, target_id: Uuid, session_id: &str) -> Result<Option<NotificationRecord>>;

    /// Insert unless a record for (target, session) exists. Returns true when inserted.
    async fn insert_record(&self, record: &NotificationRecord) -> Result<bool>;

    async fn set_record_state(&self, id: Uuid, state: SessionState) -> Result<()>;

    async fn mark_record_deleted(&self, id: Uuid) -> Result<()>;

    // --- Session statistics ---

    async fn session_stats(&self, resource_id: Uuid) -> Result<Option<SessionStats>>;

    async fn save_session_stats(&self, stats: &SessionStats) -> Result<()>;

    async fn clear_session_stats(&self, resource_id: Uuid) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Arc<S> blanket so the scheduler, intake and tests can share one store
// ---------------------------------------------------------------------------

#[async_trait]
impl<S: TrackerStore + ?Sized> TrackerStore for Arc<S> {
    async fn list_resources(&self, platform: Platform) -> Result<Vec<TrackedResource>> {
        (**self).list_resources(platform).await
    }

    async fn get_resource(&self, id: Uuid) -> Result<Option<TrackedResource>> {
        (**self).get_resource(id).await
    }

    async fn find_resource(&self, platform: Platform, external_id: &str) -> Result<Option<TrackedResource>> {
        (**self).find_resource(platform, external_id).await
    }

    async fn track(&self, platform: Platform, external_id: &str) -> Result<TrackedResource> {
        (**self).track(platform, external_id).await
    }

    async fn delete_resource(&self, id: Uuid) -> Result<bool> {
        (**self).delete_resource(id).await
    }

    async fn list_flagged(&self) -> Result<Vec<TrackedResource>> {
        (**self).list_flagged().await
    }

    async fn flag_not_found(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        (**self).flag_not_found(id, at).await
    }

    async fn clear_not_found(&self, id: Uuid) -> Result<bool> {
        (**self).clear_not_found(id).await
    }

    async fn set_display_name(&self, id: Uuid, name: &str) -> Result<()> {
        (**self).set_display_name(id, name).await
    }

    async fn advance_cursor(&self, id: Uuid, value: i64) -> Result<i64> {
        (**self).advance_cursor(id, value).await
    }

    async fn mark_seen(&self, resource_id: Uuid, item_id: &str) -> Result<bool> {
        (**self).mark_seen(resource_id, item_id).await
    }

    async fn is_seen(&self, resource_id: Uuid, item_id: &str) -> Result<bool> {
        (**self).is_seen(resource_id, item_id).await
    }

    async fn list_targets(&self, resource_id: Uuid) -> Result<Vec<Target>> {
        (**self).list_targets(resource_id).await
    }

    async fn get_target(&self, id: Uuid) -> Result<Option<Target>> {
        (**self).get_target(id).await
    }

    async fn add_target(&self, target: &Target) -> Result<Target> {
        (**self).add_target(target).await
    }

    async fn remove_target(&self, id: Uuid) -> Result<bool> {
        (**self).remove_target(id).await
    }

    async fn set_target_enabled(&self, id: Uuid, enabled: bool) -> Result<()> {
        (**self).set_target_enabled(id, enabled).await
    }

    async fn touch_mention(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        (**self).touch_mention(id, at).await
    }

    async fn active_records(&self, resource_id: Uuid) -> Result<Vec<NotificationRecord>> {
        (**self).active_records(resource_id).await
    }

    async fn find_record(&self, target_id: Uuid, session_id: &str) -> Result<Option<NotificationRecord>> {
        (**self).find_record(target_id, session_id).await
    }

    async fn insert_record(&self, record: &NotificationRecord) -> Result<bool> {
        (**self).insert_record(record).await
    }

    async fn set_record_state(&self, id: Uuid, state: SessionState) -> Result<()> {
        (**self).set_record_state(id, state).await
    }

    async fn mark_record_deleted(&self, id: Uuid) -> Result<()> {
        (**self).mark_record_deleted(id).await
    }

    async fn session_stats(&self, resource_id: Uuid) -> Result<Option<SessionStats>> {
        (**self).session_stats(resource_id).await
    }

    async fn save_session_stats(&self, stats: &SessionStats) -> Result<()> {
        (**self).save_session_stats(stats).await
    }

    async fn clear_session_stats(&self, resource_id: Uuid) -> Result<()> {
        (**self).clear_session_stats(resource_id).await
    }
}
