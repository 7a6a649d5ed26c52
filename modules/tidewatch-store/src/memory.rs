//! In-memory [`TrackerStore`] for tests and dry runs. Mirrors the Postgres
//! semantics: unique keys, monotonic cursor writes and cascading deletes.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use tidewatch_common::{NotificationRecord, Platform, SessionState, SessionStats, Target, TrackedResource};

use crate::error::{Result, StoreError};
use crate::store::TrackerStore;

#[derive(Default)]
struct Tables {
    resources: Vec<TrackedResource>,
    seen: HashSet<(Uuid, String)>,
    targets: Vec<Target>,
    records: Vec<NotificationRecord>,
    stats: HashMap<Uuid, SessionStats>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every record ever written, for test assertions.
    pub fn records(&self) -> Vec<NotificationRecord> {
        self.tables().records.clone()
    }

    /// Number of stored (resource, item) dedup keys.
    pub fn seen_count(&self, resource_id: Uuid) -> usize {
        self.tables()
            .seen
            .iter()
            .filter(|(id, _)| *id == resource_id)
            .count()
    }
}

fn missing(table: &str, id: Uuid) -> StoreError {
    StoreError::Decode(format!("{table} {id}: missing"))
}

#[async_trait]
impl TrackerStore for MemoryStore {
    async fn list_resources(&self, platform: Platform) -> Result<Vec<TrackedResource>> {
        Ok(self
            .tables()
            .resources
            .iter()
            .filter(|r| r.platform == platform)
            .cloned()
            .collect())
    }

    async fn get_resource(&self, id: Uuid) -> Result<Option<TrackedResource>> {
        Ok(self.tables().resources.iter().find(|r| r.id == id).cloned())
    }

    async fn find_resource(&self, platform: Platform, external_id: &str) -> Result<Option<TrackedResource>> {
        Ok(self
            .tables()
            .resources
            .iter()
            .find(|r| r.platform == platform && r.external_id == external_id)
            .cloned())
    }

    async fn track(&self, platform: Platform, external_id: &str) -> Result<TrackedResource> {
        let mut tables = self.tables();
        if let Some(existing) = tables
            .resources
            .iter()
            .find(|r| r.platform == platform && r.external_id == external_id)
        {
            return Ok(existing.clone());
        }
        let resource = TrackedResource::new(platform, external_id);
        tables.resources.push(resource.clone());
        Ok(resource)
    }

    async fn delete_resource(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables();
        let before = tables.resources.len();
        tables.resources.retain(|r| r.id != id);
        if tables.resources.len() == before {
            return Ok(false);
        }
        tables.seen.retain(|(resource_id, _)| *resource_id != id);
        tables.targets.retain(|t| t.resource_id != id);
        tables.records.retain(|r| r.resource_id != id);
        tables.stats.remove(&id);
        Ok(true)
    }

    async fn list_flagged(&self) -> Result<Vec<TrackedResource>> {
        let mut flagged: Vec<_> = self
            .tables()
            .resources
            .iter()
            .filter(|r| r.not_found_at.is_some())
            .cloned()
            .collect();
        flagged.sort_by_key(|r| r.not_found_at);
        Ok(flagged)
    }

    async fn flag_not_found(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        if let Some(r) = self.tables().resources.iter_mut().find(|r| r.id == id) {
            r.not_found_at.get_or_insert(at);
        }
        Ok(())
    }

    async fn clear_not_found(&self, id: Uuid) -> Result<bool> {
        Ok(self
            .tables()
            .resources
            .iter_mut()
            .find(|r| r.id == id)
            .and_then(|r| r.not_found_at.take())
            .is_some())
    }

    async fn set_display_name(&self, id: Uuid, name: &str) -> Result<()> {
        if let Some(r) = self.tables().resources.iter_mut().find(|r| r.id == id) {
            r.display_name = Some(name.to_string());
        }
        Ok(())
    }

    async fn advance_cursor(&self, id: Uuid, value: i64) -> Result<i64> {
        let mut tables = self.tables();
        let resource = tables
            .resources
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| missing("tracked_resources", id))?;
        let next = resource.cursor.map_or(value, |c| c.max(value));
        resource.cursor = Some(next);
        Ok(next)
    }

    async fn mark_seen(&self, resource_id: Uuid, item_id: &str) -> Result<bool> {
        Ok(self.tables().seen.insert((resource_id, item_id.to_string())))
    }

    async fn is_seen(&self, resource_id: Uuid, item_id: &str) -> Result<bool> {
        Ok(self.tables().seen.contains(&(resource_id, item_id.to_string())))
    }

    async fn list_targets(&self, resource_id: Uuid) -> Result<Vec<Target>> {
        Ok(self
            .tables()
            .targets
            .iter()
            .filter(|t| t.resource_id == resource_id)
            .cloned()
            .collect())
    }

    async fn get_target(&self, id: Uuid) -> Result<Option<Target>> {
        Ok(self.tables().targets.iter().find(|t| t.id == id).cloned())
    }

    async fn add_target(&self, target: &Target) -> Result<Target> {
        let mut tables = self.tables();
        if !tables.resources.iter().any(|r| r.id == target.resource_id) {
            return Err(missing("tracked_resources", target.resource_id));
        }
        if let Some(existing) = tables.targets.iter_mut().find(|t| {
            t.resource_id == target.resource_id
                && t.destination.channel_id == target.destination.channel_id
        }) {
            existing.filters = target.filters.clone();
            existing.destination.guild_id = target.destination.guild_id;
            existing.enabled = true;
            return Ok(existing.clone());
        }
        let mut stored = target.clone();
        stored.enabled = true;
        tables.targets.push(stored.clone());
        Ok(stored)
    }

    async fn remove_target(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables();
        let before = tables.targets.len();
        tables.targets.retain(|t| t.id != id);
        let removed = tables.targets.len() != before;
        if removed {
            tables.records.retain(|r| r.target_id != id);
        }
        Ok(removed)
    }

    async fn set_target_enabled(&self, id: Uuid, enabled: bool) -> Result<()> {
        if let Some(t) = self.tables().targets.iter_mut().find(|t| t.id == id) {
            t.enabled = enabled;
        }
        Ok(())
    }

    async fn touch_mention(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        if let Some(t) = self.tables().targets.iter_mut().find(|t| t.id == id) {
            t.last_mention_at = Some(at);
        }
        Ok(())
    }

    async fn active_records(&self, resource_id: Uuid) -> Result<Vec<NotificationRecord>> {
        Ok(self
            .tables()
            .records
            .iter()
            .filter(|r| r.resource_id == resource_id && r.is_active())
            .cloned()
            .collect())
    }

    async fn find_record(&self, target_id: Uuid, session_id: &str) -> Result<Option<NotificationRecord>> {
        Ok(self
            .tables()
            .records
            .iter()
            .find(|r| r.target_id == target_id && r.session_id == session_id)
            .cloned())
    }

    async fn insert_record(&self, record: &NotificationRecord) -> Result<bool> {
        let mut tables = self.tables();
        if !tables.targets.iter().any(|t| t.id == record.target_id) {
            return Err(missing("targets", record.target_id));
        }
        if tables
            .records
            .iter()
            .any(|r| r.target_id == record.target_id && r.session_id == record.session_id)
        {
            return Ok(false);
        }
        tables.records.push(record.clone());
        Ok(true)
    }

    async fn set_record_state(&self, id: Uuid, state: SessionState) -> Result<()> {
        if let Some(r) = self.tables().records.iter_mut().find(|r| r.id == id) {
            r.state = state;
            r.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_record_deleted(&self, id: Uuid) -> Result<()> {
        if let Some(r) = self.tables().records.iter_mut().find(|r| r.id == id) {
            r.deleted = true;
            r.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn session_stats(&self, resource_id: Uuid) -> Result<Option<SessionStats>> {
        Ok(self.tables().stats.get(&resource_id).cloned())
    }

    async fn save_session_stats(&self, stats: &SessionStats) -> Result<()> {
        self.tables().stats.insert(stats.resource_id, stats.clone());
        Ok(())
    }

    async fn clear_session_stats(&self, resource_id: Uuid) -> Result<()> {
        self.tables().stats.remove(&resource_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidewatch_common::{Destination, FilterSettings};

    fn channel(id: i64) -> Destination {
        Destination {
            guild_id: Some(1),
            channel_id: id,
        }
    }

    #[tokio::test]
    async fn track_is_unique_per_platform_and_id() {
        let store = MemoryStore::new();
        let a = store.track(Platform::Twitch, "shroud").await.unwrap();
        let b = store.track(Platform::Twitch, "shroud").await.unwrap();
        let c = store.track(Platform::Kick, "shroud").await.unwrap();
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[tokio::test]
    async fn mark_seen_reports_known_keys() {
        let store = MemoryStore::new();
        let r = store.track(Platform::Bluesky, "alice.bsky.social").await.unwrap();
        assert!(!store.is_seen(r.id, "post-1").await.unwrap());
        assert!(store.mark_seen(r.id, "post-1").await.unwrap());
        assert!(store.is_seen(r.id, "post-1").await.unwrap());
        assert!(!store.mark_seen(r.id, "post-1").await.unwrap());
        assert_eq!(store.seen_count(r.id), 1);
    }

    #[tokio::test]
    async fn cursor_never_regresses() {
        let store = MemoryStore::new();
        let r = store.track(Platform::Bluesky, "alice.bsky.social").await.unwrap();
        assert_eq!(store.advance_cursor(r.id, 10).await.unwrap(), 10);
        assert_eq!(store.advance_cursor(r.id, 7).await.unwrap(), 10);
        assert_eq!(store.advance_cursor(r.id, 12).await.unwrap(), 12);
    }

    #[tokio::test]
    async fn re_adding_a_channel_updates_filters() {
        let store = MemoryStore::new();
        let r = store.track(Platform::Twitch, "shroud").await.unwrap();
        let first = store
            .add_target(&Target::new(r.id, channel(5), FilterSettings::default()))
            .await
            .unwrap();
        store.set_target_enabled(first.id, false).await.unwrap();

        let filters = FilterSettings {
            summaries: false,
            ..FilterSettings::default()
        };
        let second = store.add_target(&Target::new(r.id, channel(5), filters)).await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(second.enabled);
        assert!(!second.filters.summaries);
        assert_eq!(store.list_targets(r.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deleting_a_resource_cascades() {
        let store = MemoryStore::new();
        let r = store.track(Platform::Twitch, "shroud").await.unwrap();
        let t = store
            .add_target(&Target::new(r.id, channel(5), FilterSettings::default()))
            .await
            .unwrap();
        store.mark_seen(r.id, "x").await.unwrap();
        store.insert_record(&NotificationRecord::new(&t, "s1", 99)).await.unwrap();

        assert!(store.delete_resource(r.id).await.unwrap());
        assert!(store.list_targets(r.id).await.unwrap().is_empty());
        assert!(store.records().is_empty());
        assert_eq!(store.seen_count(r.id), 0);
        assert!(!store.delete_resource(r.id).await.unwrap());
    }
}
