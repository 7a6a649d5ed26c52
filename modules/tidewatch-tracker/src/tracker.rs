//! The tracking service: one explicitly constructed instance owns the lock
//! cache and the ephemeral seen-cache, and is shared by every scheduler loop
//! and the inbound event intake.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use tidewatch_common::{Platform, ResourceState, TrackedResource, TrackerError};
use tidewatch_store::TrackerStore;

use crate::adapter::{default_max_item_age, FetchOutcome, PlatformAdapter};
use crate::cooldown::CooldownController;
use crate::dispatcher::DispatchReport;
use crate::feed::{self, FeedPolicy};
use crate::locks::{LockCache, LockKey};
use crate::notify::NotificationSink;
use crate::seen::SeenCache;
use crate::session;

pub struct TrackerService<S, N> {
    store: S,
    sink: N,
    locks: LockCache,
    seen: SeenCache,
}

impl<S, N> TrackerService<S, N>
where
    S: TrackerStore,
    N: NotificationSink,
{
    pub fn new(store: S, sink: N) -> Self {
        Self {
            store,
            sink,
            locks: LockCache::new(),
            seen: SeenCache::default(),
        }
    }

    pub fn with_seen_cache(mut self, seen: SeenCache) -> Self {
        self.seen = seen;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn locks(&self) -> &LockCache {
        &self.locks
    }

    /// Poller path: lock, gate, fetch, apply, release.
    ///
    /// The lock is held from before the fetch until the cursor and records
    /// are persisted, and is released on every exit path.
    pub async fn poll(
        &self,
        adapter: &dyn PlatformAdapter,
        cooldown: &CooldownController,
        resource: &TrackedResource,
        now: DateTime<Utc>,
    ) -> Result<DispatchReport, TrackerError> {
        let _guard = self.locks.acquire(&LockKey::of(resource)).await;

        // Re-read under the lock: an inbound event may have moved the cursor.
        let Some(resource) = self.store.get_resource(resource.id).await? else {
            debug!(resource = %resource.external_id, "Resource removed before poll");
            return Ok(DispatchReport::default());
        };

        cooldown.gate().await;
        match adapter.fetch(&resource.external_id).await {
            FetchOutcome::State(state) => {
                cooldown.note_success();
                let policy = FeedPolicy {
                    max_item_age: adapter.max_item_age(),
                    origin: adapter.cursor_origin(now),
                };
                self.apply_locked(&resource, &state, policy, now).await
            }
            FetchOutcome::NotFound => {
                cooldown.note_success();
                if !resource.is_flagged() {
                    warn!(platform = %resource.platform, resource = %resource.external_id, "Resource not found upstream, flagging for review");
                }
                self.store.flag_not_found(resource.id, now).await?;
                Err(TrackerError::NotFound(format!("{}/{}", resource.platform, resource.external_id)))
            }
            FetchOutcome::RateLimited { retry_after } => {
                let backoff = cooldown.note_rate_limited(tokio::time::Instant::now(), retry_after);
                warn!(platform = %resource.platform, backoff_secs = backoff.as_secs(), "Rate limited upstream");
                Err(TrackerError::RateLimited { retry_after })
            }
            FetchOutcome::Transient(message) => Err(TrackerError::TransientApi(message)),
        }
    }

    /// Intake path: apply a pushed state for a tracked resource under the same
    /// lock the pollers use.
    pub async fn ingest(
        &self,
        platform: Platform,
        external_id: &str,
        state: ResourceState,
        now: DateTime<Utc>,
    ) -> Result<DispatchReport, TrackerError> {
        let key = LockKey::new(platform, external_id);
        let _guard = self.locks.acquire(&key).await;

        let Some(resource) = self.store.find_resource(platform, external_id).await? else {
            return Err(TrackerError::NotFound(key.to_string()));
        };
        let policy = FeedPolicy {
            max_item_age: default_max_item_age(platform),
            origin: now.timestamp_millis(),
        };
        self.apply_locked(&resource, &state, policy, now).await
    }

    async fn apply_locked(
        &self,
        resource: &TrackedResource,
        state: &ResourceState,
        policy: FeedPolicy,
        now: DateTime<Utc>,
    ) -> Result<DispatchReport, TrackerError> {
        if resource.is_flagged() && self.store.clear_not_found(resource.id).await? {
            info!(platform = %resource.platform, resource = %resource.external_id, "Resource found again, flag cleared");
        }
        let mut resource = resource.clone();
        if let Some(name) = state.display_name() {
            if resource.display_name.as_deref() != Some(name) {
                debug!(resource = %resource.external_id, name, "Display name changed");
                self.store.set_display_name(resource.id, name).await?;
                resource.display_name = Some(name.to_string());
            }
        }

        let report = match state {
            ResourceState::Stream(snapshot) => {
                session::apply_stream(&self.store, &self.sink, &resource, snapshot, now).await?
            }
            ResourceState::Feed(snapshot) => {
                feed::apply_feed(&self.store, &self.sink, &self.seen, &resource, snapshot, policy, now).await?
            }
        };
        Ok(report)
    }
}
