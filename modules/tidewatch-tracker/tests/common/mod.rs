#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tidewatch_common::{
    CooldownSpec, DeliveryError, Destination, FeedItem, FeedSnapshot, ItemKind, LiveSession, NotificationRecord,
    Platform, ResourceState, SessionState, SessionStats, StreamSnapshot, Target, TrackedResource,
};
use tidewatch_store::{MemoryStore, StoreError, TrackerStore};
use uuid::Uuid;
use tidewatch_tracker::render::MessageContent;
use tidewatch_tracker::{FetchOutcome, NotificationSink, PlatformAdapter, TrackerService};

pub type TestService = TrackerService<Arc<MemoryStore>, Arc<RecordingSink>>;

pub fn service(store: &Arc<MemoryStore>, sink: &Arc<RecordingSink>) -> TestService {
    TrackerService::new(store.clone(), sink.clone())
}

pub fn flaky_service(
    store: &Arc<FlakyStore>,
    sink: &Arc<RecordingSink>,
) -> TrackerService<Arc<FlakyStore>, Arc<RecordingSink>> {
    TrackerService::new(store.clone(), sink.clone())
}

/// A `MemoryStore` whose record inserts, cursor writes and resource listings
/// can be told to fail a number of times.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing_inserts: AtomicUsize,
    failing_cursors: AtomicUsize,
    failing_lists: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn fail_inserts(&self, times: usize) {
        self.failing_inserts.store(times, Ordering::SeqCst);
    }

    pub fn fail_cursor_writes(&self, times: usize) {
        self.failing_cursors.store(times, Ordering::SeqCst);
    }

    pub fn fail_lists(&self, times: usize) {
        self.failing_lists.store(times, Ordering::SeqCst);
    }

    fn trip(counter: &AtomicUsize, what: &str) -> tidewatch_store::Result<()> {
        match counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)) {
            Ok(_) => Err(StoreError::Decode(format!("{what}: injected"))),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl TrackerStore for FlakyStore {
    async fn list_resources(&self, platform: Platform) -> tidewatch_store::Result<Vec<TrackedResource>> {
        Self::trip(&self.failing_lists, "list_resources")?;
        self.inner.list_resources(platform).await
    }

    async fn get_resource(&self, id: Uuid) -> tidewatch_store::Result<Option<TrackedResource>> {
        self.inner.get_resource(id).await
    }

    async fn find_resource(
        &self,
        platform: Platform,
        external_id: &str,
    ) -> tidewatch_store::Result<Option<TrackedResource>> {
        self.inner.find_resource(platform, external_id).await
    }

    async fn track(&self, platform: Platform, external_id: &str) -> tidewatch_store::Result<TrackedResource> {
        self.inner.track(platform, external_id).await
    }

    async fn delete_resource(&self, id: Uuid) -> tidewatch_store::Result<bool> {
        self.inner.delete_resource(id).await
    }

    async fn list_flagged(&self) -> tidewatch_store::Result<Vec<TrackedResource>> {
        self.inner.list_flagged().await
    }

    async fn flag_not_found(&self, id: Uuid, at: DateTime<Utc>) -> tidewatch_store::Result<()> {
        self.inner.flag_not_found(id, at).await
    }

    async fn clear_not_found(&self, id: Uuid) -> tidewatch_store::Result<bool> {
        self.inner.clear_not_found(id).await
    }

    async fn set_display_name(&self, id: Uuid, name: &str) -> tidewatch_store::Result<()> {
        self.inner.set_display_name(id, name).await
    }

    async fn advance_cursor(&self, id: Uuid, value: i64) -> tidewatch_store::Result<i64> {
        Self::trip(&self.failing_cursors, "advance_cursor")?;
        self.inner.advance_cursor(id, value).await
    }

    async fn mark_seen(&self, resource_id: Uuid, item_id: &str) -> tidewatch_store::Result<bool> {
        self.inner.mark_seen(resource_id, item_id).await
    }

    async fn is_seen(&self, resource_id: Uuid, item_id: &str) -> tidewatch_store::Result<bool> {
        self.inner.is_seen(resource_id, item_id).await
    }

    async fn list_targets(&self, resource_id: Uuid) -> tidewatch_store::Result<Vec<Target>> {
        self.inner.list_targets(resource_id).await
    }

    async fn get_target(&self, id: Uuid) -> tidewatch_store::Result<Option<Target>> {
        self.inner.get_target(id).await
    }

    async fn add_target(&self, target: &Target) -> tidewatch_store::Result<Target> {
        self.inner.add_target(target).await
    }

    async fn remove_target(&self, id: Uuid) -> tidewatch_store::Result<bool> {
        self.inner.remove_target(id).await
    }

    async fn set_target_enabled(&self, id: Uuid, enabled: bool) -> tidewatch_store::Result<()> {
        self.inner.set_target_enabled(id, enabled).await
    }

    async fn touch_mention(&self, id: Uuid, at: DateTime<Utc>) -> tidewatch_store::Result<()> {
        self.inner.touch_mention(id, at).await
    }

    async fn active_records(&self, resource_id: Uuid) -> tidewatch_store::Result<Vec<NotificationRecord>> {
        self.inner.active_records(resource_id).await
    }

    async fn find_record(
        &self,
        target_id: Uuid,
        session_id: &str,
    ) -> tidewatch_store::Result<Option<NotificationRecord>> {
        self.inner.find_record(target_id, session_id).await
    }

    async fn insert_record(&self, record: &NotificationRecord) -> tidewatch_store::Result<bool> {
        Self::trip(&self.failing_inserts, "insert_record")?;
        self.inner.insert_record(record).await
    }

    async fn set_record_state(&self, id: Uuid, state: SessionState) -> tidewatch_store::Result<()> {
        self.inner.set_record_state(id, state).await
    }

    async fn mark_record_deleted(&self, id: Uuid) -> tidewatch_store::Result<()> {
        self.inner.mark_record_deleted(id).await
    }

    async fn session_stats(&self, resource_id: Uuid) -> tidewatch_store::Result<Option<SessionStats>> {
        self.inner.session_stats(resource_id).await
    }

    async fn save_session_stats(&self, stats: &SessionStats) -> tidewatch_store::Result<()> {
        self.inner.save_session_stats(stats).await
    }

    async fn clear_session_stats(&self, resource_id: Uuid) -> tidewatch_store::Result<()> {
        self.inner.clear_session_stats(resource_id).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Send { channel_id: i64, message_id: i64, content: MessageContent },
    Edit { channel_id: i64, message_id: i64, content: MessageContent },
    Delete { channel_id: i64, message_id: i64 },
}

/// Records every call and fails the channels it is told to fail.
#[derive(Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
    failures: Mutex<HashMap<i64, DeliveryError>>,
    next_id: AtomicI64,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_channel(&self, channel_id: i64, error: DeliveryError) {
        self.failures.lock().unwrap().insert(channel_id, error);
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sends(&self) -> Vec<SinkCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, SinkCall::Send { .. }))
            .collect()
    }

    pub fn edits(&self) -> Vec<SinkCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, SinkCall::Edit { .. }))
            .collect()
    }

    pub fn deletes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, SinkCall::Delete { .. }))
            .count()
    }

    fn failure(&self, channel_id: i64) -> Option<DeliveryError> {
        self.failures.lock().unwrap().get(&channel_id).cloned()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, destination: &Destination, content: &MessageContent) -> Result<i64, DeliveryError> {
        if let Some(err) = self.failure(destination.channel_id) {
            return Err(err);
        }
        let message_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.calls.lock().unwrap().push(SinkCall::Send {
            channel_id: destination.channel_id,
            message_id,
            content: content.clone(),
        });
        Ok(message_id)
    }

    async fn edit(
        &self,
        destination: &Destination,
        message_id: i64,
        content: &MessageContent,
    ) -> Result<(), DeliveryError> {
        if let Some(err) = self.failure(destination.channel_id) {
            return Err(err);
        }
        self.calls.lock().unwrap().push(SinkCall::Edit {
            channel_id: destination.channel_id,
            message_id,
            content: content.clone(),
        });
        Ok(())
    }

    async fn delete(&self, destination: &Destination, message_id: i64) -> Result<(), DeliveryError> {
        self.calls.lock().unwrap().push(SinkCall::Delete {
            channel_id: destination.channel_id,
            message_id,
        });
        Ok(())
    }
}

/// Plays back queued outcomes per external id. An empty queue is a
/// transient failure.
pub struct ScriptedAdapter {
    platform: Platform,
    cooldown: CooldownSpec,
    concurrency: usize,
    scripts: Mutex<HashMap<String, VecDeque<FetchOutcome>>>,
    fetches: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            cooldown: CooldownSpec::new(Duration::ZERO, Duration::from_millis(5)),
            concurrency: 1,
            scripts: Mutex::new(HashMap::new()),
            fetches: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_cooldown(mut self, cooldown: CooldownSpec) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn push(&self, external_id: &str, outcome: FetchOutcome) {
        self.scripts
            .lock()
            .unwrap()
            .entry(external_id.to_string())
            .or_default()
            .push_back(outcome);
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformAdapter for ScriptedAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn cooldown(&self) -> CooldownSpec {
        self.cooldown
    }

    fn max_concurrency(&self) -> usize {
        self.concurrency
    }

    async fn fetch(&self, external_id: &str) -> FetchOutcome {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        self.fetches.lock().unwrap().push(external_id.to_string());
        tokio::time::sleep(Duration::from_millis(2)).await;

        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(external_id)
            .and_then(|q| q.pop_front());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        next.unwrap_or_else(|| FetchOutcome::Transient("script exhausted".to_string()))
    }
}

pub fn destination(channel_id: i64) -> Destination {
    Destination {
        guild_id: Some(1),
        channel_id,
    }
}

pub fn post(ordinal: i64, published_at: DateTime<Utc>) -> FeedItem {
    FeedItem {
        item_id: ordinal.to_string(),
        ordinal: Some(ordinal),
        kind: ItemKind::Post,
        author: None,
        text: format!("post {ordinal}"),
        url: format!("https://bsky.app/profile/alice.bsky.social/post/{ordinal}"),
        published_at,
        has_media: false,
        members_only: false,
        category: None,
    }
}

pub fn repost(item_id: &str, published_at: DateTime<Utc>) -> FeedItem {
    FeedItem {
        item_id: item_id.to_string(),
        ordinal: None,
        kind: ItemKind::Repost,
        author: Some("Carol".to_string()),
        text: "reposted".to_string(),
        url: "https://bsky.app/profile/carol.bsky.social/post/3k".to_string(),
        published_at,
        has_media: false,
        members_only: false,
        category: None,
    }
}

pub fn feed(items: Vec<FeedItem>) -> ResourceState {
    ResourceState::Feed(FeedSnapshot {
        display_name: Some("Alice".to_string()),
        items,
    })
}

pub fn live(session_id: &str, title: &str, viewers: i64) -> ResourceState {
    ResourceState::Stream(StreamSnapshot {
        display_name: Some("Shroud".to_string()),
        live: Some(LiveSession {
            session_id: session_id.to_string(),
            title: title.to_string(),
            category: Some("Just Chatting".to_string()),
            viewers,
            started_at: Utc::now() - chrono::Duration::minutes(30),
            url: "https://www.twitch.tv/shroud".to_string(),
            thumbnail_url: None,
            members_only: false,
        }),
    })
}

pub fn offline() -> ResourceState {
    ResourceState::Stream(StreamSnapshot {
        display_name: Some("Shroud".to_string()),
        live: None,
    })
}
