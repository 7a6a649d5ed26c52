use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tidewatch_common::{CooldownSpec, Platform, ResourceState};

/// Result of one upstream lookup. Expected conditions are values, not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    State(ResourceState),
    /// The resource no longer exists upstream.
    NotFound,
    RateLimited { retry_after: Option<Duration> },
    /// Network failure or upstream 5xx.
    Transient(String),
}

/// One external service.
///
/// Response shapes stay inside the adapter; the scheduler only ever sees the
/// normalized [`ResourceState`] variants, and the delta against the stored
/// cursor is computed generically from them.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    fn cooldown(&self) -> CooldownSpec;

    /// How many resources may be fetched at once. 1 means sequential.
    fn max_concurrency(&self) -> usize {
        1
    }

    /// Feed items older than this are never announced.
    fn max_item_age(&self) -> chrono::Duration {
        default_max_item_age(self.platform())
    }

    /// Cursor value used on the first observation of a feed: "now", in the
    /// unit of this platform's item ordinals.
    fn cursor_origin(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp_millis()
    }

    async fn fetch(&self, external_id: &str) -> FetchOutcome;
}

pub fn default_max_item_age(platform: Platform) -> chrono::Duration {
    match platform {
        Platform::Twitter => chrono::Duration::hours(1),
        _ => chrono::Duration::hours(2),
    }
}
