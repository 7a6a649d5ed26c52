//! Per-resource exclusion shared by poller cycles and inbound events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use tidewatch_common::{Platform, TrackedResource};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub platform: Platform,
    pub external_id: String,
}

impl LockKey {
    pub fn new(platform: Platform, external_id: impl Into<String>) -> Self {
        Self {
            platform,
            external_id: external_id.into(),
        }
    }

    pub fn of(resource: &TrackedResource) -> Self {
        Self::new(resource.platform, resource.external_id.clone())
    }
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.platform, self.external_id)
    }
}

/// Held while a resource is being processed. Released on drop.
pub type ResourceGuard = OwnedMutexGuard<()>;

/// Lazily created mutex per [`LockKey`]. Entries live until purged.
#[derive(Default)]
pub struct LockCache {
    locks: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

impl LockCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn locks(&self) -> MutexGuard<'_, HashMap<LockKey, Arc<AsyncMutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self, key: &LockKey) -> Arc<AsyncMutex<()>> {
        self.locks().entry(key.clone()).or_default().clone()
    }

    /// Wait for exclusive access to `key`.
    pub async fn acquire(&self, key: &LockKey) -> ResourceGuard {
        self.handle(key).lock_owned().await
    }

    /// Exclusive access to `key` if nobody holds it right now.
    pub fn try_acquire(&self, key: &LockKey) -> Option<ResourceGuard> {
        self.handle(key).try_lock_owned().ok()
    }

    /// Drop the idle entries of one platform. An entry is idle when only the
    /// map references it, so a purge never lets a second holder in beside a
    /// task that is holding or waiting for the first.
    pub fn purge(&self, platform: Platform) -> usize {
        let mut locks = self.locks();
        let before = locks.len();
        locks.retain(|key, lock| key.platform != platform || in_use(lock));
        before - locks.len()
    }

    pub fn purge_all(&self) -> usize {
        let mut locks = self.locks();
        let before = locks.len();
        locks.retain(|_, lock| in_use(lock));
        before - locks.len()
    }

    pub fn len(&self) -> usize {
        self.locks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks().is_empty()
    }
}

fn in_use(lock: &Arc<AsyncMutex<()>>) -> bool {
    Arc::strong_count(lock) > 1 || lock.try_lock().is_err()
}
