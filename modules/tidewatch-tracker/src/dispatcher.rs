//! Delivers notifications to one target at a time and records what was
//! delivered. A delivery failure stays with its target: it is logged, may
//! disable or remove that target, and is reported back as a value.

use serde::Serialize;
use tracing::{debug, info, warn};

use tidewatch_common::{DeliveryError, NotificationRecord, SessionState, Target};
use tidewatch_store::{Result, TrackerStore};

use crate::notify::NotificationSink;
use crate::render::MessageContent;

/// Per-resource delivery counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub created: usize,
    pub edited: usize,
    pub retired: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl DispatchReport {
    pub fn merge(&mut self, other: DispatchReport) {
        self.created += other.created;
        self.edited += other.edited;
        self.retired += other.retired;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }

    pub fn count_delivery(&mut self, delivery: &Delivery) {
        match delivery {
            Delivery::Created(_) => self.created += 1,
            Delivery::AlreadyRecorded => self.skipped += 1,
            Delivery::Failed(_) => self.failed += 1,
        }
    }

    pub fn count_edit(&mut self, outcome: &EditOutcome) {
        match outcome {
            EditOutcome::Edited => self.edited += 1,
            EditOutcome::MessageGone | EditOutcome::Failed(_) => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Created(NotificationRecord),
    /// Another writer recorded this (target, session) first.
    AlreadyRecorded,
    Failed(DeliveryError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome {
    Edited,
    /// The delivered message is gone. The record is now flagged deleted.
    MessageGone,
    Failed(DeliveryError),
}

pub struct Dispatcher<'a, S: ?Sized, N: ?Sized> {
    store: &'a S,
    sink: &'a N,
}

impl<'a, S, N> Dispatcher<'a, S, N>
where
    S: TrackerStore + ?Sized,
    N: NotificationSink + ?Sized,
{
    pub fn new(store: &'a S, sink: &'a N) -> Self {
        Self { store, sink }
    }

    /// Deliver a new message to `target` and record it for `session_id`.
    pub async fn create(
        &self,
        target: &Target,
        session_id: &str,
        state: SessionState,
        content: &MessageContent,
    ) -> Result<Delivery> {
        let message_id = match self.sink.send(&target.destination, content).await {
            Ok(id) => id,
            Err(err) => {
                self.on_failure(target, &err).await?;
                return Ok(Delivery::Failed(err));
            }
        };

        let mut record = NotificationRecord::new(target, session_id, message_id);
        record.state = state;
        if self.store.insert_record(&record).await? {
            debug!(target_id = %target.id, session_id, message_id, "Notification delivered");
            return Ok(Delivery::Created(record));
        }

        warn!(target_id = %target.id, session_id, "Session already recorded, withdrawing duplicate");
        if let Err(e) = self.sink.delete(&target.destination, message_id).await {
            debug!(error = %e, "Failed to withdraw duplicate message");
        }
        Ok(Delivery::AlreadyRecorded)
    }

    /// Edit the message behind `record` in place.
    pub async fn edit(
        &self,
        target: &Target,
        record: &NotificationRecord,
        content: &MessageContent,
    ) -> Result<EditOutcome> {
        match self
            .sink
            .edit(&target.destination, record.message_id, content)
            .await
        {
            Ok(()) => Ok(EditOutcome::Edited),
            Err(DeliveryError::MessageGone(detail)) => {
                info!(record_id = %record.id, detail = %detail, "Notification message was removed, flagging record");
                self.store.mark_record_deleted(record.id).await?;
                Ok(EditOutcome::MessageGone)
            }
            Err(err) => {
                self.on_failure(target, &err).await?;
                Ok(EditOutcome::Failed(err))
            }
        }
    }

    /// Close `record`: edit it into `summary`, or delete the message when no
    /// summary is given. The record ends up `Ended` either way.
    pub async fn retire(
        &self,
        target: Option<&Target>,
        record: &NotificationRecord,
        summary: Option<&MessageContent>,
    ) -> Result<()> {
        match (target.filter(|t| t.enabled), summary) {
            (Some(target), Some(content)) => {
                self.edit(target, record, content).await?;
            }
            (Some(target), None) => match self.sink.delete(&target.destination, record.message_id).await {
                Ok(()) | Err(DeliveryError::MessageGone(_)) => {}
                Err(err) => self.on_failure(target, &err).await?,
            },
            (None, _) => {
                debug!(record_id = %record.id, "Target unavailable, closing record without delivery");
            }
        }
        self.store.set_record_state(record.id, SessionState::Ended).await
    }

    async fn on_failure(&self, target: &Target, err: &DeliveryError) -> Result<()> {
        match err {
            DeliveryError::DestinationGone(_) => {
                warn!(target_id = %target.id, channel_id = target.destination.channel_id, error = %err, "Destination gone, removing target");
                self.store.remove_target(target.id).await?;
            }
            DeliveryError::PermissionDenied(_) => {
                warn!(target_id = %target.id, channel_id = target.destination.channel_id, error = %err, "Missing permission, disabling target");
                self.store.set_target_enabled(target.id, false).await?;
            }
            _ => {
                warn!(target_id = %target.id, channel_id = target.destination.channel_id, error = %err, "Delivery failed");
            }
        }
        Ok(())
    }
}
