use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tracing::debug;

use tidewatch_common::{DeliveryError, Destination};

use super::sink::NotificationSink;
use crate::render::MessageContent;

/// Dry-run sink: logs instead of delivering and hands out fake message ids.
pub struct NoopSink {
    next_id: AtomicI64,
}

impl NoopSink {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
        }
    }
}

impl Default for NoopSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSink for NoopSink {
    async fn send(&self, destination: &Destination, content: &MessageContent) -> Result<i64, DeliveryError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(
            channel_id = destination.channel_id,
            message_id = id,
            title = ?content.embed.title,
            "Dry-run send"
        );
        Ok(id)
    }

    async fn edit(
        &self,
        destination: &Destination,
        message_id: i64,
        _content: &MessageContent,
    ) -> Result<(), DeliveryError> {
        debug!(channel_id = destination.channel_id, message_id, "Dry-run edit");
        Ok(())
    }

    async fn delete(&self, destination: &Destination, message_id: i64) -> Result<(), DeliveryError> {
        debug!(channel_id = destination.channel_id, message_id, "Dry-run delete");
        Ok(())
    }
}
