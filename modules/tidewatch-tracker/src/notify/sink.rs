use std::sync::Arc;

use async_trait::async_trait;

use tidewatch_common::{DeliveryError, Destination};

use crate::render::MessageContent;

/// Pluggable delivery backend. Every call is fallible and isolated to one
/// destination.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Post a new message. Returns the delivered message id.
    async fn send(&self, destination: &Destination, content: &MessageContent) -> Result<i64, DeliveryError>;

    /// Replace a delivered message in place.
    async fn edit(
        &self,
        destination: &Destination,
        message_id: i64,
        content: &MessageContent,
    ) -> Result<(), DeliveryError>;

    async fn delete(&self, destination: &Destination, message_id: i64) -> Result<(), DeliveryError>;
}

#[async_trait]
impl<N: NotificationSink + ?Sized> NotificationSink for Arc<N> {
    async fn send(&self, destination: &Destination, content: &MessageContent) -> Result<i64, DeliveryError> {
        (**self).send(destination, content).await
    }

    async fn edit(
        &self,
        destination: &Destination,
        message_id: i64,
        content: &MessageContent,
    ) -> Result<(), DeliveryError> {
        (**self).edit(destination, message_id, content).await
    }

    async fn delete(&self, destination: &Destination, message_id: i64) -> Result<(), DeliveryError> {
        (**self).delete(destination, message_id).await
    }
}
