use std::time::Duration;

use thiserror::Error;

/// Result type alias for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Failure taxonomy for one tracked resource in one cycle.
#[derive(Error, Debug)]
pub enum TrackerError {
    /// Network failure or upstream 5xx. Nothing is mutated; retried next cycle.
    #[error("Transient API error: {0}")]
    TransientApi(String),

    /// The platform asked us to slow down. The rest of the cycle is deferred.
    #[error("Rate limited by upstream (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Resource not found upstream: {0}")]
    NotFound(String),

    #[error("Delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    /// Store failure. Ends the current cycle; the loop keeps running.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Failure reported by a notification sink for a single destination.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Missing permission: {0}")]
    PermissionDenied(String),

    /// The destination channel no longer exists.
    #[error("Destination gone: {0}")]
    DestinationGone(String),

    /// The previously delivered message no longer exists.
    #[error("Message gone: {0}")]
    MessageGone(String),

    #[error("Rate limited by sink (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Delivery error: {0}")]
    Other(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown platform: {0}")]
pub struct UnknownPlatform(pub String);
