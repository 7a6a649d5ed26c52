use tidewatch_common::TrackerError;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A stored row could not be mapped back to a domain value.
    #[error("Corrupt row: {0}")]
    Decode(String),
}

impl From<StoreError> for TrackerError {
    fn from(e: StoreError) -> Self {
        TrackerError::Persistence(e.to_string())
    }
}
