pub mod types;
pub mod config;
pub mod error;

pub use types::*;
pub use config::{Config, CooldownSpec};
pub use error::{DeliveryError, Result, TrackerError, UnknownPlatform};
