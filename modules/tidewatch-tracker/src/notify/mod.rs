pub mod discord;
pub mod noop;
pub mod sink;

pub use discord::DiscordSink;
pub use noop::NoopSink;
pub use sink::NotificationSink;
