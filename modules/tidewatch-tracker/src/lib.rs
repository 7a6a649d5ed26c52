//! Tracking and notification fan-out engine.
//!
//! One [`scheduler::Scheduler`] loop runs per platform. Each cycle walks the
//! platform's tracked resources, takes the per-resource lock, fetches the
//! upstream state through a [`adapter::PlatformAdapter`], computes what is new
//! against the persisted cursor, and fans notifications out to every target.

pub mod adapter;
pub mod cooldown;
pub mod cursor;
pub mod dispatcher;
pub mod feed;
pub mod locks;
pub mod notify;
pub mod platforms;
pub mod render;
pub mod resolver;
pub mod runtime;
pub mod scheduler;
pub mod seen;
pub mod session;
pub mod tracker;

pub use adapter::{FetchOutcome, PlatformAdapter};
pub use cooldown::CooldownController;
pub use dispatcher::{DispatchReport, Dispatcher};
pub use locks::{LockCache, LockKey};
pub use notify::{DiscordSink, NoopSink, NotificationSink};
pub use runtime::TrackerRuntime;
pub use scheduler::{CycleReport, Scheduler};
pub use seen::SeenCache;
pub use tracker::TrackerService;
