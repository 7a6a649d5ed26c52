//! Concrete platform adapters.

pub mod bluesky;
pub mod twitch;

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;

use crate::adapter::FetchOutcome;

pub use bluesky::BlueskyAdapter;
pub use twitch::TwitchAdapter;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("tidewatch/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Seconds from a `Retry-After` header.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Map the statuses every adapter treats alike. `None` means the adapter
/// decides.
pub(crate) fn common_outcome(status: StatusCode, headers: &HeaderMap, body: &str) -> Option<FetchOutcome> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Some(FetchOutcome::RateLimited {
            retry_after: retry_after(headers),
        });
    }
    if status.is_server_error() {
        return Some(FetchOutcome::Transient(format!("{status}: {}", truncate(body, 200))));
    }
    None
}

pub(crate) fn transport_error(err: reqwest::Error) -> FetchOutcome {
    FetchOutcome::Transient(err.to_string())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
