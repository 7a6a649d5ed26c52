// Twitch streams via the Helix API with an app access token.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use tidewatch_common::{CooldownSpec, LiveSession, Platform, ResourceState, StreamSnapshot};

use crate::adapter::{FetchOutcome, PlatformAdapter};
use crate::platforms::{common_outcome, http_client, transport_error};

const HELIX_API: &str = "https://api.twitch.tv/helix";
const TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";

/// Refresh the token this long before Twitch says it expires.
const TOKEN_SLACK: Duration = Duration::from_secs(60);

struct AppToken {
    value: String,
    expires_at: Instant,
}

pub struct TwitchAdapter {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    api_url: String,
    token_url: String,
    cooldown: CooldownSpec,
    token: Mutex<Option<AppToken>>,
}

impl TwitchAdapter {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>, cooldown: CooldownSpec) -> Self {
        Self {
            client: http_client(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            api_url: HELIX_API.to_string(),
            token_url: TOKEN_URL.to_string(),
            cooldown,
            token: Mutex::new(None),
        }
    }

    pub fn with_urls(mut self, api_url: impl Into<String>, token_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self.token_url = token_url.into();
        self
    }

    async fn access_token(&self) -> Result<String, FetchOutcome> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.expires_at > Instant::now()) {
            return Ok(token.value.clone());
        }

        let resp = self
            .client
            .post(&self.token_url)
            .query(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .map_err(transport_error)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(%status, "twitch: token request rejected");
            return Err(FetchOutcome::Transient(format!("Twitch token error {status}: {body}")));
        }
        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| FetchOutcome::Transient(format!("Failed to parse Twitch token: {e}")))?;

        info!(expires_in = token.expires_in, "twitch: app token refreshed");
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_SLACK);
        let value = token.access_token;
        *cached = Some(AppToken {
            value: value.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(value)
    }

    async fn helix<T: for<'de> Deserialize<'de>>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, FetchOutcome> {
        let token = self.access_token().await?;
        let resp = self
            .client
            .get(format!("{}/{path}", self.api_url))
            .query(query)
            .header("Client-Id", &self.client_id)
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.text().await.map_err(transport_error)?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchOutcome::RateLimited {
                retry_after: ratelimit_reset(&headers, Utc::now()),
            });
        }
        if status == StatusCode::UNAUTHORIZED {
            *self.token.lock().await = None;
            return Err(FetchOutcome::Transient("Twitch rejected the app token".to_string()));
        }
        if let Some(outcome) = common_outcome(status, &headers, &body) {
            return Err(outcome);
        }
        if !status.is_success() {
            return Err(FetchOutcome::Transient(format!("Twitch API error {status}: {body}")));
        }
        serde_json::from_str(&body).map_err(|e| FetchOutcome::Transient(format!("Failed to parse Twitch {path}: {e}")))
    }
}

#[async_trait]
impl PlatformAdapter for TwitchAdapter {
    fn platform(&self) -> Platform {
        Platform::Twitch
    }

    fn cooldown(&self) -> CooldownSpec {
        self.cooldown
    }

    async fn fetch(&self, external_id: &str) -> FetchOutcome {
        let login = external_id.to_ascii_lowercase();
        debug!(login = %login, "twitch: fetching stream");

        let streams: HelixPage<HelixStream> = match self.helix("streams", &[("user_login", &login)]).await {
            Ok(page) => page,
            Err(outcome) => return outcome,
        };
        if let Some(stream) = streams.data.into_iter().find(|s| s.kind == "live") {
            let display_name = Some(stream.user_name.clone());
            return FetchOutcome::State(ResourceState::Stream(StreamSnapshot {
                display_name,
                live: Some(convert_stream(&login, stream)),
            }));
        }

        // Offline: confirm the account still exists.
        let users: HelixPage<HelixUser> = match self.helix("users", &[("login", &login)]).await {
            Ok(page) => page,
            Err(outcome) => return outcome,
        };
        match users.data.into_iter().next() {
            Some(user) => FetchOutcome::State(ResourceState::Stream(StreamSnapshot {
                display_name: Some(user.display_name),
                live: None,
            })),
            None => FetchOutcome::NotFound,
        }
    }
}

fn convert_stream(login: &str, stream: HelixStream) -> LiveSession {
    LiveSession {
        session_id: stream.id,
        title: stream.title,
        category: Some(stream.game_name).filter(|g| !g.is_empty()),
        viewers: stream.viewer_count,
        started_at: stream.started_at,
        url: format!("https://www.twitch.tv/{login}"),
        thumbnail_url: Some(stream.thumbnail_url)
            .filter(|u| !u.is_empty())
            .map(|u| u.replace("{width}", "1280").replace("{height}", "720")),
        members_only: false,
    }
}

/// Helix reports the bucket refill as a unix timestamp.
fn ratelimit_reset(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let reset: i64 = headers.get("Ratelimit-Reset")?.to_str().ok()?.trim().parse().ok()?;
    let secs = reset.saturating_sub(now.timestamp()).max(1);
    Some(Duration::from_secs(secs as u64))
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct HelixPage<T> {
    data: Vec<T>,
}

#[derive(Deserialize)]
struct HelixStream {
    id: String,
    user_name: String,
    #[serde(default)]
    game_name: String,
    #[serde(rename = "type", default)]
    kind: String,
    title: String,
    viewer_count: i64,
    started_at: DateTime<Utc>,
    #[serde(default)]
    thumbnail_url: String,
}

#[derive(Deserialize)]
struct HelixUser {
    display_name: String,
}
