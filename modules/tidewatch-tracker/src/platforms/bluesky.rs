// Bluesky author feeds via the AT Protocol public API.
// getAuthorFeed is public (no auth).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use tidewatch_common::{CooldownSpec, FeedItem, FeedSnapshot, ItemKind, Platform, ResourceState};

use crate::adapter::{FetchOutcome, PlatformAdapter};
use crate::platforms::{common_outcome, http_client, transport_error};

const PUBLIC_API: &str = "https://public.api.bsky.app";
const FEED_LIMIT: u32 = 30;

pub struct BlueskyAdapter {
    client: reqwest::Client,
    base_url: String,
    cooldown: CooldownSpec,
}

impl BlueskyAdapter {
    pub fn new(cooldown: CooldownSpec) -> Self {
        Self {
            client: http_client(),
            base_url: PUBLIC_API.to_string(),
            cooldown,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl PlatformAdapter for BlueskyAdapter {
    fn platform(&self) -> Platform {
        Platform::Bluesky
    }

    fn cooldown(&self) -> CooldownSpec {
        self.cooldown
    }

    async fn fetch(&self, external_id: &str) -> FetchOutcome {
        debug!(actor = external_id, "bluesky: fetching author feed");

        let resp = match self
            .client
            .get(format!("{}/xrpc/app.bsky.feed.getAuthorFeed", self.base_url))
            .query(&[("actor", external_id), ("limit", &FEED_LIMIT.to_string())])
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return transport_error(e),
        };

        let status = resp.status();
        let headers = resp.headers().clone();
        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) => return transport_error(e),
        };
        if let Some(outcome) = common_outcome(status, &headers, &body) {
            return outcome;
        }
        if !status.is_success() {
            return classify_error(status.as_u16(), &body);
        }

        match serde_json::from_str::<AuthorFeedResponse>(&body) {
            Ok(feed) => FetchOutcome::State(ResourceState::Feed(convert_feed(external_id, feed))),
            Err(e) => FetchOutcome::Transient(format!("Failed to parse Bluesky feed: {e}")),
        }
    }
}

/// 400 with an unknown actor means the account is gone.
fn classify_error(status: u16, body: &str) -> FetchOutcome {
    let error: Option<XrpcError> = serde_json::from_str(body).ok();
    let message = error.as_ref().and_then(|e| e.message.as_deref()).unwrap_or(body);
    let not_found = status == 400
        && (message.contains("Profile not found")
            || message.contains("Actor not found")
            || error.as_ref().is_some_and(|e| e.error.as_deref() == Some("AccountTakedown")));
    if not_found {
        FetchOutcome::NotFound
    } else {
        FetchOutcome::Transient(format!("Bluesky API error {status}: {message}"))
    }
}

fn convert_feed(actor: &str, feed: AuthorFeedResponse) -> FeedSnapshot {
    // The author's own posts carry their profile; the first one names them.
    let display_name = feed
        .feed
        .iter()
        .find(|entry| entry.reason.is_none() && entry.post.author.handle.eq_ignore_ascii_case(actor))
        .map(|entry| entry.post.author.label().to_string());

    let items = feed.feed.into_iter().filter_map(convert_entry).collect();
    FeedSnapshot { display_name, items }
}

fn convert_entry(entry: FeedEntry) -> Option<FeedItem> {
    let post = entry.post;
    let url = build_permalink(&post.uri, &post.author.handle)?;
    let published_at = parse_time(post.record.created_at.as_deref()).or_else(|| parse_time(post.indexed_at.as_deref()))?;

    let embed_type = post.embed.as_ref().map(|e| e.kind.as_str()).unwrap_or_default();
    let has_media = embed_type.starts_with("app.bsky.embed.images")
        || embed_type.starts_with("app.bsky.embed.video")
        || embed_type.starts_with("app.bsky.embed.recordWithMedia");
    let quotes = embed_type.starts_with("app.bsky.embed.record#") || embed_type.starts_with("app.bsky.embed.recordWithMedia");

    // A repost has no order of its own relative to the author's posts; it is
    // keyed by the repost, not by the reposted URI.
    let (item_id, ordinal, kind, author) = match entry.reason {
        Some(reason) if reason.kind.ends_with("reasonRepost") => {
            let reposted_at = parse_time(reason.indexed_at.as_deref()).unwrap_or(published_at);
            (
                format!("repost:{}:{}", post.uri, reposted_at.timestamp_millis()),
                None,
                ItemKind::Repost,
                Some(post.author.label().to_string()),
            )
        }
        _ => {
            let kind = if post.record.reply.is_some() {
                ItemKind::Reply
            } else if quotes {
                ItemKind::Quote
            } else {
                ItemKind::Post
            };
            (post.uri.clone(), Some(published_at.timestamp_millis()), kind, None)
        }
    };

    Some(FeedItem {
        item_id,
        ordinal,
        kind,
        author,
        text: post.record.text.unwrap_or_default(),
        url,
        published_at,
        has_media,
        members_only: false,
        category: None,
    })
}

fn parse_time(s: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s?).ok().map(|dt| dt.with_timezone(&Utc))
}

fn build_permalink(uri: &str, handle: &str) -> Option<String> {
    // URI format: at://did:plc:xxx/app.bsky.feed.post/rkey
    let rkey = uri.rsplit('/').next().filter(|k| !k.is_empty())?;
    Some(format!("https://bsky.app/profile/{handle}/post/{rkey}"))
}

// --- AT Protocol response types ---

#[derive(Deserialize)]
struct XrpcError {
    error: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct AuthorFeedResponse {
    feed: Vec<FeedEntry>,
}

#[derive(Deserialize)]
struct FeedEntry {
    post: PostView,
    reason: Option<Reason>,
}

#[derive(Deserialize)]
struct Reason {
    #[serde(rename = "$type")]
    kind: String,
    #[serde(rename = "indexedAt")]
    indexed_at: Option<String>,
}

#[derive(Deserialize)]
struct PostView {
    uri: String,
    author: Author,
    record: PostRecord,
    embed: Option<Embed>,
    #[serde(rename = "indexedAt")]
    indexed_at: Option<String>,
}

#[derive(Deserialize)]
struct Author {
    handle: String,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
}

impl Author {
    fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.handle)
    }
}

#[derive(Deserialize)]
struct PostRecord {
    text: Option<String>,
    #[serde(rename = "createdAt")]
    created_at: Option<String>,
    reply: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct Embed {
    #[serde(rename = "$type")]
    kind: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
      "feed": [
        {
          "post": {
            "uri": "at://did:plc:abc/app.bsky.feed.post/3kpost1",
            "author": {"handle": "alice.bsky.social", "displayName": "Alice"},
            "record": {"text": "hello world", "createdAt": "2026-10-19T10:00:00.000Z"},
            "embed": {"$type": "app.bsky.embed.images#view"},
            "indexedAt": "2026-10-19T10:00:01.000Z"
          }
        },
        {
          "post": {
            "uri": "at://did:plc:abc/app.bsky.feed.post/3kreply",
            "author": {"handle": "alice.bsky.social", "displayName": "Alice"},
            "record": {"text": "@bob yes", "createdAt": "2026-10-19T09:00:00Z", "reply": {"root": {}, "parent": {}}}
          }
        },
        {
          "post": {
            "uri": "at://did:plc:abc/app.bsky.feed.post/3kquote",
            "author": {"handle": "alice.bsky.social"},
            "record": {"text": "look", "createdAt": "2026-10-19T08:00:00Z"},
            "embed": {"$type": "app.bsky.embed.record#view"}
          }
        },
        {
          "post": {
            "uri": "at://did:plc:xyz/app.bsky.feed.post/3kother",
            "author": {"handle": "carol.bsky.social", "displayName": "Carol"},
            "record": {"text": "reposted", "createdAt": "2026-10-18T08:00:00Z"}
          },
          "reason": {"$type": "app.bsky.feed.defs#reasonRepost", "indexedAt": "2026-10-19T11:00:00Z"}
        }
      ]
    }"#;

    fn parsed() -> FeedSnapshot {
        let feed: AuthorFeedResponse = serde_json::from_str(FIXTURE).unwrap();
        convert_feed("alice.bsky.social", feed)
    }

    #[test]
    fn display_name_comes_from_own_post() {
        assert_eq!(parsed().display_name.as_deref(), Some("Alice"));
    }

    #[test]
    fn classifies_item_kinds() {
        let kinds: Vec<_> = parsed().items.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![ItemKind::Post, ItemKind::Reply, ItemKind::Quote, ItemKind::Repost]
        );
    }

    #[test]
    fn posts_are_ordered_by_creation_millis() {
        let snapshot = parsed();
        let post = &snapshot.items[0];
        assert_eq!(post.item_id, "at://did:plc:abc/app.bsky.feed.post/3kpost1");
        assert_eq!(post.ordinal, Some(post.published_at.timestamp_millis()));
        assert!(post.has_media);
        assert_eq!(post.url, "https://bsky.app/profile/alice.bsky.social/post/3kpost1");
    }

    #[test]
    fn reposts_have_no_ordinal() {
        let snapshot = parsed();
        let repost = &snapshot.items[3];
        assert_eq!(repost.ordinal, None);
        assert!(repost.item_id.starts_with("repost:at://did:plc:xyz/"));
        assert_eq!(repost.author.as_deref(), Some("Carol"));
        assert_eq!(repost.url, "https://bsky.app/profile/carol.bsky.social/post/3kother");
    }

    #[test]
    fn unknown_profile_is_not_found() {
        let body = r#"{"error":"InvalidRequest","message":"Profile not found"}"#;
        assert_eq!(classify_error(400, body), FetchOutcome::NotFound);
    }

    #[test]
    fn other_client_errors_are_transient() {
        let body = r#"{"error":"InvalidRequest","message":"Error: limit must be <= 100"}"#;
        assert!(matches!(classify_error(400, body), FetchOutcome::Transient(_)));
    }

    #[test]
    fn permalink_needs_rkey() {
        assert_eq!(build_permalink("at://did:plc:abc/app.bsky.feed.post/", "a"), None);
    }
}
