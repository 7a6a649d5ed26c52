use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::UnknownPlatform;

// --- Platforms ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Twitch,
    Youtube,
    Kick,
    Twitcasting,
    Bluesky,
    Twitter,
}

impl Platform {
    pub const ALL: [Platform; 6] = [
        Platform::Twitch,
        Platform::Youtube,
        Platform::Kick,
        Platform::Twitcasting,
        Platform::Bluesky,
        Platform::Twitter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Twitch => "twitch",
            Platform::Youtube => "youtube",
            Platform::Kick => "kick",
            Platform::Twitcasting => "twitcasting",
            Platform::Bluesky => "bluesky",
            Platform::Twitter => "twitter",
        }
    }

    /// Human-facing name used in rendered notifications.
    pub fn label(&self) -> &'static str {
        match self {
            Platform::Twitch => "Twitch",
            Platform::Youtube => "YouTube",
            Platform::Kick => "Kick",
            Platform::Twitcasting => "TwitCasting",
            Platform::Bluesky => "Bluesky",
            Platform::Twitter => "X",
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Platform::Twitch | Platform::Youtube | Platform::Kick | Platform::Twitcasting => {
                ResourceKind::Stream
            }
            Platform::Bluesky | Platform::Twitter => ResourceKind::Feed,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "twitch" => Ok(Platform::Twitch),
            "youtube" => Ok(Platform::Youtube),
            "kick" => Ok(Platform::Kick),
            "twitcasting" => Ok(Platform::Twitcasting),
            "bluesky" | "bsky" => Ok(Platform::Bluesky),
            "twitter" | "x" => Ok(Platform::Twitter),
            other => Err(UnknownPlatform(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Live streams driven by the session state machine.
    Stream,
    /// Post feeds driven by cursor/dedup tracking.
    Feed,
}

// --- Tracked resources ---

/// An external channel or feed being monitored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedResource {
    pub id: Uuid,
    pub platform: Platform,
    pub external_id: String,
    pub display_name: Option<String>,
    /// Highest item ordinal processed. `None` until the first successful poll.
    pub cursor: Option<i64>,
    /// Set when the platform reported the resource missing.
    pub not_found_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TrackedResource {
    pub fn new(platform: Platform, external_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            platform,
            external_id: external_id.into(),
            display_name: None,
            cursor: None,
            not_found_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.external_id)
    }

    pub fn is_flagged(&self) -> bool {
        self.not_found_at.is_some()
    }
}

// --- Targets ---

/// Where a notification is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    pub guild_id: Option<i64>,
    pub channel_id: i64,
}

/// Per-target predicates and presentation options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    /// Case-insensitive category allow list. Empty accepts everything.
    pub categories: Vec<String>,
    pub include_members_only: bool,
    pub include_reposts: bool,
    pub include_replies: bool,
    pub include_quotes: bool,
    pub media_only: bool,
    pub mention_role: Option<i64>,
    /// Extra mention text. Supports `&name`, `&url`, `&id` and `&timestamp`.
    pub mention_text: Option<String>,
    /// Edit the live message into a summary at end of session, otherwise delete it.
    pub summaries: bool,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            categories: Vec::new(),
            include_members_only: false,
            include_reposts: true,
            include_replies: false,
            include_quotes: true,
            media_only: false,
            mention_role: None,
            mention_text: None,
            summaries: true,
        }
    }
}

/// One notification destination subscribed to a tracked resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: Uuid,
    pub resource_id: Uuid,
    pub destination: Destination,
    pub filters: FilterSettings,
    /// Disabled targets are skipped until re-enabled.
    pub enabled: bool,
    pub last_mention_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Target {
    pub fn new(resource_id: Uuid, destination: Destination, filters: FilterSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            resource_id,
            destination,
            filters,
            enabled: true,
            last_mention_at: None,
            created_at: Utc::now(),
        }
    }
}

// --- Notification records ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Live,
    Ended,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Live => "live",
            SessionState::Ended => "ended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "live" => Some(SessionState::Live),
            "ended" => Some(SessionState::Ended),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A delivered message for one (target, session) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub target_id: Uuid,
    pub resource_id: Uuid,
    /// Upstream session id for streams, item id for feed posts.
    pub session_id: String,
    pub message_id: i64,
    pub state: SessionState,
    /// The delivered message was removed by someone else. Never edited again.
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn new(target: &Target, session_id: impl Into<String>, message_id: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            target_id: target.id,
            resource_id: target.resource_id,
            session_id: session_id.into(),
            message_id,
            state: SessionState::Live,
            deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Live && !self.deleted
    }
}

// --- Session statistics ---

/// Running statistics for one live session, used for the end-of-session summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub resource_id: Uuid,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub peak_viewers: i64,
    pub average_viewers: i64,
    pub ticks: i64,
    pub last_title: String,
    pub last_category: Option<String>,
}

impl SessionStats {
    pub fn begin(resource_id: Uuid, live: &LiveSession) -> Self {
        Self {
            resource_id,
            session_id: live.session_id.clone(),
            started_at: live.started_at,
            peak_viewers: live.viewers,
            average_viewers: live.viewers,
            ticks: 1,
            last_title: live.title.clone(),
            last_category: live.category.clone(),
        }
    }

    /// Fold one poll into the statistics. Returns true when the title or
    /// category changed since the previous poll.
    pub fn observe(&mut self, live: &LiveSession) -> bool {
        self.peak_viewers = self.peak_viewers.max(live.viewers);
        self.average_viewers = (self.average_viewers * self.ticks + live.viewers) / (self.ticks + 1);
        self.ticks += 1;

        let changed = self.last_title != live.title || self.last_category != live.category;
        if changed {
            self.last_title = live.title.clone();
            self.last_category = live.category.clone();
        }
        changed
    }
}

// --- Normalized upstream state ---

/// What an adapter (or an inbound webhook) reports for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceState {
    Stream(StreamSnapshot),
    Feed(FeedSnapshot),
}

impl ResourceState {
    pub fn display_name(&self) -> Option<&str> {
        match self {
            ResourceState::Stream(s) => s.display_name.as_deref(),
            ResourceState::Feed(f) => f.display_name.as_deref(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceState::Stream(_) => ResourceKind::Stream,
            ResourceState::Feed(_) => ResourceKind::Feed,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamSnapshot {
    pub display_name: Option<String>,
    /// `None` while the channel is offline.
    pub live: Option<LiveSession>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveSession {
    /// Upstream identifier of this broadcast. Stable for the whole session.
    pub session_id: String,
    pub title: String,
    pub category: Option<String>,
    pub viewers: i64,
    pub started_at: DateTime<Utc>,
    pub url: String,
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub members_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedSnapshot {
    pub display_name: Option<String>,
    pub items: Vec<FeedItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Post,
    Repost,
    Reply,
    Quote,
    Video,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub item_id: String,
    /// Orderable identifier (timestamp or snowflake). `None` when the
    /// platform gives no usable order for this item.
    pub ordinal: Option<i64>,
    pub kind: ItemKind,
    pub author: Option<String>,
    pub text: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub has_media: bool,
    #[serde(default)]
    pub members_only: bool,
    pub category: Option<String>,
}
