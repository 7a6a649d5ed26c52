//! Notification content: live announcements, end-of-session summaries, feed
//! posts, and the role mention that goes with them.

use chrono::{DateTime, Utc};
use serde::Serialize;

use tidewatch_common::{FeedItem, FilterSettings, ItemKind, LiveSession, Platform, SessionStats, TrackedResource};

/// Notifications about anything older than this skip the role ping.
pub const PING_WINDOW_MINUTES: i64 = 15;

/// Minimum time between two stream role pings to the same target.
pub const STREAM_PING_THROTTLE_MINUTES: i64 = 60;

const SKIPPED_PING_NOTE: &str = "Mention skipped: this notification is late.";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MessageContent {
    /// Plain text outside the embed. Carries mentions.
    pub content: Option<String>,
    pub embed: Embed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Embed {
    pub author: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
    pub color: Option<u32>,
    pub fields: Vec<EmbedField>,
    pub image_url: Option<String>,
    pub footer: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl EmbedField {
    fn inline(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
            inline: true,
        }
    }
}

fn platform_color(platform: Platform) -> u32 {
    match platform {
        Platform::Twitch => 0x6441A5,
        Platform::Youtube => 0xFF0000,
        Platform::Kick => 0x53FC18,
        Platform::Twitcasting => 0x1E90FF,
        Platform::Bluesky => 0x0085FF,
        Platform::Twitter => 0x14171A,
    }
}

// --- Mentions ---

/// Mention decision for one target and one notification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MentionPlan {
    pub text: Option<String>,
    /// A role ping is part of `text`.
    pub pings_role: bool,
    /// A mention was configured but dropped because the event is stale.
    pub skipped_late: bool,
}

/// Values substituted into a target's mention text.
pub struct MentionContext<'a> {
    pub name: &'a str,
    pub url: &'a str,
    pub id: &'a str,
    pub at: DateTime<Utc>,
}

/// Substitute `&name`, `&url`, `&id` and `&timestamp`.
/// Single pass, so substituted values are never themselves expanded.
pub fn format_mention(template: &str, ctx: &MentionContext<'_>) -> String {
    const TOKENS: [&str; 4] = ["&timestamp", "&name", "&url", "&id"];

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match TOKENS.iter().find(|token| tail.starts_with(**token)) {
            Some(token) => {
                match *token {
                    "&timestamp" => out.push_str(&format!("<t:{}:R>", ctx.at.timestamp())),
                    "&name" => out.push_str(ctx.name),
                    "&url" => out.push_str(ctx.url),
                    _ => out.push_str(ctx.id),
                }
                rest = &tail[token.len()..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Decide the mention for a notification about something that happened at
/// `ctx.at`. `throttle` limits role pings per target.
pub fn plan_mention(
    filters: &FilterSettings,
    last_mention_at: Option<DateTime<Utc>>,
    throttle: Option<chrono::Duration>,
    ctx: &MentionContext<'_>,
    now: DateTime<Utc>,
) -> MentionPlan {
    let text = filters
        .mention_text
        .as_deref()
        .map(|t| format_mention(t, ctx))
        .filter(|t| !t.trim().is_empty());
    if filters.mention_role.is_none() && text.is_none() {
        return MentionPlan::default();
    }
    if now - ctx.at > chrono::Duration::minutes(PING_WINDOW_MINUTES) {
        return MentionPlan {
            skipped_late: true,
            ..MentionPlan::default()
        };
    }

    let throttled = match (throttle, last_mention_at) {
        (Some(window), Some(last)) => now - last < window,
        _ => false,
    };
    let role = filters.mention_role.filter(|_| !throttled);

    let parts: Vec<String> = role
        .map(|r| format!("<@&{r}>"))
        .into_iter()
        .chain(text)
        .collect();
    MentionPlan {
        text: (!parts.is_empty()).then(|| parts.join(" ")),
        pings_role: role.is_some(),
        skipped_late: false,
    }
}

/// The mention state an edit should keep: the late-ping note the message was
/// delivered with, and no text so the original mention is left in place.
pub fn carried_mention(
    filters: &FilterSettings,
    ctx: &MentionContext<'_>,
    delivered_at: DateTime<Utc>,
) -> MentionPlan {
    MentionPlan {
        text: None,
        pings_role: false,
        ..plan_mention(filters, None, None, ctx, delivered_at)
    }
}

fn apply_mention(mut message: MessageContent, mention: &MentionPlan) -> MessageContent {
    message.content = mention.text.clone();
    if mention.skipped_late {
        message.embed.footer = Some(match message.embed.footer.take() {
            Some(footer) => format!("{footer} | {SKIPPED_PING_NOTE}"),
            None => SKIPPED_PING_NOTE.to_string(),
        });
    }
    message
}

// --- Streams ---

pub fn live_message(resource: &TrackedResource, live: &LiveSession, mention: &MentionPlan) -> MessageContent {
    let mut fields = vec![EmbedField::inline("Viewers", live.viewers.to_string())];
    if let Some(category) = &live.category {
        fields.push(EmbedField::inline("Category", category.clone()));
    }

    let embed = Embed {
        author: Some(format!("{} is live on {}", resource.name(), resource.platform.label())),
        title: Some(live.title.clone()),
        url: Some(live.url.clone()),
        description: None,
        color: Some(platform_color(resource.platform)),
        fields,
        image_url: live.thumbnail_url.clone(),
        footer: Some(if live.members_only {
            "Members-only stream".to_string()
        } else {
            format!("Live on {}", resource.platform.label())
        }),
        timestamp: Some(live.started_at),
    };
    apply_mention(MessageContent { content: None, embed }, mention)
}

pub fn summary_message(resource: &TrackedResource, stats: &SessionStats, now: DateTime<Utc>) -> MessageContent {
    let mut fields = vec![
        EmbedField::inline("Duration", format_duration(now - stats.started_at)),
        EmbedField::inline("Peak viewers", stats.peak_viewers.to_string()),
        EmbedField::inline("Average viewers", stats.average_viewers.to_string()),
    ];
    if let Some(category) = &stats.last_category {
        fields.push(EmbedField::inline("Last category", category.clone()));
    }

    MessageContent {
        content: None,
        embed: Embed {
            author: Some(format!("{} was live on {}", resource.name(), resource.platform.label())),
            title: Some(stats.last_title.clone()),
            url: None,
            description: Some("Stream ended.".to_string()),
            color: Some(0x808080),
            fields,
            image_url: None,
            footer: None,
            timestamp: Some(now),
        },
    }
}

/// Compact `1h 05m` style duration.
pub fn format_duration(d: chrono::Duration) -> String {
    let minutes = d.num_minutes().max(0);
    let (hours, minutes) = (minutes / 60, minutes % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else {
        format!("{minutes}m")
    }
}

// --- Feeds ---

pub fn post_message(resource: &TrackedResource, item: &FeedItem, mention: &MentionPlan) -> MessageContent {
    let name = resource.name();
    let verb = match item.kind {
        ItemKind::Post => "posted",
        ItemKind::Repost => "reposted",
        ItemKind::Reply => "replied",
        ItemKind::Quote => "quoted",
        ItemKind::Video => "uploaded a video",
    };
    let author = match (item.kind, item.author.as_deref()) {
        (ItemKind::Repost, Some(original)) => format!("{name} reposted {original}"),
        _ => format!("{name} {verb}"),
    };

    let embed = Embed {
        author: Some(author),
        title: None,
        url: Some(item.url.clone()),
        description: (!item.text.is_empty()).then(|| item.text.clone()),
        color: Some(platform_color(resource.platform)),
        fields: Vec::new(),
        image_url: None,
        footer: Some(resource.platform.label().to_string()),
        timestamp: Some(item.published_at),
    };
    let mut message = apply_mention(MessageContent { content: None, embed }, mention);
    // Plain link so the destination renders the platform's own preview.
    let link = item.url.clone();
    message.content = Some(match message.content.take() {
        Some(mention) => format!("{mention} {link}"),
        None => link,
    });
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(at: DateTime<Utc>) -> MentionContext<'static> {
        MentionContext {
            name: "Shroud",
            url: "https://twitch.tv/shroud",
            id: "shroud",
            at,
        }
    }

    fn with_role() -> FilterSettings {
        FilterSettings {
            mention_role: Some(77),
            ..FilterSettings::default()
        }
    }

    #[test]
    fn mention_text_is_templated() {
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let text = format_mention("&name is live at &url (&id) &timestamp", &ctx(at));
        assert_eq!(
            text,
            "Shroud is live at https://twitch.tv/shroud (shroud) <t:1700000000:R>"
        );
    }

    #[test]
    fn substituted_values_are_not_expanded_again() {
        let at = Utc::now();
        let ctx = MentionContext {
            name: "A&id",
            url: "https://x.test/?a=1&id=2",
            id: "abc",
            at,
        };
        assert_eq!(format_mention("&name &url & &id", &ctx), "A&id https://x.test/?a=1&id=2 & abc");
    }

    #[test]
    fn no_configuration_means_no_mention() {
        let now = Utc::now();
        let plan = plan_mention(&FilterSettings::default(), None, None, &ctx(now), now);
        assert_eq!(plan, MentionPlan::default());
    }

    #[test]
    fn fresh_event_pings_role() {
        let now = Utc::now();
        let plan = plan_mention(&with_role(), None, None, &ctx(now), now);
        assert_eq!(plan.text.as_deref(), Some("<@&77>"));
        assert!(plan.pings_role);
    }

    #[test]
    fn late_event_skips_ping_with_note() {
        let now = Utc::now();
        let started = now - chrono::Duration::minutes(40);
        let plan = plan_mention(&with_role(), None, None, &ctx(started), now);
        assert!(plan.text.is_none());
        assert!(plan.skipped_late);

        let resource = TrackedResource::new(Platform::Twitch, "shroud");
        let live = LiveSession {
            session_id: "1".into(),
            title: "hello".into(),
            category: None,
            viewers: 3,
            started_at: started,
            url: "https://twitch.tv/shroud".into(),
            thumbnail_url: None,
            members_only: false,
        };
        let message = live_message(&resource, &live, &plan);
        assert!(message.embed.footer.unwrap().contains("Mention skipped"));
        assert!(message.content.is_none());
    }

    #[test]
    fn edits_keep_the_late_note_without_repeating_the_ping() {
        let now = Utc::now();
        let started = now - chrono::Duration::minutes(40);

        let late = carried_mention(&with_role(), &ctx(started), started + chrono::Duration::minutes(30));
        assert!(late.skipped_late);
        assert!(late.text.is_none());
        assert!(!late.pings_role);

        let on_time = carried_mention(&with_role(), &ctx(started), started + chrono::Duration::minutes(2));
        assert_eq!(on_time, MentionPlan::default());
    }

    #[test]
    fn stream_ping_is_throttled_per_target() {
        let now = Utc::now();
        let filters = FilterSettings {
            mention_role: Some(77),
            mention_text: Some("go watch &name".into()),
            ..FilterSettings::default()
        };
        let throttle = Some(chrono::Duration::minutes(STREAM_PING_THROTTLE_MINUTES));
        let recent = Some(now - chrono::Duration::minutes(20));
        let plan = plan_mention(&filters, recent, throttle, &ctx(now), now);
        assert_eq!(plan.text.as_deref(), Some("go watch Shroud"));
        assert!(!plan.pings_role);

        let old = Some(now - chrono::Duration::minutes(90));
        let plan = plan_mention(&filters, old, throttle, &ctx(now), now);
        assert_eq!(plan.text.as_deref(), Some("<@&77> go watch Shroud"));
    }

    #[test]
    fn durations_are_compact() {
        assert_eq!(format_duration(chrono::Duration::minutes(7)), "7m");
        assert_eq!(format_duration(chrono::Duration::minutes(125)), "2h 05m");
    }

    #[test]
    fn post_content_carries_link_after_mention() {
        let resource = TrackedResource::new(Platform::Bluesky, "alice.bsky.social");
        let item = FeedItem {
            item_id: "p1".into(),
            ordinal: Some(1),
            kind: ItemKind::Post,
            author: None,
            text: "hi".into(),
            url: "https://bsky.app/profile/alice.bsky.social/post/p1".into(),
            published_at: Utc::now(),
            has_media: false,
            members_only: false,
            category: None,
        };
        let plan = MentionPlan {
            text: Some("<@&1>".into()),
            pings_role: true,
            skipped_late: false,
        };
        let message = post_message(&resource, &item, &plan);
        assert_eq!(
            message.content.as_deref(),
            Some("<@&1> https://bsky.app/profile/alice.bsky.social/post/p1")
        );
        assert_eq!(message.embed.description.as_deref(), Some("hi"));
    }
}
