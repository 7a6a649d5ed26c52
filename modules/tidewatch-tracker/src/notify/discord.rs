use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use tidewatch_common::{DeliveryError, Destination};

use super::sink::NotificationSink;
use crate::render::MessageContent;

const API_BASE: &str = "https://discord.com/api/v10";

/// Discord JSON error codes that tell a missing channel from a missing message.
const UNKNOWN_CHANNEL: u64 = 10003;
const UNKNOWN_MESSAGE: u64 = 10008;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Send,
    Edit,
    Delete,
}

/// Discord bot REST delivery.
pub struct DiscordSink {
    token: String,
    base_url: String,
    http: reqwest::Client,
}

impl DiscordSink {
    pub fn new(token: String) -> Self {
        Self {
            token,
            base_url: API_BASE.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn call(
        &self,
        op: Operation,
        method: Method,
        path: String,
        payload: Option<Value>,
    ) -> Result<Option<Value>, DeliveryError> {
        let mut request = self
            .http
            .request(method, format!("{}{path}", self.base_url))
            .header("Authorization", format!("Bot {}", self.token))
            .timeout(Duration::from_secs(15));
        if let Some(payload) = payload {
            request = request.json(&payload);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| DeliveryError::Other(format!("Discord request failed: {e}")))?;

        let status = resp.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let body = resp.text().await.unwrap_or_default();
        if status.is_success() {
            let value = serde_json::from_str(&body)
                .map_err(|e| DeliveryError::Other(format!("Discord returned invalid JSON: {e}")))?;
            return Ok(Some(value));
        }

        let err = classify(op, status, &body);
        warn!(status = %status, error = %err, "Discord returned non-success");
        Err(err)
    }
}

#[derive(Deserialize)]
struct ApiError {
    code: Option<u64>,
    retry_after: Option<f64>,
}

/// Map a failed Discord response onto the delivery taxonomy.
fn classify(op: Operation, status: StatusCode, body: &str) -> DeliveryError {
    let parsed: Option<ApiError> = serde_json::from_str(body).ok();
    let code = parsed.as_ref().and_then(|e| e.code);
    let detail = format!("{status}: {body}");

    match status {
        StatusCode::FORBIDDEN => DeliveryError::PermissionDenied(detail),
        StatusCode::NOT_FOUND => match (code, op) {
            (Some(UNKNOWN_CHANNEL), _) | (None, Operation::Send) => DeliveryError::DestinationGone(detail),
            (Some(UNKNOWN_MESSAGE), _) | (None, _) => DeliveryError::MessageGone(detail),
            (Some(_), Operation::Send) => DeliveryError::DestinationGone(detail),
            (Some(_), _) => DeliveryError::MessageGone(detail),
        },
        StatusCode::TOO_MANY_REQUESTS => DeliveryError::RateLimited {
            retry_after: parsed
                .and_then(|e| e.retry_after)
                .filter(|s| s.is_finite() && *s >= 0.0)
                .map(Duration::from_secs_f64),
        },
        _ => DeliveryError::Other(detail),
    }
}

fn payload(content: &MessageContent) -> Value {
    let embed = &content.embed;
    let mut e = json!({
        "fields": embed.fields.iter().map(|f| json!({
            "name": f.name,
            "value": f.value,
            "inline": f.inline,
        })).collect::<Vec<_>>(),
    });
    if let Some(author) = &embed.author {
        e["author"] = json!({ "name": author });
    }
    if let Some(title) = &embed.title {
        e["title"] = json!(title);
    }
    if let Some(url) = &embed.url {
        e["url"] = json!(url);
    }
    if let Some(description) = &embed.description {
        e["description"] = json!(description);
    }
    if let Some(color) = embed.color {
        e["color"] = json!(color);
    }
    if let Some(image) = &embed.image_url {
        e["image"] = json!({ "url": image });
    }
    if let Some(footer) = &embed.footer {
        e["footer"] = json!({ "text": footer });
    }
    if let Some(ts) = embed.timestamp {
        e["timestamp"] = json!(ts.to_rfc3339());
    }

    let mut body = json!({
        "embeds": [e],
        "allowed_mentions": { "parse": ["roles", "users"] },
    });
    if let Some(text) = &content.content {
        body["content"] = json!(text);
    }
    body
}

#[async_trait]
impl NotificationSink for DiscordSink {
    async fn send(&self, destination: &Destination, content: &MessageContent) -> Result<i64, DeliveryError> {
        let created = self
            .call(
                Operation::Send,
                Method::POST,
                format!("/channels/{}/messages", destination.channel_id),
                Some(payload(content)),
            )
            .await?;

        created
            .as_ref()
            .and_then(|v| v.get("id"))
            .and_then(Value::as_str)
            .and_then(|id| id.parse::<i64>().ok())
            .ok_or_else(|| DeliveryError::Other("Discord response carried no message id".into()))
    }

    async fn edit(
        &self,
        destination: &Destination,
        message_id: i64,
        content: &MessageContent,
    ) -> Result<(), DeliveryError> {
        self.call(
            Operation::Edit,
            Method::PATCH,
            format!("/channels/{}/messages/{message_id}", destination.channel_id),
            Some(payload(content)),
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, destination: &Destination, message_id: i64) -> Result<(), DeliveryError> {
        self.call(
            Operation::Delete,
            Method::DELETE,
            format!("/channels/{}/messages/{message_id}", destination.channel_id),
            None,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{Embed, EmbedField};

    #[test]
    fn forbidden_is_permission_denied() {
        let err = classify(Operation::Send, StatusCode::FORBIDDEN, r#"{"code":50013}"#);
        assert!(matches!(err, DeliveryError::PermissionDenied(_)));
    }

    #[test]
    fn not_found_splits_channel_and_message() {
        let channel = classify(Operation::Edit, StatusCode::NOT_FOUND, r#"{"code":10003}"#);
        assert!(matches!(channel, DeliveryError::DestinationGone(_)));

        let message = classify(Operation::Edit, StatusCode::NOT_FOUND, r#"{"code":10008}"#);
        assert!(matches!(message, DeliveryError::MessageGone(_)));

        let bare_send = classify(Operation::Send, StatusCode::NOT_FOUND, "");
        assert!(matches!(bare_send, DeliveryError::DestinationGone(_)));

        let bare_delete = classify(Operation::Delete, StatusCode::NOT_FOUND, "");
        assert!(matches!(bare_delete, DeliveryError::MessageGone(_)));
    }

    #[test]
    fn rate_limit_reads_retry_after() {
        let err = classify(
            Operation::Send,
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"message":"You are being rate limited.","retry_after":1.5,"global":false}"#,
        );
        assert_eq!(
            err,
            DeliveryError::RateLimited {
                retry_after: Some(Duration::from_millis(1500))
            }
        );
    }

    #[test]
    fn payload_omits_missing_parts() {
        let content = MessageContent {
            content: None,
            embed: Embed {
                title: Some("hello".into()),
                fields: vec![EmbedField {
                    name: "Viewers".into(),
                    value: "10".into(),
                    inline: true,
                }],
                ..Embed::default()
            },
        };
        let body = payload(&content);
        assert!(body.get("content").is_none());
        assert_eq!(body["embeds"][0]["title"], "hello");
        assert_eq!(body["embeds"][0]["fields"][0]["value"], "10");
        assert!(body["embeds"][0].get("footer").is_none());
    }
}
