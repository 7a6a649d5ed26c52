use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use tracing::warn;

use tidewatch_common::{TrackerError, UnknownPlatform};
use tidewatch_store::{StoreError, TrackerStore};
use tidewatch_tracker::{NotificationSink, TrackerService};

use crate::{admin, webhooks};

pub type Service = TrackerService<Arc<dyn TrackerStore>, Arc<dyn NotificationSink>>;

/// Header carrying the shared webhook secret.
pub const WEBHOOK_SECRET_HEADER: &str = "x-tidewatch-secret";

pub struct AppState {
    pub service: Arc<Service>,
    pub webhook_secret: Option<String>,
    pub admin_token: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0} is disabled")]
    Disabled(&'static str),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Tracker(e.into())
    }
}

impl From<UnknownPlatform> for ApiError {
    fn from(e: UnknownPlatform) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Disabled(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NotFound(_) | ApiError::Tracker(TrackerError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Tracker(TrackerError::RateLimited { .. }) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Tracker(TrackerError::TransientApi(_) | TrackerError::Delivery(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Tracker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self, "Request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let admin = Router::new()
        .route("/resources", get(admin::list_resources).post(admin::track_resource))
        .route("/resources/{id}", delete(admin::delete_resource))
        .route("/resources/{id}/flag", delete(admin::clear_flag))
        .route("/resources/{id}/targets", get(admin::list_targets).post(admin::add_target))
        .route("/flagged", get(admin::list_flagged))
        .route("/targets/{id}", delete(admin::remove_target))
        .route("/locks/purge", post(admin::purge_locks))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/webhooks/{platform}/{external_id}", post(webhooks::ingest))
        .nest("/admin", admin)
        .with_state(state)
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
}

async fn require_admin(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Err(ApiError::Disabled("admin API"));
    };
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented != Some(expected) {
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(request).await)
}

/// Check the shared secret on an inbound webhook.
pub fn verify_webhook(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.webhook_secret.as_deref() else {
        return Err(ApiError::Disabled("webhook intake"));
    };
    let presented = headers.get(WEBHOOK_SECRET_HEADER).and_then(|v| v.to_str().ok());
    if presented != Some(expected) {
        return Err(ApiError::Unauthorized);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tidewatch_common::{Destination, FilterSettings, Platform, Target};
    use tidewatch_store::MemoryStore;
    use tidewatch_tracker::NoopSink;
    use tower::ServiceExt;

    struct Harness {
        app: Router,
        store: Arc<MemoryStore>,
        service: Arc<Service>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let dyn_store: Arc<dyn TrackerStore> = store.clone();
        let sink: Arc<dyn NotificationSink> = Arc::new(NoopSink::new());
        let service = Arc::new(TrackerService::new(dyn_store, sink));
        let state = Arc::new(AppState {
            service: service.clone(),
            webhook_secret: Some("hook-secret".to_string()),
            admin_token: Some("admin-token".to_string()),
        });
        Harness {
            app: router(state),
            store,
            service,
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    fn admin(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, "Bearer admin-token")
            .header(header::CONTENT_TYPE, "application/json");
        builder
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap()
    }

    fn webhook(uri: &str, secret: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(WEBHOOK_SECRET_HEADER, secret)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn offline_body() -> serde_json::Value {
        serde_json::json!({ "kind": "stream", "display_name": "Shroud", "live": null })
    }

    #[tokio::test]
    async fn health_check() {
        let h = harness();
        let response = h
            .app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn admin_requires_bearer_token() {
        let h = harness();
        let request = Request::builder()
            .uri("/admin/flagged")
            .header(header::AUTHORIZATION, "Bearer wrong")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&h.app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(&h.app, admin("GET", "/admin/flagged", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
    }

    #[tokio::test]
    async fn track_then_add_and_remove_target() {
        let h = harness();
        let (status, resource) = send(
            &h.app,
            admin(
                "POST",
                "/admin/resources",
                Some(serde_json::json!({ "platform": "twitch", "external_id": "shroud" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = resource["id"].as_str().unwrap().to_string();

        let (status, target) = send(
            &h.app,
            admin(
                "POST",
                &format!("/admin/resources/{id}/targets"),
                Some(serde_json::json!({ "channel_id": 42, "filters": { "summaries": false } })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(target["filters"]["summaries"], false);
        assert_eq!(target["filters"]["include_reposts"], true);

        let target_id = target["id"].as_str().unwrap();
        let (status, _) = send(&h.app, admin("DELETE", &format!("/admin/targets/{target_id}"), None)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, targets) = send(&h.app, admin("GET", &format!("/admin/resources/{id}/targets"), None)).await;
        assert_eq!(targets, serde_json::json!([]));
    }

    #[tokio::test]
    async fn unknown_platform_is_rejected() {
        let h = harness();
        let (status, _) = send(
            &h.app,
            admin(
                "POST",
                "/admin/resources",
                Some(serde_json::json!({ "platform": "myspace", "external_id": "tom" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_cascades_targets() {
        let h = harness();
        let resource = h.store.track(Platform::Twitch, "shroud").await.unwrap();
        h.store
            .add_target(&Target::new(
                resource.id,
                Destination {
                    guild_id: None,
                    channel_id: 7,
                },
                FilterSettings::default(),
            ))
            .await
            .unwrap();

        let (status, _) = send(&h.app, admin("DELETE", &format!("/admin/resources/{}", resource.id), None)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(h.store.list_targets(resource.id).await.unwrap().is_empty());

        let (status, _) = send(&h.app, admin("DELETE", &format!("/admin/resources/{}", resource.id), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn flagged_resource_can_be_cleared() {
        let h = harness();
        let resource = h.store.track(Platform::Bluesky, "gone.bsky.social").await.unwrap();
        h.store.flag_not_found(resource.id, chrono::Utc::now()).await.unwrap();

        let (_, flagged) = send(&h.app, admin("GET", "/admin/flagged", None)).await;
        assert_eq!(flagged.as_array().unwrap().len(), 1);

        let (status, _) = send(&h.app, admin("DELETE", &format!("/admin/resources/{}/flag", resource.id), None)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(h.store.list_flagged().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn webhook_checks_secret() {
        let h = harness();
        h.store.track(Platform::Twitch, "shroud").await.unwrap();
        let (status, _) = send(&h.app, webhook("/webhooks/twitch/shroud", "nope", offline_body())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn webhook_applies_state_under_resource_lock() {
        let h = harness();
        let resource = h.store.track(Platform::Twitch, "shroud").await.unwrap();

        let (status, report) = send(&h.app, webhook("/webhooks/twitch/shroud", "hook-secret", offline_body())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["created"], 0);

        let stored = h.store.get_resource(resource.id).await.unwrap().unwrap();
        assert_eq!(stored.display_name.as_deref(), Some("Shroud"));
        assert_eq!(h.service.locks().len(), 1);
    }

    #[tokio::test]
    async fn webhook_for_untracked_resource_is_not_found() {
        let h = harness();
        let (status, _) = send(&h.app, webhook("/webhooks/twitch/nobody", "hook-secret", offline_body())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn purge_locks_for_platform() {
        let h = harness();
        h.store.track(Platform::Twitch, "shroud").await.unwrap();
        send(&h.app, webhook("/webhooks/twitch/shroud", "hook-secret", offline_body())).await;
        assert_eq!(h.service.locks().len(), 1);

        let (status, body) = send(&h.app, admin("POST", "/admin/locks/purge?platform=twitch", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["purged"], 1);
        assert!(h.service.locks().is_empty());
    }
}
