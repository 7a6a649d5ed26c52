use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
};
use chrono::Utc;
use tracing::info;

use tidewatch_common::{Platform, ResourceState};
use tidewatch_tracker::DispatchReport;

use crate::app::{verify_webhook, ApiError, AppState};

/// `POST /webhooks/{platform}/{external_id}` with a normalized state body.
pub async fn ingest(
    State(state): State<Arc<AppState>>,
    Path((platform, external_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<ResourceState>,
) -> Result<Json<DispatchReport>, ApiError> {
    verify_webhook(&state, &headers)?;
    let platform: Platform = platform.parse()?;
    if body.kind() != platform.kind() {
        return Err(ApiError::BadRequest(format!(
            "{platform} expects a {:?} state",
            platform.kind()
        )));
    }

    let report = state
        .service
        .ingest(platform, &external_id, body, Utc::now())
        .await?;
    info!(platform = %platform, external_id = %external_id, created = report.created, edited = report.edited, "Webhook applied");
    Ok(Json(report))
}
