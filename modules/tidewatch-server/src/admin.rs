//! Administrative actions. Every route here sits behind the bearer token.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use tidewatch_common::{Destination, FilterSettings, Platform, Target, TrackedResource};
use tidewatch_store::TrackerStore;

use crate::app::{ApiError, AppState};

#[derive(Deserialize)]
pub struct PlatformQuery {
    platform: Option<String>,
}

impl PlatformQuery {
    fn platform(&self) -> Result<Option<Platform>, ApiError> {
        Ok(self.platform.as_deref().map(str::parse::<Platform>).transpose()?)
    }
}

#[derive(Deserialize)]
pub struct TrackRequest {
    platform: String,
    external_id: String,
}

#[derive(Deserialize)]
pub struct TargetRequest {
    guild_id: Option<i64>,
    channel_id: i64,
    #[serde(default)]
    filters: FilterSettings,
}

fn store(state: &AppState) -> &dyn TrackerStore {
    state.service.store().as_ref()
}

pub async fn list_resources(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PlatformQuery>,
) -> Result<Json<Vec<TrackedResource>>, ApiError> {
    let platforms = match query.platform()? {
        Some(p) => vec![p],
        None => Platform::ALL.to_vec(),
    };
    let mut resources = Vec::new();
    for platform in platforms {
        resources.extend(store(&state).list_resources(platform).await?);
    }
    Ok(Json(resources))
}

pub async fn track_resource(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TrackRequest>,
) -> Result<(StatusCode, Json<TrackedResource>), ApiError> {
    let platform: Platform = body.platform.parse()?;
    let external_id = body.external_id.trim();
    if external_id.is_empty() {
        return Err(ApiError::BadRequest("external_id is empty".to_string()));
    }
    let resource = store(&state).track(platform, external_id).await?;
    info!(platform = %platform, external_id, resource_id = %resource.id, "Resource tracked");
    Ok((StatusCode::CREATED, Json(resource)))
}

/// Deletes the resource with its targets and notification records.
pub async fn delete_resource(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if !store(&state).delete_resource(id).await? {
        return Err(ApiError::NotFound(format!("resource {id}")));
    }
    info!(resource_id = %id, "Resource deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_flagged(State(state): State<Arc<AppState>>) -> Result<Json<Vec<TrackedResource>>, ApiError> {
    Ok(Json(store(&state).list_flagged().await?))
}

pub async fn clear_flag(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if !store(&state).clear_not_found(id).await? {
        return Err(ApiError::NotFound(format!("flag on resource {id}")));
    }
    info!(resource_id = %id, "Not-found flag cleared");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_targets(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Target>>, ApiError> {
    Ok(Json(store(&state).list_targets(id).await?))
}

pub async fn add_target(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<TargetRequest>,
) -> Result<(StatusCode, Json<Target>), ApiError> {
    if store(&state).get_resource(id).await?.is_none() {
        return Err(ApiError::NotFound(format!("resource {id}")));
    }
    let destination = Destination {
        guild_id: body.guild_id,
        channel_id: body.channel_id,
    };
    let target = store(&state)
        .add_target(&Target::new(id, destination, body.filters))
        .await?;
    info!(resource_id = %id, target_id = %target.id, channel_id = body.channel_id, "Target added");
    Ok((StatusCode::CREATED, Json(target)))
}

pub async fn remove_target(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if !store(&state).remove_target(id).await? {
        return Err(ApiError::NotFound(format!("target {id}")));
    }
    info!(target_id = %id, "Target removed");
    Ok(StatusCode::NO_CONTENT)
}

/// Drops idle lock entries, for one platform or all of them.
pub async fn purge_locks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PlatformQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let locks = state.service.locks();
    let purged = match query.platform()? {
        Some(platform) => locks.purge(platform),
        None => locks.purge_all(),
    };
    info!(purged, remaining = locks.len(), "Lock cache purged");
    Ok(Json(serde_json::json!({ "purged": purged })))
}
