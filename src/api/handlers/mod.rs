use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::models::*;
use crate::registry::Registry;

type ApiResult<T> = Result<T, (StatusCode, String)>;

// ============================================================
// Request / Response Types
// ============================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ActorInput {
    pub actor_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GroupInput {
    pub name: String,
}

/// Range is checked by the registry so out-of-range values get a readable 400.
#[derive(Debug, Serialize, Deserialize)]
pub struct PercentageInput {
    pub percentage: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnabledQuery {
    pub actor: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnabledResponse {
    pub key: String,
    pub enabled: bool,
}

/// A feature plus whether it exists in storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureResponse {
    #[serde(flatten)]
    pub feature: FeatureSummary,
    pub persisted: bool,
}

// ============================================================
// Error Handling
// ============================================================

/// Validation errors go back to the client verbatim. Storage errors are
/// logged in full and reported with a generic message.
fn api_error(e: Error) -> (StatusCode, String) {
    match e {
        Error::Validation(msg) => {
            tracing::warn!("Validation error: {}", msg);
            (StatusCode::BAD_REQUEST, msg)
        }
        Error::Storage(e) => {
            tracing::error!("Storage error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
        }
    }
}

fn mutated(feature: Feature) -> Json<FeatureResponse> {
    Json(FeatureResponse {
        feature: feature.into(),
        persisted: true,
    })
}

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Features
// ============================================================

pub async fn list_features(
    State(registry): State<Arc<Registry>>,
) -> ApiResult<Json<Vec<FeatureSummary>>> {
    let features = registry.all().map_err(api_error)?;
    Ok(Json(features.iter().map(FeatureSummary::from).collect()))
}

pub async fn get_feature(
    State(registry): State<Arc<Registry>>,
    Path(key): Path<String>,
) -> ApiResult<Json<FeatureResponse>> {
    let feature = registry.get(&key).map_err(api_error)?;
    let persisted = registry.is_persisted(&feature).map_err(api_error)?;
    Ok(Json(FeatureResponse {
        feature: feature.into(),
        persisted,
    }))
}

pub async fn remove_feature(
    State(registry): State<Arc<Registry>>,
    Path(key): Path<String>,
) -> ApiResult<StatusCode> {
    if registry.remove(&key).map_err(api_error)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, "Feature not found".to_string()))
    }
}

pub async fn check_feature(
    State(registry): State<Arc<Registry>>,
    Path(key): Path<String>,
    Query(query): Query<EnabledQuery>,
) -> ApiResult<Json<EnabledResponse>> {
    let thing = query.actor.map(Thing::new);
    let enabled = registry
        .is_enabled(&key, thing.as_ref())
        .map_err(api_error)?;
    Ok(Json(EnabledResponse { key, enabled }))
}

// ============================================================
// Gates
// ============================================================

pub async fn enable_boolean(
    State(registry): State<Arc<Registry>>,
    Path(key): Path<String>,
) -> ApiResult<Json<FeatureResponse>> {
    registry.enable(&key, true).map(mutated).map_err(api_error)
}

pub async fn disable_boolean(
    State(registry): State<Arc<Registry>>,
    Path(key): Path<String>,
) -> ApiResult<Json<FeatureResponse>> {
    registry.disable(&key, false).map(mutated).map_err(api_error)
}

pub async fn enable_actor(
    State(registry): State<Arc<Registry>>,
    Path(key): Path<String>,
    Json(input): Json<ActorInput>,
) -> ApiResult<Json<FeatureResponse>> {
    registry
        .enable_actor(&key, input.actor_id)
        .map(mutated)
        .map_err(api_error)
}

pub async fn disable_actor(
    State(registry): State<Arc<Registry>>,
    Path(key): Path<String>,
    Json(input): Json<ActorInput>,
) -> ApiResult<Json<FeatureResponse>> {
    registry
        .disable_actor(&key, input.actor_id)
        .map(mutated)
        .map_err(api_error)
}

pub async fn enable_group(
    State(registry): State<Arc<Registry>>,
    Path(key): Path<String>,
    Json(input): Json<GroupInput>,
) -> ApiResult<Json<FeatureResponse>> {
    registry
        .enable_group(&key, input.name)
        .map(mutated)
        .map_err(api_error)
}

pub async fn disable_group(
    State(registry): State<Arc<Registry>>,
    Path(key): Path<String>,
    Json(input): Json<GroupInput>,
) -> ApiResult<Json<FeatureResponse>> {
    registry
        .disable_group(&key, input.name)
        .map(mutated)
        .map_err(api_error)
}

pub async fn enable_percentage(
    State(registry): State<Arc<Registry>>,
    Path(key): Path<String>,
    Json(input): Json<PercentageInput>,
) -> ApiResult<Json<FeatureResponse>> {
    registry
        .enable_percentage_of_actors(&key, input.percentage)
        .map(mutated)
        .map_err(api_error)
}

pub async fn disable_percentage(
    State(registry): State<Arc<Registry>>,
    Path(key): Path<String>,
) -> ApiResult<Json<FeatureResponse>> {
    registry
        .disable_percentage_of_actors(&key)
        .map(mutated)
        .map_err(api_error)
}

// ============================================================
// Groups
// ============================================================

pub async fn list_groups(State(registry): State<Arc<Registry>>) -> Json<Vec<String>> {
    Json(registry.groups().names())
}
