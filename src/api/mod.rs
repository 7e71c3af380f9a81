mod handlers;

pub use handlers::{
    ActorInput, EnabledQuery, EnabledResponse, FeatureResponse, GroupInput, PercentageInput,
};

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::registry::Registry;

pub fn create_router(registry: Arc<Registry>) -> Router {
    let api = Router::new()
        // Features
        .route("/features", get(handlers::list_features))
        .route("/features/{key}", get(handlers::get_feature))
        .route("/features/{key}", delete(handlers::remove_feature))
        .route("/features/{key}/enabled", get(handlers::check_feature))
        // Gates
        .route("/features/{key}/boolean", post(handlers::enable_boolean))
        .route("/features/{key}/boolean", delete(handlers::disable_boolean))
        .route("/features/{key}/actors", post(handlers::enable_actor))
        .route("/features/{key}/actors", delete(handlers::disable_actor))
        .route("/features/{key}/groups", post(handlers::enable_group))
        .route("/features/{key}/groups", delete(handlers::disable_group))
        .route(
            "/features/{key}/percentage_of_actors",
            post(handlers::enable_percentage),
        )
        .route(
            "/features/{key}/percentage_of_actors",
            delete(handlers::disable_percentage),
        )
        // Groups
        .route("/groups", get(handlers::list_groups))
        // Health
        .route("/health", get(handlers::health));

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(registry)
}
