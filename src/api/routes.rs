use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::server::{api_key_auth, AppState};

use super::connection::project_connections;
use super::events::publish_event;
use super::health::{health, stats};
use super::metrics::prometheus_metrics;

pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Health, Stats & Metrics
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        .nest(
            "/api/v1",
            Router::new()
                // Event trigger for the CRUD layer
                .route(
                    "/events",
                    post(publish_event)
                        .route_layer(middleware::from_fn_with_state(state, api_key_auth)),
                )
                // Introspection
                .route(
                    "/projects/{project_id}/connections",
                    get(project_connections),
                ),
        )
}
