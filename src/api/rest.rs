//! REST API router.

use std::sync::Arc;

use axum::{
    http::{header, HeaderName, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::api::handlers::{
    catalog_handler, database_status_handler, health_handler, metrics_handler,
    natural_query_handler, query_logs_handler, ApiState,
};
use crate::auth::{AuthLayer, Authenticator};

/// Create the dashboard API router.
///
/// Endpoints:
/// - POST /api/natural-query    - Answer a free-text question
/// - GET  /api/database-status  - Store reachability
/// - GET  /api/catalog          - Entities visible to the caller
/// - GET  /api/query-logs       - Recent questions (administrators)
/// - GET  /health               - Liveness
/// - GET  /metrics              - Prometheus metrics
pub fn create_rest_router(
    state: Arc<ApiState>,
    authenticator: Authenticator,
    enable_cors: bool,
) -> Router {
    let router = Router::new()
        .route("/api/natural-query", post(natural_query_handler))
        .route("/api/database-status", get(database_status_handler))
        .route("/api/catalog", get(catalog_handler))
        .route("/api/query-logs", get(query_logs_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(AuthLayer::new(authenticator));

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([
                header::CONTENT_TYPE,
                header::AUTHORIZATION,
                HeaderName::from_static("x-api-key"),
            ])
            .allow_origin(Any);

        router.layer(cors)
    } else {
        router
    }
}
