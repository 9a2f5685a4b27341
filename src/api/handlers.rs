//! REST API request handlers.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::audit::{QueryLog, QueryLogEntry};
use crate::auth::AuthContext;
use crate::catalog::EntitySchema;
use crate::error::QueryError;
use crate::metrics::get_metrics;
use crate::query::result::Records;
use crate::query::{GeneratedQuery, QueryExecutor, QueryIntent, QueryStats, QueryWarning, Role};
use crate::status::StatusMonitor;

/// Application state shared across handlers.
pub struct ApiState {
    pub executor: Arc<QueryExecutor>,
    pub monitor: StatusMonitor,
    /// Role for requests that reach a handler without an auth context
    pub default_role: Role,
    pub query_log: QueryLog,
}

impl ApiState {
    pub fn new(executor: Arc<QueryExecutor>, monitor: StatusMonitor, default_role: Role) -> Self {
        Self {
            executor,
            monitor,
            default_role,
            query_log: QueryLog::default(),
        }
    }

    pub fn with_query_log(mut self, query_log: QueryLog) -> Self {
        self.query_log = query_log;
        self
    }

    fn role(&self, auth: Option<Extension<AuthContext>>) -> Role {
        auth.map(|Extension(ctx)| ctx.role)
            .unwrap_or(self.default_role)
    }

    /// User name and role of the caller.
    fn caller(&self, auth: Option<Extension<AuthContext>>) -> (String, Role) {
        match auth {
            Some(Extension(ctx)) => (
                ctx.user_id.unwrap_or_else(|| ANONYMOUS_USER.to_string()),
                ctx.role,
            ),
            None => (ANONYMOUS_USER.to_string(), self.default_role),
        }
    }
}

const ANONYMOUS_USER: &str = "anonymous";

/// Entries returned by `/api/query-logs` when no limit is given.
const DEFAULT_LOG_LIMIT: usize = 50;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct NaturalQueryRequest {
    #[serde(default)]
    pub query: String,
}

/// Answer to a natural-language question.
#[derive(Serialize)]
pub struct NaturalQueryResponse<'a> {
    pub success: bool,
    pub confidence: f32,
    pub data: Records<'a>,
    pub columns: &'a [String],
    pub interpretation: &'a str,
    /// Some rows were left out; see `warnings`
    pub partial: bool,
    pub dropped_rows: usize,
    pub warnings: &'a [QueryWarning],
    pub intent: &'a QueryIntent,
    /// Native text sent to each store that has a query language
    pub generated_sql: &'a [GeneratedQuery],
    pub stats: &'a QueryStats,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryLogParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryLogResponse {
    pub success: bool,
    pub logs: Vec<QueryLogEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStatusResponse {
    pub success: bool,
    pub status: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogResponse {
    pub success: bool,
    pub role: Role,
    pub entities: Vec<EntitySchema>,
}

/// Error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            code: code.into(),
        }
    }
}

/// Failed question. Carries an empty answer so the dashboard can render it
/// like any other.
#[derive(Debug, Clone, Serialize)]
pub struct QueryErrorResponse {
    #[serde(flatten)]
    pub error: ErrorResponse,
    pub confidence: f32,
    pub data: Vec<serde_json::Value>,
}

impl QueryErrorResponse {
    pub fn new(error: &QueryError) -> Self {
        Self {
            error: ErrorResponse::new(error.user_message(), error.code()),
            confidence: 0.0,
            data: Vec::new(),
        }
    }
}

/// HTTP status for a query failure.
pub fn status_for(error: &QueryError) -> StatusCode {
    match error {
        QueryError::AmbiguousQuery(_) => StatusCode::UNPROCESSABLE_ENTITY,
        QueryError::Forbidden { .. } => StatusCode::FORBIDDEN,
        QueryError::InvalidField { .. } => StatusCode::BAD_REQUEST,
        QueryError::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
    }
}

// ============================================================================
// Handler Functions
// ============================================================================

/// POST /api/natural-query - Answer a free-text question.
pub async fn natural_query_handler(
    State(state): State<Arc<ApiState>>,
    auth: Option<Extension<AuthContext>>,
    Json(request): Json<NaturalQueryRequest>,
) -> impl IntoResponse {
    let (user, role) = state.caller(auth);

    let answer = state.executor.execute(&request.query, role).await;
    let code = answer.as_ref().err().map(QueryError::code);
    state.query_log.record(&user, role, &request.query, code);

    match answer {
        Ok(outcome) => {
            let result = &outcome.result;
            let body = NaturalQueryResponse {
                success: true,
                confidence: outcome.intent.confidence,
                data: result.records(),
                columns: &result.columns,
                interpretation: &outcome.interpretation,
                partial: result.partial(),
                dropped_rows: result.dropped_rows,
                warnings: &result.warnings,
                intent: &outcome.intent,
                generated_sql: &outcome.generated_sql,
                stats: &outcome.stats,
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => (status_for(&e), Json(QueryErrorResponse::new(&e))).into_response(),
    }
}

/// GET /api/query-logs - Recent questions, newest first. Administrators only.
pub async fn query_logs_handler(
    State(state): State<Arc<ApiState>>,
    auth: Option<Extension<AuthContext>>,
    Query(params): Query<QueryLogParams>,
) -> impl IntoResponse {
    if state.role(auth) != Role::Administrator {
        return (
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new(
                "Only administrators can view query logs.",
                "forbidden",
            )),
        )
            .into_response();
    }

    let limit = params.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    Json(QueryLogResponse {
        success: true,
        logs: state.query_log.recent(limit),
    })
    .into_response()
}

/// GET /api/database-status - Reachability of every store.
pub async fn database_status_handler(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let status = state.monitor.check_all().await;
    Json(DatabaseStatusResponse {
        success: true,
        status,
    })
}

/// GET /api/catalog - Entities the caller's role may query.
pub async fn catalog_handler(
    State(state): State<Arc<ApiState>>,
    auth: Option<Extension<AuthContext>>,
) -> impl IntoResponse {
    let role = state.role(auth);
    let permitted = state.executor.role_context(role);
    let entities = state
        .executor
        .catalog()
        .entities()
        .iter()
        .filter(|e| permitted.permits(&e.name))
        .cloned()
        .collect();

    Json(CatalogResponse {
        success: true,
        role,
        entities,
    })
}

/// GET /health
pub async fn health_handler() -> &'static str {
    "OK"
}

/// GET /metrics - Prometheus exposition.
pub async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        get_metrics().export_prometheus(),
    )
}
