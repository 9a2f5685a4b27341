//! ecofed: federated natural-language queries for an environmental dashboard
//!
//! Free-text questions ("average temperature in Amazon Basin") are turned
//! into a structured [`QueryIntent`] against a schema catalog, checked
//! against the caller's role, planned across the relational, document and
//! lake stores that hold each entity, and answered as one merged, typed
//! [`ResultSet`].

pub mod api;
pub mod audit;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod error;
pub mod metrics;
pub mod query;
pub mod status;
pub mod storage;

pub use api::{create_rest_router, ApiState};
pub use audit::{QueryLog, QueryLogEntry};
pub use auth::{AuthContext, AuthLayer, AuthMiddleware, Authenticator};
pub use catalog::{EntitySchema, FieldSchema, SchemaCatalog, SemanticType};
pub use config::Config;
pub use error::{AuthError, EcofedError, QueryError, Result, StorageError};
pub use metrics::{get_metrics, Metrics};
pub use query::{
    AggregateFunction, AggregationSpec, Dispatcher, ExecutionPlan, FilterOp, FilterPredicate,
    FilterValue, GeneratedQuery, Interpreter, Operation, QueryExecutor, QueryIntent, QueryOutcome,
    QueryStats, QueryWarning, ResultSet, Role, RoleContext, Scalar,
};
pub use status::StatusMonitor;
pub use storage::{AdapterRegistry, DrillStore, MemoryStore, RawRow, StoreAdapter, StoreQuery};
