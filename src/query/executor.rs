//! Query Executor.
//!
//! Runs a natural-language question end to end: interpret, plan, dispatch,
//! and package the answer with its interpretation and timings.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use super::dispatcher::Dispatcher;
use super::interpreter::Interpreter;
use super::plan::GeneratedQuery;
use super::result::ResultSet;
use super::types::{QueryIntent, Role, RoleContext};
use crate::catalog::SchemaCatalog;
use crate::config::Config;
use crate::error::{QueryError, Result};
use crate::metrics::{get_metrics, Metrics};
use crate::storage::AdapterRegistry;

/// Timings and stores for one answered question.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryStats {
    pub interpretation_time_ms: u64,
    pub execution_time_ms: u64,
    pub total_time_ms: u64,
    pub stores: Vec<String>,
}

/// An answered question.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub intent: QueryIntent,
    pub result: ResultSet,
    pub interpretation: String,
    /// Native text of each sub-query, for stores that have one
    pub generated_sql: Vec<GeneratedQuery>,
    pub stats: QueryStats,
}

pub struct QueryExecutor {
    interpreter: Interpreter,
    dispatcher: Dispatcher,
    roles: HashMap<Role, RoleContext>,
}

impl QueryExecutor {
    /// Build from configuration: catalog, adapters and role permissions.
    pub fn from_config(config: &Config) -> Result<Self> {
        let catalog = Arc::new(config.load_catalog()?);
        let registry = Arc::new(AdapterRegistry::from_config(config)?);
        Ok(Self::with_registry(catalog, registry, config))
    }

    /// Build with an explicit adapter registry.
    pub fn with_registry(
        catalog: Arc<SchemaCatalog>,
        registry: Arc<AdapterRegistry>,
        config: &Config,
    ) -> Self {
        let roles = Role::ALL
            .into_iter()
            .map(|role| (role, config.role_context(role, &catalog)))
            .collect();
        Self {
            interpreter: Interpreter::new(catalog.clone(), &config.interpreter),
            dispatcher: Dispatcher::new(catalog, registry, config.dispatcher.clone()),
            roles,
        }
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        self.interpreter.catalog()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &AdapterRegistry {
        self.dispatcher.registry()
    }

    /// Permissions for a role.
    pub fn role_context(&self, role: Role) -> RoleContext {
        self.roles
            .get(&role)
            .cloned()
            .unwrap_or_else(|| RoleContext::for_role(role, self.catalog()))
    }

    /// Interpret without touching any store.
    pub fn interpret(&self, text: &str, role: Role) -> std::result::Result<QueryIntent, QueryError> {
        self.interpreter.interpret(text, &self.role_context(role))
    }

    /// Interpret and execute a question.
    pub async fn execute(
        &self,
        text: &str,
        role: Role,
    ) -> std::result::Result<QueryOutcome, QueryError> {
        let metrics = get_metrics();
        metrics.queries_total.inc();
        let _timer = Metrics::start_timer(&metrics.query_duration_seconds);

        let outcome = self.run(text, role).await;
        match &outcome {
            Ok(answer) => tracing::info!(
                role = %role,
                entity = %answer.intent.entity,
                rows = answer.result.len(),
                dropped = answer.result.dropped_rows,
                confidence = answer.intent.confidence,
                total_ms = answer.stats.total_time_ms,
                "Query answered"
            ),
            Err(e) => {
                metrics.record_query_error(e.code());
                tracing::info!(role = %role, code = e.code(), "Query failed: {}", e);
            }
        }
        outcome
    }

    async fn run(&self, text: &str, role: Role) -> std::result::Result<QueryOutcome, QueryError> {
        let total_start = Instant::now();

        let intent = self.interpret(text, role)?;
        let interpretation_time = total_start.elapsed().as_millis() as u64;

        let exec_start = Instant::now();
        let plan = self.dispatcher.plan(&intent)?;
        let interpretation = plan.description.clone();
        let stores = plan.stores().into_iter().map(String::from).collect();
        let generated_sql = self.dispatcher.native_queries(&plan);
        let result = self.dispatcher.run(plan).await?;

        Ok(QueryOutcome {
            intent,
            result,
            interpretation,
            generated_sql,
            stats: QueryStats {
                interpretation_time_ms: interpretation_time,
                execution_time_ms: exec_start.elapsed().as_millis() as u64,
                total_time_ms: total_start.elapsed().as_millis() as u64,
                stores,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::POSTGRES;
    use crate::storage::MemoryStore;
    use serde_json::json;

    fn executor() -> QueryExecutor {
        let rows = vec![
            json!({"climate_id": 1, "region_id": 1, "region_name": "Amazon Basin", "temperature": 26.0}),
            json!({"climate_id": 2, "region_id": 1, "region_name": "Amazon Basin", "temperature": 28.0}),
            json!({"climate_id": 3, "region_id": 2, "region_name": "Sahara", "temperature": 40.0}),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect();
        let store = MemoryStore::new(POSTGRES).with_rows("climate_with_region", rows);
        let registry = AdapterRegistry::new().with(Arc::new(store));

        QueryExecutor::with_registry(
            Arc::new(SchemaCatalog::builtin()),
            Arc::new(registry),
            &Config::default(),
        )
    }

    #[tokio::test]
    async fn test_execute_end_to_end() {
        let executor = executor();
        let outcome = executor
            .execute("average temperature in Amazon Basin", Role::Researcher)
            .await
            .unwrap();

        assert_eq!(outcome.intent.entity, "Climate");
        assert_eq!(
            outcome.result.get(0, "average_temperature").and_then(|v| v.as_f64()),
            Some(27.0)
        );
        assert_eq!(
            outcome.interpretation,
            "Average temperature from Climate where region_name equals 'Amazon Basin'"
        );
        assert_eq!(outcome.stats.stores, vec!["postgres"]);
        // In-memory stores have no query language.
        assert!(outcome.generated_sql.is_empty());
    }

    #[tokio::test]
    async fn test_execute_reports_interpreter_errors() {
        let executor = executor();
        let err = executor.execute("show me stuff", Role::Researcher).await.unwrap_err();
        assert_eq!(err.code(), "ambiguous_query");
    }

    #[test]
    fn test_role_contexts_follow_catalog() {
        let executor = executor();
        assert!(executor.role_context(Role::Researcher).permits("SensorReading"));
        assert!(!executor.role_context(Role::DataProvider).permits("SensorReading"));
    }
}
