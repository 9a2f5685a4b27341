//! Query dispatcher: validates an intent against the catalog, plans the
//! store calls, executes them and normalizes the answer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, warn};

use super::merge;
use super::plan::{describe, ExecutionPlan, GeneratedQuery, MergeStep, SubQuery};
use super::result::{normalize, parse_timestamp, ColumnSpec, QueryWarning, ResultSet};
use super::types::{
    split_field, AggregateFunction, AggregationSpec, FilterOp, FilterPredicate, FilterValue,
    QueryIntent,
};
use crate::catalog::{EntitySchema, FieldSchema, SchemaCatalog, SemanticType};
use crate::config::DispatcherConfig;
use crate::error::QueryError;
use crate::metrics::get_metrics;
use crate::storage::{AdapterRegistry, RawRow, StoreAdapter, StoreQuery};

pub struct Dispatcher {
    catalog: Arc<SchemaCatalog>,
    registry: Arc<AdapterRegistry>,
    config: DispatcherConfig,
}

fn invalid(entity: &str, field: &str, reason: impl Into<String>) -> QueryError {
    QueryError::InvalidField {
        entity: entity.to_string(),
        field: field.to_string(),
        reason: reason.into(),
    }
}

impl Dispatcher {
    pub fn new(
        catalog: Arc<SchemaCatalog>,
        registry: Arc<AdapterRegistry>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            catalog,
            registry,
            config,
        }
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    // ========================================================================
    // Validation
    // ========================================================================

    fn entity(&self, name: &str) -> Result<&EntitySchema, QueryError> {
        self.catalog
            .entity(name)
            .ok_or_else(|| QueryError::AmbiguousQuery(format!("unknown entity {}", name)))
    }

    /// Resolve a possibly qualified field reference to its owner.
    fn resolve<'a>(
        &'a self,
        intent: &QueryIntent,
        name: &str,
    ) -> Result<(&'a EntitySchema, &'a FieldSchema), QueryError> {
        let (qualifier, field) = split_field(name);
        let owner = qualifier.unwrap_or(intent.entity.as_str());
        if !intent.entities().any(|e| e.eq_ignore_ascii_case(owner)) {
            return Err(invalid(owner, field, "entity is not part of this query"));
        }
        let entity = self.entity(owner)?;
        let schema = entity
            .get_field(field)
            .ok_or_else(|| invalid(&entity.name, field, "unknown field"))?;
        Ok((entity, schema))
    }

    fn check_filter(
        entity: &EntitySchema,
        field: &FieldSchema,
        filter: &FilterPredicate,
    ) -> Result<(), QueryError> {
        let fail = |reason: String| -> Result<(), QueryError> {
            Err(invalid(&entity.name, &field.name, reason))
        };

        if !field.filterable {
            return fail("field is not filterable".to_string());
        }

        match filter.op {
            FilterOp::GreaterThan | FilterOp::LessThan if !field.ty.is_ordered() => {
                return fail(format!("{} cannot be compared on a {} field", filter.op.phrase(), field.ty));
            }
            FilterOp::Between => {
                if !field.ty.is_numeric() {
                    return fail(format!("between needs a numeric field, not {}", field.ty));
                }
                if !matches!(filter.value, FilterValue::Range { .. }) {
                    return fail("between needs a lower and an upper bound".to_string());
                }
            }
            FilterOp::Contains
                if !matches!(field.ty, SemanticType::Text | SemanticType::List) =>
            {
                return fail(format!("contains needs a text or list field, not {}", field.ty));
            }
            _ => {}
        }

        if field.ty.is_numeric()
            && filter.op != FilterOp::Between
            && filter.value.as_number().is_none()
        {
            return fail(format!("{} is not a number", filter.value));
        }

        if field.ty == SemanticType::Timestamp {
            let readable = match &filter.value {
                FilterValue::Text(text) => parse_timestamp(text).is_some(),
                _ => false,
            };
            if !readable {
                return fail(format!("{} is not a date or timestamp", filter.value));
            }
        }

        Ok(())
    }

    fn check_aggregation(
        &self,
        intent: &QueryIntent,
        spec: &AggregationSpec,
    ) -> Result<(), QueryError> {
        match &spec.field {
            Some(name) => {
                let (entity, field) = self.resolve(intent, name)?;
                if spec.function != AggregateFunction::Count && !field.aggregatable {
                    return Err(invalid(&entity.name, &field.name, "field is not aggregatable"));
                }
                match spec.function {
                    AggregateFunction::Sum | AggregateFunction::Average if !field.ty.is_numeric() => {
                        return Err(invalid(
                            &entity.name,
                            &field.name,
                            format!("{} needs a numeric field", spec.function.as_str()),
                        ));
                    }
                    AggregateFunction::Max | AggregateFunction::Min
                        if field.ty == SemanticType::List =>
                    {
                        return Err(invalid(&entity.name, &field.name, "list fields have no order"));
                    }
                    _ => {}
                }
            }
            None if spec.function != AggregateFunction::Count => {
                return Err(invalid(
                    &intent.entity,
                    "*",
                    format!("{} needs a field", spec.function.as_str()),
                ));
            }
            None => {}
        }

        if let Some(group) = &spec.group_by {
            let (entity, field) = self.resolve(intent, group)?;
            if !field.filterable || field.ty == SemanticType::List {
                return Err(invalid(&entity.name, &field.name, "field cannot be grouped on"));
            }
        }
        Ok(())
    }

    fn check_joins(&self, intent: &QueryIntent) -> Result<(), QueryError> {
        let target = self.entity(&intent.entity)?;
        for name in &intent.joined {
            let joined = self.entity(name)?;
            match (&target.join_key, &joined.join_key) {
                (Some(a), Some(b)) if a == b => {}
                _ => {
                    return Err(invalid(
                        &joined.name,
                        joined.join_key.as_deref().unwrap_or("join_key"),
                        format!("cannot be joined with {}", target.name),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Check every field the intent references against the catalog.
    pub fn validate(&self, intent: &QueryIntent) -> Result<(), QueryError> {
        self.entity(&intent.entity)?;
        self.check_joins(intent)?;

        for filter in &intent.filters {
            let (entity, field) = self.resolve(intent, &filter.field)?;
            Self::check_filter(entity, field, filter)?;
        }
        if let Some(spec) = &intent.aggregation {
            self.check_aggregation(intent, spec)?;
        }
        Ok(())
    }

    // ========================================================================
    // Planning
    // ========================================================================

    /// Effective row limit.
    pub fn limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.config.default_limit)
            .clamp(1, self.config.max_limit.max(1))
    }

    /// Filters owned by `entity`, with unqualified field names.
    fn filters_for(&self, intent: &QueryIntent, entity: &EntitySchema) -> Vec<FilterPredicate> {
        intent
            .filters
            .iter()
            .filter_map(|f| {
                let (qualifier, field) = split_field(&f.field);
                let owner = qualifier.unwrap_or(intent.entity.as_str());
                owner
                    .eq_ignore_ascii_case(&entity.name)
                    .then(|| FilterPredicate::new(field, f.op, f.value.clone()))
            })
            .collect()
    }

    fn store_query(entity: &EntitySchema, filters: Vec<FilterPredicate>, limit: usize) -> StoreQuery {
        StoreQuery {
            entity: entity.name.clone(),
            source: entity.source.clone(),
            fields: entity.fields.clone(),
            filters,
            aggregation: None,
            limit,
        }
    }

    fn field_columns(entity: &EntitySchema) -> Vec<ColumnSpec> {
        entity
            .fields
            .iter()
            .map(|f| ColumnSpec::new(&f.name, f.ty).with_key(f.column_name()))
            .collect()
    }

    fn aggregate_columns(entity: &EntitySchema, spec: &AggregationSpec) -> Vec<ColumnSpec> {
        let mut columns = Vec::new();
        if let Some(group) = spec.group_by.as_deref().and_then(|g| entity.get_field(g)) {
            columns.push(ColumnSpec::new(&group.name, group.ty));
        }
        let ty = match spec.function {
            AggregateFunction::Count => SemanticType::Integer,
            AggregateFunction::Sum | AggregateFunction::Average => SemanticType::Number,
            AggregateFunction::Max | AggregateFunction::Min => spec
                .field
                .as_deref()
                .and_then(|f| entity.get_field(f))
                .map(|f| f.ty)
                .unwrap_or(SemanticType::Number),
        };
        columns.push(ColumnSpec::new(spec.output_column(), ty));
        columns
    }

    /// Name of a field reference in the joined row layout.
    fn merged_name(intent: &QueryIntent, name: &str) -> String {
        match split_field(name) {
            (Some(owner), field) if owner.eq_ignore_ascii_case(&intent.entity) => field.to_string(),
            (Some(owner), field) => format!("{}.{}", owner, field),
            (None, field) => field.to_string(),
        }
    }

    /// Validate and decompose an intent.
    pub fn plan(&self, intent: &QueryIntent) -> Result<ExecutionPlan, QueryError> {
        self.validate(intent)?;

        let target = self.entity(&intent.entity)?;
        let limit = self.limit(intent.limit);

        if intent.joined.is_empty() {
            let filters = self.filters_for(intent, target);
            let description = describe(intent, &[target.store.as_str()]);
            let spec = intent.aggregation.as_ref().map(|spec| AggregationSpec {
                function: spec.function,
                field: spec.field.as_deref().map(|f| split_field(f).1.to_string()),
                group_by: spec.group_by.as_deref().map(|g| split_field(g).1.to_string()),
            });

            return Ok(match spec {
                // Native aggregation skips values the store cannot read,
                // so dropped rows go uncounted.
                Some(spec) if self.config.pushdown_aggregates => {
                    let mut query = Self::store_query(target, filters, limit);
                    let columns = Self::aggregate_columns(target, &spec);
                    query.aggregation = Some(spec);
                    ExecutionPlan {
                        steps: vec![SubQuery {
                            store: target.store.clone(),
                            query,
                            columns,
                        }],
                        merge: None,
                        description,
                    }
                }
                Some(spec) => ExecutionPlan {
                    steps: vec![SubQuery {
                        store: target.store.clone(),
                        query: Self::store_query(target, filters, self.config.max_fetch_rows),
                        columns: Self::field_columns(target),
                    }],
                    merge: Some(MergeStep {
                        join_key: target.join_key.clone().unwrap_or_default(),
                        columns: target.fields.iter().map(|f| f.name.clone()).collect(),
                        aggregation: Some(spec),
                        limit,
                    }),
                    description,
                },
                None => ExecutionPlan {
                    steps: vec![SubQuery {
                        store: target.store.clone(),
                        query: Self::store_query(target, filters, limit),
                        columns: Self::field_columns(target),
                    }],
                    merge: None,
                    description,
                },
            });
        }

        let join_key = target.join_key.clone().unwrap_or_default();
        let mut steps = Vec::new();
        let mut columns: Vec<String> = target.fields.iter().map(|f| f.name.clone()).collect();

        for name in intent.entities() {
            let entity = self.entity(name)?;
            let query = Self::store_query(
                entity,
                self.filters_for(intent, entity),
                self.config.max_fetch_rows,
            );
            if entity.name != target.name {
                columns.extend(
                    entity
                        .fields
                        .iter()
                        .filter(|f| f.name != join_key)
                        .map(|f| format!("{}.{}", entity.name, f.name)),
                );
            }
            steps.push(SubQuery {
                store: entity.store.clone(),
                query,
                columns: Self::field_columns(entity),
            });
        }

        let aggregation = intent.aggregation.as_ref().map(|spec| AggregationSpec {
            function: spec.function,
            field: spec.field.as_deref().map(|f| Self::merged_name(intent, f)),
            group_by: spec.group_by.as_deref().map(|g| Self::merged_name(intent, g)),
        });

        let mut plan = ExecutionPlan {
            steps,
            merge: Some(MergeStep {
                join_key,
                columns,
                aggregation,
                limit,
            }),
            description: String::new(),
        };
        plan.description = describe(intent, &plan.stores());
        Ok(plan)
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Validate, plan and run an intent.
    pub async fn execute(&self, intent: &QueryIntent) -> Result<ResultSet, QueryError> {
        let plan = self.plan(intent)?;
        self.run(plan).await
    }

    fn adapter(&self, store: &str) -> Result<Arc<dyn StoreAdapter>, QueryError> {
        self.registry
            .get(store)
            .ok_or_else(|| QueryError::StoreUnavailable {
                store: store.to_string(),
                reason: "no adapter registered".to_string(),
            })
    }

    /// Native text of every sub-query whose store has a query language.
    pub fn native_queries(&self, plan: &ExecutionPlan) -> Vec<GeneratedQuery> {
        plan.steps
            .iter()
            .filter_map(|step| {
                let query = self.registry.get(&step.store)?.native_query(&step.query)?;
                Some(GeneratedQuery {
                    store: step.store.clone(),
                    entity: step.query.entity.clone(),
                    query,
                })
            })
            .collect()
    }

    /// Run a plan produced by [`plan`](Self::plan).
    pub async fn run(&self, plan: ExecutionPlan) -> Result<ResultSet, QueryError> {
        // Resolve every adapter before the first call goes out.
        let adapters = plan
            .steps
            .iter()
            .map(|step| self.adapter(&step.store))
            .collect::<Result<Vec<_>, _>>()?;
        let timeout = Duration::from_millis(self.config.store_timeout_ms);

        let Some(merge_step) = plan.merge else {
            let mut steps = plan.steps;
            let (Some(step), Some(adapter)) = (steps.pop(), adapters.into_iter().next()) else {
                return Ok(ResultSet::default());
            };
            let entity = step.query.entity.clone();
            let raw = fetch(adapter, step.query, timeout).await?;
            let (rows, dropped) = normalize(&step.columns, raw);

            let names = step.columns.iter().map(|c| c.name.clone()).collect();
            let mut result = ResultSet::new(names, rows);
            self.record_dropped(&mut result, &entity, dropped);
            return Ok(result);
        };

        let fetched = fetch_all(&plan.steps, adapters, timeout).await?;
        self.merge(&plan.steps, fetched, merge_step)
    }

    fn record_dropped(&self, result: &mut ResultSet, entity: &str, dropped: usize) {
        if dropped == 0 {
            return;
        }
        warn!(entity, dropped, "Dropped rows that failed type coercion");
        get_metrics().rows_dropped_total.inc_by(dropped as u64);
        result.add_dropped(dropped);
    }

    fn merge(
        &self,
        steps: &[SubQuery],
        fetched: Vec<Vec<RawRow>>,
        merge_step: MergeStep,
    ) -> Result<ResultSet, QueryError> {
        let mut result = ResultSet::default();
        let mut normalized = Vec::with_capacity(steps.len());

        for (step, raw) in steps.iter().zip(fetched) {
            if raw.len() >= self.config.max_fetch_rows {
                result.warnings.push(QueryWarning::FetchCapReached {
                    entity: step.query.entity.clone(),
                    cap: self.config.max_fetch_rows,
                });
            }
            let (rows, dropped) = normalize(&step.columns, raw);
            self.record_dropped(&mut result, &step.query.entity, dropped);
            normalized.push(rows);
        }

        let key_index = |step: &SubQuery| {
            step.columns
                .iter()
                .position(|c| c.name == merge_step.join_key)
                .ok_or_else(|| invalid(&step.query.entity, &merge_step.join_key, "missing join key"))
        };

        let mut normalized = normalized.into_iter();
        let mut rows = normalized.next().unwrap_or_default();
        if steps.len() > 1 {
            let left_key = key_index(&steps[0])?;
            for (step, right) in steps.iter().skip(1).zip(normalized) {
                let right_key = key_index(step)?;
                rows = merge::hash_join(rows, &right, left_key, right_key);
            }
            debug!(rows = rows.len(), "Joined sub-query results on {}", merge_step.join_key);
        }

        let position = |name: &str| merge_step.columns.iter().position(|c| c == name);
        match &merge_step.aggregation {
            Some(spec) => {
                let value = spec.field.as_deref().and_then(position);
                let group = spec.group_by.as_deref().and_then(position);
                result.rows = merge::aggregate(&rows, spec.function, value, group);
                result.columns = spec.group_by.iter().cloned().collect();
                result.columns.push(spec.output_column());
            }
            None => {
                result.rows = rows;
                result.columns = merge_step.columns.clone();
            }
        }
        result.rows.truncate(merge_step.limit);
        Ok(result)
    }
}

/// One adapter call bounded by `timeout`.
async fn fetch(
    adapter: Arc<dyn StoreAdapter>,
    query: StoreQuery,
    timeout: Duration,
) -> Result<Vec<RawRow>, QueryError> {
    let store = adapter.name().to_string();
    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, adapter.query(query)).await;
    get_metrics().record_store_request(&store, started.elapsed(), matches!(outcome, Ok(Ok(_))));

    match outcome {
        Ok(Ok(rows)) => {
            debug!(store = %store, rows = rows.len(), "Sub-query completed");
            Ok(rows)
        }
        Ok(Err(e)) => {
            warn!(store = %store, "Sub-query failed: {}", e);
            Err(QueryError::StoreUnavailable {
                store,
                reason: e.to_string(),
            })
        }
        Err(_) => {
            warn!(store = %store, "Sub-query timed out after {:?}", timeout);
            Err(QueryError::StoreUnavailable {
                store,
                reason: format!("no response within {}ms", timeout.as_millis()),
            })
        }
    }
}

/// Run every sub-query concurrently. The first failure is returned at once;
/// calls still in flight keep running detached and their results are
/// discarded.
async fn fetch_all(
    steps: &[SubQuery],
    adapters: Vec<Arc<dyn StoreAdapter>>,
    timeout: Duration,
) -> Result<Vec<Vec<RawRow>>, QueryError> {
    let mut pending: FuturesUnordered<_> = steps
        .iter()
        .zip(adapters)
        .enumerate()
        .map(|(i, (step, adapter))| {
            let handle = tokio::spawn(fetch(adapter, step.query.clone(), timeout));
            async move { (i, handle.await) }
        })
        .collect();

    let mut fetched: Vec<Option<Vec<RawRow>>> = (0..steps.len()).map(|_| None).collect();
    while let Some((i, joined)) = pending.next().await {
        match joined {
            Ok(Ok(rows)) => fetched[i] = Some(rows),
            Ok(Err(e)) => return Err(e),
            Err(e) => {
                return Err(QueryError::StoreUnavailable {
                    store: steps[i].store.clone(),
                    reason: format!("sub-query task failed: {}", e),
                })
            }
        }
    }

    Ok(fetched.into_iter().map(Option::unwrap_or_default).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{MONGODB, POSTGRES};
    use crate::query::{FilterValue, Operation, Scalar};
    use crate::storage::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn rows(values: Vec<serde_json::Value>) -> Vec<RawRow> {
        values
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect()
    }

    fn dispatcher() -> Dispatcher {
        let postgres = MemoryStore::new(POSTGRES)
            .with_rows(
                "region_info",
                rows(vec![
                    json!({"region_id": 1, "region_name": "Amazon Basin", "latitude": -3.4, "longitude": -62.2}),
                    json!({"region_id": 2, "region_name": "Sahara", "latitude": 23.4, "longitude": 12.0}),
                ]),
            )
            .with_rows(
                "climate_with_region",
                rows(vec![
                    json!({"climate_id": 1, "region_id": 1, "region_name": "Amazon Basin", "temperature": 27.0}),
                    json!({"climate_id": 2, "region_id": 1, "region_name": "Amazon Basin", "temperature": "29"}),
                    json!({"climate_id": 3, "region_id": 2, "region_name": "Sahara", "temperature": 41.0}),
                ]),
            );
        let mongodb = MemoryStore::new(MONGODB).with_rows(
            "Air_Quality_History",
            rows(vec![
                json!({"air_quality_id": 1, "region_id": 1, "region_name": "Amazon Basin", "aqi": "45"}),
                json!({"air_quality_id": 2, "region_id": 2, "region_name": "Sahara", "aqi": "not-a-number"}),
                json!({"air_quality_id": 3, "region_id": 2, "region_name": "Sahara", "aqi": 160}),
            ]),
        );

        let registry = AdapterRegistry::new()
            .with(Arc::new(postgres))
            .with(Arc::new(mongodb));
        Dispatcher::new(
            Arc::new(SchemaCatalog::builtin()),
            Arc::new(registry),
            DispatcherConfig::default(),
        )
    }

    fn intent(entity: &str) -> QueryIntent {
        QueryIntent {
            entity: entity.into(),
            joined: vec![],
            operation: Operation::Lookup,
            filters: vec![],
            aggregation: None,
            limit: None,
            confidence: 1.0,
        }
    }

    #[test]
    fn test_validate_rejects_unknown_and_unfilterable_fields() {
        let dispatcher = dispatcher();

        let mut unknown = intent("Climate");
        unknown.filters.push(FilterPredicate::new(
            "colour",
            FilterOp::Equals,
            FilterValue::Text("red".into()),
        ));
        assert!(matches!(
            dispatcher.validate(&unknown),
            Err(QueryError::InvalidField { field, .. }) if field == "colour"
        ));

        let mut unfilterable = intent("Biodiversity");
        unfilterable.filters.push(FilterPredicate::new(
            "biodiversity_id",
            FilterOp::Equals,
            FilterValue::Text("x".into()),
        ));
        assert!(matches!(
            dispatcher.validate(&unfilterable),
            Err(QueryError::InvalidField { reason, .. }) if reason.contains("not filterable")
        ));
    }

    #[test]
    fn test_validate_aggregation_rules() {
        let dispatcher = dispatcher();

        let mut text_average = intent("Climate");
        text_average.aggregation = Some(AggregationSpec {
            function: AggregateFunction::Average,
            field: Some("region_name".into()),
            group_by: None,
        });
        assert!(dispatcher.validate(&text_average).is_err());

        let mut count_text = intent("Climate");
        count_text.aggregation = Some(AggregationSpec {
            function: AggregateFunction::Count,
            field: Some("region_name".into()),
            group_by: None,
        });
        assert!(dispatcher.validate(&count_text).is_ok());

        let mut sum_nothing = intent("Climate");
        sum_nothing.aggregation = Some(AggregationSpec {
            function: AggregateFunction::Sum,
            field: None,
            group_by: None,
        });
        assert!(dispatcher.validate(&sum_nothing).is_err());
    }

    #[test]
    fn test_validate_operator_types() {
        let dispatcher = dispatcher();
        let mut contains_number = intent("Climate");
        contains_number.filters.push(FilterPredicate::new(
            "temperature",
            FilterOp::Contains,
            FilterValue::Number(3.0),
        ));
        assert!(dispatcher.validate(&contains_number).is_err());

        let mut word_for_number = intent("Climate");
        word_for_number.filters.push(FilterPredicate::new(
            "temperature",
            FilterOp::Equals,
            FilterValue::Text("hot".into()),
        ));
        assert!(dispatcher.validate(&word_for_number).is_err());
    }

    #[test]
    fn test_validate_timestamp_filters() {
        let dispatcher = dispatcher();
        let with_filter = |value: FilterValue| {
            let mut intent = intent("Climate");
            intent
                .filters
                .push(FilterPredicate::new("timestamp", FilterOp::GreaterThan, value));
            intent
        };

        assert!(dispatcher
            .validate(&with_filter(FilterValue::Text("2024-03-01".into())))
            .is_ok());
        assert!(dispatcher
            .validate(&with_filter(FilterValue::Text("2024-03-01T08:30:00Z".into())))
            .is_ok());
        assert!(matches!(
            dispatcher.validate(&with_filter(FilterValue::Number(2024.0))),
            Err(QueryError::InvalidField { .. })
        ));
        assert!(matches!(
            dispatcher.validate(&with_filter(FilterValue::Text("last spring".into()))),
            Err(QueryError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_validate_joins_need_shared_key() {
        let dispatcher = dispatcher();
        let mut no_key = intent("Climate");
        no_key.joined = vec!["Species".into()];
        assert!(matches!(
            dispatcher.validate(&no_key),
            Err(QueryError::InvalidField { entity, .. }) if entity == "Species"
        ));
    }

    #[test]
    fn test_limits() {
        let dispatcher = dispatcher();
        assert_eq!(dispatcher.limit(None), 20);
        assert_eq!(dispatcher.limit(Some(5)), 5);
        assert_eq!(dispatcher.limit(Some(100_000)), 500);
        assert_eq!(dispatcher.limit(Some(0)), 1);
    }

    #[test]
    fn test_single_store_aggregate_plan() {
        let dispatcher = dispatcher();
        let mut avg = intent("Climate");
        avg.operation = Operation::Aggregate;
        avg.aggregation = Some(AggregationSpec {
            function: AggregateFunction::Average,
            field: Some("temperature".into()),
            group_by: Some("region_name".into()),
        });

        let plan = dispatcher.plan(&avg).unwrap();
        assert!(!plan.is_federated());
        assert_eq!(plan.stores(), vec!["postgres"]);
        assert_eq!(plan.steps[0].query.aggregation, None);
        assert_eq!(plan.steps[0].query.limit, 10_000);

        let merge = plan.merge.unwrap();
        assert_eq!(merge.limit, 20);
        assert_eq!(merge.aggregation.unwrap().output_column(), "average_temperature");
    }

    #[test]
    fn test_pushdown_aggregate_plan() {
        let dispatcher = Dispatcher::new(
            Arc::new(SchemaCatalog::builtin()),
            Arc::new(AdapterRegistry::new()),
            DispatcherConfig {
                pushdown_aggregates: true,
                ..DispatcherConfig::default()
            },
        );
        let mut avg = intent("Climate");
        avg.aggregation = Some(AggregationSpec {
            function: AggregateFunction::Average,
            field: Some("temperature".into()),
            group_by: Some("region_name".into()),
        });

        let plan = dispatcher.plan(&avg).unwrap();
        assert!(plan.merge.is_none());
        assert!(plan.steps[0].query.aggregation.is_some());
        let names: Vec<&str> = plan.steps[0].columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["region_name", "average_temperature"]);
        assert_eq!(plan.steps[0].query.limit, 20);
    }

    #[test]
    fn test_federated_plan_pushes_filters_to_owners() {
        let dispatcher = dispatcher();
        let mut joined = intent("Region");
        joined.joined = vec!["AirQuality".into()];
        joined.filters.push(FilterPredicate::new(
            "AirQuality.aqi",
            FilterOp::GreaterThan,
            FilterValue::Number(100.0),
        ));

        let plan = dispatcher.plan(&joined).unwrap();
        assert!(plan.is_federated());
        assert_eq!(plan.stores(), vec!["mongodb", "postgres"]);
        assert!(plan.steps[0].query.filters.is_empty());
        assert_eq!(plan.steps[1].query.filters[0].field, "aqi");
        assert_eq!(plan.steps[1].query.limit, 10_000);

        let merge = plan.merge.unwrap();
        assert_eq!(merge.join_key, "region_id");
        assert!(merge.columns.contains(&"AirQuality.aqi".to_string()));
        assert!(!merge.columns.contains(&"AirQuality.region_id".to_string()));
    }

    #[tokio::test]
    async fn test_execute_single_store_aggregate() {
        let dispatcher = dispatcher();
        let mut avg = intent("Climate");
        avg.filters.push(FilterPredicate::new(
            "region_name",
            FilterOp::Equals,
            FilterValue::Text("Amazon Basin".into()),
        ));
        avg.aggregation = Some(AggregationSpec {
            function: AggregateFunction::Average,
            field: Some("temperature".into()),
            group_by: None,
        });

        let result = dispatcher.execute(&avg).await.unwrap();
        assert_eq!(result.columns, vec!["average_temperature"]);
        assert_eq!(result.get(0, "average_temperature").and_then(|v| v.as_f64()), Some(28.0));
        assert!(!result.partial());
    }

    #[tokio::test]
    async fn test_execute_drops_uncoercible_rows() {
        let dispatcher = dispatcher();
        let result = dispatcher.execute(&intent("AirQuality")).await.unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result.dropped_rows, 1);
        assert!(result.partial());
        assert_eq!(result.get(0, "aqi").and_then(|v| v.as_f64()), Some(45.0));
        assert_eq!(result.warnings, vec![QueryWarning::CoercionDropped { count: 1 }]);
    }

    #[tokio::test]
    async fn test_execute_cross_store_join_and_aggregate() {
        let dispatcher = dispatcher();
        let mut joined = intent("Region");
        joined.joined = vec!["AirQuality".into()];
        joined.aggregation = Some(AggregationSpec {
            function: AggregateFunction::Max,
            field: Some("AirQuality.aqi".into()),
            group_by: Some("region_name".into()),
        });

        let result = dispatcher.execute(&joined).await.unwrap();
        assert_eq!(result.columns, vec!["region_name", "max_aqi"]);
        assert_eq!(result.len(), 2);
        assert_eq!(result.get(0, "region_name").and_then(|v| v.as_text()), Some("Amazon Basin"));
        assert_eq!(result.get(0, "max_aqi").and_then(|v| v.as_f64()), Some(45.0));
        assert_eq!(result.get(1, "max_aqi").and_then(|v| v.as_f64()), Some(160.0));
        assert_eq!(result.dropped_rows, 1);
    }

    #[tokio::test]
    async fn test_aggregates_count_uncoercible_rows() {
        let dispatcher = dispatcher();

        let mut avg = intent("AirQuality");
        avg.aggregation = Some(AggregationSpec {
            function: AggregateFunction::Average,
            field: Some("aqi".into()),
            group_by: None,
        });
        let result = dispatcher.execute(&avg).await.unwrap();
        assert_eq!(result.get(0, "average_aqi").and_then(|v| v.as_f64()), Some(102.5));
        assert_eq!(result.dropped_rows, 1);
        assert!(result.partial());

        let mut count = intent("AirQuality");
        count.aggregation = Some(AggregationSpec {
            function: AggregateFunction::Count,
            field: None,
            group_by: None,
        });
        let result = dispatcher.execute(&count).await.unwrap();
        assert_eq!(result.get(0, "count"), Some(&Scalar::Integer(2)));
        assert!(result.partial());
    }

    #[tokio::test]
    async fn test_single_store_lookup_records_drops() {
        let dispatcher = dispatcher();
        let mut filtered = intent("AirQuality");
        filtered.filters.push(FilterPredicate::new(
            "region_name",
            FilterOp::Equals,
            FilterValue::Text("Sahara".into()),
        ));

        let result = dispatcher.execute(&filtered).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.dropped_rows, 1);
    }

    #[tokio::test]
    async fn test_missing_adapter_is_unavailable() {
        let dispatcher = dispatcher();
        let result = dispatcher.execute(&intent("SensorReading")).await;
        assert!(matches!(
            result,
            Err(QueryError::StoreUnavailable { store, .. }) if store == "drill"
        ));
    }
}
