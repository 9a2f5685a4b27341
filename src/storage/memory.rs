//! In-process store.
//!
//! Rows live in memory keyed by source name and are queried with the same
//! predicate and aggregation code the dispatcher uses for cross-store
//! merges.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use super::traits::{RawRow, StoreAdapter, StoreQuery};
use crate::catalog::FieldSchema;
use crate::error::StorageError;
use crate::query::merge;
use crate::query::result::{coerce, Scalar};

/// A store backed by rows held in process.
pub struct MemoryStore {
    name: String,
    tables: RwLock<HashMap<String, Vec<RawRow>>>,
    requests: AtomicUsize,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: RwLock::new(HashMap::new()),
            requests: AtomicUsize::new(0),
        }
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with_rows(self, source: impl Into<String>, rows: Vec<RawRow>) -> Self {
        self.insert(source, rows);
        self
    }

    /// Append rows to a source, creating it if needed.
    pub fn insert(&self, source: impl Into<String>, rows: Vec<RawRow>) {
        self.tables.write().entry(source.into()).or_default().extend(rows);
    }

    /// Seed from a JSON file shaped `{"source": [{...}, ...]}`.
    pub fn from_file(name: impl Into<String>, path: &Path) -> Result<Self, StorageError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(name, &content)
    }

    pub fn from_json(name: impl Into<String>, content: &str) -> Result<Self, StorageError> {
        let tables: HashMap<String, Vec<RawRow>> = serde_json::from_str(content)
            .map_err(|e| StorageError::Protocol(format!("Invalid seed data: {}", e)))?;
        let store = Self::new(name);
        *store.tables.write() = tables;
        Ok(store)
    }

    /// Number of queries served so far.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn sources(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }
}

fn raw_value<'a>(row: &'a RawRow, field: &FieldSchema) -> Option<&'a Value> {
    row.get(field.column_name()).or_else(|| row.get(&field.name))
}

fn typed(row: &RawRow, field: &FieldSchema) -> Option<Scalar> {
    match raw_value(row, field) {
        None => Some(Scalar::Null),
        Some(v) => coerce(v, field.ty),
    }
}

fn to_json(value: &Scalar) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[async_trait]
impl StoreAdapter for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, query: StoreQuery) -> Result<Vec<RawRow>, StorageError> {
        self.requests.fetch_add(1, Ordering::Relaxed);

        let tables = self.tables.read();
        let rows = tables
            .get(&query.source)
            .ok_or_else(|| StorageError::UnknownSource(query.source.clone()))?;

        let predicates: Vec<(&FieldSchema, _)> = query
            .filters
            .iter()
            .map(|f| {
                query
                    .field(&f.field)
                    .map(|field| (field, f))
                    .ok_or_else(|| StorageError::Query(format!("Unknown field: {}", f.field)))
            })
            .collect::<Result<_, _>>()?;

        let selected = rows.iter().filter(|row| {
            predicates.iter().all(|(field, filter)| {
                typed(row, field).is_some_and(|v| merge::matches(&v, filter.op, &filter.value))
            })
        });

        let Some(spec) = &query.aggregation else {
            return Ok(selected.take(query.limit).cloned().collect());
        };

        // Aggregation reads typed values; uncoercible cells count as missing.
        let group = spec.group_by.as_deref().and_then(|g| query.field(g));
        let value = spec.field.as_deref().and_then(|f| query.field(f));
        let typed_rows: Vec<Vec<Scalar>> = selected
            .map(|row| {
                [group, value]
                    .into_iter()
                    .flatten()
                    .map(|field| typed(row, field).unwrap_or(Scalar::Null))
                    .collect()
            })
            .collect();

        let (group_idx, value_idx) = match (group, value) {
            (Some(_), Some(_)) => (Some(0), Some(1)),
            (Some(_), None) => (Some(0), None),
            (None, Some(_)) => (None, Some(0)),
            (None, None) => (None, None),
        };

        let output = spec.output_column();
        let result = merge::aggregate(&typed_rows, spec.function, value_idx, group_idx)
            .into_iter()
            .take(query.limit)
            .map(|cells| {
                let mut row = RawRow::new();
                let mut cells = cells.iter();
                if let Some(field) = group {
                    if let Some(key) = cells.next() {
                        row.insert(field.name.clone(), to_json(key));
                    }
                }
                if let Some(v) = cells.next() {
                    row.insert(output.clone(), to_json(v));
                }
                row
            })
            .collect();

        Ok(result)
    }

    async fn ping(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SchemaCatalog;
    use crate::query::{AggregateFunction, AggregationSpec, FilterOp, FilterPredicate, FilterValue};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn row(value: Value) -> RawRow {
        value.as_object().cloned().unwrap()
    }

    fn climate_store() -> MemoryStore {
        MemoryStore::new("postgres").with_rows(
            "climate_with_region",
            vec![
                row(json!({"climate_id": 1, "region_id": 1, "region_name": "Amazon Basin", "temperature": 27.0})),
                row(json!({"climate_id": 2, "region_id": 1, "region_name": "Amazon Basin", "temperature": 29.0})),
                row(json!({"climate_id": 3, "region_id": 2, "region_name": "Sahara", "temperature": "41.5"})),
                row(json!({"climate_id": 4, "region_id": 2, "region_name": "Sahara", "temperature": "n/a"})),
            ],
        )
    }

    fn climate_query() -> StoreQuery {
        let catalog = SchemaCatalog::builtin();
        let schema = catalog.entity("Climate").unwrap();
        StoreQuery {
            entity: schema.name.clone(),
            source: schema.source.clone(),
            fields: schema.fields.clone(),
            filters: vec![],
            aggregation: None,
            limit: 20,
        }
    }

    #[tokio::test]
    async fn test_filter_lookup() {
        let store = climate_store();
        let mut query = climate_query();
        query.filters.push(FilterPredicate::new(
            "region_name",
            FilterOp::Equals,
            FilterValue::Text("amazon basin".into()),
        ));

        let rows = store.query(query).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(store.request_count(), 1);
    }

    #[tokio::test]
    async fn test_lookup_returns_raw_rows() {
        let store = climate_store();
        let rows = store.query(climate_query()).await.unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[3]["temperature"], json!("n/a"));
    }

    #[tokio::test]
    async fn test_grouped_average() {
        let store = climate_store();
        let mut query = climate_query();
        query.aggregation = Some(AggregationSpec {
            function: AggregateFunction::Average,
            field: Some("temperature".into()),
            group_by: Some("region_name".into()),
        });

        let rows = store.query(query).await.unwrap();
        assert_eq!(
            rows,
            vec![
                row(json!({"region_name": "Amazon Basin", "average_temperature": 28.0})),
                row(json!({"region_name": "Sahara", "average_temperature": 41.5})),
            ]
        );
    }

    #[tokio::test]
    async fn test_count_all() {
        let store = climate_store();
        let mut query = climate_query();
        query.aggregation = Some(AggregationSpec {
            function: AggregateFunction::Count,
            field: None,
            group_by: None,
        });

        let rows = store.query(query).await.unwrap();
        assert_eq!(rows, vec![row(json!({"count": 4}))]);
    }

    #[tokio::test]
    async fn test_unknown_source() {
        let store = MemoryStore::new("postgres");
        let err = store.query(climate_query()).await.unwrap_err();
        assert!(matches!(err, StorageError::UnknownSource(s) if s == "climate_with_region"));
    }

    #[test]
    fn test_from_json() {
        let store = MemoryStore::from_json("mongodb", r#"{"Sensor_Logs": [{"log_id": 1}], "Species_Details": []}"#)
            .unwrap();
        assert_eq!(store.sources(), vec!["Sensor_Logs", "Species_Details"]);
        assert!(MemoryStore::from_json("mongodb", "[1, 2]").is_err());
    }
}
