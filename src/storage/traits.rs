//! Store adapter trait definitions.

use async_trait::async_trait;
use serde::Serialize;

use crate::catalog::FieldSchema;
use crate::error::StorageError;
use crate::query::{AggregationSpec, FilterPredicate};

/// A raw row as returned by a store: field name to loosely typed value.
pub type RawRow = serde_json::Map<String, serde_json::Value>;

/// A sub-query addressed to one store.
///
/// Field names in `filters` and `aggregation` are unqualified and belong to
/// `entity`. Adapters translate this value into their native language.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreQuery {
    /// Catalog entity name
    pub entity: String,
    /// Native table, collection or file
    pub source: String,
    /// Projected fields in catalog order
    pub fields: Vec<FieldSchema>,
    pub filters: Vec<FilterPredicate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregationSpec>,
    /// Maximum rows to return
    pub limit: usize,
}

impl StoreQuery {
    /// Look up a projected field by name.
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Uniform interface to a backing store.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Store identifier, as referenced by the catalog.
    fn name(&self) -> &str;

    /// Execute a sub-query and return raw rows.
    async fn query(&self, query: StoreQuery) -> Result<Vec<RawRow>, StorageError>;

    /// Native query text the store would run for `query`, if it has a
    /// query language.
    fn native_query(&self, _query: &StoreQuery) -> Option<String> {
        None
    }

    /// Connectivity check. Must return within the adapter's own timeout.
    async fn ping(&self) -> bool;
}
