//! Execution plans.
//!
//! A plan is the dispatcher's private, request-scoped decomposition of an
//! intent: one sub-query per store call, plus an in-process merge step when
//! more than one entity is involved or an aggregate is computed locally.

use std::collections::BTreeSet;

use serde::Serialize;

use super::result::ColumnSpec;
use super::types::{AggregationSpec, QueryIntent};
use crate::storage::StoreQuery;

/// One adapter call.
#[derive(Debug, Clone, PartialEq)]
pub struct SubQuery {
    /// Store identifier used to pick the adapter
    pub store: String,
    pub query: StoreQuery,
    /// How to normalize the rows this call returns
    pub columns: Vec<ColumnSpec>,
}

/// Native query text for one sub-query, as returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedQuery {
    pub store: String,
    pub entity: String,
    pub query: String,
}

/// In-process join and aggregation over normalized sub-query rows.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeStep {
    pub join_key: String,
    /// Column names after the join: target fields, then `Entity.field` for
    /// every joined field except the key
    pub columns: Vec<String>,
    /// Aggregation with field names rewritten to joined column names
    pub aggregation: Option<AggregationSpec>,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    /// Target entity's sub-query first, then joined entities in intent order
    pub steps: Vec<SubQuery>,
    pub merge: Option<MergeStep>,
    pub description: String,
}

impl ExecutionPlan {
    /// Distinct stores touched, sorted.
    pub fn stores(&self) -> Vec<&str> {
        self.steps
            .iter()
            .map(|s| s.store.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// More than one sub-query, joined in process.
    pub fn is_federated(&self) -> bool {
        self.steps.len() > 1
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Human-readable reading of an intent, returned alongside every answer.
pub fn describe(intent: &QueryIntent, stores: &[&str]) -> String {
    let mut text = String::new();

    if !intent.joined.is_empty() {
        text.push_str(&format!("Federated query across {}: ", stores.join(", ")));
    }

    match &intent.aggregation {
        Some(spec) => match &spec.field {
            Some(field) => text.push_str(&format!("{} {}", capitalize(spec.function.as_str()), field)),
            None => text.push_str(&format!("{} of records", capitalize(spec.function.as_str()))),
        },
        None => text.push_str("Records"),
    }

    text.push_str(&format!(" from {}", intent.entity));
    if !intent.joined.is_empty() {
        text.push_str(&format!(" joined with {}", intent.joined.join(", ")));
    }

    if !intent.filters.is_empty() {
        let conditions: Vec<String> = intent
            .filters
            .iter()
            .map(|f| format!("{} {} {}", f.field, f.op.phrase(), f.value))
            .collect();
        text.push_str(" where ");
        text.push_str(&conditions.join(" and "));
    }

    if let Some(group) = intent.aggregation.as_ref().and_then(|a| a.group_by.as_ref()) {
        text.push_str(&format!(" grouped by {}", group));
    }

    text
}
