//! Types for the natural language query pipeline.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::catalog::SchemaCatalog;

// ============================================================================
// Roles
// ============================================================================

/// Dashboard roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Researcher,
    DataProvider,
    Administrator,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Researcher, Role::DataProvider, Role::Administrator];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Researcher => "researcher",
            Self::DataProvider => "data_provider",
            Self::Administrator => "administrator",
        }
    }

    /// Parse a role name. Accepts the dashboard spelling ("Data Provider")
    /// as well as snake_case and a few short forms.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        let normalized: String = s
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .collect();
        match normalized.as_str() {
            "researcher" => Some(Self::Researcher),
            "dataprovider" | "provider" => Some(Self::DataProvider),
            "administrator" | "admin" => Some(Self::Administrator),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller identity as seen by the query pipeline. Read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleContext {
    pub role: Role,
    /// Canonical names of the entities this role may query
    pub permitted_entities: BTreeSet<String>,
}

impl RoleContext {
    pub fn new<I, S>(role: Role, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            role,
            permitted_entities: entities.into_iter().map(Into::into).collect(),
        }
    }

    /// Default permissions for a role: every entity whose role list
    /// includes it.
    pub fn for_role(role: Role, catalog: &SchemaCatalog) -> Self {
        Self::new(
            role,
            catalog
                .entities()
                .iter()
                .filter(|e| e.allows(role))
                .map(|e| e.name.clone()),
        )
    }

    pub fn permits(&self, entity: &str) -> bool {
        self.permitted_entities.contains(entity)
    }
}

// ============================================================================
// Query Intent
// ============================================================================

/// Kind of answer requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Plain listing
    Lookup,
    /// Listing restricted by predicates
    Filter,
    /// Aggregate, optionally grouped
    Aggregate,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lookup => "lookup",
            Self::Filter => "filter",
            Self::Aggregate => "aggregate",
        }
    }
}

/// Comparison operators understood by the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    GreaterThan,
    LessThan,
    Equals,
    Contains,
    Between,
}

impl FilterOp {
    /// Phrase used in plan descriptions.
    pub fn phrase(&self) -> &'static str {
        match self {
            Self::GreaterThan => "greater than",
            Self::LessThan => "less than",
            Self::Equals => "equals",
            Self::Contains => "contains",
            Self::Between => "between",
        }
    }
}

/// Right-hand side of a predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Number(f64),
    Text(String),
    Range { low: f64, high: f64 },
}

impl FilterValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Range { .. } => None,
        }
    }
}

impl std::fmt::Display for FilterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => write!(f, "'{}'", s),
            Self::Range { low, high } => write!(f, "{} and {}", low, high),
        }
    }
}

/// A single `field op value` condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterPredicate {
    /// Field name; qualified as `Entity.field` when owned by a joined entity
    pub field: String,
    pub op: FilterOp,
    pub value: FilterValue,
}

impl FilterPredicate {
    pub fn new(field: impl Into<String>, op: FilterOp, value: FilterValue) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }
}

/// Aggregation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    Count,
    Average,
    Sum,
    Max,
    Min,
}

impl AggregateFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Average => "average",
            Self::Sum => "sum",
            Self::Max => "max",
            Self::Min => "min",
        }
    }

    /// SQL function name.
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Average => "AVG",
            Self::Sum => "SUM",
            Self::Max => "MAX",
            Self::Min => "MIN",
        }
    }
}

/// Optional aggregation attached to an intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationSpec {
    pub function: AggregateFunction,
    /// Argument field; `None` means `count(*)`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,
}

impl AggregationSpec {
    /// Output column name: `count` or `<function>_<field>`.
    pub fn output_column(&self) -> String {
        match (&self.function, &self.field) {
            (AggregateFunction::Count, None) => "count".to_string(),
            (function, Some(field)) => {
                let (_, name) = split_field(field);
                format!("{}_{}", function.as_str(), name)
            }
            (function, None) => function.as_str().to_string(),
        }
    }
}

/// Structured reading of a natural-language question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryIntent {
    /// Target entity
    pub entity: String,
    /// Other entities merged in on the shared join key
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub joined: Vec<String>,
    pub operation: Operation,
    #[serde(default)]
    pub filters: Vec<FilterPredicate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregationSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Interpreter's confidence in [0, 1]
    pub confidence: f32,
}

impl QueryIntent {
    /// Target entity followed by joined entities.
    pub fn entities(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.entity.as_str()).chain(self.joined.iter().map(String::as_str))
    }
}

/// Split `Entity.field` into its parts. Unqualified names have no entity.
pub fn split_field(name: &str) -> (Option<&str>, &str) {
    match name.split_once('.') {
        Some((entity, field)) if !entity.is_empty() && !field.is_empty() => (Some(entity), field),
        _ => (None, name),
    }
}
