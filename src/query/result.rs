//! Uniform tabular results and row normalization.
//!
//! Every adapter returns loosely typed JSON rows. Normalization turns them
//! into [`Scalar`] values of the catalog's declared type, in catalog column
//! order. Rows that cannot be coerced are dropped and counted.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::catalog::SemanticType;
use crate::storage::RawRow;

// ============================================================================
// Scalars
// ============================================================================

/// A single normalized cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
    List(Vec<Scalar>),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view used by aggregation and comparisons.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Convert an untyped JSON value, inferring the variant.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Boolean(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => n.as_f64().map_or(Self::Null, Self::Number),
            },
            Value::String(s) => Self::Text(s.clone()),
            Value::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            Value::Object(_) => object_id(value)
                .map(|s| Self::Text(s.to_string()))
                .unwrap_or_else(|| Self::Text(value.to_string())),
        }
    }

    /// Canonical key for hashing during joins and grouping. Null has no key.
    pub fn join_key(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Boolean(b) => Some(format!("b:{}", b)),
            Self::Integer(i) => Some(format!("n:{}", *i as f64)),
            Self::Number(n) => Some(format!("n:{}", n)),
            Self::Timestamp(t) => Some(format!("t:{}", t.timestamp_millis())),
            Self::Text(s) => Some(format!("s:{}", s)),
            Self::List(items) => Some(format!(
                "l:[{}]",
                items
                    .iter()
                    .map(|i| i.join_key().unwrap_or_default())
                    .collect::<Vec<_>>()
                    .join(",")
            )),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Boolean(_) => 1,
            Self::Integer(_) | Self::Number(_) => 2,
            Self::Timestamp(_) => 3,
            Self::Text(_) => 4,
            Self::List(_) => 5,
        }
    }

    /// Total order: null first, then booleans, numbers, timestamps, text, lists.
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (a, b) if a.rank() == 2 && b.rank() == 2 => {
                let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                a.total_cmp(&b)
            }
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::List(a), Self::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.total_cmp(y) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                }
                a.len().cmp(&b.len())
            }
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str(""),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Number(n) => write!(f, "{}", n),
            Self::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Self::Text(s) => f.write_str(s),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

// ============================================================================
// Coercion
// ============================================================================

/// Mongo extended-JSON identifiers (`{"$oid": "..."}`).
fn object_id(value: &Value) -> Option<&str> {
    value.get("$oid").and_then(Value::as_str)
}

/// Coerce a raw value to the declared type. `None` means the value cannot
/// represent that type; absent and blank values become `Null`.
pub fn coerce(value: &Value, ty: SemanticType) -> Option<Scalar> {
    if value.is_null() {
        return Some(Scalar::Null);
    }
    if ty != SemanticType::Text {
        if let Value::String(s) = value {
            if s.trim().is_empty() {
                return Some(Scalar::Null);
            }
        }
    }

    match ty {
        SemanticType::Integer => coerce_integer(value).map(Scalar::Integer),
        SemanticType::Number => coerce_number(value).map(Scalar::Number),
        SemanticType::Text => coerce_text(value).map(Scalar::Text),
        SemanticType::Boolean => coerce_boolean(value).map(Scalar::Boolean),
        SemanticType::Timestamp => coerce_timestamp(value).map(Scalar::Timestamp),
        SemanticType::List => coerce_list(value).map(Scalar::List),
    }
}

fn coerce_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Object(_) => ["$numberDouble", "$numberInt", "$numberLong", "$numberDecimal"]
            .iter()
            .find_map(|k| value.get(*k))
            .and_then(coerce_number),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn coerce_integer(value: &Value) -> Option<i64> {
    if let Value::Number(n) = value {
        if let Some(i) = n.as_i64() {
            return Some(i);
        }
    }
    if let Value::String(s) = value {
        if let Ok(i) = s.trim().parse::<i64>() {
            return Some(i);
        }
    }
    let n = coerce_number(value)?;
    (n.fract() == 0.0 && n.abs() < i64::MAX as f64).then_some(n as i64)
}

fn coerce_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(_) => object_id(value).map(str::to_string),
        _ => None,
    }
}

fn coerce_boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Some(true),
            "false" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD[ T]HH:MM:SS[.fff]`, plain dates, epoch
/// milliseconds and Mongo `{"$date": ...}` wrappers.
pub fn coerce_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::Object(_) => value.get("$date").and_then(|inner| match inner {
            Value::Object(_) => inner.get("$numberLong").and_then(|n| {
                coerce_integer(n).and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            }),
            other => coerce_timestamp(other),
        }),
        _ => None,
    }
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, format) {
            return Some(t.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}

fn coerce_list(value: &Value) -> Option<Vec<Scalar>> {
    match value {
        Value::Array(items) => Some(items.iter().map(Scalar::from_json).collect()),
        Value::String(s) if s.trim_start().starts_with('[') => {
            match serde_json::from_str::<Value>(s) {
                Ok(Value::Array(items)) => Some(items.iter().map(Scalar::from_json).collect()),
                _ => None,
            }
        }
        _ => None,
    }
}

// ============================================================================
// Normalization
// ============================================================================

/// An output column: the name it is reported under, the declared type, and
/// the keys to try in raw rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub ty: SemanticType,
    pub keys: Vec<String>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, ty: SemanticType) -> Self {
        let name = name.into();
        Self {
            keys: vec![name.clone()],
            name,
            ty,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !self.keys.contains(&key) {
            self.keys.insert(0, key);
        }
        self
    }

    fn lookup<'a>(&self, row: &'a RawRow) -> Option<&'a Value> {
        self.keys.iter().find_map(|k| row.get(k))
    }
}

/// Normalize raw rows to the declared columns. Returns the kept rows and
/// the number of dropped rows.
pub fn normalize(columns: &[ColumnSpec], raw: Vec<RawRow>) -> (Vec<Vec<Scalar>>, usize) {
    let mut rows = Vec::with_capacity(raw.len());
    let mut dropped = 0;

    'rows: for row in raw {
        let mut values = Vec::with_capacity(columns.len());
        for column in columns {
            let value = match column.lookup(&row) {
                None => Scalar::Null,
                Some(v) => match coerce(v, column.ty) {
                    Some(s) => s,
                    None => {
                        tracing::debug!(
                            column = %column.name,
                            value = %v,
                            "Dropping row that does not match declared type {}",
                            column.ty
                        );
                        dropped += 1;
                        continue 'rows;
                    }
                },
            };
            values.push(value);
        }
        rows.push(values);
    }

    (rows, dropped)
}

// ============================================================================
// Result Set
// ============================================================================

/// Non-fatal conditions attached to a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryWarning {
    /// Rows whose values could not be coerced were left out.
    CoercionDropped { count: usize },
    /// A sub-query fetched for in-process merging hit the row cap.
    FetchCapReached { entity: String, cap: usize },
}

impl std::fmt::Display for QueryWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CoercionDropped { count } => {
                write!(f, "{} row(s) dropped: values did not match the catalog type", count)
            }
            Self::FetchCapReached { entity, cap } => {
                write!(f, "{} returned the maximum of {} rows; the answer may be incomplete", entity, cap)
            }
        }
    }
}

/// Ordered rows of named columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Scalar>>,
    pub dropped_rows: usize,
    pub warnings: Vec<QueryWarning>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Scalar>>) -> Self {
        Self {
            columns,
            rows,
            dropped_rows: 0,
            warnings: Vec::new(),
        }
    }

    /// Record dropped rows. Any drop marks the result partial.
    pub fn add_dropped(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        self.dropped_rows += count;
        for warning in &mut self.warnings {
            if let QueryWarning::CoercionDropped { count: total } = warning {
                *total += count;
                return;
            }
        }
        self.warnings.push(QueryWarning::CoercionDropped { count });
    }

    pub fn partial(&self) -> bool {
        self.dropped_rows > 0
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell by row index and column name.
    pub fn get(&self, row: usize, column: &str) -> Option<&Scalar> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Rows as column-ordered JSON objects.
    pub fn records(&self) -> Records<'_> {
        Records(self)
    }
}

/// Serializes a result set as an array of objects, keys in column order.
pub struct Records<'a>(&'a ResultSet);

struct Record<'a> {
    columns: &'a [String],
    values: &'a [Scalar],
}

impl Serialize for Record<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, value) in self.columns.iter().zip(self.values.iter()) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

impl Serialize for Records<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.rows.len()))?;
        for values in &self.0.rows {
            seq.serialize_element(&Record {
                columns: &self.0.columns,
                values,
            })?;
        }
        seq.end()
    }
}
