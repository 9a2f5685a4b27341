//! Drill SQL generation from a [`StoreQuery`].

use crate::catalog::{FieldSchema, SemanticType};
use crate::query::result::parse_timestamp;
use crate::query::{AggregateFunction, FilterOp, FilterPredicate, FilterValue};

use super::traits::StoreQuery;

/// Backtick-quote an identifier.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Single-quote a string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Fully qualified source: `workspace.\`source\``.
pub fn table_ref(source: &str, workspace: Option<&str>) -> String {
    match workspace {
        Some(ws) if !ws.is_empty() => format!("{}.{}", ws, quote_ident(source)),
        _ => quote_ident(source),
    }
}

/// Decimal number, optionally signed, with an optional exponent.
const NUMERIC_PATTERN: &str = r"^[-+]?[0-9]*\.?[0-9]+([eE][-+]?[0-9]+)?$";

/// `YYYY-MM-DD`, optionally followed by a time of day.
const TIMESTAMP_PATTERN: &str =
    r"^[0-9]{4}-[0-9]{2}-[0-9]{2}([ T][0-9]{2}:[0-9]{2}(:[0-9]{2}(\.[0-9]+)?)?Z?)?$";

/// Projected column: the raw native value. Rows are coerced after the
/// fetch, so a malformed cell is dropped and counted instead of failing the
/// whole statement.
pub fn column_expr(field: &FieldSchema) -> String {
    quote_ident(field.column_name())
}

/// Column as its catalog type, for conditions, aggregate arguments and
/// grouping. Text-stored values that do not parse become `NULL` rather than
/// raising a cast error.
pub fn typed_expr(field: &FieldSchema) -> String {
    let ident = quote_ident(field.column_name());
    if !field.stored_as_text {
        return ident;
    }
    match field.ty {
        SemanticType::Integer | SemanticType::Number => format!(
            "CASE WHEN REGEXP_MATCHES(TRIM({ident}), {pattern}) THEN CAST(TRIM({ident}) AS DOUBLE) END",
            pattern = quote_literal(NUMERIC_PATTERN),
        ),
        SemanticType::Timestamp => format!(
            "CASE WHEN REGEXP_MATCHES(TRIM({ident}), {pattern}) \
             THEN CAST(REPLACE(REPLACE(TRIM({ident}), 'T', ' '), 'Z', '') AS TIMESTAMP) END",
            pattern = quote_literal(TIMESTAMP_PATTERN),
        ),
        _ => ident,
    }
}

fn text_value(value: &FilterValue) -> String {
    match value {
        FilterValue::Text(s) => s.trim().to_string(),
        FilterValue::Number(n) => number(*n),
        FilterValue::Range { low, high } => format!("{} {}", number(*low), number(*high)),
    }
}

fn timestamp_literal(value: &FilterValue) -> Option<String> {
    match value {
        FilterValue::Text(s) => parse_timestamp(s)
            .map(|t| format!("TIMESTAMP '{}'", t.format("%Y-%m-%d %H:%M:%S"))),
        _ => None,
    }
}

/// One `WHERE` condition.
pub fn condition(field: &FieldSchema, filter: &FilterPredicate) -> String {
    let expr = typed_expr(field);

    if field.ty == SemanticType::List {
        return format!(
            "REPEATED_CONTAINS({}, {})",
            expr,
            quote_literal(&text_value(&filter.value))
        );
    }

    let comparison = |symbol: &str| -> String {
        let rhs = match field.ty {
            SemanticType::Timestamp => timestamp_literal(&filter.value)
                .unwrap_or_else(|| quote_literal(&text_value(&filter.value))),
            SemanticType::Integer | SemanticType::Number => match filter.value.as_number() {
                Some(n) => number(n),
                None => quote_literal(&text_value(&filter.value)),
            },
            _ => quote_literal(&text_value(&filter.value)),
        };
        format!("{} {} {}", expr, symbol, rhs)
    };

    match filter.op {
        FilterOp::GreaterThan => comparison(">"),
        FilterOp::LessThan => comparison("<"),
        FilterOp::Between => match filter.value {
            FilterValue::Range { low, high } => {
                format!("{} BETWEEN {} AND {}", expr, number(low), number(high))
            }
            _ => comparison("="),
        },
        FilterOp::Equals => match field.ty {
            SemanticType::Text => format!(
                "LOWER({}) = {}",
                expr,
                quote_literal(&text_value(&filter.value).to_lowercase())
            ),
            SemanticType::Boolean => format!(
                "{} = {}",
                expr,
                text_value(&filter.value).to_lowercase() == "true"
            ),
            _ => comparison("="),
        },
        FilterOp::Contains => format!(
            "LOWER(CAST({} AS VARCHAR)) LIKE {}",
            expr,
            quote_literal(&format!("%{}%", text_value(&filter.value).to_lowercase()))
        ),
    }
}

/// Render a complete `SELECT` statement. A `LIMIT` is always present.
pub fn build_select(query: &StoreQuery, workspace: Option<&str>) -> String {
    let mut sql = String::from("SELECT ");

    let grouped = query
        .aggregation
        .as_ref()
        .and_then(|a| a.group_by.as_deref())
        .and_then(|g| query.field(g));

    match &query.aggregation {
        Some(spec) => {
            let mut select = Vec::new();
            if let Some(group) = grouped {
                select.push(format!("{} AS {}", typed_expr(group), quote_ident(&group.name)));
            }
            let argument = match (spec.function, spec.field.as_deref().and_then(|f| query.field(f))) {
                (AggregateFunction::Count, None) => "*".to_string(),
                (_, Some(field)) => typed_expr(field),
                (_, None) => "*".to_string(),
            };
            select.push(format!(
                "{}({}) AS {}",
                spec.function.sql(),
                argument,
                quote_ident(&spec.output_column())
            ));
            sql.push_str(&select.join(", "));
        }
        None => {
            let select: Vec<String> = query
                .fields
                .iter()
                .map(|f| format!("{} AS {}", column_expr(f), quote_ident(&f.name)))
                .collect();
            sql.push_str(&select.join(", "));
        }
    }

    sql.push_str(" FROM ");
    sql.push_str(&table_ref(&query.source, workspace));

    let conditions: Vec<String> = query
        .filters
        .iter()
        .filter_map(|f| query.field(&f.field).map(|field| condition(field, f)))
        .collect();
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    if let Some(group) = grouped {
        let expr = typed_expr(group);
        sql.push_str(&format!(" GROUP BY {} ORDER BY {}", expr, expr));
    }

    sql.push_str(&format!(" LIMIT {}", query.limit));
    sql
}
