//! Output formatting for CLI commands.
//!
//! Every printer writes either pretty JSON or human-readable text.

use std::collections::BTreeMap;

use ecofed::catalog::SchemaCatalog;
use ecofed::error::QueryError;
use ecofed::{QueryIntent, QueryOutcome};
use serde_json::json;

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

/// Print an answered question.
pub fn print_outcome(outcome: &QueryOutcome, json: bool) {
    let result = &outcome.result;
    if json {
        print_json(&json!({
            "success": true,
            "confidence": outcome.intent.confidence,
            "data": result.records(),
            "columns": result.columns,
            "interpretation": outcome.interpretation,
            "partial": result.partial(),
            "dropped_rows": result.dropped_rows,
            "warnings": result.warnings,
            "intent": outcome.intent,
            "generated_sql": outcome.generated_sql,
            "stats": outcome.stats,
        }));
        return;
    }

    println!("{}", outcome.interpretation);
    for generated in &outcome.generated_sql {
        println!("SQL ({}): {}", generated.store, generated.query);
    }
    println!(
        "Confidence: {:.2}  Rows: {}  ({}ms)\n",
        outcome.intent.confidence,
        result.len(),
        outcome.stats.total_time_ms
    );

    if result.is_empty() {
        println!("No rows matched.");
    } else {
        let cells: Vec<Vec<String>> = result
            .rows
            .iter()
            .map(|row| row.iter().map(|v| v.to_string()).collect())
            .collect();
        let widths: Vec<usize> = result
            .columns
            .iter()
            .enumerate()
            .map(|(i, name)| {
                cells
                    .iter()
                    .map(|row| row.get(i).map_or(0, |c| c.chars().count()))
                    .max()
                    .unwrap_or(0)
                    .max(name.chars().count())
            })
            .collect();

        let line = |values: Vec<&str>| {
            values
                .iter()
                .zip(&widths)
                .map(|(v, w)| format!("{:<width$}", v, width = *w))
                .collect::<Vec<_>>()
                .join("  ")
        };
        println!("{}", line(result.columns.iter().map(String::as_str).collect()));
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        println!("{}", rule.join("  "));
        for row in &cells {
            println!("{}", line(row.iter().map(String::as_str).collect()));
        }
    }

    for warning in &result.warnings {
        println!("\nWarning: {}", warning);
    }
}

/// Print a failed question.
pub fn print_query_error(error: &QueryError, json: bool) {
    if json {
        print_json(&json!({
            "success": false,
            "error": error.user_message(),
            "code": error.code(),
            "confidence": 0.0,
            "data": [],
        }));
    } else {
        eprintln!("{}", error.user_message());
        eprintln!("({}: {})", error.code(), error);
    }
}

/// Print an intent without executing it.
pub fn print_intent(intent: &QueryIntent, description: &str, json: bool) {
    if json {
        print_json(&json!({ "intent": intent, "interpretation": description }));
        return;
    }

    println!("{}", description);
    println!("Entity:     {}", intent.entity);
    if !intent.joined.is_empty() {
        println!("Joined:     {}", intent.joined.join(", "));
    }
    println!("Operation:  {}", intent.operation.as_str());
    for filter in &intent.filters {
        println!("Filter:     {} {} {}", filter.field, filter.op.phrase(), filter.value);
    }
    if let Some(spec) = &intent.aggregation {
        println!(
            "Aggregate:  {}({})",
            spec.function.as_str(),
            spec.field.as_deref().unwrap_or("*")
        );
        if let Some(group) = &spec.group_by {
            println!("Group by:   {}", group);
        }
    }
    if let Some(limit) = intent.limit {
        println!("Limit:      {}", limit);
    }
    println!("Confidence: {:.2}", intent.confidence);
}

/// Print store reachability.
pub fn print_status(status: &BTreeMap<String, bool>, json: bool) {
    if json {
        print_json(&json!({ "success": true, "status": status }));
        return;
    }
    for (store, up) in status {
        println!("{:<12} {}", store, if *up { "connected" } else { "unreachable" });
    }
}

/// Print the schema catalog.
pub fn print_catalog(catalog: &SchemaCatalog, json: bool) {
    if json {
        print_json(&json!({ "entities": catalog.entities() }));
        return;
    }
    for entity in catalog.entities() {
        println!("{} ({} / {})", entity.name, entity.store, entity.source);
        for field in &entity.fields {
            let mut flags = Vec::new();
            if field.filterable {
                flags.push("filter");
            }
            if field.aggregatable {
                flags.push("aggregate");
            }
            println!("  {:<24} {:<10} {}", field.name, field.ty.as_str(), flags.join(","));
        }
    }
}
