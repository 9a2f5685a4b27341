//! In-process relational operations on normalized rows.
//!
//! Used for cross-store plans (join and aggregate after fetching) and by the
//! in-memory store, so both paths share one definition of predicate matching
//! and aggregation.

use std::collections::{BTreeMap, HashMap};

use super::result::{parse_timestamp, Scalar};
use super::types::{AggregateFunction, FilterOp, FilterValue};

/// Whether a normalized value satisfies `op target`. Null never matches.
pub fn matches(value: &Scalar, op: FilterOp, target: &FilterValue) -> bool {
    match value {
        Scalar::Null => false,
        Scalar::List(items) => match op {
            FilterOp::Equals | FilterOp::Contains => items.iter().any(|item| {
                matches(item, FilterOp::Equals, target)
                    || (op == FilterOp::Contains && matches(item, FilterOp::Contains, target))
            }),
            _ => false,
        },
        _ => match op {
            FilterOp::GreaterThan => compare(value, target).is_some_and(|o| o.is_gt()),
            FilterOp::LessThan => compare(value, target).is_some_and(|o| o.is_lt()),
            FilterOp::Equals => equals(value, target),
            FilterOp::Contains => match (value, target) {
                (Scalar::Text(s), FilterValue::Text(needle)) => {
                    s.to_lowercase().contains(&needle.to_lowercase())
                }
                _ => equals(value, target),
            },
            FilterOp::Between => match target {
                FilterValue::Range { low, high } => {
                    value.as_f64().is_some_and(|v| v >= *low && v <= *high)
                }
                _ => false,
            },
        },
    }
}

fn compare(value: &Scalar, target: &FilterValue) -> Option<std::cmp::Ordering> {
    match value {
        Scalar::Timestamp(t) => match target {
            FilterValue::Text(s) => parse_timestamp(s).map(|other| t.cmp(&other)),
            _ => None,
        },
        _ => {
            let v = value.as_f64()?;
            let t = target.as_number()?;
            v.partial_cmp(&t)
        }
    }
}

fn equals(value: &Scalar, target: &FilterValue) -> bool {
    match (value, target) {
        (Scalar::Text(s), FilterValue::Text(t)) => s.eq_ignore_ascii_case(t.trim()),
        (Scalar::Text(s), FilterValue::Number(n)) => s.trim().parse::<f64>().ok() == Some(*n),
        (Scalar::Boolean(b), FilterValue::Text(t)) => {
            t.eq_ignore_ascii_case(if *b { "true" } else { "false" })
        }
        (Scalar::Timestamp(ts), FilterValue::Text(t)) => parse_timestamp(t) == Some(*ts),
        (Scalar::Integer(_) | Scalar::Number(_), _) => {
            value.as_f64().is_some() && value.as_f64() == target.as_number()
        }
        _ => false,
    }
}

/// Aggregate `rows`, optionally grouped. Output rows are `[group, value]`
/// when grouped and `[value]` otherwise; groups are ordered ascending.
///
/// `value` is the column holding the argument; `None` counts rows.
pub fn aggregate(
    rows: &[Vec<Scalar>],
    function: AggregateFunction,
    value: Option<usize>,
    group: Option<usize>,
) -> Vec<Vec<Scalar>> {
    let Some(group) = group else {
        return vec![vec![fold(rows.iter(), function, value)]];
    };

    let mut groups: BTreeMap<String, (Scalar, Vec<&Vec<Scalar>>)> = BTreeMap::new();
    let mut nulls: Vec<&Vec<Scalar>> = Vec::new();
    for row in rows {
        let key_value = row.get(group).cloned().unwrap_or(Scalar::Null);
        match key_value.join_key() {
            Some(key) => groups
                .entry(key)
                .or_insert_with(|| (key_value, Vec::new()))
                .1
                .push(row),
            None => nulls.push(row),
        }
    }

    let mut grouped: Vec<(Scalar, Vec<&Vec<Scalar>>)> = groups.into_values().collect();
    grouped.sort_by(|a, b| a.0.total_cmp(&b.0));
    if !nulls.is_empty() {
        grouped.insert(0, (Scalar::Null, nulls));
    }

    grouped
        .into_iter()
        .map(|(key, members)| vec![key, fold(members.into_iter(), function, value)])
        .collect()
}

/// Stand-in argument for `count(*)`.
static PRESENT: Scalar = Scalar::Boolean(true);

fn fold<'a, I>(rows: I, function: AggregateFunction, value: Option<usize>) -> Scalar
where
    I: Iterator<Item = &'a Vec<Scalar>>,
{
    let values = rows.map(|row| match value {
        Some(idx) => row.get(idx).unwrap_or(&Scalar::Null),
        None => &PRESENT,
    });

    match function {
        AggregateFunction::Count => {
            Scalar::Integer(values.filter(|v| !v.is_null()).count() as i64)
        }
        AggregateFunction::Sum | AggregateFunction::Average => {
            let mut sum = 0.0;
            let mut n = 0usize;
            for v in values.filter_map(Scalar::as_f64) {
                sum += v;
                n += 1;
            }
            match (function, n) {
                (_, 0) => Scalar::Null,
                (AggregateFunction::Sum, _) => Scalar::Number(sum),
                _ => Scalar::Number(sum / n as f64),
            }
        }
        AggregateFunction::Max | AggregateFunction::Min => {
            let best = values.filter(|v| !v.is_null()).fold(None::<&Scalar>, |best, v| {
                match best {
                    None => Some(v),
                    Some(b) => {
                        let ordering = v.total_cmp(b);
                        let better = if function == AggregateFunction::Max {
                            ordering.is_gt()
                        } else {
                            ordering.is_lt()
                        };
                        Some(if better { v } else { b })
                    }
                }
            });
            best.cloned().unwrap_or(Scalar::Null)
        }
    }
}

/// Inner hash join. Output rows are the left row followed by the right row
/// without its key column; left order is preserved.
pub fn hash_join(
    left: Vec<Vec<Scalar>>,
    right: &[Vec<Scalar>],
    left_key: usize,
    right_key: usize,
) -> Vec<Vec<Scalar>> {
    let mut index: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, row) in right.iter().enumerate() {
        if let Some(key) = row.get(right_key).and_then(Scalar::join_key) {
            index.entry(key).or_default().push(i);
        }
    }

    let mut out = Vec::new();
    for row in left {
        let Some(key) = row.get(left_key).and_then(Scalar::join_key) else {
            continue;
        };
        let Some(matches) = index.get(&key) else {
            continue;
        };
        for &i in matches {
            let mut joined = row.clone();
            joined.extend(
                right[i]
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != right_key)
                    .map(|(_, v)| v.clone()),
            );
            out.push(joined);
        }
    }
    out
}
