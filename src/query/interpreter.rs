//! Natural-language interpreter.
//!
//! Turns a free-text question into a [`QueryIntent`] with a single pass over
//! a bounded token stream, matching phrases against the [`Vocabulary`]
//! longest-first. Field mentions stay unresolved until the target entity is
//! known, because many phrases ("region", "timestamp") name fields on
//! several entities. The interpreter is pure: no store is contacted and the
//! same text and role always produce the same intent.

use std::sync::Arc;

use tracing::debug;

use super::tokenizer::{tokenize, Token, TokenKind};
use super::types::{
    AggregateFunction, AggregationSpec, FilterOp, FilterPredicate, FilterValue, Operation,
    QueryIntent, RoleContext,
};
use super::vocabulary::{Keyword, Meaning, Vocabulary};
use crate::catalog::SchemaCatalog;
use crate::config::InterpreterConfig;
use crate::error::QueryError;

/// A field phrase seen in the text, not yet tied to an entity.
#[derive(Debug, Clone)]
struct FieldMention {
    /// (catalog index, field name) in catalog order
    candidates: Vec<(usize, String)>,
    position: usize,
}

#[derive(Debug, Clone)]
enum GroupTarget {
    Field(usize),
    Entity(usize),
}

#[derive(Debug, Clone)]
enum PendingFilter {
    Explicit {
        mention: usize,
        op: FilterOp,
        value: FilterValue,
    },
    Qualifier {
        mention: usize,
        high: bool,
    },
    Location(String),
}

/// What the token pass collected.
#[derive(Debug, Default)]
struct Parse {
    entities: Vec<(usize, usize)>,
    fields: Vec<FieldMention>,
    aggregate: Option<AggregateFunction>,
    aggregate_field: Option<usize>,
    group_by: Option<GroupTarget>,
    filters: Vec<PendingFilter>,
    limit: Option<usize>,
    unresolved: usize,
}

/// Short-lived expectations raised by grammar keywords.
#[derive(Debug, Default)]
struct State {
    field: Option<usize>,
    op: Option<FilterOp>,
    between_low: Option<f64>,
    qualifier: Option<bool>,
    expect_group: bool,
    expect_limit: bool,
    expect_aggregate_field: bool,
}

pub struct Interpreter {
    catalog: Arc<SchemaCatalog>,
    vocabulary: Vocabulary,
    max_tokens: usize,
    penalty: f64,
}

impl Interpreter {
    pub fn new(catalog: Arc<SchemaCatalog>, config: &InterpreterConfig) -> Self {
        let vocabulary = Vocabulary::new(&catalog);
        Self {
            catalog,
            vocabulary,
            max_tokens: config.max_tokens.max(1),
            penalty: config.unmatched_penalty,
        }
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    /// Interpret `text` on behalf of `role`.
    pub fn interpret(&self, text: &str, role: &RoleContext) -> Result<QueryIntent, QueryError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(QueryError::AmbiguousQuery("empty query".to_string()));
        }

        let tokens = tokenize(text, self.max_tokens);
        let mut parse = self.scan(&tokens);
        let (target, mut joined) = self.resolve_entities(&parse, role)?;

        // Resolve every field mention in text order so joined entities are
        // added deterministically.
        let resolved: Vec<String> = (0..parse.fields.len())
            .map(|m| self.resolve_field(&parse.fields[m], target, &mut joined, role))
            .collect();

        let mut filters = Vec::new();
        let mut filtered_mentions = Vec::new();
        for pending in std::mem::take(&mut parse.filters) {
            match pending {
                PendingFilter::Explicit { mention, op, value } => {
                    filtered_mentions.push(mention);
                    filters.push(FilterPredicate::new(resolved[mention].clone(), op, value));
                }
                PendingFilter::Qualifier { mention, high } => {
                    filtered_mentions.push(mention);
                    match self.threshold(&resolved[mention], target, high) {
                        Some((op, value)) => filters.push(FilterPredicate::new(
                            resolved[mention].clone(),
                            op,
                            FilterValue::Number(value),
                        )),
                        None => parse.unresolved += 1,
                    }
                }
                PendingFilter::Location(place) => match self.location_field(target, &joined) {
                    Some(field) => {
                        filters.push(FilterPredicate::new(field, FilterOp::Equals, FilterValue::Text(place)))
                    }
                    None => parse.unresolved += 1,
                },
            }
        }

        let group_by = match parse.group_by.take() {
            Some(GroupTarget::Field(m)) => {
                filtered_mentions.push(m);
                Some(resolved[m].clone())
            }
            Some(GroupTarget::Entity(e)) => {
                let field = self.group_field(e, target, &mut joined);
                if field.is_none() {
                    parse.unresolved += 1;
                }
                field
            }
            None => None,
        };

        let aggregation = match parse.aggregate {
            Some(function) => {
                let field = parse.aggregate_field.or_else(|| {
                    // "temperature average": fall back to a free field mention.
                    (function != AggregateFunction::Count)
                        .then(|| (0..parse.fields.len()).find(|m| !filtered_mentions.contains(m)))
                        .flatten()
                });
                match (function, field) {
                    (AggregateFunction::Count, field) => Some(AggregationSpec {
                        function,
                        field: field.map(|m| resolved[m].clone()),
                        group_by,
                    }),
                    (_, Some(m)) => Some(AggregationSpec {
                        function,
                        field: Some(resolved[m].clone()),
                        group_by,
                    }),
                    (_, None) => {
                        parse.unresolved += 1;
                        None
                    }
                }
            }
            None => {
                if group_by.is_some() {
                    parse.unresolved += 1;
                }
                None
            }
        };

        let entity = self.catalog.entities()[target].name.clone();
        let joined: Vec<String> = joined
            .iter()
            .map(|&e| self.catalog.entities()[e].name.clone())
            .collect();

        for name in std::iter::once(&entity).chain(joined.iter()) {
            if !role.permits(name) {
                debug!(role = %role.role, entity = %name, "Entity not permitted for role");
                return Err(QueryError::Forbidden {
                    role: role.role.to_string(),
                    entity: name.clone(),
                });
            }
        }

        let operation = if aggregation.is_some() {
            Operation::Aggregate
        } else if !filters.is_empty() {
            Operation::Filter
        } else {
            Operation::Lookup
        };

        let confidence = self.confidence(parse.unresolved);
        debug!(
            entity = %entity,
            joined = ?joined,
            operation = operation.as_str(),
            unresolved = parse.unresolved,
            confidence,
            "Interpreted query"
        );

        Ok(QueryIntent {
            entity,
            joined,
            operation,
            filters,
            aggregation,
            limit: parse.limit,
            confidence,
        })
    }

    fn confidence(&self, unresolved: usize) -> f32 {
        let score = (1.0 - self.penalty * unresolved as f64).clamp(0.0, 1.0);
        ((score * 100.0).round() / 100.0) as f32
    }

    // ========================================================================
    // Token pass
    // ========================================================================

    fn scan(&self, tokens: &[Token]) -> Parse {
        let mut parse = Parse::default();
        let mut state = State::default();
        let mut i = 0;

        while i < tokens.len() {
            let token = &tokens[i];

            if token.kind == TokenKind::Number {
                if let Some(n) = token.number() {
                    self.on_number(n, &mut parse, &mut state);
                }
                i += 1;
                continue;
            }
            if state.expect_limit {
                state.expect_limit = false;
                parse.unresolved += 1;
            }

            if token.kind == TokenKind::Quoted {
                self.on_text(token.raw.clone(), &mut parse, &mut state);
                i += 1;
                continue;
            }

            let Some(hit) = self.vocabulary.longest_match(tokens, i) else {
                if matches!(state.op, Some(op) if op != FilterOp::Between) && state.field.is_some()
                {
                    let end = self.unknown_run(tokens, i);
                    let value = join_raw(&tokens[i..end]);
                    self.on_text(value, &mut parse, &mut state);
                    i = end;
                } else {
                    debug!(token = %token.raw, "Unmatched token");
                    parse.unresolved += 1;
                    i += 1;
                }
                continue;
            };

            let start = i;
            i += hit.len;
            let meaning = hit.meaning;

            if meaning.is_stopword() {
                continue;
            }
            if state.qualifier.is_some() && meaning.fields.is_empty() {
                state.qualifier = None;
                parse.unresolved += 1;
            }

            if state.expect_group {
                state.expect_group = false;
                if !meaning.fields.is_empty() {
                    let m = push_field(&mut parse, meaning, start);
                    parse.group_by = Some(GroupTarget::Field(m));
                    continue;
                }
                if let Some(e) = meaning.entity {
                    parse.group_by = Some(GroupTarget::Entity(e));
                    continue;
                }
                parse.unresolved += 1;
            }

            if let Some(function) = meaning.aggregate {
                parse.aggregate = Some(function);
                state.expect_aggregate_field = true;
                continue;
            }

            if let Some(e) = meaning.entity {
                parse.entities.push((e, start));
                continue;
            }

            if !meaning.fields.is_empty() {
                let m = push_field(&mut parse, meaning, start);
                if let Some(high) = state.qualifier.take() {
                    parse.filters.push(PendingFilter::Qualifier { mention: m, high });
                } else if state.expect_aggregate_field && parse.aggregate_field.is_none() {
                    parse.aggregate_field = Some(m);
                    state.expect_aggregate_field = false;
                }
                state.field = Some(m);
                state.op = None;
                state.between_low = None;
                continue;
            }

            match meaning.keyword {
                Some(Keyword::Operator(op)) => {
                    if state.field.is_some() {
                        state.op = Some(op);
                        state.between_low = None;
                    } else if op != FilterOp::Equals {
                        parse.unresolved += 1;
                    }
                }
                Some(Keyword::Qualifier(high)) => state.qualifier = Some(high),
                Some(Keyword::Location) => {
                    let (place, end) = self.place_name(tokens, i);
                    match place {
                        Some(place) => parse.filters.push(PendingFilter::Location(place)),
                        // "in sensor readings": the preposition introduces a
                        // known phrase, not a place.
                        None if i < tokens.len() && self.vocabulary.is_known(tokens, i) => {}
                        None => parse.unresolved += 1,
                    }
                    i = end;
                }
                Some(Keyword::GroupBy) => state.expect_group = true,
                Some(Keyword::Limit) => state.expect_limit = true,
                Some(Keyword::And) | Some(Keyword::Stop) => {}
                None => parse.unresolved += 1,
            }
        }

        // Dangling expectations are parts of the question we did not use.
        parse.unresolved += [
            state.qualifier.is_some(),
            state.expect_group,
            state.expect_limit,
            state.op.is_some(),
        ]
        .iter()
        .filter(|dangling| **dangling)
        .count();

        parse
    }

    fn on_number(&self, n: f64, parse: &mut Parse, state: &mut State) {
        if state.expect_limit {
            state.expect_limit = false;
            if n >= 1.0 && n.fract() == 0.0 {
                parse.limit = Some(n as usize);
            } else {
                parse.unresolved += 1;
            }
            return;
        }

        match (state.field, state.op) {
            (Some(mention), Some(FilterOp::Between)) => match state.between_low.take() {
                Some(low) => {
                    parse.filters.push(PendingFilter::Explicit {
                        mention,
                        op: FilterOp::Between,
                        value: FilterValue::Range {
                            low: low.min(n),
                            high: low.max(n),
                        },
                    });
                    state.op = None;
                }
                None => state.between_low = Some(n),
            },
            (Some(mention), Some(op)) => {
                parse.filters.push(PendingFilter::Explicit {
                    mention,
                    op,
                    value: FilterValue::Number(n),
                });
                state.op = None;
            }
            _ => parse.unresolved += 1,
        }
    }

    fn on_text(&self, value: String, parse: &mut Parse, state: &mut State) {
        match (state.field, state.op) {
            (Some(mention), Some(op)) if op != FilterOp::Between => {
                parse.filters.push(PendingFilter::Explicit {
                    mention,
                    op,
                    value: FilterValue::Text(value),
                });
                state.op = None;
            }
            _ => parse.unresolved += 1,
        }
    }

    /// End of the run of unknown words starting at `start`.
    fn unknown_run(&self, tokens: &[Token], start: usize) -> usize {
        let mut end = start;
        while end < tokens.len()
            && tokens[end].kind == TokenKind::Word
            && !self.vocabulary.is_known(tokens, end)
        {
            end += 1;
        }
        end.max(start + 1)
    }

    /// Place name after a location preposition: a quoted string, or a run of
    /// unknown words after optional stopwords. Returns the name and the
    /// index of the next unconsumed token.
    fn place_name(&self, tokens: &[Token], start: usize) -> (Option<String>, usize) {
        let mut i = start;
        while i < tokens.len() {
            match self.vocabulary.longest_match(tokens, i) {
                Some(hit) if hit.meaning.is_stopword() => i += hit.len,
                _ => break,
            }
        }

        match tokens.get(i) {
            Some(token) if token.kind == TokenKind::Quoted => (Some(token.raw.clone()), i + 1),
            Some(token) if token.kind == TokenKind::Word && !self.vocabulary.is_known(tokens, i) => {
                let end = self.unknown_run(tokens, i);
                (Some(join_raw(&tokens[i..end])), end)
            }
            _ => (None, start),
        }
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Target entity and explicitly joined entities.
    fn resolve_entities(
        &self,
        parse: &Parse,
        role: &RoleContext,
    ) -> Result<(usize, Vec<usize>), QueryError> {
        let mut explicit: Vec<usize> = Vec::new();
        for &(e, _) in &parse.entities {
            if !explicit.contains(&e) {
                explicit.push(e);
            }
        }
        if let Some((&target, rest)) = explicit.split_first() {
            return Ok((target, rest.to_vec()));
        }

        // Score entities by how many field mentions they could own.
        let entities = self.catalog.entities();
        let best = (0..entities.len())
            .filter_map(|e| {
                let owned: Vec<usize> = parse
                    .fields
                    .iter()
                    .filter(|m| m.candidates.iter().any(|(owner, _)| *owner == e))
                    .map(|m| m.position)
                    .collect();
                let first = *owned.iter().min()?;
                let permitted = role.permits(&entities[e].name);
                Some((e, owned.len(), permitted, first))
            })
            .min_by(|a, b| {
                b.1.cmp(&a.1)
                    .then(b.2.cmp(&a.2))
                    .then(a.3.cmp(&b.3))
                    .then(a.0.cmp(&b.0))
            });

        match best {
            Some((e, ..)) => Ok((e, Vec::new())),
            None => Err(QueryError::AmbiguousQuery(
                "no entity or field could be identified".to_string(),
            )),
        }
    }

    /// Canonical name for a field mention, joining another entity when the
    /// target does not own the field.
    fn resolve_field(
        &self,
        mention: &FieldMention,
        target: usize,
        joined: &mut Vec<usize>,
        role: &RoleContext,
    ) -> String {
        if let Some((_, name)) = mention.candidates.iter().find(|(e, _)| *e == target) {
            return name.clone();
        }

        let entities = self.catalog.entities();
        let qualify = |e: usize, name: &str| format!("{}.{}", entities[e].name, name);

        if let Some((e, name)) = mention.candidates.iter().find(|(e, _)| joined.contains(e)) {
            return qualify(*e, name);
        }

        let (e, name) = mention
            .candidates
            .iter()
            .find(|(e, _)| role.permits(&entities[*e].name))
            .unwrap_or(&mention.candidates[0]);
        joined.push(*e);
        qualify(*e, name)
    }

    fn owner_of(&self, field: &str, target: usize) -> usize {
        match super::types::split_field(field) {
            (Some(entity), _) => self.catalog.position(entity).unwrap_or(target),
            (None, _) => target,
        }
    }

    fn threshold(&self, field: &str, target: usize, high: bool) -> Option<(FilterOp, f64)> {
        let entity = &self.catalog.entities()[self.owner_of(field, target)];
        let (_, name) = super::types::split_field(field);
        let schema = entity.get_field(name)?;
        if high {
            schema.high.map(|v| (FilterOp::GreaterThan, v))
        } else {
            schema.low.map(|v| (FilterOp::LessThan, v))
        }
    }

    fn location_field(&self, target: usize, joined: &[usize]) -> Option<String> {
        let entities = self.catalog.entities();
        if let Some(field) = &entities[target].location_field {
            return Some(field.clone());
        }
        joined.iter().find_map(|&e| {
            entities[e]
                .location_field
                .as_ref()
                .map(|f| format!("{}.{}", entities[e].name, f))
        })
    }

    fn group_field(&self, entity: usize, target: usize, joined: &mut Vec<usize>) -> Option<String> {
        let schema = &self.catalog.entities()[entity];
        let field = schema.location_field.as_ref()?;
        if entity == target {
            return Some(field.clone());
        }
        if !joined.contains(&entity) {
            joined.push(entity);
        }
        Some(format!("{}.{}", schema.name, field))
    }
}

fn push_field(parse: &mut Parse, meaning: &Meaning, position: usize) -> usize {
    parse.fields.push(FieldMention {
        candidates: meaning.fields.clone(),
        position,
    });
    parse.fields.len() - 1
}

fn join_raw(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(|t| t.raw.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}
