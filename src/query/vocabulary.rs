//! Table-driven vocabulary for the interpreter.
//!
//! Phrases come from two places: the catalog (entity and field names plus
//! their aliases) and fixed grammar tables. A phrase may carry several
//! meanings at once ("region" is both an entity and a field alias); the
//! interpreter decides which one applies from context.

use std::collections::HashMap;

use super::tokenizer::Token;
use super::types::{AggregateFunction, FilterOp};
use crate::catalog::SchemaCatalog;

/// Grammar keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Operator(FilterOp),
    /// "high" (true) or "low" (false) followed by a field
    Qualifier(bool),
    /// "in", "at", "within": introduces a place name
    Location,
    /// "by", "per", "for each": introduces a grouping field
    GroupBy,
    /// "top", "first", "limit": followed by a row count
    Limit,
    /// Connector for "between x and y"
    And,
    Stop,
}

/// Everything a phrase can mean.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Meaning {
    pub aggregate: Option<AggregateFunction>,
    /// Catalog index of an entity this phrase names
    pub entity: Option<usize>,
    /// (catalog index, field name) pairs, in catalog order
    pub fields: Vec<(usize, String)>,
    pub keyword: Option<Keyword>,
}

impl Meaning {
    pub fn is_stopword(&self) -> bool {
        self.keyword == Some(Keyword::Stop)
            && self.aggregate.is_none()
            && self.entity.is_none()
            && self.fields.is_empty()
    }
}

/// A vocabulary hit: the meaning and the number of tokens it spans.
#[derive(Debug, Clone, PartialEq)]
pub struct Match<'a> {
    pub meaning: &'a Meaning,
    pub len: usize,
}

const AGGREGATES: &[(&str, AggregateFunction)] = &[
    ("count", AggregateFunction::Count),
    ("how many", AggregateFunction::Count),
    ("number of", AggregateFunction::Count),
    ("average", AggregateFunction::Average),
    ("avg", AggregateFunction::Average),
    ("mean", AggregateFunction::Average),
    ("sum", AggregateFunction::Sum),
    ("total", AggregateFunction::Sum),
    ("max", AggregateFunction::Max),
    ("maximum", AggregateFunction::Max),
    ("highest", AggregateFunction::Max),
    ("min", AggregateFunction::Min),
    ("minimum", AggregateFunction::Min),
    ("lowest", AggregateFunction::Min),
];

const OPERATORS: &[(&str, FilterOp)] = &[
    ("greater than", FilterOp::GreaterThan),
    ("more than", FilterOp::GreaterThan),
    ("higher than", FilterOp::GreaterThan),
    ("above", FilterOp::GreaterThan),
    ("over", FilterOp::GreaterThan),
    (">", FilterOp::GreaterThan),
    ("less than", FilterOp::LessThan),
    ("fewer than", FilterOp::LessThan),
    ("lower than", FilterOp::LessThan),
    ("below", FilterOp::LessThan),
    ("under", FilterOp::LessThan),
    ("<", FilterOp::LessThan),
    ("equals", FilterOp::Equals),
    ("equal to", FilterOp::Equals),
    ("is", FilterOp::Equals),
    ("=", FilterOp::Equals),
    ("contains", FilterOp::Contains),
    ("containing", FilterOp::Contains),
    ("includes", FilterOp::Contains),
    ("including", FilterOp::Contains),
    ("between", FilterOp::Between),
];

const KEYWORDS: &[(&str, Keyword)] = &[
    ("high", Keyword::Qualifier(true)),
    ("low", Keyword::Qualifier(false)),
    ("in", Keyword::Location),
    ("at", Keyword::Location),
    ("within", Keyword::Location),
    ("by", Keyword::GroupBy),
    ("per", Keyword::GroupBy),
    ("for each", Keyword::GroupBy),
    ("grouped by", Keyword::GroupBy),
    ("group by", Keyword::GroupBy),
    ("top", Keyword::Limit),
    ("first", Keyword::Limit),
    ("limit", Keyword::Limit),
    ("and", Keyword::And),
];

const STOPWORDS: &[&str] = &[
    "a", "all", "an", "any", "are", "as", "be", "data", "display", "do", "does", "each", "find",
    "for", "from", "get", "give", "has", "have", "list", "me", "much", "of", "on", "or",
    "please", "record", "records", "show", "tell", "that", "the", "there", "to", "value",
    "values", "was", "were", "what", "where", "which", "whose", "with", "across", "entries",
];

/// Phrase table built once from the catalog.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    phrases: HashMap<String, Meaning>,
    max_phrase_len: usize,
}

impl Vocabulary {
    pub fn new(catalog: &SchemaCatalog) -> Self {
        let mut vocab = Self {
            phrases: HashMap::new(),
            max_phrase_len: 1,
        };

        for (idx, entity) in catalog.entities().iter().enumerate() {
            for phrase in entity.phrases() {
                let meaning = vocab.entry(&phrase);
                // First declaration wins when two entities share a phrase.
                meaning.entity.get_or_insert(idx);
            }
            for field in &entity.fields {
                for phrase in field.phrases() {
                    let meaning = vocab.entry(&phrase);
                    let candidate = (idx, field.name.clone());
                    if !meaning.fields.contains(&candidate) {
                        meaning.fields.push(candidate);
                    }
                }
            }
        }

        for (phrase, function) in AGGREGATES {
            vocab.entry(phrase).aggregate = Some(*function);
        }
        for (phrase, op) in OPERATORS {
            vocab.entry(phrase).keyword = Some(Keyword::Operator(*op));
        }
        for (phrase, keyword) in KEYWORDS {
            vocab.entry(phrase).keyword.get_or_insert(*keyword);
        }
        for phrase in STOPWORDS {
            vocab.entry(phrase).keyword.get_or_insert(Keyword::Stop);
        }

        vocab
    }

    fn entry(&mut self, phrase: &str) -> &mut Meaning {
        let phrase = phrase.trim().to_lowercase();
        let words = phrase.split_whitespace().count().max(1);
        self.max_phrase_len = self.max_phrase_len.max(words);
        self.phrases.entry(phrase).or_default()
    }

    /// Longest phrase starting at `tokens[start]`.
    pub fn longest_match(&self, tokens: &[Token], start: usize) -> Option<Match<'_>> {
        let available = tokens[start..]
            .iter()
            .take(self.max_phrase_len)
            .take_while(|t| t.is_matchable())
            .count();

        (1..=available).rev().find_map(|len| {
            let phrase = tokens[start..start + len]
                .iter()
                .map(|t| t.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            self.phrases.get(&phrase).map(|meaning| Match { meaning, len })
        })
    }

    /// Whether the token at `start` begins any known phrase.
    pub fn is_known(&self, tokens: &[Token], start: usize) -> bool {
        self.longest_match(tokens, start).is_some()
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}
