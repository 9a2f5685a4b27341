//! Bounded tokenizer for natural-language questions.

use std::sync::LazyLock;

use regex::Regex;

/// Quoted strings, numbers, words and comparison symbols. Everything else
/// (punctuation, whitespace) separates tokens and is discarded.
static TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#""([^"]*)"|'([^']*)'|(-?\d+(?:\.\d+)?)|(\p{L}[\p{L}\p{N}_'\-]*(?:\.\d+)?)|(>=|<=|>|<|=)"#,
    )
    .expect("Invalid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Word,
    Number,
    Quoted,
    Symbol,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Lowercased text used for vocabulary matching
    pub text: String,
    /// Text as written, used for literal values
    pub raw: String,
}

impl Token {
    /// Parsed value of a number token.
    pub fn number(&self) -> Option<f64> {
        match self.kind {
            TokenKind::Number => self.raw.parse().ok(),
            _ => None,
        }
    }

    /// Tokens that may take part in multi-word vocabulary phrases.
    pub fn is_matchable(&self) -> bool {
        matches!(self.kind, TokenKind::Word | TokenKind::Symbol)
    }
}

/// Split `text` into at most `max_tokens` tokens.
pub fn tokenize(text: &str, max_tokens: usize) -> Vec<Token> {
    TOKEN_PATTERN
        .captures_iter(text)
        .take(max_tokens)
        .filter_map(|caps| {
            let (kind, raw) = if let Some(m) = caps.get(1).or_else(|| caps.get(2)) {
                (TokenKind::Quoted, m.as_str())
            } else if let Some(m) = caps.get(3) {
                (TokenKind::Number, m.as_str())
            } else if let Some(m) = caps.get(4) {
                (TokenKind::Word, m.as_str())
            } else {
                (TokenKind::Symbol, caps.get(5)?.as_str())
            };
            Some(Token {
                kind,
                text: raw.to_lowercase(),
                raw: raw.to_string(),
            })
        })
        .collect()
}
