//! Natural-language query pipeline.
//!
//! This module provides:
//! - Interpretation of free-text questions into structured intents
//! - Planning and dispatch of store sub-queries, including cross-store joins
//! - Normalization of store rows to the catalog's declared types

pub mod dispatcher;
pub mod executor;
pub mod interpreter;
pub mod merge;
pub mod plan;
pub mod result;
mod tokenizer;
pub mod types;
mod vocabulary;

pub use dispatcher::Dispatcher;
pub use executor::{QueryExecutor, QueryOutcome, QueryStats};
pub use interpreter::Interpreter;
pub use plan::{ExecutionPlan, GeneratedQuery, MergeStep, SubQuery};
pub use result::{QueryWarning, ResultSet, Scalar};
pub use types::*;
