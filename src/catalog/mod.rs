//! Schema catalog: the queryable entities and the store each lives in.
//!
//! The catalog is built once at startup (from the built-in definitions or a
//! TOML file) and shared read-only behind an `Arc` by the interpreter and
//! the dispatcher.

mod builtin;
mod types;

use std::path::Path;

pub use builtin::{builtin_catalog, builtin_entities, BUILTIN_STORES, DRILL, MONGODB, POSTGRES};
pub use types::{CatalogFile, EntitySchema, FieldSchema, SchemaCatalog, SemanticType};

use crate::error::{ConfigError, EcofedError, Result};

impl SchemaCatalog {
    /// The built-in environmental catalog.
    pub fn builtin() -> Self {
        // Built-in definitions are covered by tests; a failure here is a bug.
        builtin_catalog().expect("built-in catalog is consistent")
    }

    /// Load a catalog from a TOML file with `[[entities]]` tables.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::ReadFile)?;
        Self::from_toml(&content)
    }

    /// Parse a catalog from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: CatalogFile = toml::from_str(content).map_err(ConfigError::Parse)?;
        Self::new(file.entities).map_err(EcofedError::from)
    }
}
