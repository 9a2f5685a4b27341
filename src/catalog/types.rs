//! Schema catalog types.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;
use crate::query::Role;

// ============================================================================
// Semantic Types
// ============================================================================

/// Declared type of a catalog field, independent of how a store holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Integer,
    Number,
    Text,
    Boolean,
    Timestamp,
    List,
}

impl SemanticType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Text => "text",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
            Self::List => "list",
        }
    }

    /// Integer or floating point.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Number)
    }

    /// Supports greater-than / less-than comparisons.
    pub fn is_ordered(&self) -> bool {
        matches!(self, Self::Integer | Self::Number | Self::Timestamp)
    }
}

impl std::fmt::Display for SemanticType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Field Schema
// ============================================================================

fn default_true() -> bool {
    true
}

/// A single field of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Canonical field name (snake_case)
    pub name: String,
    /// Declared semantic type
    #[serde(rename = "type")]
    pub ty: SemanticType,
    /// May appear in filter predicates and group-by clauses
    #[serde(default = "default_true")]
    pub filterable: bool,
    /// May be the argument of an aggregation function
    #[serde(default)]
    pub aggregatable: bool,
    /// Extra phrases that refer to this field
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    /// Native column name when it differs from `name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    /// The backing store keeps this value as text
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stored_as_text: bool,
    /// Threshold for "low <field>"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
    /// Threshold for "high <field>"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
}

impl FieldSchema {
    /// Create a filterable, non-aggregatable field.
    pub fn new(name: impl Into<String>, ty: SemanticType) -> Self {
        Self {
            name: name.into(),
            ty,
            filterable: true,
            aggregatable: false,
            aliases: Vec::new(),
            column: None,
            stored_as_text: false,
            low: None,
            high: None,
        }
    }

    /// Shorthand for an aggregatable measure.
    pub fn measure(name: impl Into<String>, ty: SemanticType) -> Self {
        Self::new(name, ty).aggregatable(true)
    }

    pub fn filterable(mut self, filterable: bool) -> Self {
        self.filterable = filterable;
        self
    }

    pub fn aggregatable(mut self, aggregatable: bool) -> Self {
        self.aggregatable = aggregatable;
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn stored_as_text(mut self) -> Self {
        self.stored_as_text = true;
        self
    }

    pub fn thresholds(mut self, low: f64, high: f64) -> Self {
        self.low = Some(low);
        self.high = Some(high);
        self
    }

    /// Native column name.
    pub fn column_name(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.name)
    }

    /// Lowercase phrases: the name with underscores as spaces, the name as
    /// written, then aliases.
    pub fn phrases(&self) -> Vec<String> {
        let mut phrases = vec![self.name.replace('_', " ").to_lowercase()];
        let written = self.name.to_lowercase();
        if !phrases.contains(&written) {
            phrases.push(written);
        }
        for alias in &self.aliases {
            let alias = alias.to_lowercase();
            if !phrases.contains(&alias) {
                phrases.push(alias);
            }
        }
        phrases
    }
}

// ============================================================================
// Entity Schema
// ============================================================================

/// A logical record type mapped to exactly one backing store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
    /// Canonical entity name (PascalCase)
    pub name: String,
    /// Identifier of the store holding this entity
    pub store: String,
    /// Native table, collection or file name
    pub source: String,
    /// Extra phrases that refer to this entity
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    /// Ordered field list
    pub fields: Vec<FieldSchema>,
    /// Field targeted by "in <place>" phrases
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_field: Option<String>,
    /// Key shared with other entities for cross-store merges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_key: Option<String>,
    /// Roles allowed to query this entity (all roles when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<Role>>,
}

impl EntitySchema {
    pub fn new(
        name: impl Into<String>,
        store: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            store: store.into(),
            source: source.into(),
            aliases: Vec::new(),
            fields: Vec::new(),
            location_field: None,
            join_key: None,
            roles: None,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    pub fn location(mut self, field: impl Into<String>) -> Self {
        self.location_field = Some(field.into());
        self
    }

    pub fn join_on(mut self, field: impl Into<String>) -> Self {
        self.join_key = Some(field.into());
        self
    }

    pub fn restricted_to(mut self, roles: Vec<Role>) -> Self {
        self.roles = Some(roles);
        self
    }

    /// Look up a field by canonical name.
    pub fn get_field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Position of a field in catalog order.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Whether the given role may see this entity by default.
    pub fn allows(&self, role: Role) -> bool {
        self.roles.as_ref().map_or(true, |roles| roles.contains(&role))
    }

    /// Lowercase phrases: the name split on case boundaries, plus aliases.
    pub fn phrases(&self) -> Vec<String> {
        let mut phrases = vec![split_camel_case(&self.name)];
        for alias in &self.aliases {
            let alias = alias.to_lowercase();
            if !phrases.contains(&alias) {
                phrases.push(alias);
            }
        }
        phrases
    }

    fn validate(&self, stores: &HashSet<&str>) -> Result<(), CatalogError> {
        if self.fields.is_empty() {
            return Err(CatalogError::NoFields(self.name.clone()));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(CatalogError::DuplicateField {
                    entity: self.name.clone(),
                    field: field.name.clone(),
                });
            }
        }

        for declared in [&self.location_field, &self.join_key].into_iter().flatten() {
            if self.get_field(declared).is_none() {
                return Err(CatalogError::UnknownField {
                    entity: self.name.clone(),
                    field: declared.clone(),
                });
            }
        }

        if !stores.is_empty() && !stores.contains(self.store.as_str()) {
            return Err(CatalogError::UnknownStore {
                entity: self.name.clone(),
                store: self.store.clone(),
            });
        }

        Ok(())
    }
}

/// "AirQuality" -> "air quality"
fn split_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_uppercase() && i > 0 {
            out.push(' ');
        }
        out.extend(ch.to_lowercase());
    }
    out
}

// ============================================================================
// Schema Catalog
// ============================================================================

/// Process-wide, read-only description of every queryable entity.
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    entities: Vec<EntitySchema>,
    index: HashMap<String, usize>,
}

/// On-disk catalog format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub entities: Vec<EntitySchema>,
}

impl SchemaCatalog {
    /// Build a catalog, checking internal consistency.
    pub fn new(entities: Vec<EntitySchema>) -> Result<Self, CatalogError> {
        Self::with_stores(entities, &[])
    }

    /// Build a catalog whose entities must live in one of `stores`.
    pub fn with_stores(entities: Vec<EntitySchema>, stores: &[&str]) -> Result<Self, CatalogError> {
        let stores: HashSet<&str> = stores.iter().copied().collect();
        let mut index = HashMap::with_capacity(entities.len());

        for (i, entity) in entities.iter().enumerate() {
            entity.validate(&stores)?;
            if index.insert(entity.name.to_lowercase(), i).is_some() {
                return Err(CatalogError::DuplicateEntity(entity.name.clone()));
            }
        }

        Ok(Self { entities, index })
    }

    /// Entity by name (case-insensitive).
    pub fn entity(&self, name: &str) -> Option<&EntitySchema> {
        self.index
            .get(&name.to_lowercase())
            .map(|&i| &self.entities[i])
    }

    /// Position of an entity in declaration order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(&name.to_lowercase()).copied()
    }

    /// All entities in declaration order.
    pub fn entities(&self) -> &[EntitySchema] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Distinct store identifiers referenced by the catalog.
    pub fn stores(&self) -> BTreeSet<&str> {
        self.entities.iter().map(|e| e.store.as_str()).collect()
    }

    /// Check that every entity maps to one of the given stores.
    pub fn check_stores(&self, stores: &[&str]) -> Result<(), CatalogError> {
        for entity in &self.entities {
            if !stores.contains(&entity.store.as_str()) {
                return Err(CatalogError::UnknownStore {
                    entity: entity.name.clone(),
                    store: entity.store.clone(),
                });
            }
        }
        Ok(())
    }
}
