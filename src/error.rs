//! Error types for the ecofed query service.

use thiserror::Error;

/// Main error type for ecofed operations.
#[derive(Error, Debug)]
pub enum EcofedError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration-related errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Schema catalog construction errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Duplicate entity: {0}")]
    DuplicateEntity(String),

    #[error("Entity {entity} declares field {field} twice")]
    DuplicateField { entity: String, field: String },

    #[error("Entity {0} has no fields")]
    NoFields(String),

    #[error("Entity {entity} references unknown field {field}")]
    UnknownField { entity: String, field: String },

    #[error("Entity {entity} is mapped to unknown store {store}")]
    UnknownStore { entity: String, store: String },
}

/// Request-level failures of the natural-language query pipeline.
///
/// Every variant aborts the request. Row coercion losses are not errors;
/// they travel with the result as [`crate::query::QueryWarning`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Ambiguous query: {0}")]
    AmbiguousQuery(String),

    #[error("Role {role} may not query {entity}")]
    Forbidden { role: String, entity: String },

    #[error("Invalid field {field} on {entity}: {reason}")]
    InvalidField {
        entity: String,
        field: String,
        reason: String,
    },

    #[error("Store {store} unavailable: {reason}")]
    StoreUnavailable { store: String, reason: String },
}

impl QueryError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AmbiguousQuery(_) => "ambiguous_query",
            Self::Forbidden { .. } => "forbidden",
            Self::InvalidField { .. } => "invalid_field",
            Self::StoreUnavailable { .. } => "store_unavailable",
        }
    }

    /// Message shown to dashboard users.
    pub fn user_message(&self) -> String {
        match self {
            Self::AmbiguousQuery(_) => "Could not tell which data set your question is about. \
                 Try naming it, for example climate, biodiversity or air quality."
                .to_string(),
            Self::Forbidden { entity, .. } => {
                format!("Your role does not have access to {} data.", entity)
            }
            Self::InvalidField { field, reason, .. } => {
                format!("The question refers to '{}', which cannot be used here: {}.", field, reason)
            }
            Self::StoreUnavailable { store, .. } => format!(
                "The {} data store is currently unreachable. Please try again later.",
                store
            ),
        }
    }
}

/// Store adapter errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Unexpected response: {0}")]
    Protocol(String),

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Authentication errors.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing credentials")]
    MissingCredentials,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("JWT secret not configured")]
    MissingSecret,

    #[error("Token generation failed: {0}")]
    TokenGeneration(String),
}

/// Result type alias for ecofed operations.
pub type Result<T> = std::result::Result<T, EcofedError>;
