//! Configuration settings for the ecofed query service.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::catalog::{SchemaCatalog, DRILL, MONGODB, POSTGRES};
use crate::error::{ConfigError, Result};
use crate::query::{Role, RoleContext};

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub interpreter: InterpreterConfig,
    pub dispatcher: DispatcherConfig,
    pub monitor: MonitorConfig,
    pub audit: AuditConfig,
    pub auth: AuthConfig,
    pub roles: RolesConfig,
    pub stores: Vec<StoreConfig>,
    pub catalog: CatalogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            interpreter: InterpreterConfig::default(),
            dispatcher: DispatcherConfig::default(),
            monitor: MonitorConfig::default(),
            audit: AuditConfig::default(),
            auth: AuthConfig::default(),
            roles: RolesConfig::default(),
            stores: default_stores(),
            catalog: CatalogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::ReadFile)?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default locations or use defaults.
    pub fn load() -> Result<Self> {
        let config_paths = [
            PathBuf::from("ecofed.toml"),
            PathBuf::from("config.toml"),
            dirs::config_dir()
                .map(|p| p.join("ecofed/config.toml"))
                .unwrap_or_default(),
            dirs::home_dir()
                .map(|p| p.join(".ecofed/config.toml"))
                .unwrap_or_default(),
        ];

        for path in &config_paths {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }

    /// Load from an explicit path when given, else the default locations.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
                tracing::info!("Loading config from: {}", expanded);
                Self::from_file(expanded)
            }
            None => Self::load(),
        }
    }

    /// Validate settings that do not depend on the catalog.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must be non-zero".to_string()).into());
        }
        if self.interpreter.max_tokens == 0 {
            return Err(
                ConfigError::Invalid("interpreter.max_tokens must be positive".to_string()).into(),
            );
        }
        if !(0.0..=1.0).contains(&self.interpreter.unmatched_penalty) {
            return Err(ConfigError::Invalid(
                "interpreter.unmatched_penalty must be within [0, 1]".to_string(),
            )
            .into());
        }

        let d = &self.dispatcher;
        if d.default_limit == 0 || d.max_limit == 0 || d.max_fetch_rows == 0 {
            return Err(ConfigError::Invalid("dispatcher limits must be positive".to_string()).into());
        }
        if d.default_limit > d.max_limit {
            return Err(ConfigError::Invalid(format!(
                "dispatcher.default_limit ({}) exceeds dispatcher.max_limit ({})",
                d.default_limit, d.max_limit
            ))
            .into());
        }
        if d.store_timeout_ms == 0 || self.monitor.deadline_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".to_string()).into());
        }

        let mut names = std::collections::HashSet::new();
        for store in &self.stores {
            if store.name.trim().is_empty() {
                return Err(ConfigError::MissingField("stores.name".to_string()).into());
            }
            if !names.insert(store.name.as_str()) {
                return Err(
                    ConfigError::Invalid(format!("duplicate store: {}", store.name)).into(),
                );
            }
            if store.kind == StoreKind::Drill && store.url.trim().is_empty() {
                return Err(ConfigError::MissingField(format!("stores.{}.url", store.name)).into());
            }
        }

        if self.auth.enabled && self.auth.method == AuthMethod::Jwt {
            // The secret may also come from the environment; checked at
            // authentication time.
            if self.auth.jwt.issuer.is_empty() || self.auth.jwt.audience.is_empty() {
                return Err(ConfigError::MissingField("auth.jwt.issuer/audience".to_string()).into());
            }
        }

        Ok(())
    }

    /// Build the schema catalog and check it against the configured stores
    /// and role lists.
    pub fn load_catalog(&self) -> Result<SchemaCatalog> {
        let catalog = match &self.catalog.path {
            Some(path) => {
                let expanded = shellexpand::tilde(path).into_owned();
                SchemaCatalog::from_file(expanded)?
            }
            None => SchemaCatalog::builtin(),
        };

        let stores: Vec<&str> = self.stores.iter().map(|s| s.name.as_str()).collect();
        catalog.check_stores(&stores)?;

        for role in Role::ALL {
            for entity in self.roles.get(role).unwrap_or_default() {
                if catalog.entity(entity).is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "roles.{} names unknown entity {}",
                        role, entity
                    ))
                    .into());
                }
            }
        }

        Ok(catalog)
    }

    /// Permissions for a role: the configured list, else catalog defaults.
    pub fn role_context(&self, role: Role, catalog: &SchemaCatalog) -> RoleContext {
        match self.roles.get(role) {
            Some(entities) => RoleContext::new(
                role,
                entities
                    .iter()
                    .filter_map(|e| catalog.entity(e).map(|schema| schema.name.clone())),
            ),
            None => RoleContext::for_role(role, catalog),
        }
    }

    pub fn store(&self, name: &str) -> Option<&StoreConfig> {
        self.stores.iter().find(|s| s.name == name)
    }
}

// ============================================================================
// Server
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allow cross-origin requests from the dashboard
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            enable_cors: true,
        }
    }
}

// ============================================================================
// Query pipeline
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Tokens beyond this count are ignored
    pub max_tokens: usize,
    /// Confidence lost per unmatched content word
    pub unmatched_penalty: f64,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            max_tokens: 64,
            unmatched_penalty: 0.15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Per sub-query timeout in milliseconds
    pub store_timeout_ms: u64,
    /// Row limit when the question names none
    pub default_limit: usize,
    /// Upper bound on any requested limit
    pub max_limit: usize,
    /// Row cap per sub-query fetched for in-process joins and aggregates
    pub max_fetch_rows: usize,
    /// Let stores compute single-entity aggregates natively. Values a store
    /// cannot read are then skipped, not reported as dropped rows.
    pub pushdown_aggregates: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: 5000,
            default_limit: 20,
            max_limit: 500,
            max_fetch_rows: 10_000,
            pushdown_aggregates: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Shared deadline for all pings in milliseconds
    pub deadline_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { deadline_ms: 2000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Questions kept in the API audit trail; 0 disables it
    pub max_entries: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_entries: crate::audit::DEFAULT_CAPACITY,
        }
    }
}

// ============================================================================
// Authentication
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    #[default]
    ApiKey,
    Jwt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyEntry {
    pub key: String,
    #[serde(default)]
    pub user: Option<String>,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    /// HMAC secret; falls back to `ECOFED_JWT_SECRET`
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    /// Token lifetime; 0 disables expiry validation
    pub expiry_secs: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            issuer: "ecofed".to_string(),
            audience: "ecofed-dashboard".to_string(),
            expiry_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub method: AuthMethod,
    pub api_keys: Vec<ApiKeyEntry>,
    pub jwt: JwtConfig,
    /// Role applied to every request while authentication is disabled
    pub default_role: Role,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            method: AuthMethod::ApiKey,
            api_keys: Vec::new(),
            jwt: JwtConfig::default(),
            default_role: Role::Researcher,
        }
    }
}

/// Optional per-role entity lists overriding catalog defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RolesConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub researcher: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_provider: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub administrator: Option<Vec<String>>,
}

impl RolesConfig {
    pub fn get(&self, role: Role) -> Option<&[String]> {
        match role {
            Role::Researcher => self.researcher.as_deref(),
            Role::DataProvider => self.data_provider.as_deref(),
            Role::Administrator => self.administrator.as_deref(),
        }
    }
}

// ============================================================================
// Stores
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Apache Drill REST endpoint
    #[default]
    Drill,
    /// In-process rows, optionally seeded from a JSON file
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Identifier referenced by catalog entities
    pub name: String,
    #[serde(default)]
    pub kind: StoreKind,
    /// Drill base URL
    #[serde(default)]
    pub url: String,
    /// Drill workspace prefix, e.g. `postgres.public`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    /// JSON seed file for memory stores: `{"<source>": [rows]}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Ping timeout in milliseconds
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
}

fn default_ping_timeout_ms() -> u64 {
    2000
}

impl StoreConfig {
    pub fn drill(name: impl Into<String>, url: impl Into<String>, workspace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: StoreKind::Drill,
            url: url.into(),
            workspace: Some(workspace.into()),
            data: None,
            ping_timeout_ms: default_ping_timeout_ms(),
        }
    }

    pub fn memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: StoreKind::Memory,
            url: String::new(),
            workspace: None,
            data: None,
            ping_timeout_ms: default_ping_timeout_ms(),
        }
    }

    /// Expanded seed file path.
    pub fn data_path(&self) -> Option<PathBuf> {
        self.data
            .as_ref()
            .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
    }
}

/// The platform's three federated sources behind one Drill instance.
pub fn default_stores() -> Vec<StoreConfig> {
    const DRILL_URL: &str = "http://localhost:8047";
    vec![
        StoreConfig::drill(POSTGRES, DRILL_URL, "postgres.public"),
        StoreConfig::drill(MONGODB, DRILL_URL, "mongo.environmental_db"),
        StoreConfig::drill(DRILL, DRILL_URL, "dfs.data"),
    ]
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// TOML file with `[[entities]]`; the built-in catalog when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}
