//! Authentication for the dashboard API.
//!
//! Credentials resolve to a dashboard [`Role`]: API keys carry the role
//! they were issued for, JWTs carry it in a `role` claim. With
//! authentication disabled every request runs as the configured default
//! role.

mod middleware;

use std::collections::HashMap;

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::{AuthConfig, AuthMethod};
use crate::error::{AuthError, Result};
use crate::query::Role;

pub use middleware::{AuthLayer, AuthMiddleware};

/// Authentication context from a validated request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: Option<String>,
    pub role: Role,
    /// No credentials were checked
    pub anonymous: bool,
    pub method: Option<String>,
}

impl AuthContext {
    /// Context for requests served while authentication is disabled.
    pub fn anonymous(role: Role) -> Self {
        Self {
            user_id: None,
            role,
            anonymous: true,
            method: None,
        }
    }

    pub fn authenticated(user_id: String, role: Role, method: &str) -> Self {
        Self {
            user_id: Some(user_id),
            role,
            anonymous: false,
            method: Some(method.to_string()),
        }
    }
}

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    /// Dashboard role name; any spelling [`Role::from_str`] accepts
    pub role: String,
}

#[derive(Debug, Clone)]
struct KeyGrant {
    user: Option<String>,
    role: Role,
}

/// Authenticator that validates credentials.
#[derive(Debug, Clone)]
pub struct Authenticator {
    config: AuthConfig,
    api_keys: HashMap<String, KeyGrant>,
}

impl Authenticator {
    /// Create a new authenticator from config.
    ///
    /// Keys from `ECOFED_API_KEYS` (`key:role[:user],...`) are added to the
    /// configured ones; entries with an unknown role are skipped.
    pub fn new(config: AuthConfig) -> Self {
        let mut api_keys: HashMap<String, KeyGrant> = config
            .api_keys
            .iter()
            .map(|entry| {
                (
                    entry.key.clone(),
                    KeyGrant {
                        user: entry.user.clone(),
                        role: entry.role,
                    },
                )
            })
            .collect();

        if let Ok(env_keys) = std::env::var("ECOFED_API_KEYS") {
            for (key, grant) in parse_key_list(&env_keys) {
                api_keys.insert(key, grant);
            }
        }

        Self { config, api_keys }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn default_role(&self) -> Role {
        self.config.default_role
    }

    /// Authenticate a request from its `Authorization` and `X-API-Key`
    /// headers.
    pub fn authenticate(
        &self,
        auth_header: Option<&str>,
        api_key_header: Option<&str>,
    ) -> Result<AuthContext> {
        if !self.config.enabled {
            return Ok(AuthContext::anonymous(self.config.default_role));
        }

        if let Some(key) = api_key_header {
            return self.authenticate_api_key(key);
        }

        if let Some(auth) = auth_header {
            let token = auth
                .strip_prefix("Bearer ")
                .ok_or(AuthError::InvalidCredentials)?;
            return match self.config.method {
                AuthMethod::ApiKey => self.authenticate_api_key(token),
                AuthMethod::Jwt => self.authenticate_jwt(token),
            };
        }

        Err(AuthError::MissingCredentials.into())
    }

    fn authenticate_api_key(&self, key: &str) -> Result<AuthContext> {
        let grant = self
            .api_keys
            .get(key)
            .ok_or(AuthError::InvalidCredentials)?;
        let user = grant
            .user
            .clone()
            .unwrap_or_else(|| format!("api-key:{}", key.chars().take(8).collect::<String>()));
        Ok(AuthContext::authenticated(user, grant.role, "api_key"))
    }

    fn authenticate_jwt(&self, token: &str) -> Result<AuthContext> {
        let secret = self.get_jwt_secret()?;

        let mut validation = Validation::default();
        validation.set_issuer(&[&self.config.jwt.issuer]);
        validation.set_audience(&[&self.config.jwt.audience]);
        if self.config.jwt.expiry_secs == 0 {
            validation.validate_exp = false;
        }

        let claims = decode::<JwtClaims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map_err(|e| AuthError::InvalidToken(e.to_string()))?
        .claims;

        let role = Role::from_str(&claims.role).ok_or(AuthError::UnknownRole(claims.role))?;
        Ok(AuthContext::authenticated(claims.sub, role, "jwt"))
    }

    /// Get the JWT secret from config or environment.
    fn get_jwt_secret(&self) -> Result<String> {
        if !self.config.jwt.secret.is_empty() {
            return Ok(self.config.jwt.secret.clone());
        }

        std::env::var("ECOFED_JWT_SECRET").map_err(|_| AuthError::MissingSecret.into())
    }

    /// Issue a JWT for a user and role.
    pub fn generate_jwt(&self, user_id: &str, role: Role) -> Result<String> {
        let secret = self.get_jwt_secret()?;
        let now = Utc::now();
        let expiry = if self.config.jwt.expiry_secs > 0 {
            now + Duration::seconds(self.config.jwt.expiry_secs as i64)
        } else {
            now + Duration::days(365)
        };

        let claims = JwtClaims {
            sub: user_id.to_string(),
            iss: self.config.jwt.issuer.clone(),
            aud: self.config.jwt.audience.clone(),
            exp: expiry.timestamp(),
            iat: now.timestamp(),
            role: role.as_str().to_string(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| AuthError::TokenGeneration(e.to_string()).into())
    }
}

fn parse_key_list(list: &str) -> Vec<(String, KeyGrant)> {
    list.split(',')
        .filter_map(|entry| {
            let mut parts = entry.trim().splitn(3, ':');
            let key = parts.next().filter(|k| !k.is_empty())?;
            let role = match parts.next().map(Role::from_str) {
                Some(Some(role)) => role,
                _ => {
                    tracing::warn!("Skipping API key entry without a valid role");
                    return None;
                }
            };
            let user = parts.next().filter(|u| !u.is_empty()).map(String::from);
            Some((key.to_string(), KeyGrant { user, role }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiKeyEntry, JwtConfig};
    use crate::error::EcofedError;

    fn test_config(method: AuthMethod) -> AuthConfig {
        AuthConfig {
            enabled: true,
            method,
            api_keys: vec![
                ApiKeyEntry {
                    key: "provider-key-12345".to_string(),
                    user: Some("station-7".to_string()),
                    role: Role::DataProvider,
                },
                ApiKeyEntry {
                    key: "researcher-key-678".to_string(),
                    user: None,
                    role: Role::Researcher,
                },
            ],
            jwt: JwtConfig {
                secret: "test-secret-key".to_string(),
                issuer: "ecofed".to_string(),
                audience: "ecofed-dashboard".to_string(),
                expiry_secs: 3600,
            },
            default_role: Role::Researcher,
        }
    }

    #[test]
    fn test_disabled_auth_uses_default_role() {
        let mut config = test_config(AuthMethod::ApiKey);
        config.enabled = false;
        config.default_role = Role::Administrator;
        let auth = Authenticator::new(config);

        let ctx = auth.authenticate(None, None).unwrap();
        assert!(ctx.anonymous);
        assert_eq!(ctx.role, Role::Administrator);
    }

    #[test]
    fn test_api_key_carries_role() {
        let auth = Authenticator::new(test_config(AuthMethod::ApiKey));

        let ctx = auth.authenticate(None, Some("provider-key-12345")).unwrap();
        assert_eq!(ctx.role, Role::DataProvider);
        assert_eq!(ctx.user_id.as_deref(), Some("station-7"));

        let ctx = auth.authenticate(Some("Bearer researcher-key-678"), None).unwrap();
        assert_eq!(ctx.role, Role::Researcher);
        assert_eq!(ctx.user_id.as_deref(), Some("api-key:research"));
    }

    #[test]
    fn test_api_key_user_from_multibyte_key() {
        let mut config = test_config(AuthMethod::ApiKey);
        config.api_keys.push(ApiKeyEntry {
            key: "xéééééééé".to_string(),
            user: None,
            role: Role::Researcher,
        });
        let auth = Authenticator::new(config);

        let ctx = auth.authenticate(None, Some("xéééééééé")).unwrap();
        assert_eq!(ctx.user_id.as_deref(), Some("api-key:xééééééé"));
    }

    #[test]
    fn test_invalid_and_missing_credentials() {
        let auth = Authenticator::new(test_config(AuthMethod::ApiKey));
        assert!(matches!(
            auth.authenticate(None, Some("wrong")),
            Err(EcofedError::Auth(AuthError::InvalidCredentials))
        ));
        assert!(matches!(
            auth.authenticate(Some("Basic dXNlcjpwYXNz"), None),
            Err(EcofedError::Auth(AuthError::InvalidCredentials))
        ));
        assert!(matches!(
            auth.authenticate(None, None),
            Err(EcofedError::Auth(AuthError::MissingCredentials))
        ));
    }

    #[test]
    fn test_jwt_round_trip() {
        let auth = Authenticator::new(test_config(AuthMethod::Jwt));
        let token = auth.generate_jwt("ana", Role::Administrator).unwrap();

        let header = format!("Bearer {}", token);
        let ctx = auth.authenticate(Some(&header), None).unwrap();
        assert_eq!(ctx.role, Role::Administrator);
        assert_eq!(ctx.user_id.as_deref(), Some("ana"));
        assert_eq!(ctx.method.as_deref(), Some("jwt"));
    }

    #[test]
    fn test_jwt_rejects_foreign_secret() {
        let auth = Authenticator::new(test_config(AuthMethod::Jwt));
        let mut other = test_config(AuthMethod::Jwt);
        other.jwt.secret = "another-secret".to_string();
        let token = Authenticator::new(other)
            .generate_jwt("mallory", Role::Administrator)
            .unwrap();

        let header = format!("Bearer {}", token);
        assert!(matches!(
            auth.authenticate(Some(&header), None),
            Err(EcofedError::Auth(AuthError::InvalidToken(_)))
        ));
    }

    #[test]
    fn test_parse_key_list() {
        let keys = parse_key_list("k1:researcher, k2:Data Provider:lab-3, k3:guest, :admin");
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].0, "k1");
        assert_eq!(keys[0].1.role, Role::Researcher);
        assert_eq!(keys[1].1.role, Role::DataProvider);
        assert_eq!(keys[1].1.user.as_deref(), Some("lab-3"));
    }
}
