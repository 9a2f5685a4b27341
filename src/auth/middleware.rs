//! Authentication middleware for the HTTP surface.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::http::header::WWW_AUTHENTICATE;
use axum::http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use futures::future::BoxFuture;
use http_body::Body as HttpBody;
use tower::{Layer, Service};

use super::{AuthContext, Authenticator};
use crate::error::Result;

/// Paths served without credentials.
const PUBLIC_PATHS: &[&str] = &["/health", "/metrics"];

/// Auth middleware layer.
#[derive(Clone)]
pub struct AuthLayer {
    authenticator: Arc<Authenticator>,
}

impl AuthLayer {
    pub fn new(authenticator: Authenticator) -> Self {
        Self {
            authenticator: Arc::new(authenticator),
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            authenticator: self.authenticator.clone(),
        }
    }
}

/// Auth middleware service. Inserts an [`AuthContext`] into the request
/// extensions or answers 401.
#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    authenticator: Arc<Authenticator>,
}

impl<S> AuthMiddleware<S> {
    fn extract_auth_context(&self, headers: &HeaderMap) -> Result<AuthContext> {
        let auth_header = headers.get("authorization").and_then(|v| v.to_str().ok());
        let api_key_header = headers.get("x-api-key").and_then(|v| v.to_str().ok());
        self.authenticator.authenticate(auth_header, api_key_header)
    }
}

fn unauthorized<B: Default>() -> Response<B> {
    let mut response = Response::new(B::default());
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
        .headers_mut()
        .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    response
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for AuthMiddleware<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
    ResBody: HttpBody + Default + Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let auth_ctx = match self.extract_auth_context(req.headers()) {
            Ok(ctx) => ctx,
            Err(_) if PUBLIC_PATHS.contains(&req.uri().path()) => {
                AuthContext::anonymous(self.authenticator.default_role())
            }
            Err(e) => {
                tracing::debug!(path = %req.uri().path(), "Rejected request: {}", e);
                return Box::pin(async move { Ok(unauthorized()) });
            }
        };

        req.extensions_mut().insert(auth_ctx);

        let inner = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, inner);

        Box::pin(async move { inner.call(req).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiKeyEntry, AuthConfig, AuthMethod};
    use crate::query::Role;

    fn test_middleware() -> AuthMiddleware<()> {
        let auth = Authenticator::new(AuthConfig {
            enabled: true,
            method: AuthMethod::ApiKey,
            api_keys: vec![ApiKeyEntry {
                key: "test-key".to_string(),
                user: None,
                role: Role::DataProvider,
            }],
            ..AuthConfig::default()
        });
        AuthLayer::new(auth).layer(())
    }

    #[test]
    fn test_extract_auth_context() {
        let middleware = test_middleware();

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("test-key"));
        let ctx = middleware.extract_auth_context(&headers).unwrap();
        assert_eq!(ctx.role, Role::DataProvider);

        assert!(middleware.extract_auth_context(&HeaderMap::new()).is_err());
    }

    #[test]
    fn test_unauthorized_response() {
        let response: Response<String> = unauthorized();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[WWW_AUTHENTICATE], "Bearer");
    }
}
