//! Handshake authentication: credential in, tenant id out.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Authenticated principal as reported by an identity provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub subject: String,
    pub attributes: HashMap<String, String>,
}

impl Identity {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Failure reported by an identity provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Credential is invalid, expired or revoked
    #[error("credential rejected: {0}")]
    Rejected(String),

    /// Provider could not be reached
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// External identity provider. One validation per call, no retries.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn validate(&self, credential: &str) -> Result<Identity, ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("identity has no tenant provisioned")]
    TenantNotProvisioned,
}

impl AuthError {
    pub fn as_label(&self) -> &'static str {
        match self {
            AuthError::Unauthenticated => "unauthenticated",
            AuthError::TenantNotProvisioned => "tenant_not_provisioned",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
    }
}

/// Resolves a handshake credential to the tenant it belongs to.
pub struct AuthGate {
    provider: Arc<dyn IdentityProvider>,
    tenant_attribute: String,
}

impl AuthGate {
    pub fn new(provider: Arc<dyn IdentityProvider>, tenant_attribute: impl Into<String>) -> Self {
        Self {
            provider,
            tenant_attribute: tenant_attribute.into(),
        }
    }

    pub fn tenant_attribute(&self) -> &str {
        &self.tenant_attribute
    }

    #[tracing::instrument(skip_all)]
    pub async fn authenticate(&self, credential: Option<&str>) -> Result<String, AuthError> {
        let credential = match credential.map(str::trim) {
            Some(c) if !c.is_empty() => c,
            _ => {
                tracing::debug!("Handshake without credential");
                return Err(AuthError::Unauthenticated);
            }
        };

        let identity = match self.provider.validate(credential).await {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(error = %e, "Credential validation failed");
                return Err(AuthError::Unauthenticated);
            }
        };

        match identity.attribute(&self.tenant_attribute) {
            Some(tenant) if !tenant.trim().is_empty() => Ok(tenant.to_string()),
            _ => {
                tracing::error!(
                    subject = %identity.subject,
                    attribute = %self.tenant_attribute,
                    "Authenticated identity has no tenant provisioned"
                );
                Err(AuthError::TenantNotProvisioned)
            }
        }
    }
}

/// Pull the handshake credential from the query string or the
/// `Authorization` header. The query string wins.
pub fn extract_credential(query: &HashMap<String, String>, headers: &HeaderMap) -> Option<String> {
    let from_query = ["accessToken", "token"]
        .iter()
        .filter_map(|name| query.get(*name))
        .map(|v| v.trim())
        .find(|v| !v.is_empty());

    if let Some(token) = from_query {
        return Some(token.to_string());
    }

    let header = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .unwrap_or(header)
        .trim();

    (!token.is_empty()).then(|| token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticProvider {
        result: fn() -> Result<Identity, ProviderError>,
        calls: AtomicUsize,
    }

    impl StaticProvider {
        fn new(result: fn() -> Result<Identity, ProviderError>) -> Arc<Self> {
            Arc::new(Self {
                result,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl IdentityProvider for StaticProvider {
        async fn validate(&self, _credential: &str) -> Result<Identity, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    fn with_tenant() -> Result<Identity, ProviderError> {
        Ok(Identity {
            subject: "user-1".into(),
            attributes: HashMap::from([("custom:restaurant_id".into(), "r-9".into())]),
        })
    }

    fn without_tenant() -> Result<Identity, ProviderError> {
        Ok(Identity {
            subject: "user-1".into(),
            attributes: HashMap::new(),
        })
    }

    fn rejected() -> Result<Identity, ProviderError> {
        Err(ProviderError::Rejected("expired".into()))
    }

    fn gate(provider: Arc<StaticProvider>) -> AuthGate {
        AuthGate::new(provider, "custom:restaurant_id")
    }

    #[tokio::test]
    async fn test_valid_credential_resolves_tenant() {
        let gate = gate(StaticProvider::new(with_tenant));
        assert_eq!(gate.authenticate(Some("tok")).await, Ok("r-9".to_string()));
    }

    #[tokio::test]
    async fn test_tenant_attribute_is_not_normalized() {
        fn padded() -> Result<Identity, ProviderError> {
            Ok(Identity {
                subject: "user-1".into(),
                attributes: HashMap::from([("custom:restaurant_id".into(), " r1".into())]),
            })
        }

        let gate = gate(StaticProvider::new(padded));
        assert_eq!(gate.authenticate(Some("tok")).await, Ok(" r1".to_string()));
    }

    #[tokio::test]
    async fn test_missing_credential_skips_provider() {
        let provider = StaticProvider::new(with_tenant);
        let gate = gate(provider.clone());

        assert_eq!(gate.authenticate(None).await, Err(AuthError::Unauthenticated));
        assert_eq!(gate.authenticate(Some("  ")).await, Err(AuthError::Unauthenticated));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejected_credential_is_unauthenticated() {
        let gate = gate(StaticProvider::new(rejected));
        assert_eq!(gate.authenticate(Some("tok")).await, Err(AuthError::Unauthenticated));
    }

    #[tokio::test]
    async fn test_missing_tenant_attribute() {
        let gate = gate(StaticProvider::new(without_tenant));
        assert_eq!(
            gate.authenticate(Some("tok")).await,
            Err(AuthError::TenantNotProvisioned)
        );
    }

    #[test]
    fn test_extract_prefers_query() {
        let query = HashMap::from([("accessToken".to_string(), "from-query".to_string())]);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer from-header".parse().unwrap());

        assert_eq!(extract_credential(&query, &headers).as_deref(), Some("from-query"));
    }

    #[test]
    fn test_extract_token_alias() {
        let query = HashMap::from([("token".to_string(), "alias".to_string())]);
        assert_eq!(
            extract_credential(&query, &HeaderMap::new()).as_deref(),
            Some("alias")
        );
    }

    #[test]
    fn test_extract_raw_and_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "raw-token".parse().unwrap());
        assert_eq!(
            extract_credential(&HashMap::new(), &headers).as_deref(),
            Some("raw-token")
        );

        headers.insert(AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(
            extract_credential(&HashMap::new(), &headers).as_deref(),
            Some("abc")
        );
    }

    #[test]
    fn test_extract_nothing() {
        let query = HashMap::from([("accessToken".to_string(), "".to_string())]);
        assert_eq!(extract_credential(&query, &HeaderMap::new()), None);
    }

    #[test]
    fn test_auth_error_response() {
        let response = AuthError::TenantNotProvisioned.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
