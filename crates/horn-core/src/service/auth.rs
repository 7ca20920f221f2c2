//! OAuth2 token introspection against the Twins auth service
//!
//! Tokens are validated by POSTing them to the introspection endpoint. Valid
//! results are cached until the token expires or the cache TTL passes,
//! whichever comes first.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::Expiry;
use moka::sync::Cache;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use horn_common::{HornError, HornErrorType, Result, token_digest};

use crate::service::session::ClientSessionService;

/// Default lifetime of a cached introspection result
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
const DEFAULT_CACHE_CAPACITY: u64 = 10_000;

/// Introspection response body
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenIntrospection {
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default, alias = "client_id")]
    pub client_id: String,
    /// Expiry in epoch seconds
    #[serde(default)]
    pub exp: i64,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenIntrospection {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

#[async_trait]
pub trait IntrospectionClient: Send + Sync {
    async fn introspect(&self, token: &str) -> Result<TokenIntrospection>;
}

/// Introspection over HTTP
pub struct HttpIntrospectionClient {
    http_client: Client,
    url: String,
}

impl HttpIntrospectionClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()
            .map_err(|e| {
                HornError::new(
                    HornErrorType::IntrospectServiceConnectionError,
                    format!("Failed to build HTTP client: {}", e),
                )
            })?;

        Ok(Self {
            http_client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl IntrospectionClient for HttpIntrospectionClient {
    async fn introspect(&self, token: &str) -> Result<TokenIntrospection> {
        debug!("Introspecting token via {}", self.url);

        let response = self
            .http_client
            .post(&self.url)
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await
            .map_err(|e| {
                HornError::new(
                    HornErrorType::IntrospectServiceConnectionError,
                    format!("Failed to introspect token: {}", e),
                )
            })?;

        if !response.status().is_success() {
            return Err(HornError::unauthorized(format!(
                "Invalid response from introspection service: {}",
                response.status()
            )));
        }

        response.json::<TokenIntrospection>().await.map_err(|e| {
            HornError::unauthorized(format!("Invalid response from introspection service: {}", e))
        })
    }
}

/// Per-entry expiry: the configured TTL, cut short by the token's own `exp`
struct TokenExpiry {
    ttl: Duration,
}

impl Expiry<String, TokenIntrospection> for TokenExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &TokenIntrospection,
        _created_at: Instant,
    ) -> Option<Duration> {
        let remaining = (value.exp - Utc::now().timestamp()).max(0) as u64;
        Some(self.ttl.min(Duration::from_secs(remaining)))
    }
}

pub struct TokenIntrospectService {
    client: Arc<dyn IntrospectionClient>,
    sessions: Arc<ClientSessionService>,
    cache: Cache<String, TokenIntrospection>,
}

impl TokenIntrospectService {
    pub fn new(client: Arc<dyn IntrospectionClient>, sessions: Arc<ClientSessionService>) -> Self {
        Self::with_cache_ttl(client, sessions, DEFAULT_CACHE_TTL)
    }

    pub fn with_cache_ttl(
        client: Arc<dyn IntrospectionClient>,
        sessions: Arc<ClientSessionService>,
        ttl: Duration,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(DEFAULT_CACHE_CAPACITY)
            .expire_after(TokenExpiry { ttl })
            .build();

        Self {
            client,
            sessions,
            cache,
        }
    }

    /// Validate a raw bearer token and record the client session
    pub async fn validate_token(&self, token: &str) -> Result<TokenIntrospection> {
        let key = token_digest(token);
        let now = Utc::now().timestamp();

        if let Some(info) = self.cache.get(&key)
            && info.exp > now
        {
            return Ok(info);
        }

        let info = self.client.introspect(token).await?;

        if info.active == Some(false) {
            return Err(HornError::unauthorized("Token is not active"));
        }
        if info.exp <= now {
            return Err(HornError::unauthorized("Token expired"));
        }

        let client_id = Uuid::parse_str(&info.client_id).map_err(|_| {
            warn!(client_id = %info.client_id, "Introspection returned a non-UUID client id");
            HornError::input(format!("Invalid client id: {}", info.client_id))
        })?;

        self.sessions
            .save_client_session(client_id, token, info.expires_at())
            .await?;

        self.cache.insert(key, info.clone());
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::registry::ConnectionRegistry;
    use crate::test_support::{MockIntrospection, introspection};
    use horn_persistence::{MemoryPersistService, SessionPersistence, SessionStatus};

    fn service(
        mock: Arc<MockIntrospection>,
    ) -> (Arc<MemoryPersistService>, TokenIntrospectService) {
        let store = Arc::new(MemoryPersistService::new());
        let sessions = Arc::new(ClientSessionService::new(
            store.clone(),
            Arc::new(ConnectionRegistry::new()),
        ));
        (store, TokenIntrospectService::new(mock, sessions))
    }

    #[test]
    fn test_introspection_accepts_both_client_id_spellings() {
        let camel: TokenIntrospection =
            serde_json::from_str(r#"{"active":true,"clientId":"abc","exp":10}"#).unwrap();
        let snake: TokenIntrospection =
            serde_json::from_str(r#"{"client_id":"abc","exp":10}"#).unwrap();
        assert_eq!(camel.client_id, "abc");
        assert_eq!(snake.client_id, "abc");
        assert_eq!(snake.active, None);
    }

    #[tokio::test]
    async fn test_valid_token_saves_session_and_is_cached() {
        let client_id = Uuid::new_v4();
        let mock = Arc::new(MockIntrospection::with_token(
            "good",
            introspection(&client_id.to_string(), 3600),
        ));
        let (store, service) = service(mock.clone());

        let info = service.validate_token("good").await.unwrap();
        assert_eq!(info.client_id, client_id.to_string());
        let again = service.validate_token("good").await.unwrap();
        assert_eq!(again, info);
        assert_eq!(mock.calls(), 1);

        let session = store.session_find(client_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.expires_at, info.expires_at());
    }

    #[tokio::test]
    async fn test_inactive_token_rejected() {
        let mut info = introspection(&Uuid::new_v4().to_string(), 3600);
        info.active = Some(false);
        let (_, service) = service(Arc::new(MockIntrospection::with_token("t", info)));

        let err = service.validate_token("t").await.unwrap_err();
        assert_eq!(err.error_type(), Some(HornErrorType::Unauthorized));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let info = introspection(&Uuid::new_v4().to_string(), -10);
        let (_, service) = service(Arc::new(MockIntrospection::with_token("t", info)));

        let err = service.validate_token("t").await.unwrap_err();
        assert_eq!(err.error_type(), Some(HornErrorType::Unauthorized));
    }

    #[tokio::test]
    async fn test_non_uuid_client_rejected_as_input_error() {
        let info = introspection("twinface-web", 3600);
        let (store, service) = service(Arc::new(MockIntrospection::with_token("t", info)));

        let err = service.validate_token("t").await.unwrap_err();
        assert_eq!(err.error_type(), Some(HornErrorType::InputDataError));
        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_token_not_cached() {
        let mock = Arc::new(MockIntrospection::default());
        let (_, service) = service(mock.clone());

        assert!(service.validate_token("nope").await.is_err());
        assert!(service.validate_token("nope").await.is_err());
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_http_client_transport_error() {
        let client =
            HttpIntrospectionClient::new("http://127.0.0.1:1/introspect", Duration::from_secs(1))
                .unwrap();

        let err = client.introspect("token").await.unwrap_err();
        assert_eq!(
            err.error_type(),
            Some(HornErrorType::IntrospectServiceConnectionError)
        );
        assert!(err.is_retryable());
    }
}
