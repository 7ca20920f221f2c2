//! gRPC bearer-token authentication
//!
//! Every call must carry `authorization: Bearer <token>` metadata. The token
//! is checked through [`TokenIntrospectService`].

use std::sync::Arc;

use tonic::Status;
use tonic::metadata::MetadataMap;
use tracing::{error, info};

use horn_common::{AUTHORIZATION_HEADER, BEARER_PREFIX};

use crate::service::auth::{TokenIntrospectService, TokenIntrospection};

/// gRPC Authentication Service
#[derive(Clone)]
pub struct AuthInterceptor {
    introspect: Option<Arc<TokenIntrospectService>>,
}

impl AuthInterceptor {
    pub fn new(introspect: Arc<TokenIntrospectService>) -> Self {
        Self {
            introspect: Some(introspect),
        }
    }

    /// Accept every call without a token
    pub fn disabled() -> Self {
        Self { introspect: None }
    }

    /// Check if auth is enabled
    pub fn is_auth_enabled(&self) -> bool {
        self.introspect.is_some()
    }

    /// Validate the bearer token of a call.
    ///
    /// Returns `Ok(None)` when authentication is disabled.
    pub async fn authenticate(
        &self,
        metadata: &MetadataMap,
    ) -> Result<Option<TokenIntrospection>, Status> {
        let Some(introspect) = &self.introspect else {
            return Ok(None);
        };

        let Some(token) = bearer_token(metadata) else {
            error!("Authentication failed: missing or invalid Authorization header");
            return Err(Status::unauthenticated("Missing bearer token"));
        };

        match introspect.validate_token(token).await {
            Ok(info) => {
                info!(client_id = %info.client_id, "Authentication succeeded");
                Ok(Some(info))
            }
            Err(e) => {
                error!("Authentication failed: {}", e);
                Err(Status::unauthenticated("Invalid token"))
            }
        }
    }
}

/// Token following a case-insensitive `Bearer ` prefix
fn bearer_token(metadata: &MetadataMap) -> Option<&str> {
    let header = metadata.get(AUTHORIZATION_HEADER)?.to_str().ok()?;
    let prefix = header.get(..BEARER_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(BEARER_PREFIX) {
        return None;
    }
    let token = &header[BEARER_PREFIX.len()..];
    (!token.trim().is_empty()).then_some(token)
}
