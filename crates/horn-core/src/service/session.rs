//! Client session bookkeeping and token-expiry sweeps

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use horn_api::session_event;
use horn_api::subscribe::TwinEventType;
use horn_common::{HornError, Result, token_digest};
use horn_persistence::{ClientSessionInfo, PersistenceService, SessionPersistence, SessionStatus};

use crate::service::registry::ConnectionRegistry;

/// Default seconds a warned session may stay open after its token expired
pub const DEFAULT_EXPIRY_GRACE_SECS: i64 = 300;

/// Counts produced by one expiry sweep
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExpiryReport {
    pub warned: usize,
    pub closed: usize,
}

pub struct ClientSessionService {
    persistence: Arc<dyn PersistenceService>,
    registry: Arc<ConnectionRegistry>,
    grace: Duration,
}

impl ClientSessionService {
    pub fn new(persistence: Arc<dyn PersistenceService>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            persistence,
            registry,
            grace: Duration::seconds(DEFAULT_EXPIRY_GRACE_SECS),
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Store or refresh the session of `client_id` as ACTIVE
    pub async fn save_client_session(
        &self,
        client_id: Uuid,
        token: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let session = ClientSessionInfo {
            client_id,
            token: token_digest(token),
            created_at: Utc::now(),
            expires_at,
            status: SessionStatus::Active,
        };

        self.persistence
            .session_upsert(&session)
            .await
            .map_err(|e| HornError::database(format!("Failed to save client session: {}", e)))?;

        debug!(%client_id, "Client session saved");
        Ok(())
    }

    /// Warn clients whose token expired, then close those that ignored the warning
    pub async fn handle_expired_sessions(&self, now: DateTime<Utc>) -> Result<ExpiryReport> {
        let mut report = ExpiryReport::default();

        let just_expired = self
            .persistence
            .session_find_expired(SessionStatus::Active, now)
            .await
            .map_err(Self::sweep_error)?;
        if !just_expired.is_empty() {
            let ids: Vec<Uuid> = just_expired.iter().map(|s| s.client_id).collect();
            for client_id in &ids {
                self.registry.broadcast(
                    &client_id.to_string(),
                    &session_event(TwinEventType::TokenExpiredWarning, "Token expired"),
                );
            }
            self.persistence
                .session_update_status(&ids, SessionStatus::Warning)
                .await
                .map_err(Self::sweep_error)?;
            report.warned = ids.len();
            metrics::counter!("horn_sessions_expired_total").increment(ids.len() as u64);
        }

        let deadline = now - self.grace;
        let stale = self
            .persistence
            .session_find_expired(SessionStatus::Warning, deadline)
            .await
            .map_err(Self::sweep_error)?;
        if !stale.is_empty() {
            let ids: Vec<Uuid> = stale.iter().map(|s| s.client_id).collect();
            for client_id in &ids {
                let client_id = client_id.to_string();
                self.registry.broadcast(
                    &client_id,
                    &session_event(TwinEventType::ConnectionClosed, "Session closed"),
                );
                self.registry.close_client(&client_id);
            }
            self.persistence
                .session_update_status(&ids, SessionStatus::Closed)
                .await
                .map_err(Self::sweep_error)?;
            report.closed = ids.len();
        }

        if report != ExpiryReport::default() {
            info!(
                warned = report.warned,
                closed = report.closed,
                "Expired sessions processed"
            );
        }
        Ok(report)
    }

    fn sweep_error(e: anyhow::Error) -> HornError {
        HornError::database(format!("Failed to process expired sessions: {}", e))
    }
}
