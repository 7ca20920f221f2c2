//! Session persistence trait

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{ClientSessionInfo, SessionStatus};

/// Client session persistence operations
#[async_trait]
pub trait SessionPersistence: Send + Sync {
    /// Insert a session or replace the stored one with the same client id
    async fn session_upsert(&self, session: &ClientSessionInfo) -> anyhow::Result<()>;

    /// Find a session by client id
    async fn session_find(&self, client_id: Uuid) -> anyhow::Result<Option<ClientSessionInfo>>;

    /// Sessions in `status` whose `expires_at` is strictly before `before`
    async fn session_find_expired(
        &self,
        status: SessionStatus,
        before: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ClientSessionInfo>>;

    /// Set the status of the given sessions, returning the number of rows touched
    async fn session_update_status(
        &self,
        client_ids: &[Uuid],
        status: SessionStatus,
    ) -> anyhow::Result<u64>;
}
