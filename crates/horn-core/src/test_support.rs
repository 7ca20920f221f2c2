// Shared fakes for unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use horn_common::{HornError, Result};
use horn_persistence::{
    BatchPersistence, BatchStatus, ClientSessionInfo, DataBatchInfo, MemoryPersistService,
    PersistenceService, SessionPersistence, SessionStatus, StorageMode,
};

use crate::service::auth::{IntrospectionClient, TokenIntrospection};

/// Store whose every operation fails
pub struct FailingStore;

#[async_trait]
impl PersistenceService for FailingStore {
    fn storage_mode(&self) -> StorageMode {
        StorageMode::Memory
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        anyhow::bail!("storage offline")
    }
}

#[async_trait]
impl SessionPersistence for FailingStore {
    async fn session_upsert(&self, _session: &ClientSessionInfo) -> anyhow::Result<()> {
        anyhow::bail!("storage offline")
    }

    async fn session_find(&self, _client_id: Uuid) -> anyhow::Result<Option<ClientSessionInfo>> {
        anyhow::bail!("storage offline")
    }

    async fn session_find_expired(
        &self,
        _status: SessionStatus,
        _before: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ClientSessionInfo>> {
        anyhow::bail!("storage offline")
    }

    async fn session_update_status(
        &self,
        _client_ids: &[Uuid],
        _status: SessionStatus,
    ) -> anyhow::Result<u64> {
        anyhow::bail!("storage offline")
    }
}

#[async_trait]
impl BatchPersistence for FailingStore {
    async fn batch_insert(&self, _batch: &DataBatchInfo) -> anyhow::Result<()> {
        anyhow::bail!("storage offline")
    }

    async fn batch_claim(
        &self,
        _client_id: Uuid,
        _from: BatchStatus,
        _to: BatchStatus,
    ) -> anyhow::Result<Vec<DataBatchInfo>> {
        anyhow::bail!("storage offline")
    }

    async fn batch_update_status(
        &self,
        _batch_ids: &[Uuid],
        _status: BatchStatus,
    ) -> anyhow::Result<u64> {
        anyhow::bail!("storage offline")
    }

    async fn batch_reset_status(&self, _from: BatchStatus, _to: BatchStatus) -> anyhow::Result<u64> {
        anyhow::bail!("storage offline")
    }
}

/// Memory store whose batch inserts fail once `ok_inserts` have succeeded,
/// until [`heal`](Self::heal) is called
pub struct FlakyBatchStore {
    pub inner: MemoryPersistService,
    ok_inserts: AtomicU32,
    healed: AtomicBool,
}

impl FlakyBatchStore {
    pub fn failing_after(ok_inserts: u32) -> Self {
        Self {
            inner: MemoryPersistService::new(),
            ok_inserts: AtomicU32::new(ok_inserts),
            healed: AtomicBool::new(false),
        }
    }

    pub fn heal(&self) {
        self.healed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PersistenceService for FlakyBatchStore {
    fn storage_mode(&self) -> StorageMode {
        StorageMode::Memory
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl SessionPersistence for FlakyBatchStore {
    async fn session_upsert(&self, session: &ClientSessionInfo) -> anyhow::Result<()> {
        self.inner.session_upsert(session).await
    }

    async fn session_find(&self, client_id: Uuid) -> anyhow::Result<Option<ClientSessionInfo>> {
        self.inner.session_find(client_id).await
    }

    async fn session_find_expired(
        &self,
        status: SessionStatus,
        before: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ClientSessionInfo>> {
        self.inner.session_find_expired(status, before).await
    }

    async fn session_update_status(
        &self,
        client_ids: &[Uuid],
        status: SessionStatus,
    ) -> anyhow::Result<u64> {
        self.inner.session_update_status(client_ids, status).await
    }
}

#[async_trait]
impl BatchPersistence for FlakyBatchStore {
    async fn batch_insert(&self, batch: &DataBatchInfo) -> anyhow::Result<()> {
        let admitted = self.healed.load(Ordering::SeqCst)
            || self
                .ok_inserts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if !admitted {
            anyhow::bail!("insert rejected");
        }
        self.inner.batch_insert(batch).await
    }

    async fn batch_claim(
        &self,
        client_id: Uuid,
        from: BatchStatus,
        to: BatchStatus,
    ) -> anyhow::Result<Vec<DataBatchInfo>> {
        self.inner.batch_claim(client_id, from, to).await
    }

    async fn batch_update_status(
        &self,
        batch_ids: &[Uuid],
        status: BatchStatus,
    ) -> anyhow::Result<u64> {
        self.inner.batch_update_status(batch_ids, status).await
    }

    async fn batch_reset_status(&self, from: BatchStatus, to: BatchStatus) -> anyhow::Result<u64> {
        self.inner.batch_reset_status(from, to).await
    }
}

/// Introspection answering only for known tokens
#[derive(Default)]
pub struct MockIntrospection {
    tokens: HashMap<String, TokenIntrospection>,
    calls: AtomicU32,
}

impl MockIntrospection {
    pub fn with_token(token: &str, info: TokenIntrospection) -> Self {
        let mut tokens = HashMap::new();
        tokens.insert(token.to_string(), info);
        Self {
            tokens,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IntrospectionClient for MockIntrospection {
    async fn introspect(&self, token: &str) -> Result<TokenIntrospection> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| HornError::unauthorized("Invalid response from introspection service"))
    }
}

/// Active introspection result expiring `expires_in_secs` from now
pub fn introspection(client_id: &str, expires_in_secs: i64) -> TokenIntrospection {
    TokenIntrospection {
        active: Some(true),
        client_id: client_id.to_string(),
        exp: Utc::now().timestamp() + expires_in_secs,
        ..Default::default()
    }
}
