// In-memory persistence backend
// Keeps sessions and batches in concurrent maps; used for local runs and tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::model::{BatchStatus, ClientSessionInfo, DataBatchInfo, SessionStatus, StorageMode};
use crate::traits::PersistenceService;
use crate::traits::batch::BatchPersistence;
use crate::traits::session::SessionPersistence;

/// Process-local persistence
#[derive(Default)]
pub struct MemoryPersistService {
    sessions: DashMap<Uuid, ClientSessionInfo>,
    batches: DashMap<Uuid, DataBatchInfo>,
}

impl MemoryPersistService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn batch_count_with(&self, status: BatchStatus) -> usize {
        self.batches
            .iter()
            .filter(|entry| entry.status == status)
            .count()
    }
}

#[async_trait]
impl PersistenceService for MemoryPersistService {
    fn storage_mode(&self) -> StorageMode {
        StorageMode::Memory
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl SessionPersistence for MemoryPersistService {
    async fn session_upsert(&self, session: &ClientSessionInfo) -> anyhow::Result<()> {
        self.sessions.insert(session.client_id, session.clone());
        Ok(())
    }

    async fn session_find(&self, client_id: Uuid) -> anyhow::Result<Option<ClientSessionInfo>> {
        Ok(self.sessions.get(&client_id).map(|entry| entry.value().clone()))
    }

    async fn session_find_expired(
        &self,
        status: SessionStatus,
        before: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ClientSessionInfo>> {
        Ok(self
            .sessions
            .iter()
            .filter(|entry| {
                entry.status == status && entry.expires_at.is_some_and(|exp| exp < before)
            })
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn session_update_status(
        &self,
        client_ids: &[Uuid],
        status: SessionStatus,
    ) -> anyhow::Result<u64> {
        let mut updated = 0;
        for client_id in client_ids {
            if let Some(mut entry) = self.sessions.get_mut(client_id) {
                entry.status = status;
                updated += 1;
            }
        }
        Ok(updated)
    }
}

#[async_trait]
impl BatchPersistence for MemoryPersistService {
    async fn batch_insert(&self, batch: &DataBatchInfo) -> anyhow::Result<()> {
        if !self.sessions.contains_key(&batch.client_session_id) {
            anyhow::bail!(
                "client session {} does not exist for batch {}",
                batch.client_session_id,
                batch.batch_id
            );
        }
        self.batches.insert(batch.batch_id, batch.clone());
        Ok(())
    }

    async fn batch_claim(
        &self,
        client_id: Uuid,
        from: BatchStatus,
        to: BatchStatus,
    ) -> anyhow::Result<Vec<DataBatchInfo>> {
        // Status is checked and changed under the shard lock of each entry
        let mut claimed: Vec<DataBatchInfo> = self
            .batches
            .iter_mut()
            .filter_map(|mut entry| {
                if entry.client_session_id != client_id || entry.status != from {
                    return None;
                }
                entry.status = to;
                Some(entry.value().clone())
            })
            .collect();
        claimed.sort_by_key(|batch| batch.created_at);
        Ok(claimed)
    }

    async fn batch_update_status(
        &self,
        batch_ids: &[Uuid],
        status: BatchStatus,
    ) -> anyhow::Result<u64> {
        let mut updated = 0;
        for batch_id in batch_ids {
            if let Some(mut entry) = self.batches.get_mut(batch_id) {
                entry.status = status;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn batch_reset_status(&self, from: BatchStatus, to: BatchStatus) -> anyhow::Result<u64> {
        let mut updated = 0;
        for mut entry in self.batches.iter_mut() {
            if entry.status == from {
                entry.status = to;
                updated += 1;
            }
        }
        Ok(updated)
    }
}
