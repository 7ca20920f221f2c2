//! Pending notification batches for clients that were offline

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use horn_common::{HornError, Result};
use horn_persistence::{
    BatchPayload, BatchPersistence, BatchStatus, DataBatchInfo, PersistenceService,
    SessionPersistence,
};

pub struct DataBatchService {
    persistence: Arc<dyn PersistenceService>,
}

impl DataBatchService {
    pub fn new(persistence: Arc<dyn PersistenceService>) -> Self {
        Self { persistence }
    }

    /// Store one PENDING batch per known client; returns the number stored
    pub async fn save_batch(&self, twin_id: &str, client_ids: &[String]) -> Result<usize> {
        let payload = BatchPayload {
            twin_id: twin_id.to_string(),
            client_ids: client_ids.to_vec(),
        };

        let mut saved = 0;
        for client_id in client_ids {
            if self.save_client_batch(&payload, client_id).await? {
                saved += 1;
            }
        }
        Ok(saved)
    }

    /// Store `payload` for one client; `false` when the client has no session
    pub async fn save_client_batch(&self, payload: &BatchPayload, client_id: &str) -> Result<bool> {
        let Ok(session_id) = Uuid::parse_str(client_id) else {
            debug!(client_id = %client_id, "Skipping batch for non-UUID client id");
            return Ok(false);
        };

        let session = self
            .persistence
            .session_find(session_id)
            .await
            .map_err(|e| HornError::database(format!("Failed to load client session: {}", e)))?;
        if session.is_none() {
            debug!(client_id = %client_id, "Skipping batch for client without session");
            return Ok(false);
        }

        let batch = DataBatchInfo {
            batch_id: Uuid::new_v4(),
            client_session_id: session_id,
            created_at: Utc::now(),
            batch_data: payload.clone(),
            status: BatchStatus::Pending,
        };
        self.persistence
            .batch_insert(&batch)
            .await
            .map_err(|e| HornError::database(format!("Failed to save data batch: {}", e)))?;
        Ok(true)
    }

    /// Claim the pending batches of `client_id`, oldest first.
    ///
    /// Claimed batches are PROCESSING until [`complete`](Self::complete) or
    /// [`release`](Self::release) settles them.
    pub async fn claim_pending(&self, client_id: &str) -> Result<Vec<DataBatchInfo>> {
        let Ok(session_id) = Uuid::parse_str(client_id) else {
            return Ok(Vec::new());
        };

        let batches = self
            .persistence
            .batch_claim(session_id, BatchStatus::Pending, BatchStatus::Processing)
            .await
            .map_err(|e| HornError::database(format!("Failed to claim data batches: {}", e)))?;
        if !batches.is_empty() {
            debug!(client_id, count = batches.len(), "Pending batches claimed");
        }
        Ok(batches)
    }

    /// Mark delivered batches COMPLETED
    pub async fn complete(&self, batch_ids: &[Uuid]) -> Result<()> {
        self.set_status(batch_ids, BatchStatus::Completed).await
    }

    /// Return undelivered batches to PENDING
    pub async fn release(&self, batch_ids: &[Uuid]) -> Result<()> {
        self.set_status(batch_ids, BatchStatus::Pending).await
    }

    /// Return batches left PROCESSING by a previous run to PENDING
    pub async fn requeue_interrupted(&self) -> Result<u64> {
        self.persistence
            .batch_reset_status(BatchStatus::Processing, BatchStatus::Pending)
            .await
            .map_err(|e| HornError::database(format!("Failed to requeue data batches: {}", e)))
    }

    async fn set_status(&self, batch_ids: &[Uuid], status: BatchStatus) -> Result<()> {
        self.persistence
            .batch_update_status(batch_ids, status)
            .await
            .map_err(|e| HornError::database(format!("Failed to update data batches: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use horn_common::HornErrorType;
    use horn_persistence::{ClientSessionInfo, MemoryPersistService, SessionStatus};

    async fn store_with_session(client_id: Uuid) -> Arc<MemoryPersistService> {
        let store = Arc::new(MemoryPersistService::new());
        store
            .session_upsert(&ClientSessionInfo {
                client_id,
                token: "digest".to_string(),
                created_at: Utc::now(),
                expires_at: None,
                status: SessionStatus::Active,
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_save_batch_only_for_known_sessions() {
        let known = Uuid::new_v4();
        let store = store_with_session(known).await;
        let service = DataBatchService::new(store.clone());

        let clients = vec![
            known.to_string(),
            Uuid::new_v4().to_string(),
            "not-a-uuid".to_string(),
        ];
        let saved = service.save_batch("twin-1", &clients).await.unwrap();
        assert_eq!(saved, 1);
        assert_eq!(store.batch_count(), 1);
    }

    #[tokio::test]
    async fn test_claim_pending_until_settled() {
        let client = Uuid::new_v4();
        let store = store_with_session(client).await;
        let service = DataBatchService::new(store.clone());
        let clients = vec![client.to_string()];

        service.save_batch("twin-1", &clients).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        service.save_batch("twin-2", &clients).await.unwrap();

        let claimed = service.claim_pending(&client.to_string()).await.unwrap();
        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].batch_data.twin_id, "twin-1");
        assert_eq!(claimed[0].batch_data.client_ids, clients);
        assert_eq!(store.batch_count_with(BatchStatus::Processing), 2);

        // A concurrent subscribe finds nothing left to claim
        assert!(service.claim_pending(&client.to_string()).await.unwrap().is_empty());

        service.complete(&[claimed[0].batch_id]).await.unwrap();
        service.release(&[claimed[1].batch_id]).await.unwrap();
        assert_eq!(store.batch_count_with(BatchStatus::Completed), 1);

        let again = service.claim_pending(&client.to_string()).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].batch_data.twin_id, "twin-2");
    }

    #[tokio::test]
    async fn test_requeue_interrupted_batches() {
        let client = Uuid::new_v4();
        let store = store_with_session(client).await;
        let service = DataBatchService::new(store.clone());

        service.save_batch("twin-1", &[client.to_string()]).await.unwrap();
        service.claim_pending(&client.to_string()).await.unwrap();

        assert_eq!(service.requeue_interrupted().await.unwrap(), 1);
        assert_eq!(store.batch_count_with(BatchStatus::Pending), 1);
    }

    #[tokio::test]
    async fn test_claim_pending_ignores_non_uuid() {
        let service = DataBatchService::new(Arc::new(MemoryPersistService::new()));
        assert!(service.claim_pending("legacy-id").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_is_retryable_db_error() {
        let service = DataBatchService::new(Arc::new(crate::test_support::FailingStore));
        let err = service
            .save_batch("twin", &[Uuid::new_v4().to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), Some(HornErrorType::DbDataProcessingError));
        assert!(err.is_retryable());
    }
}
