//! Data batch persistence trait

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{BatchStatus, DataBatchInfo};

/// Pending notification batch persistence operations
#[async_trait]
pub trait BatchPersistence: Send + Sync {
    /// Insert a new batch
    async fn batch_insert(&self, batch: &DataBatchInfo) -> anyhow::Result<()>;

    /// Move the batches of one client from `from` to `to` in one step,
    /// returning the moved batches oldest first
    async fn batch_claim(
        &self,
        client_id: Uuid,
        from: BatchStatus,
        to: BatchStatus,
    ) -> anyhow::Result<Vec<DataBatchInfo>>;

    /// Set the status of the given batches, returning the number of rows touched
    async fn batch_update_status(
        &self,
        batch_ids: &[Uuid],
        status: BatchStatus,
    ) -> anyhow::Result<u64>;

    /// Move every batch in `from` to `to`, returning the number of rows touched
    async fn batch_reset_status(&self, from: BatchStatus, to: BatchStatus) -> anyhow::Result<u64>;
}
