//! SQL-based persistence backend (PostgreSQL via SeaORM)
//!
//! This module implements the persistence traits with direct SeaORM queries
//! against the `client_session` and `data_batch` tables.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{prelude::Expr, sea_query::OnConflict, *};
use uuid::Uuid;

use crate::entity::{client_session, data_batch};
use crate::model::*;
use crate::traits::*;

/// External database persistence service
///
/// Wraps a SeaORM `DatabaseConnection` and implements all persistence traits
/// by issuing queries directly.
pub struct ExternalDbPersistService {
    db: DatabaseConnection,
}

impl ExternalDbPersistService {
    /// Create a new ExternalDbPersistService with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn session_from_model(model: client_session::Model) -> anyhow::Result<ClientSessionInfo> {
    let status = model
        .status
        .parse::<SessionStatus>()
        .map_err(anyhow::Error::msg)?;
    Ok(ClientSessionInfo {
        client_id: model.client_id,
        token: model.token,
        created_at: model.created_at.with_timezone(&Utc),
        expires_at: model.expires_at.map(|ts| ts.with_timezone(&Utc)),
        status,
    })
}

fn batch_from_model(model: data_batch::Model) -> anyhow::Result<DataBatchInfo> {
    let status = model
        .status
        .parse::<BatchStatus>()
        .map_err(anyhow::Error::msg)?;
    let batch_data = match model.batch_data {
        Some(value) => serde_json::from_value(value)?,
        None => BatchPayload::default(),
    };
    Ok(DataBatchInfo {
        batch_id: model.batch_id,
        client_session_id: model.client_session_id,
        created_at: model.created_at.with_timezone(&Utc),
        batch_data,
        status,
    })
}

// ============================================================================
// PersistenceService implementation
// ============================================================================

#[async_trait]
impl PersistenceService for ExternalDbPersistService {
    fn storage_mode(&self) -> StorageMode {
        StorageMode::ExternalDb
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        self.db.ping().await?;
        Ok(())
    }
}

// ============================================================================
// SessionPersistence implementation
// ============================================================================

#[async_trait]
impl SessionPersistence for ExternalDbPersistService {
    async fn session_upsert(&self, session: &ClientSessionInfo) -> anyhow::Result<()> {
        let model = client_session::ActiveModel {
            client_id: Set(session.client_id),
            token: Set(session.token.clone()),
            created_at: Set(session.created_at.fixed_offset()),
            expires_at: Set(session.expires_at.map(|ts| ts.fixed_offset())),
            status: Set(session.status.to_string()),
        };

        client_session::Entity::insert(model)
            .on_conflict(
                OnConflict::column(client_session::Column::ClientId)
                    .update_columns([
                        client_session::Column::Token,
                        client_session::Column::CreatedAt,
                        client_session::Column::ExpiresAt,
                        client_session::Column::Status,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        Ok(())
    }

    async fn session_find(&self, client_id: Uuid) -> anyhow::Result<Option<ClientSessionInfo>> {
        client_session::Entity::find_by_id(client_id)
            .one(&self.db)
            .await?
            .map(session_from_model)
            .transpose()
    }

    async fn session_find_expired(
        &self,
        status: SessionStatus,
        before: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ClientSessionInfo>> {
        client_session::Entity::find()
            .filter(client_session::Column::Status.eq(status.as_str()))
            .filter(client_session::Column::ExpiresAt.lt(before.fixed_offset()))
            .all(&self.db)
            .await?
            .into_iter()
            .map(session_from_model)
            .collect()
    }

    async fn session_update_status(
        &self,
        client_ids: &[Uuid],
        status: SessionStatus,
    ) -> anyhow::Result<u64> {
        if client_ids.is_empty() {
            return Ok(0);
        }

        let result = client_session::Entity::update_many()
            .col_expr(client_session::Column::Status, Expr::value(status.as_str()))
            .filter(client_session::Column::ClientId.is_in(client_ids.iter().copied()))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected)
    }
}

// ============================================================================
// BatchPersistence implementation
// ============================================================================

#[async_trait]
impl BatchPersistence for ExternalDbPersistService {
    async fn batch_insert(&self, batch: &DataBatchInfo) -> anyhow::Result<()> {
        let model = data_batch::ActiveModel {
            batch_id: Set(batch.batch_id),
            client_session_id: Set(batch.client_session_id),
            created_at: Set(batch.created_at.fixed_offset()),
            batch_data: Set(Some(serde_json::to_value(&batch.batch_data)?)),
            status: Set(batch.status.to_string()),
        };

        data_batch::Entity::insert(model)
            .exec_without_returning(&self.db)
            .await?;

        Ok(())
    }

    async fn batch_claim(
        &self,
        client_id: Uuid,
        from: BatchStatus,
        to: BatchStatus,
    ) -> anyhow::Result<Vec<DataBatchInfo>> {
        // UPDATE .. RETURNING: concurrent claims never see the same row twice
        let mut claimed = data_batch::Entity::update_many()
            .col_expr(data_batch::Column::Status, Expr::value(to.as_str()))
            .filter(data_batch::Column::ClientSessionId.eq(client_id))
            .filter(data_batch::Column::Status.eq(from.as_str()))
            .exec_with_returning(&self.db)
            .await?
            .into_iter()
            .map(batch_from_model)
            .collect::<anyhow::Result<Vec<_>>>()?;
        claimed.sort_by_key(|batch| batch.created_at);
        Ok(claimed)
    }

    async fn batch_update_status(
        &self,
        batch_ids: &[Uuid],
        status: BatchStatus,
    ) -> anyhow::Result<u64> {
        if batch_ids.is_empty() {
            return Ok(0);
        }

        let result = data_batch::Entity::update_many()
            .col_expr(data_batch::Column::Status, Expr::value(status.as_str()))
            .filter(data_batch::Column::BatchId.is_in(batch_ids.iter().copied()))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected)
    }

    async fn batch_reset_status(&self, from: BatchStatus, to: BatchStatus) -> anyhow::Result<u64> {
        let result = data_batch::Entity::update_many()
            .col_expr(data_batch::Column::Status, Expr::value(to.as_str()))
            .filter(data_batch::Column::Status.eq(from.as_str()))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn session_model(client_id: Uuid, status: &str) -> client_session::Model {
        let now = Utc::now().fixed_offset();
        client_session::Model {
            client_id,
            token: "digest".to_string(),
            created_at: now,
            expires_at: Some(now - Duration::minutes(1)),
            status: status.to_string(),
        }
    }

    #[tokio::test]
    async fn test_session_find_maps_model() {
        let client_id = Uuid::new_v4();
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![session_model(client_id, "WARNING")]])
            .into_connection();
        let service = ExternalDbPersistService::new(db);

        let found = service.session_find(client_id).await.unwrap().unwrap();
        assert_eq!(found.client_id, client_id);
        assert_eq!(found.status, SessionStatus::Warning);
        assert!(found.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_session_find_rejects_unknown_status() {
        let client_id = Uuid::new_v4();
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![session_model(client_id, "BROKEN")]])
            .into_connection();
        let service = ExternalDbPersistService::new(db);

        assert!(service.session_find(client_id).await.is_err());
    }

    #[tokio::test]
    async fn test_session_find_expired_returns_all_rows() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![
                session_model(Uuid::new_v4(), "ACTIVE"),
                session_model(Uuid::new_v4(), "ACTIVE"),
            ]])
            .into_connection();
        let service = ExternalDbPersistService::new(db);

        let expired = service
            .session_find_expired(SessionStatus::Active, Utc::now())
            .await
            .unwrap();
        assert_eq!(expired.len(), 2);
    }

    #[tokio::test]
    async fn test_session_upsert_executes_insert() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();
        let service = ExternalDbPersistService::new(db);

        let session = ClientSessionInfo {
            client_id: Uuid::new_v4(),
            token: "digest".to_string(),
            created_at: Utc::now(),
            expires_at: None,
            status: SessionStatus::Active,
        };
        service.session_upsert(&session).await.unwrap();
    }

    #[tokio::test]
    async fn test_session_update_status_reports_rows() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 2,
            }])
            .into_connection();
        let service = ExternalDbPersistService::new(db);

        let ids = [Uuid::new_v4(), Uuid::new_v4()];
        let updated = service
            .session_update_status(&ids, SessionStatus::Closed)
            .await
            .unwrap();
        assert_eq!(updated, 2);

        // Empty input never reaches the database
        let updated = service
            .session_update_status(&[], SessionStatus::Closed)
            .await
            .unwrap();
        assert_eq!(updated, 0);
    }

    fn batch_model(client_id: Uuid, twin_id: &str, age_secs: i64) -> data_batch::Model {
        data_batch::Model {
            batch_id: Uuid::new_v4(),
            client_session_id: client_id,
            created_at: (Utc::now() - Duration::seconds(age_secs)).fixed_offset(),
            batch_data: Some(serde_json::json!({"twinId": twin_id, "clientIds": ["a"]})),
            status: "PROCESSING".to_string(),
        }
    }

    #[tokio::test]
    async fn test_batch_claim_decodes_and_orders_returned_rows() {
        let client_id = Uuid::new_v4();
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![
                batch_model(client_id, "t-new", 0),
                batch_model(client_id, "t-old", 60),
            ]])
            .into_connection();
        let service = ExternalDbPersistService::new(db);

        let batches = service
            .batch_claim(client_id, BatchStatus::Pending, BatchStatus::Processing)
            .await
            .unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].batch_data.twin_id, "t-old");
        assert_eq!(batches[0].batch_data.client_ids, vec!["a".to_string()]);
        assert_eq!(batches[1].status, BatchStatus::Processing);
    }

    #[tokio::test]
    async fn test_batch_reset_status_reports_rows() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 3,
            }])
            .into_connection();
        let service = ExternalDbPersistService::new(db);

        let reset = service
            .batch_reset_status(BatchStatus::Processing, BatchStatus::Pending)
            .await
            .unwrap();
        assert_eq!(reset, 3);
    }
}
