use sea_orm_migration::prelude::*;

use crate::m20240501_000001_create_client_session::ClientSession;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DataBatch::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DataBatch::BatchId)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DataBatch::ClientSessionId).uuid().not_null())
                    .col(
                        ColumnDef::new(DataBatch::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(DataBatch::BatchData).json_binary())
                    .col(
                        ColumnDef::new(DataBatch::Status)
                            .string()
                            .not_null()
                            .default("PENDING"),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_data_batch_client_session")
                            .from(DataBatch::Table, DataBatch::ClientSessionId)
                            .to(ClientSession::Table, ClientSession::ClientId)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_data_batch_session_status")
                    .table(DataBatch::Table)
                    .col(DataBatch::ClientSessionId)
                    .col(DataBatch::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DataBatch::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DataBatch {
    Table,
    BatchId,
    ClientSessionId,
    CreatedAt,
    BatchData,
    Status,
}
