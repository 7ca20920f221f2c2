use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ClientSession::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ClientSession::ClientId)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ClientSession::Token).string().not_null())
                    .col(
                        ColumnDef::new(ClientSession::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ClientSession::ExpiresAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(ClientSession::Status).string().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_client_session_status_expires")
                    .table(ClientSession::Table)
                    .col(ClientSession::Status)
                    .col(ClientSession::ExpiresAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ClientSession::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum ClientSession {
    Table,
    ClientId,
    Token,
    CreatedAt,
    ExpiresAt,
    Status,
}
