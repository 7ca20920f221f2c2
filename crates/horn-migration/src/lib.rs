//! Horn database migrations
//!
//! Creates the `client_session` and `data_batch` tables.

pub use sea_orm_migration::prelude::*;

mod m20240501_000001_create_client_session;
mod m20240501_000002_create_data_batch;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240501_000001_create_client_session::Migration),
            Box::new(m20240501_000002_create_data_batch::Migration),
        ]
    }
}
