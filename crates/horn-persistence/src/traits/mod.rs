//! Persistence traits for the storage abstraction layer
//!
//! This module defines the persistence traits shared by the external
//! database backend (PostgreSQL) and the in-memory backend.

pub mod batch;
pub mod session;

pub use batch::BatchPersistence;
pub use session::SessionPersistence;

use async_trait::async_trait;

use crate::model::StorageMode;

/// Unified persistence service trait
///
/// This is the main interface for all storage operations.
#[async_trait]
pub trait PersistenceService: SessionPersistence + BatchPersistence + Send + Sync {
    /// Get the current storage mode
    fn storage_mode(&self) -> StorageMode;

    /// Health check for the storage backend
    async fn health_check(&self) -> anyhow::Result<()>;
}
