//! Horn Persistence - Database entities and persistence layer
//!
//! This crate provides:
//! - SeaORM entity definitions for `client_session` and `data_batch`
//! - Persistence trait abstractions shared by every storage backend
//! - Domain model types for persistence operations

pub mod entity;
pub mod memory;
pub mod model;
pub mod sql;
pub mod traits;

// Re-export sea-orm for convenience
pub use sea_orm;

// Re-export entity prelude
pub use entity::prelude::*;

// Re-export persistence traits
pub use traits::{BatchPersistence, PersistenceService, SessionPersistence};

// Re-export SQL backend
pub use sql::ExternalDbPersistService;

// Re-export in-memory backend
pub use memory::MemoryPersistService;

// Re-export model types
pub use model::{
    BatchPayload, BatchStatus, ClientSessionInfo, DataBatchInfo, SessionStatus, StorageMode,
};
