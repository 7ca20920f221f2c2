//! Horn Common - Shared types and utilities
//!
//! This crate provides the foundational types used across all Horn components:
//! - Error types and error codes
//! - Timestamp, identifier and digest helpers
//! - Common constants

pub mod error;
pub mod utils;

// Re-exports for convenience
pub use error::{ErrorCode, HornError, HornErrorType, Result};
pub use utils::{format_timestamp, new_update_id, now_rfc3339, token_digest};

/// Metadata key carrying the bearer token on gRPC calls
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Case-insensitive prefix of the authorization header value
pub const BEARER_PREFIX: &str = "bearer ";
