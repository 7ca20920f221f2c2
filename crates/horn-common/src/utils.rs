//! Utility functions for Horn
//!
//! Common helper functions used across the codebase.

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

/// Format a timestamp as RFC 3339 UTC with millisecond precision
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use horn_common::format_timestamp;
///
/// let ts = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
/// assert_eq!(format_timestamp(&ts), "2024-05-01T10:00:00.000Z");
/// ```
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time formatted with [`format_timestamp`]
pub fn now_rfc3339() -> String {
    format_timestamp(&Utc::now())
}

/// Fresh random update id
pub fn new_update_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// SHA-256 hex digest of a bearer token, used wherever a token is persisted
///
/// # Examples
///
/// ```
/// use horn_common::token_digest;
///
/// let digest = token_digest("secret");
/// assert_eq!(digest.len(), 64);
/// assert_eq!(digest, token_digest("secret"));
/// ```
pub fn token_digest(token: &str) -> String {
    const_hex::encode(Sha256::digest(token.as_bytes()))
}
