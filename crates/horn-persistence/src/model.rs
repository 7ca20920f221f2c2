//! Domain model types for persistence operations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Storage backend kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StorageMode {
    /// External database (PostgreSQL via SeaORM)
    #[default]
    ExternalDb,
    /// Process-local maps, nothing survives a restart
    Memory,
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageMode::ExternalDb => write!(f, "external_db"),
            StorageMode::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "external_db" => Ok(StorageMode::ExternalDb),
            "memory" => Ok(StorageMode::Memory),
            _ => Err(format!("Invalid storage mode: {}", s)),
        }
    }
}

/// Lifecycle of a client session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    #[default]
    Active,
    /// Token expired, client has been warned
    Warning,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Warning => "WARNING",
            SessionStatus::Closed => "CLOSED",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(SessionStatus::Active),
            "WARNING" => Ok(SessionStatus::Warning),
            "CLOSED" => Ok(SessionStatus::Closed),
            _ => Err(format!("Invalid session status: {}", s)),
        }
    }
}

/// Processing state of a stored batch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BatchStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "PENDING",
            BatchStatus::Processing => "PROCESSING",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(BatchStatus::Pending),
            "PROCESSING" => Ok(BatchStatus::Processing),
            "COMPLETED" => Ok(BatchStatus::Completed),
            "FAILED" => Ok(BatchStatus::Failed),
            _ => Err(format!("Invalid batch status: {}", s)),
        }
    }
}

/// Client session as stored by every backend
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSessionInfo {
    pub client_id: Uuid,
    /// Token digest, never the raw token
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
}

/// JSON document kept in `data_batch.batch_data`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPayload {
    pub twin_id: String,
    pub client_ids: Vec<String>,
}

/// Pending notification for one client
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataBatchInfo {
    pub batch_id: Uuid,
    pub client_session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub batch_data: BatchPayload,
    pub status: BatchStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            SessionStatus::Active,
            SessionStatus::Warning,
            SessionStatus::Closed,
        ] {
            assert_eq!(status.to_string().parse::<SessionStatus>(), Ok(status));
        }
        assert!("EXPIRED".parse::<SessionStatus>().is_err());
        assert_eq!("COMPLETED".parse::<BatchStatus>(), Ok(BatchStatus::Completed));
        assert_eq!("memory".parse::<StorageMode>(), Ok(StorageMode::Memory));
    }

    #[test]
    fn test_batch_payload_json_shape() {
        let payload = BatchPayload {
            twin_id: "twin-1".to_string(),
            client_ids: vec!["c1".to_string()],
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json, serde_json::json!({"twinId": "twin-1", "clientIds": ["c1"]}));
    }
}
