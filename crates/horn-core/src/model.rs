// Core data models shared by the services and handlers

use serde::{Deserialize, Serialize};

/// Peer of a gRPC call, attached to the request by [`context_interceptor`]
///
/// [`context_interceptor`]: crate::service::remote::context_interceptor
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMeta {
    /// `ip:port` of the peer, `unknown` when the transport has none
    pub remote_addr: String,
    /// Accept time in millis joined with the peer address
    pub connection_id: String,
}

/// Result of pushing one broker notification to connected clients
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub twin_id: String,
    /// Clients reached on at least one stream
    pub delivered: Vec<String>,
    /// Clients with no live stream
    pub undelivered: Vec<String>,
    /// Pending batches stored for undelivered clients
    pub batched: usize,
}

impl DeliveryReport {
    pub fn skipped() -> Self {
        Self::default()
    }

    pub fn is_skipped(&self) -> bool {
        self.twin_id.is_empty()
    }
}

/// How the queue consumer disposed of a delivery
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Skipped,
    Failed,
}
