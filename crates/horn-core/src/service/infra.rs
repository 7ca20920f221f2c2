//! Infrastructure health reporting to connected clients

use std::sync::Arc;

use tonic::Status;
use tracing::{debug, error, warn};

use horn_api::heartbeat;
use horn_api::subscribe::UpdateStatus;

use crate::service::registry::ConnectionRegistry;

/// Sends heartbeats and terminations to every open stream
#[derive(Clone)]
pub struct InfrastructureNotifier {
    registry: Arc<ConnectionRegistry>,
}

impl InfrastructureNotifier {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Heartbeat for a recoverable problem, e.g. a retry in progress
    pub fn notify_transient_error(&self, message: &str) {
        debug!("Broadcasting transient error: {}", message);
        self.registry
            .broadcast_all(&heartbeat(UpdateStatus::TransientError, message));
    }

    /// Heartbeat for an outage that outlived the retry budget
    pub fn notify_unavailable(&self, message: &str) {
        warn!("Broadcasting unavailable: {}", message);
        self.registry
            .broadcast_all(&heartbeat(UpdateStatus::Unavailable, message));
    }

    pub fn terminate_streams(&self, message: &str) {
        error!("Terminating all streams: {}", message);
        self.registry.fail_all(Status::internal(message));
    }

    pub fn terminate_streams_data_loss(&self, message: &str) {
        error!("Terminating all streams with data loss: {}", message);
        self.registry.fail_all(Status::data_loss(message));
    }
}
