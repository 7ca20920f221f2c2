//! Periodic expiry sweep over client sessions

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use horn_core::ClientSessionService;

use super::ShutdownSignal;

/// Run `handle_expired_sessions` with a fixed delay between sweeps
pub fn start_session_scheduler(
    sessions: Arc<ClientSessionService>,
    interval: Duration,
    shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    let mut shutdown_rx = shutdown.subscribe();

    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "Session expiry scheduler started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown_rx.recv() => break,
            }

            match sessions.handle_expired_sessions(Utc::now()).await {
                Ok(report) => debug!(
                    warned = report.warned,
                    closed = report.closed,
                    "Session expiry sweep finished"
                ),
                Err(e) => error!("Session expiry sweep failed: {}", e),
            }
        }
        info!("Session expiry scheduler stopped");
    })
}
