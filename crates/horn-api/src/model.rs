//! Common API constants and update builders
//!
//! Queue names, default ports and helpers that assemble
//! `TwinfaceSubscribeUpdate` messages with fresh ids and timestamps.

use horn_common::{new_update_id, now_rfc3339};

use crate::subscribe::{TwinEventType, TwinfaceSubscribeUpdate, UpdateStatus};

// Broker queues
pub const TWINS_NOTIFY_QUEUE: &str = "twins-notify";
pub const TWINS_INITIALIZE_NOTIFY_QUEUE: &str = "twins-initialize-notify";
pub const QUEUE_MESSAGE_TTL_ARG: &str = "x-message-ttl";

// Defaults
pub const DEFAULT_GRPC_PORT: u16 = 9090;
pub const DEFAULT_STREAM_BUFFER: usize = 128;
pub const DEFAULT_QUEUE_TTL_MS: i32 = 60_000;
pub const DEFAULT_CONSUMER_CONCURRENCY: u16 = 3;

/// Build an update stamped with a fresh id and the current time
pub fn build_update(
    event_type: TwinEventType,
    status: UpdateStatus,
    twin_ids: Vec<String>,
    error_message: impl Into<String>,
) -> TwinfaceSubscribeUpdate {
    let mut update = TwinfaceSubscribeUpdate {
        update_id: new_update_id(),
        timestamp: now_rfc3339(),
        updated_twin_ids: twin_ids,
        error_message: error_message.into(),
        ..Default::default()
    };
    update.set_event_type(event_type);
    update.set_status(status);
    update
}

/// First message sent on a freshly opened stream
pub fn initial_update() -> TwinfaceSubscribeUpdate {
    build_update(
        TwinEventType::TwinUpdate,
        UpdateStatus::Success,
        Vec::new(),
        "",
    )
}

/// Infrastructure heartbeat carrying a health status and a description
pub fn heartbeat(status: UpdateStatus, message: impl Into<String>) -> TwinfaceSubscribeUpdate {
    build_update(TwinEventType::TwinUpdate, status, Vec::new(), message)
}

/// Session lifecycle event, e.g. token expiry warning or forced close
pub fn session_event(
    event_type: TwinEventType,
    message: impl Into<String>,
) -> TwinfaceSubscribeUpdate {
    build_update(event_type, UpdateStatus::GeneralError, Vec::new(), message)
}
