//! Fan-out of Twins notifications to Twinface streams

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, error};

use horn_api::build_update;
use horn_api::notify::{ResponseStatus, TwinsNotifyResponse};
use horn_api::subscribe::{TwinEventType, TwinfaceSubscribeUpdate, UpdateStatus};
use horn_common::Result;
use horn_persistence::BatchPayload;

use crate::model::DeliveryReport;
use crate::service::batch::DataBatchService;
use crate::service::registry::ConnectionRegistry;

pub struct TwinfaceGrpcNotifier {
    registry: Arc<ConnectionRegistry>,
    batches: Option<Arc<DataBatchService>>,
}

impl TwinfaceGrpcNotifier {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            batches: None,
        }
    }

    /// Keep notifications for offline clients as pending batches
    pub fn with_batches(mut self, batches: Arc<DataBatchService>) -> Self {
        self.batches = Some(batches);
        self
    }

    pub fn stores_batches(&self) -> bool {
        self.batches.is_some()
    }

    /// Push one notification to every addressed client and store batches
    /// for the ones without a live stream
    pub async fn notify_clients(&self, response: &TwinsNotifyResponse) -> Result<DeliveryReport> {
        let mut report = self.dispatch(response);
        if report.is_skipped() {
            return Ok(report);
        }

        let progress = BatchProgress::default();
        self.store_undelivered(&report, &progress).await?;
        report.batched = progress.batched();
        Ok(report)
    }

    /// Broadcast the update once; no persistence involved
    pub fn dispatch(&self, response: &TwinsNotifyResponse) -> DeliveryReport {
        if response.twin_id.is_empty() {
            error!(
                update_id = %response.update_id,
                "Notification without twin id skipped"
            );
            return DeliveryReport::skipped();
        }

        let update = to_subscribe_update(response);
        let mut report = DeliveryReport {
            twin_id: response.twin_id.clone(),
            ..Default::default()
        };

        for client_id in response.client_ids.iter().filter(|id| !id.is_empty()) {
            if self.registry.broadcast(client_id, &update).is_delivered() {
                report.delivered.push(client_id.clone());
            } else {
                report.undelivered.push(client_id.clone());
            }
        }

        debug!(
            twin_id = %report.twin_id,
            delivered = report.delivered.len(),
            undelivered = report.undelivered.len(),
            "Notification dispatched"
        );
        report
    }

    /// Store batches for the undelivered clients of `report`.
    ///
    /// Resumes after the last client stored through `progress`, so a failed
    /// call can be repeated without duplicating rows.
    pub async fn store_undelivered(
        &self,
        report: &DeliveryReport,
        progress: &BatchProgress,
    ) -> Result<()> {
        let Some(batches) = &self.batches else {
            return Ok(());
        };

        let payload = BatchPayload {
            twin_id: report.twin_id.clone(),
            client_ids: report.undelivered.clone(),
        };
        while let Some(client_id) = report.undelivered.get(progress.processed()) {
            if batches.save_client_batch(&payload, client_id).await? {
                progress.batched.fetch_add(1, Ordering::SeqCst);
            }
            progress.processed.fetch_add(1, Ordering::SeqCst);
        }

        if progress.batched() > 0 {
            debug!(
                twin_id = %report.twin_id,
                batched = progress.batched(),
                "Pending batches stored"
            );
        }
        Ok(())
    }
}

/// Position reached by [`TwinfaceGrpcNotifier::store_undelivered`]
#[derive(Debug, Default)]
pub struct BatchProgress {
    processed: AtomicUsize,
    batched: AtomicUsize,
}

impl BatchProgress {
    /// Undelivered clients already handled
    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    /// Batches stored so far
    pub fn batched(&self) -> usize {
        self.batched.load(Ordering::SeqCst)
    }
}

fn map_status(status: i32) -> UpdateStatus {
    match ResponseStatus::try_from(status) {
        Ok(ResponseStatus::Success) | Ok(ResponseStatus::Partial) => UpdateStatus::Success,
        Ok(ResponseStatus::Error) => UpdateStatus::InternalError,
        Err(_) => UpdateStatus::GeneralError,
    }
}

/// Client-facing update carrying the id and timestamp assigned by Twins
pub fn to_subscribe_update(response: &TwinsNotifyResponse) -> TwinfaceSubscribeUpdate {
    let mut update = build_update(
        TwinEventType::TwinUpdate,
        map_status(response.status),
        vec![response.twin_id.clone()],
        "",
    );
    update.update_id = response.update_id.clone();
    update.timestamp = response.timestamp.clone();
    update
}
