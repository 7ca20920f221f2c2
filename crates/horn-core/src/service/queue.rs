//! Broker-facing message handling
//!
//! Decodes `twins-notify` deliveries and pushes them to connected clients
//! under retry and circuit-breaker protection. The AMQP plumbing itself lives
//! in the server crate; this module only sees payload bytes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use prost::Message;
use tracing::{debug, error};

use horn_api::notify::TwinsNotifyResponse;
use horn_common::{HornError, Result};

use crate::model::{DeliveryOutcome, DeliveryReport};
use crate::service::circuit_breaker::{CircuitBreaker, CircuitBreakerError, with_circuit_breaker};
use crate::service::infra::InfrastructureNotifier;
use crate::service::notifier::{BatchProgress, TwinfaceGrpcNotifier};
use crate::service::retry::RetryWithBackoff;

pub const DEFAULT_PAYLOAD_ERROR_THRESHOLD: u32 = 5;

/// Publishes requests back to Twins
#[async_trait]
pub trait NotificationRequestPublisher: Send + Sync {
    /// Ask Twins to push initial state for a freshly subscribed client
    async fn send_initialize_notification(&self, client_id: &str) -> Result<()>;
}

pub struct TwinsNotificationsConsumer {
    notifier: Arc<TwinfaceGrpcNotifier>,
    infra: InfrastructureNotifier,
    circuit_breaker: Arc<CircuitBreaker>,
    retry: RetryWithBackoff,
    payload_error_threshold: u32,
    consecutive_payload_errors: AtomicU32,
}

impl TwinsNotificationsConsumer {
    pub fn new(
        notifier: Arc<TwinfaceGrpcNotifier>,
        infra: InfrastructureNotifier,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            notifier,
            infra,
            circuit_breaker,
            retry: RetryWithBackoff::default(),
            payload_error_threshold: DEFAULT_PAYLOAD_ERROR_THRESHOLD,
            consecutive_payload_errors: AtomicU32::new(0),
        }
    }

    pub fn with_retry(mut self, retry: RetryWithBackoff) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_payload_error_threshold(mut self, threshold: u32) -> Self {
        self.payload_error_threshold = threshold;
        self
    }

    pub fn consecutive_payload_errors(&self) -> u32 {
        self.consecutive_payload_errors.load(Ordering::SeqCst)
    }

    /// Process one delivery body.
    ///
    /// Never fails: the caller acknowledges the delivery whatever the outcome.
    pub async fn handle_delivery(&self, payload: &[u8]) -> DeliveryOutcome {
        metrics::counter!("horn_notifications_received_total").increment(1);

        let response = match TwinsNotifyResponse::decode(payload) {
            Ok(response) => {
                self.consecutive_payload_errors.store(0, Ordering::SeqCst);
                response
            }
            Err(e) => {
                let failures = self.consecutive_payload_errors.fetch_add(1, Ordering::SeqCst) + 1;
                metrics::counter!("horn_payload_errors_total").increment(1);
                error!(
                    consecutive = failures,
                    "Failed to deserialize twins notification: {}", e
                );
                if failures > self.payload_error_threshold {
                    self.infra.terminate_streams_data_loss(&format!(
                        "Repeated payload deserialization errors ({})",
                        failures
                    ));
                }
                return DeliveryOutcome::Skipped;
            }
        };

        debug!(
            update_id = %response.update_id,
            twin_id = %response.twin_id,
            clients = response.client_ids.len(),
            "Processing twins notification"
        );

        match self.process(&response).await {
            Ok(report) if report.is_skipped() => DeliveryOutcome::Skipped,
            Ok(_) => DeliveryOutcome::Delivered,
            Err(HornError::Internal(message)) => {
                error!("Internal logic error detected, terminating streams: {}", message);
                metrics::counter!("horn_notifications_failed_total").increment(1);
                self.infra.terminate_streams(&message);
                DeliveryOutcome::Failed
            }
            Err(e) => {
                error!("All retry attempts for twins notification failed: {}", e);
                metrics::counter!("horn_notifications_failed_total").increment(1);
                DeliveryOutcome::Failed
            }
        }
    }

    /// Broadcast once, then store batches for offline clients under retry
    /// and circuit-breaker protection
    async fn process(&self, response: &TwinsNotifyResponse) -> Result<DeliveryReport> {
        let mut report = self.notifier.dispatch(response);
        if report.is_skipped() || report.undelivered.is_empty() || !self.notifier.stores_batches() {
            return Ok(report);
        }

        let progress = BatchProgress::default();
        {
            let notifier = &self.notifier;
            let circuit_breaker = &self.circuit_breaker;
            let infra = &self.infra;
            let pending = &report;
            let progress = &progress;

            self.retry
                .execute(
                    move || async move {
                        match with_circuit_breaker(
                            circuit_breaker,
                            notifier.store_undelivered(pending, progress),
                        )
                        .await
                        {
                            Ok(()) => Ok(()),
                            Err(CircuitBreakerError::CircuitOpen) => Err(HornError::MqTemporary(
                                "RabbitMQ circuit breaker OPEN".to_string(),
                            )),
                            Err(CircuitBreakerError::OperationFailed(e)) => Err(e),
                        }
                    },
                    HornError::is_retryable,
                    |attempt, err| {
                        infra.notify_transient_error(&format!("Retry {} due to: {}", attempt, err))
                    },
                    |err| infra.notify_unavailable(&format!("RabbitMQ unavailable: {}", err)),
                )
                .await?;
        }

        report.batched = progress.batched();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use horn_api::notify::ResponseStatus;
    use horn_api::subscribe::UpdateStatus;
    use tokio::sync::mpsc;
    use tonic::Code;

    use crate::service::batch::DataBatchService;
    use crate::service::circuit_breaker::CircuitBreakerConfig;
    use crate::service::registry::ConnectionRegistry;
    use crate::test_support::FailingStore;
    use horn_persistence::{
        ClientSessionInfo, MemoryPersistService, SessionPersistence, SessionStatus,
    };

    fn consumer(registry: Arc<ConnectionRegistry>, notifier: TwinfaceGrpcNotifier) -> TwinsNotificationsConsumer {
        TwinsNotificationsConsumer::new(
            Arc::new(notifier),
            InfrastructureNotifier::new(registry),
            Arc::new(CircuitBreaker::new()),
        )
        .with_payload_error_threshold(2)
        .with_retry(RetryWithBackoff::new(
            3,
            Duration::from_millis(10),
            Duration::from_millis(20),
            2.0,
            Duration::from_secs(1),
        ))
    }

    fn payload(twin_id: &str, clients: &[&str]) -> Vec<u8> {
        TwinsNotifyResponse {
            update_id: "u-1".to_string(),
            twin_id: twin_id.to_string(),
            client_ids: clients.iter().map(|c| c.to_string()).collect(),
            timestamp: "2024-05-01T10:00:00.000Z".to_string(),
            status: ResponseStatus::Success as i32,
        }
        .encode_to_vec()
    }

    const GARBAGE: &[u8] = &[0xff, 0xff, 0xff, 0xff];

    #[tokio::test]
    async fn test_valid_delivery_reaches_client() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, mut rx) = mpsc::channel(8);
        registry.add("c1", tx);
        let consumer = consumer(registry.clone(), TwinfaceGrpcNotifier::new(registry));

        let outcome = consumer.handle_delivery(&payload("twin-1", &["c1"])).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered);
        let update = rx.recv().await.unwrap().unwrap();
        assert_eq!(update.updated_twin_ids, vec!["twin-1".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_twin_id_is_skipped() {
        let registry = Arc::new(ConnectionRegistry::new());
        let consumer = consumer(registry.clone(), TwinfaceGrpcNotifier::new(registry));

        let outcome = consumer.handle_delivery(&payload("", &["c1"])).await;
        assert_eq!(outcome, DeliveryOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_payload_errors_terminate_streams_past_threshold() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, mut rx) = mpsc::channel(8);
        registry.add("c1", tx);
        let consumer = consumer(registry.clone(), TwinfaceGrpcNotifier::new(registry.clone()));

        assert_eq!(consumer.handle_delivery(GARBAGE).await, DeliveryOutcome::Skipped);
        assert_eq!(consumer.handle_delivery(GARBAGE).await, DeliveryOutcome::Skipped);
        assert_eq!(registry.subscriber_count(), 1);

        consumer.handle_delivery(GARBAGE).await;
        assert_eq!(consumer.consecutive_payload_errors(), 3);
        assert_eq!(registry.subscriber_count(), 0);
        let status = rx.recv().await.unwrap().unwrap_err();
        assert_eq!(status.code(), Code::DataLoss);
    }

    #[tokio::test]
    async fn test_good_payload_resets_error_counter() {
        let registry = Arc::new(ConnectionRegistry::new());
        let consumer = consumer(registry.clone(), TwinfaceGrpcNotifier::new(registry));

        consumer.handle_delivery(GARBAGE).await;
        consumer.handle_delivery(GARBAGE).await;
        consumer.handle_delivery(&payload("twin-1", &[])).await;
        assert_eq!(consumer.consecutive_payload_errors(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_sends_heartbeats_then_fails() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, mut rx) = mpsc::channel(32);
        registry.add("online", tx);
        let notifier = TwinfaceGrpcNotifier::new(registry.clone())
            .with_batches(Arc::new(DataBatchService::new(Arc::new(FailingStore))));
        let consumer = consumer(registry, notifier);

        let offline = uuid::Uuid::new_v4().to_string();
        let outcome = consumer
            .handle_delivery(&payload("twin-1", &["online", offline.as_str()]))
            .await;
        assert_eq!(outcome, DeliveryOutcome::Failed);

        let mut statuses = Vec::new();
        while let Ok(Ok(update)) = rx.try_recv() {
            statuses.push((update.status(), update.error_message));
        }

        // Retries only repeat the batch storage, the online client is notified once
        let updates = statuses
            .iter()
            .filter(|(s, _)| *s == UpdateStatus::Success)
            .count();
        assert_eq!(updates, 1);
        assert_eq!(statuses[0].0, UpdateStatus::Success);

        let transient: Vec<_> = statuses
            .iter()
            .filter(|(s, _)| *s == UpdateStatus::TransientError)
            .collect();
        assert_eq!(transient.len(), 2);
        assert!(transient[0].1.starts_with("Retry 1 due to: "));
        let unavailable: Vec<_> = statuses
            .iter()
            .filter(|(s, _)| *s == UpdateStatus::Unavailable)
            .collect();
        assert_eq!(unavailable.len(), 1);
        assert!(unavailable[0].1.starts_with("RabbitMQ unavailable: "));
    }

    #[tokio::test]
    async fn test_online_only_delivery_skips_batch_storage() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, mut rx) = mpsc::channel(8);
        registry.add("online", tx);
        let notifier = TwinfaceGrpcNotifier::new(registry.clone())
            .with_batches(Arc::new(DataBatchService::new(Arc::new(FailingStore))));
        let consumer = consumer(registry, notifier);

        let outcome = consumer.handle_delivery(&payload("twin-1", &["online"])).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered);
        assert_eq!(rx.recv().await.unwrap().unwrap().status(), UpdateStatus::Success);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_is_transient() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, mut rx) = mpsc::channel(32);
        registry.add("c1", tx);

        let breaker = Arc::new(CircuitBreaker::with_config(CircuitBreakerConfig {
            minimum_number_of_calls: 1,
            sliding_window_size: 1,
            ..Default::default()
        }));
        breaker.record_failure();

        let offline = uuid::Uuid::new_v4();
        let store = Arc::new(MemoryPersistService::new());
        store
            .session_upsert(&ClientSessionInfo {
                client_id: offline,
                token: "digest".to_string(),
                created_at: chrono::Utc::now(),
                expires_at: None,
                status: SessionStatus::Active,
            })
            .await
            .unwrap();
        let notifier = TwinfaceGrpcNotifier::new(registry.clone())
            .with_batches(Arc::new(DataBatchService::new(store.clone())));

        let consumer = TwinsNotificationsConsumer::new(
            Arc::new(notifier),
            InfrastructureNotifier::new(registry),
            breaker,
        )
        .with_retry(RetryWithBackoff::new(
            2,
            Duration::from_millis(10),
            Duration::from_millis(10),
            1.0,
            Duration::from_secs(1),
        ));

        let offline_id = offline.to_string();
        let outcome = consumer
            .handle_delivery(&payload("twin-1", &["c1", offline_id.as_str()]))
            .await;
        assert_eq!(outcome, DeliveryOutcome::Failed);
        assert_eq!(store.batch_count(), 0);

        let update = rx.recv().await.unwrap().unwrap();
        assert_eq!(update.status(), UpdateStatus::Success);
        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.status(), UpdateStatus::TransientError);
        assert!(first.error_message.contains("RabbitMQ circuit breaker OPEN"));
        let second = rx.recv().await.unwrap().unwrap();
        assert_eq!(second.status(), UpdateStatus::Unavailable);
    }
}
