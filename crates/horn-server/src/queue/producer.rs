//! Publishes `InitializeNotificationRequest` messages to Twins

use std::sync::Arc;

use async_trait::async_trait;
use lapin::options::BasicPublishOptions;
use lapin::{BasicProperties, Channel};
use parking_lot::RwLock;
use prost::Message;
use tracing::{debug, warn};

use horn_api::TWINS_INITIALIZE_NOTIFY_QUEUE;
use horn_api::notify::InitializeNotificationRequest;
use horn_common::{HornError, HornErrorType, Result};
use horn_core::NotificationRequestPublisher;
use horn_core::service::circuit_breaker::{CircuitBreaker, CircuitBreakerError, with_circuit_breaker};

/// Map a broker error to the retryable messaging failure
pub fn mq_error(e: lapin::Error) -> HornError {
    HornError::MqTemporary(e.to_string())
}

/// Producer bound to the channel of the current broker session.
///
/// The supervisor swaps the channel on every reconnect.
pub struct AmqpNotificationProducer {
    channel: RwLock<Option<Channel>>,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl AmqpNotificationProducer {
    pub fn new(circuit_breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            channel: RwLock::new(None),
            circuit_breaker,
        }
    }

    pub fn set_channel(&self, channel: Option<Channel>) {
        *self.channel.write() = channel;
    }

    pub fn is_connected(&self) -> bool {
        self.channel
            .read()
            .as_ref()
            .is_some_and(|channel| channel.status().connected())
    }

    async fn publish(channel: &Channel, payload: &[u8]) -> Result<()> {
        channel
            .basic_publish(
                "",
                TWINS_INITIALIZE_NOTIFY_QUEUE,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default(),
            )
            .await
            .map_err(mq_error)?
            .await
            .map_err(mq_error)?;
        Ok(())
    }
}

#[async_trait]
impl NotificationRequestPublisher for AmqpNotificationProducer {
    async fn send_initialize_notification(&self, client_id: &str) -> Result<()> {
        let Some(channel) = self.channel.read().clone() else {
            warn!(client_id, "No broker channel, initialize notification dropped");
            return Err(HornError::new(
                HornErrorType::RabbitMqConnectionError,
                "RabbitMQ channel is not available",
            ));
        };

        let payload = InitializeNotificationRequest {
            client_id: client_id.to_string(),
        }
        .encode_to_vec();

        match with_circuit_breaker(&self.circuit_breaker, Self::publish(&channel, &payload)).await {
            Ok(()) => {
                debug!(client_id, "Initialize notification published");
                Ok(())
            }
            Err(CircuitBreakerError::CircuitOpen) => Err(HornError::MqTemporary(
                "RabbitMQ circuit breaker OPEN".to_string(),
            )),
            Err(CircuitBreakerError::OperationFailed(e)) => Err(e),
        }
    }
}
