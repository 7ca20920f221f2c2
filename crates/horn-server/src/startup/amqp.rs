//! AMQP wiring: queue declaration, consumers and the reconnecting supervisor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use futures::future::select_all;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicQosOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::message::Delivery;
use lapin::{Channel, Connection, ConnectionProperties, Consumer};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use horn_api::{QUEUE_MESSAGE_TTL_ARG, TWINS_INITIALIZE_NOTIFY_QUEUE, TWINS_NOTIFY_QUEUE};
use horn_common::{HornError, Result};
use horn_core::{InfrastructureNotifier, RetryWithBackoff, TwinsNotificationsConsumer};

use super::ShutdownSignal;
use crate::queue::AmqpNotificationProducer;
use crate::queue::producer::mq_error;

#[derive(Debug, Clone)]
pub struct AmqpConfig {
    pub url: String,
    /// `x-message-ttl` of the notify queue in milliseconds
    pub message_ttl_ms: i32,
    /// Consumers started on the notify queue, also the prefetch count
    pub concurrency: u16,
    /// Pause between two failed connection cycles
    pub reconnect_delay: Duration,
}

/// Arguments declaring the notify queue
pub fn notify_queue_arguments(message_ttl_ms: i32) -> FieldTable {
    let mut arguments = FieldTable::default();
    arguments.insert(QUEUE_MESSAGE_TTL_ARG.into(), AMQPValue::LongInt(message_ttl_ms));
    arguments
}

fn durable() -> QueueDeclareOptions {
    QueueDeclareOptions {
        durable: true,
        ..Default::default()
    }
}

/// Declare both queues on `channel`
pub async fn declare_queues(channel: &Channel, message_ttl_ms: i32) -> Result<()> {
    channel
        .queue_declare(
            TWINS_NOTIFY_QUEUE,
            durable(),
            notify_queue_arguments(message_ttl_ms),
        )
        .await
        .map_err(mq_error)?;
    channel
        .queue_declare(TWINS_INITIALIZE_NOTIFY_QUEUE, durable(), FieldTable::default())
        .await
        .map_err(mq_error)?;
    debug!(
        notify = TWINS_NOTIFY_QUEUE,
        initialize = TWINS_INITIALIZE_NOTIFY_QUEUE,
        ttl_ms = message_ttl_ms,
        "Queues declared"
    );
    Ok(())
}

struct AmqpSession {
    connection: Connection,
    channel: Channel,
}

/// Keeps a broker session alive and feeds deliveries to the consumer
pub struct AmqpSupervisor {
    config: AmqpConfig,
    consumer: Arc<TwinsNotificationsConsumer>,
    producer: Arc<AmqpNotificationProducer>,
    infra: InfrastructureNotifier,
    retry: RetryWithBackoff,
}

impl AmqpSupervisor {
    pub fn new(
        config: AmqpConfig,
        consumer: Arc<TwinsNotificationsConsumer>,
        producer: Arc<AmqpNotificationProducer>,
        infra: InfrastructureNotifier,
        retry: RetryWithBackoff,
    ) -> Self {
        Self {
            config,
            consumer,
            producer,
            infra,
            retry,
        }
    }

    pub fn start(self, shutdown: ShutdownSignal) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    async fn run(self, shutdown: ShutdownSignal) {
        let mut shutdown_rx = shutdown.subscribe();

        loop {
            let connected = tokio::select! {
                result = self.connect_with_retry() => result,
                _ = shutdown_rx.recv() => break,
            };

            match connected {
                Ok(session) => {
                    self.producer.set_channel(Some(session.channel.clone()));
                    info!(
                        queue = TWINS_NOTIFY_QUEUE,
                        consumers = self.config.concurrency,
                        "Connected to RabbitMQ"
                    );

                    let stopped = tokio::select! {
                        err = self.consume(&session.channel) => Some(err),
                        _ = shutdown_rx.recv() => None,
                    };
                    self.producer.set_channel(None);

                    match stopped {
                        Some(err) => {
                            warn!("RabbitMQ session lost, reconnecting: {}", err);
                            self.infra
                                .notify_transient_error(&format!("RabbitMQ connection lost: {}", err));
                        }
                        None => {
                            if let Err(e) = session.connection.close(200, "shutdown").await {
                                debug!("Failed to close RabbitMQ connection: {}", e);
                            }
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!(
                        "RabbitMQ connection cycle failed, next attempt in {:?}: {}",
                        self.config.reconnect_delay, e
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                _ = shutdown_rx.recv() => break,
            }
        }

        info!("AMQP supervisor stopped");
    }

    async fn connect_with_retry(&self) -> Result<AmqpSession> {
        let infra = &self.infra;
        self.retry
            .execute(
                || self.connect(),
                HornError::is_retryable,
                |attempt, err| {
                    infra.notify_transient_error(&format!("Retry {} due to: {}", attempt, err))
                },
                |err| infra.notify_unavailable(&format!("RabbitMQ unavailable: {}", err)),
            )
            .await
    }

    async fn connect(&self) -> Result<AmqpSession> {
        let connection = Connection::connect(&self.config.url, ConnectionProperties::default())
            .await
            .map_err(mq_error)?;
        let channel = connection.create_channel().await.map_err(mq_error)?;

        declare_queues(&channel, self.config.message_ttl_ms).await?;
        channel
            .basic_qos(self.config.concurrency, BasicQosOptions::default())
            .await
            .map_err(mq_error)?;

        Ok(AmqpSession {
            connection,
            channel,
        })
    }

    /// Run the consumers until the first one fails
    async fn consume(&self, channel: &Channel) -> HornError {
        let mut loops = Vec::with_capacity(self.config.concurrency as usize);
        for index in 0..self.config.concurrency.max(1) {
            let tag = format!("horn-consumer-{}", index);
            match channel
                .basic_consume(
                    TWINS_NOTIFY_QUEUE,
                    &tag,
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await
            {
                Ok(consumer) => loops.push(Box::pin(self.consume_loop(tag, consumer))),
                Err(e) => return mq_error(e),
            }
        }

        let (err, _, _) = select_all(loops).await;
        err
    }

    async fn consume_loop(&self, tag: String, consumer: Consumer) -> HornError {
        drain_deliveries(&self.consumer, &tag, consumer).await
    }
}

/// A broker delivery as seen by the consume loop
#[async_trait]
pub trait InboundDelivery: Send + Sync {
    fn payload(&self) -> &[u8];

    async fn ack(&self) -> Result<()>;
}

#[async_trait]
impl InboundDelivery for Delivery {
    fn payload(&self) -> &[u8] {
        &self.data
    }

    async fn ack(&self) -> Result<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(mq_error)
    }
}

/// Hand every delivery to `consumer` and ack it afterwards.
///
/// Returns the error that ended the stream; the caller reconnects.
pub async fn drain_deliveries<S, D, E>(
    consumer: &TwinsNotificationsConsumer,
    tag: &str,
    deliveries: S,
) -> HornError
where
    S: Stream<Item = std::result::Result<D, E>>,
    D: InboundDelivery,
    E: std::fmt::Display,
{
    let mut deliveries = std::pin::pin!(deliveries);
    while let Some(delivery) = deliveries.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(e) => return HornError::MqTemporary(e.to_string()),
        };

        let outcome = consumer.handle_delivery(delivery.payload()).await;
        debug!(consumer = %tag, ?outcome, "Delivery processed");

        if let Err(e) = delivery.ack().await {
            return e;
        }
    }
    HornError::MqTemporary(format!("Consumer {} stream ended", tag))
}
