//! `TwinfaceSubscribeService` implementation
//!
//! Each `GetDataUpdates` call opens a server stream fed by an mpsc channel
//! registered in the [`ConnectionRegistry`].

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};
use uuid::Uuid;

use horn_api::subscribe::twinface_subscribe_service_server::TwinfaceSubscribeService;
use horn_api::subscribe::{
    TwinEventType, TwinfaceSubscribeRequest, TwinfaceSubscribeUpdate, UpdateStatus,
};
use horn_api::{DEFAULT_STREAM_BUFFER, build_update, initial_update};
use horn_common::HornError;

use crate::model::ConnectionMeta;
use crate::service::batch::DataBatchService;
use crate::service::grpc_auth::AuthInterceptor;
use crate::service::queue::NotificationRequestPublisher;
use crate::service::registry::ConnectionRegistry;

type UpdateItem = Result<TwinfaceSubscribeUpdate, Status>;

/// Unregisters a subscriber when the response stream goes away
struct SubscriptionGuard {
    registry: Arc<ConnectionRegistry>,
    client_id: String,
    subscriber_id: u64,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if self.registry.remove(&self.client_id, self.subscriber_id) {
            info!(
                client_id = %self.client_id,
                subscriber_id = self.subscriber_id,
                "Client stream closed"
            );
        }
    }
}

/// Response stream of one subscription
pub struct SubscriptionStream {
    inner: ReceiverStream<UpdateItem>,
    _guard: SubscriptionGuard,
}

impl Stream for SubscriptionStream {
    type Item = UpdateItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

pub struct TwinfaceSubscribeHandler {
    registry: Arc<ConnectionRegistry>,
    auth: AuthInterceptor,
    batches: Option<Arc<DataBatchService>>,
    publisher: Option<Arc<dyn NotificationRequestPublisher>>,
    stream_buffer: usize,
}

impl TwinfaceSubscribeHandler {
    pub fn new(registry: Arc<ConnectionRegistry>, auth: AuthInterceptor) -> Self {
        Self {
            registry,
            auth,
            batches: None,
            publisher: None,
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }

    pub fn with_batches(mut self, batches: Arc<DataBatchService>) -> Self {
        self.batches = Some(batches);
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn NotificationRequestPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_stream_buffer(mut self, stream_buffer: usize) -> Self {
        self.stream_buffer = stream_buffer.max(1);
        self
    }

    /// Send stored batches on the new stream in the background.
    ///
    /// A batch is COMPLETED once queued on the stream; batches not queued
    /// before the stream closes go back to PENDING.
    async fn replay_pending(&self, client_id: &str, tx: &mpsc::Sender<UpdateItem>) {
        let Some(batches) = &self.batches else {
            return;
        };

        let pending = match batches.claim_pending(client_id).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(client_id, "Failed to load pending batches: {}", e);
                return;
            }
        };
        if pending.is_empty() {
            return;
        }

        info!(client_id, count = pending.len(), "Replaying pending batches");
        let tx = tx.clone();
        let batches = batches.clone();
        let client_id = client_id.to_string();
        tokio::spawn(async move {
            let mut pending = pending.into_iter();
            while let Some(batch) = pending.next() {
                let update = build_update(
                    TwinEventType::TwinUpdate,
                    UpdateStatus::Success,
                    vec![batch.batch_data.twin_id],
                    "",
                );
                if tx.send(Ok(update)).await.is_err() {
                    let unsent: Vec<Uuid> = std::iter::once(batch.batch_id)
                        .chain(pending.by_ref().map(|b| b.batch_id))
                        .collect();
                    debug!(client_id = %client_id, count = unsent.len(), "Stream closed during replay");
                    if let Err(e) = batches.release(&unsent).await {
                        warn!(client_id = %client_id, "Failed to release pending batches: {}", e);
                    }
                    return;
                }
                if let Err(e) = batches.complete(&[batch.batch_id]).await {
                    warn!(client_id = %client_id, "Failed to complete pending batch: {}", e);
                }
            }
        });
    }
}

#[tonic::async_trait]
impl TwinfaceSubscribeService for TwinfaceSubscribeHandler {
    type GetDataUpdatesStream = Pin<Box<dyn Stream<Item = UpdateItem> + Send + 'static>>;

    async fn get_data_updates(
        &self,
        request: Request<TwinfaceSubscribeRequest>,
    ) -> Result<Response<Self::GetDataUpdatesStream>, Status> {
        let meta = request
            .extensions()
            .get::<ConnectionMeta>()
            .cloned()
            .unwrap_or_default();

        let token_info = self.auth.authenticate(request.metadata()).await?;
        let client_id = token_info
            .map(|info| info.client_id)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| request.get_ref().client_id.trim().to_string());
        if client_id.is_empty() {
            return Err(HornError::input("client_id is required").into());
        }

        let (tx, rx) = mpsc::channel(self.stream_buffer);
        // Queued before registration so it always comes first
        tx.try_send(Ok(initial_update()))
            .map_err(|e| Status::internal(format!("Failed to open stream: {}", e)))?;
        let subscriber_id = self.registry.add(&client_id, tx.clone());

        info!(
            client_id = %client_id,
            subscriber_id,
            remote_addr = %meta.remote_addr,
            connection_id = %meta.connection_id,
            "Client subscribed"
        );

        self.replay_pending(&client_id, &tx).await;
        drop(tx);

        if let Some(publisher) = &self.publisher
            && let Err(e) = publisher.send_initialize_notification(&client_id).await
        {
            warn!(client_id = %client_id, "Failed to request initial notification: {}", e);
        }

        let stream = SubscriptionStream {
            inner: ReceiverStream::new(rx),
            _guard: SubscriptionGuard {
                registry: self.registry.clone(),
                client_id,
                subscriber_id,
            },
        };

        Ok(Response::new(Box::pin(stream) as Self::GetDataUpdatesStream))
    }
}
