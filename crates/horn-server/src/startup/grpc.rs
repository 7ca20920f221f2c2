//! gRPC server setup and service registration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::service::InterceptorLayer;
use tonic::transport::Server;
use tower::ServiceBuilder;
use tracing::{error, info};

use horn_api::subscribe::twinface_subscribe_service_server::TwinfaceSubscribeServiceServer;
use horn_core::TwinfaceSubscribeHandler;
use horn_core::service::remote::context_interceptor;

use super::ShutdownSignal;

/// Transport settings of the client-facing server
#[derive(Debug, Clone)]
pub struct GrpcServerConfig {
    /// HTTP/2 ping interval
    pub keepalive_interval: Duration,
}

impl Default for GrpcServerConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(30),
        }
    }
}

/// Bind `addr` and serve the subscribe service until shutdown.
///
/// Returns the bound address (useful with port 0) and the server task.
pub async fn start_grpc_server(
    addr: SocketAddr,
    handler: Arc<TwinfaceSubscribeHandler>,
    config: GrpcServerConfig,
    shutdown: ShutdownSignal,
) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    info!("Starting gRPC server on {}", local_addr);

    let layer = ServiceBuilder::new()
        .load_shed()
        .layer(InterceptorLayer::new(context_interceptor))
        .into_inner();

    let server = tokio::spawn(async move {
        let result = Server::builder()
            .http2_keepalive_interval(Some(config.keepalive_interval))
            .layer(layer)
            .add_service(TwinfaceSubscribeServiceServer::from_arc(handler))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown.wait())
            .await;
        match result {
            Ok(()) => info!("gRPC server stopped"),
            Err(e) => error!("gRPC server error: {}", e),
        }
    });

    Ok((local_addr, server))
}
