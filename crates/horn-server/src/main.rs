//! Main entry point for the Horn server.
//!
//! Wires persistence, token introspection, the AMQP supervisor, the session
//! scheduler and the gRPC subscribe service.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use horn_core::service::circuit_breaker::RABBIT_CIRCUIT_BREAKER;
use horn_core::{
    AuthInterceptor, CircuitBreaker, ClientSessionService, ConnectionRegistry, DataBatchService,
    HttpIntrospectionClient, InfrastructureNotifier, NotificationRequestPublisher,
    TokenIntrospectService, TwinfaceGrpcNotifier, TwinfaceSubscribeHandler,
    TwinsNotificationsConsumer,
};
use horn_migration::{Migrator, MigratorTrait};
use horn_persistence::{
    ExternalDbPersistService, MemoryPersistService, PersistenceService, StorageMode,
};
use horn_server::queue::AmqpNotificationProducer;
use horn_server::startup::{
    self, AmqpConfig, AmqpSupervisor, GracefulShutdown, GrpcServerConfig, run_with_shutdown,
};
use horn_server::{Configuration, metrics};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let configuration = Configuration::new()?;

    let _logging_guard = startup::init_logging(&configuration.logging_config())?;

    metrics::init_metrics();

    let shutdown = startup::wait_for_shutdown_signal();

    // Persistence
    let storage_mode = configuration.persistence_mode();
    info!("Persistence mode: {}", storage_mode);

    let persistence: Arc<dyn PersistenceService> = match storage_mode {
        StorageMode::ExternalDb => {
            let db = configuration.database_connection().await?;
            if configuration.db_migrate() {
                match run_with_shutdown(Migrator::up(&db, None), shutdown.subscribe()).await {
                    Some(result) => result?,
                    None => return Ok(()),
                }
                info!("Database migrations applied");
            }
            Arc::new(ExternalDbPersistService::new(db))
        }
        StorageMode::Memory => {
            warn!("In-memory storage: sessions and pending batches are lost on restart");
            Arc::new(MemoryPersistService::new())
        }
    };
    persistence.health_check().await?;

    // Core services
    let registry = Arc::new(ConnectionRegistry::new());
    let sessions = Arc::new(
        ClientSessionService::new(persistence.clone(), registry.clone())
            .with_grace(configuration.session_expiry_grace()),
    );
    let batches = Arc::new(DataBatchService::new(persistence.clone()));
    let requeued = batches.requeue_interrupted().await?;
    if requeued > 0 {
        info!(count = requeued, "Interrupted batch replays returned to pending");
    }

    let auth = if configuration.auth_enabled() {
        let client = HttpIntrospectionClient::new(
            &configuration.introspection_url(),
            configuration.introspection_timeout(),
        )?;
        let introspect = TokenIntrospectService::with_cache_ttl(
            Arc::new(client),
            sessions.clone(),
            configuration.introspection_cache_ttl(),
        );
        info!(url = %configuration.introspection_url(), "Token introspection enabled");
        AuthInterceptor::new(Arc::new(introspect))
    } else {
        warn!("Authentication is disabled, client ids are taken from requests");
        AuthInterceptor::disabled()
    };

    let circuit_breaker = Arc::new(CircuitBreaker::named(
        RABBIT_CIRCUIT_BREAKER,
        configuration.circuit_breaker_config(),
    ));
    let infra = InfrastructureNotifier::new(registry.clone());
    let notifier = Arc::new(TwinfaceGrpcNotifier::new(registry.clone()).with_batches(batches.clone()));

    let mut handler = TwinfaceSubscribeHandler::new(registry.clone(), auth)
        .with_batches(batches)
        .with_stream_buffer(configuration.grpc_stream_buffer());

    let mut tasks = Vec::new();

    // Broker
    if configuration.amqp_enabled() {
        let consumer = Arc::new(
            TwinsNotificationsConsumer::new(notifier, infra.clone(), circuit_breaker.clone())
                .with_retry(configuration.retry_policy())
                .with_payload_error_threshold(configuration.payload_error_threshold()),
        );
        let producer = Arc::new(AmqpNotificationProducer::new(circuit_breaker));
        handler = handler.with_publisher(producer.clone() as Arc<dyn NotificationRequestPublisher>);

        let supervisor = AmqpSupervisor::new(
            AmqpConfig {
                url: configuration.amqp_url(),
                message_ttl_ms: configuration.twins_notify_ttl_ms(),
                concurrency: configuration.twins_notify_concurrency(),
                reconnect_delay: configuration.amqp_reconnect_delay(),
            },
            consumer,
            producer,
            infra,
            configuration.retry_policy(),
        );
        tasks.push(supervisor.start(shutdown.clone()));
    } else {
        warn!("AMQP is disabled, no notifications will be consumed");
    }

    tasks.push(startup::start_session_scheduler(
        sessions,
        configuration.session_scan_interval(),
        shutdown.clone(),
    ));

    // Open streams would keep the gRPC server draining forever
    {
        let registry = registry.clone();
        let stopped = shutdown.wait();
        tokio::spawn(async move {
            stopped.await;
            registry.fail_all(tonic::Status::unavailable("Server is shutting down"));
        });
    }

    let addr: SocketAddr = format!(
        "{}:{}",
        configuration.grpc_server_address(),
        configuration.grpc_server_port()
    )
    .parse()?;
    let (local_addr, grpc_server) = startup::start_grpc_server(
        addr,
        Arc::new(handler),
        GrpcServerConfig {
            keepalive_interval: configuration.grpc_keepalive_interval(),
        },
        shutdown.clone(),
    )
    .await?;
    tasks.push(grpc_server);

    info!(%local_addr, "Horn server started");

    GracefulShutdown::new(shutdown, configuration.shutdown_timeout())
        .wait_for_shutdown(tasks)
        .await;

    info!("Horn server shutdown complete");
    Ok(())
}
