//! Horn Core - subscription streams and notification fan-out
//!
//! This crate provides:
//! - The `TwinfaceSubscribeService` handler and connection registry
//! - Token introspection and client session tracking
//! - Notification consumption with retry and circuit breaking
//! - Offline delivery through stored data batches

pub mod handler;
pub mod model;
pub mod service;

#[cfg(test)]
mod test_support;

pub use handler::subscribe::TwinfaceSubscribeHandler;
pub use model::{ConnectionMeta, DeliveryOutcome, DeliveryReport};
pub use service::auth::{HttpIntrospectionClient, IntrospectionClient, TokenIntrospectService};
pub use service::batch::DataBatchService;
pub use service::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use service::grpc_auth::AuthInterceptor;
pub use service::infra::InfrastructureNotifier;
pub use service::notifier::TwinfaceGrpcNotifier;
pub use service::queue::{NotificationRequestPublisher, TwinsNotificationsConsumer};
pub use service::registry::ConnectionRegistry;
pub use service::retry::RetryWithBackoff;
pub use service::session::ClientSessionService;
