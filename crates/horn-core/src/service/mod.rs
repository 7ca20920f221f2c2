pub mod auth;
pub mod batch;
pub mod circuit_breaker;
pub mod grpc_auth;
pub mod infra;
pub mod notifier;
pub mod queue;
pub mod registry;
pub mod remote;
pub mod retry;
pub mod session;
