//! Application startup utilities module.

mod amqp;
mod grpc;
mod logging;
mod scheduler;
mod shutdown;

pub use amqp::{AmqpConfig, AmqpSupervisor, declare_queues, notify_queue_arguments};
pub use grpc::{GrpcServerConfig, start_grpc_server};
pub use logging::{LogRotation, LoggingConfig, LoggingGuard, init_logging};
pub use scheduler::start_session_scheduler;
pub use shutdown::{GracefulShutdown, ShutdownSignal, run_with_shutdown, wait_for_shutdown_signal};
