//! File-based logging with per-component log files.
//!
//! Every event goes to the root `horn.log`; component files receive the
//! events whose `tracing` target matches one of their prefixes:
//!
//! | Log File          | Component                          | Target Prefixes                                   |
//! |-------------------|------------------------------------|---------------------------------------------------|
//! | horn.log          | Root logger (all components)       | (all)                                             |
//! | remote.log        | gRPC streams and connection layer  | horn_core::handler, horn_core::service::registry  |
//! | queue.log         | AMQP consumers and producer        | horn_core::service::queue, horn_server::queue     |
//! | auth.log          | Token introspection                | horn_core::service::auth, ..::grpc_auth           |
//! | persistence.log   | Sessions, batches and storage      | horn_persistence, horn_core::service::session     |
//!
//! Log files are stored in `~/horn/logs` by default.
//! Override with `HORN_LOG_DIR` environment variable or `log.dir` config.

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// Internal definition for a component log file.
struct ComponentLogDef {
    /// Log file name (e.g. "queue.log")
    file_name: &'static str,
    /// Target module prefixes routed to this file
    targets: &'static [&'static str],
}

const COMPONENT_LOGS: &[ComponentLogDef] = &[
    ComponentLogDef {
        file_name: "remote.log",
        targets: &[
            "horn_core::handler",
            "horn_core::service::registry",
            "horn_core::service::remote",
            "horn_server::startup::grpc",
        ],
    },
    ComponentLogDef {
        file_name: "queue.log",
        targets: &[
            "horn_core::service::queue",
            "horn_core::service::notifier",
            "horn_core::service::infra",
            "horn_core::service::retry",
            "horn_core::service::circuit_breaker",
            "horn_server::queue",
            "horn_server::startup::amqp",
        ],
    },
    ComponentLogDef {
        file_name: "auth.log",
        targets: &["horn_core::service::auth", "horn_core::service::grpc_auth"],
    },
    ComponentLogDef {
        file_name: "persistence.log",
        targets: &[
            "horn_persistence",
            "horn_migration",
            "horn_core::service::session",
            "horn_core::service::batch",
            "horn_server::startup::scheduler",
        ],
    },
];

/// Log rotation policy
#[derive(Debug, Clone, Copy)]
pub enum LogRotation {
    Daily,
    Hourly,
    /// Never rotate (single file)
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// Logging configuration for the entire application.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Base log directory (default: `~/horn/logs`)
    pub log_dir: PathBuf,
    pub console_output: bool,
    pub console_level: Level,
    pub file_logging: bool,
    pub file_level: Level,
    pub rotation: LogRotation,
}

fn default_log_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(format!("{}/horn/logs", home))
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            console_output: true,
            console_level: Level::INFO,
            file_logging: true,
            file_level: Level::INFO,
            rotation: LogRotation::Daily,
        }
    }
}

impl LoggingConfig {
    /// Create from environment variables.
    pub fn from_env() -> Self {
        let log_dir = std::env::var("HORN_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_log_dir());

        let console_output = std::env::var("HORN_LOG_CONSOLE")
            .map(|v| v.to_lowercase() != "false" && v != "0")
            .unwrap_or(true);

        let file_logging = std::env::var("HORN_LOG_FILE")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(true);

        let console_level = std::env::var("HORN_LOG_LEVEL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Level::INFO);

        Self {
            log_dir,
            console_output,
            console_level,
            file_logging,
            file_level: console_level,
            rotation: LogRotation::Daily,
        }
    }
}

/// Keeps the non-blocking file writers alive.
///
/// Buffered output is flushed when the guard is dropped.
pub struct LoggingGuard {
    _file_guards: Vec<WorkerGuard>,
}

/// Initialize the logging system with console and multi-file output.
///
/// `RUST_LOG` controls the level of the console and the root file. Component
/// files use per-layer [`Targets`] filters and capture everything from their
/// targets.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard, Box<dyn std::error::Error>> {
    if config.file_logging {
        std::fs::create_dir_all(&config.log_dir)?;
    }

    let mut guards: Vec<WorkerGuard> = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.console_output {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.console_level.to_string()));
        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_filter(filter);
        layers.push(Box::new(console_layer));
    }

    if config.file_logging {
        let root_appender =
            RollingFileAppender::new(config.rotation.into(), &config.log_dir, "horn.log");
        let (root_nb, root_guard) = tracing_appender::non_blocking(root_appender);
        guards.push(root_guard);

        let root_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.file_level.to_string()));
        let root_layer = fmt::layer()
            .with_writer(root_nb)
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .with_filter(root_filter);
        layers.push(Box::new(root_layer));

        for component in COMPONENT_LOGS {
            let appender = RollingFileAppender::new(
                config.rotation.into(),
                &config.log_dir,
                component.file_name,
            );
            let (nb, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);

            let layer = fmt::layer()
                .with_writer(nb)
                .with_target(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_filter(component_targets(component));
            layers.push(Box::new(layer));
        }
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| format!("Failed to initialize logging: {}", e))?;

    if config.file_logging {
        tracing::info!(
            log_dir = %config.log_dir.display(),
            component_files = COMPONENT_LOGS.len(),
            "File logging initialized: horn.log (root) + {} component log files",
            COMPONENT_LOGS.len()
        );
    }

    Ok(LoggingGuard {
        _file_guards: guards,
    })
}

fn component_targets(component: &ComponentLogDef) -> Targets {
    component
        .targets
        .iter()
        .fold(Targets::new(), |targets, target| {
            targets.with_target(*target, LevelFilter::TRACE)
        })
}
