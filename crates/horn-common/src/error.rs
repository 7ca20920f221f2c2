//! Error types and error codes for Horn
//!
//! This module defines:
//! - `HornError`: Application-specific error enum
//! - `HornErrorType`: Failure categories carried by domain errors
//! - `ErrorCode`: Structured error codes attached to every category
//! - Mapping of errors to gRPC `Status` codes

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use tonic::Status;

/// Error code structure shared by all error categories
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCode<'a> {
    pub code: i32,
    pub message: &'a str,
}

pub const GENERAL_ERROR: ErrorCode<'static> = ErrorCode {
    code: 1000,
    message: "general error",
};

pub const INPUT_DATA_ERROR: ErrorCode<'static> = ErrorCode {
    code: 1001,
    message: "input data error",
};

pub const UNAUTHORIZED: ErrorCode<'static> = ErrorCode {
    code: 1002,
    message: "authorization missing",
};

pub const RABBITMQ_CONNECTION_ERROR: ErrorCode<'static> = ErrorCode {
    code: 1003,
    message: "RabbitMQ connection error",
};

pub const INTROSPECT_SERVICE_CONNECTION_ERROR: ErrorCode<'static> = ErrorCode {
    code: 1004,
    message: "introspection service connection error",
};

pub const STREAMING_PROCESSING_ERROR: ErrorCode<'static> = ErrorCode {
    code: 1005,
    message: "gRPC stream processing error",
};

pub const DB_DATA_PROCESSING_ERROR: ErrorCode<'static> = ErrorCode {
    code: 1006,
    message: "database data processing error",
};

/// Failure categories recognised by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HornErrorType {
    GeneralError,
    InputDataError,
    Unauthorized,
    RabbitMqConnectionError,
    IntrospectServiceConnectionError,
    StreamingProcessingError,
    DbDataProcessingError,
}

impl HornErrorType {
    pub fn error_code(&self) -> ErrorCode<'static> {
        match self {
            HornErrorType::GeneralError => GENERAL_ERROR,
            HornErrorType::InputDataError => INPUT_DATA_ERROR,
            HornErrorType::Unauthorized => UNAUTHORIZED,
            HornErrorType::RabbitMqConnectionError => RABBITMQ_CONNECTION_ERROR,
            HornErrorType::IntrospectServiceConnectionError => INTROSPECT_SERVICE_CONNECTION_ERROR,
            HornErrorType::StreamingProcessingError => STREAMING_PROCESSING_ERROR,
            HornErrorType::DbDataProcessingError => DB_DATA_PROCESSING_ERROR,
        }
    }

    pub fn code(&self) -> i32 {
        self.error_code().code
    }

    pub fn name(&self) -> &'static str {
        match self {
            HornErrorType::GeneralError => "GENERAL_ERROR",
            HornErrorType::InputDataError => "INPUT_DATA_ERROR",
            HornErrorType::Unauthorized => "UNAUTHORIZED",
            HornErrorType::RabbitMqConnectionError => "RABBITMQ_CONNECTION_ERROR",
            HornErrorType::IntrospectServiceConnectionError => {
                "INTROSPECT_SERVICE_CONNECTION_ERROR"
            }
            HornErrorType::StreamingProcessingError => "STREAMING_PROCESSING_ERROR",
            HornErrorType::DbDataProcessingError => "DB_DATA_PROCESSING_ERROR",
        }
    }

    /// Russian operator-facing name, as shown by the Twins admin tooling
    pub fn localized_name(&self) -> &'static str {
        match self {
            HornErrorType::GeneralError => "Общая ошибка",
            HornErrorType::InputDataError => "Ошибка входных данных",
            HornErrorType::Unauthorized => "Отсутствует авторизация",
            HornErrorType::RabbitMqConnectionError => "Ошибка соединения с RabbitMQ",
            HornErrorType::IntrospectServiceConnectionError => {
                "Ошибка соединения с сервисом интроспекции"
            }
            HornErrorType::StreamingProcessingError => "Ошибка обработки gRPC-потока",
            HornErrorType::DbDataProcessingError => "Ошибка работы с данными в БД",
        }
    }
}

impl Display for HornErrorType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Application-specific error types
#[derive(thiserror::Error, Debug)]
pub enum HornError {
    #[error("{message}")]
    Twinhorn {
        error_type: HornErrorType,
        message: String,
    },

    /// Temporary broker or infrastructure failure, usually retryable
    #[error("temporary messaging failure: {0}")]
    MqTemporary(String),

    /// Message-level failure such as an invalid payload; callers fail fast
    #[error("message rejected: {0}")]
    MqBusiness(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HornError {
    pub fn new(error_type: HornErrorType, message: impl Into<String>) -> Self {
        HornError::Twinhorn {
            error_type,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(HornErrorType::Unauthorized, message)
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::new(HornErrorType::InputDataError, message)
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(HornErrorType::DbDataProcessingError, message)
    }

    pub fn error_type(&self) -> Option<HornErrorType> {
        match self {
            HornError::Twinhorn { error_type, .. } => Some(*error_type),
            _ => None,
        }
    }

    /// Whether a retry may succeed where this attempt failed
    pub fn is_retryable(&self) -> bool {
        match self {
            HornError::MqTemporary(_) => true,
            HornError::Twinhorn { error_type, .. } => matches!(
                error_type,
                HornErrorType::RabbitMqConnectionError
                    | HornErrorType::DbDataProcessingError
                    | HornErrorType::IntrospectServiceConnectionError
            ),
            HornError::MqBusiness(_) | HornError::Internal(_) => false,
        }
    }

    /// Map this error to the gRPC status sent to clients
    pub fn to_status(&self) -> Status {
        match self {
            HornError::Twinhorn {
                error_type: HornErrorType::Unauthorized,
                message,
            } => Status::unauthenticated(message.clone()),
            HornError::Twinhorn {
                error_type,
                message,
            } => Status::invalid_argument(format!("{}: {}", error_type.name(), message)),
            HornError::MqTemporary(message) => Status::unavailable(message.clone()),
            HornError::MqBusiness(message) => Status::failed_precondition(message.clone()),
            HornError::Internal(message) => Status::internal(message.clone()),
        }
    }
}

impl From<HornError> for Status {
    fn from(value: HornError) -> Self {
        value.to_status()
    }
}

pub type Result<T> = std::result::Result<T, HornError>;
