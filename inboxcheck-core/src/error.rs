//! Error types for the inboxcheck core library.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering input validation, the remote test service, the test lifecycle,
//! and configuration.

use serde::{Deserialize, Serialize};

/// Top-level error type for the inboxcheck core library.
#[derive(Debug, thiserror::Error)]
pub enum InboxCheckError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised on user input before any request is sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid test code '{code}': {reason}")]
    InvalidTestCode { code: String, reason: String },
}

/// Errors from the remote test service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("Request failed: {message}")]
    Transport { message: String },

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Response parse error: {message}")]
    Parse { message: String },
}

impl ServiceError {
    /// Whether this error ends a running test outright.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServiceError::NotFound { .. })
    }

    /// Whether the same request may succeed if issued again later.
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Transport { .. } => true,
            ServiceError::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            ServiceError::NotFound { .. } | ServiceError::Parse { .. } => false,
        }
    }

    pub(crate) fn parse(message: impl Into<String>) -> Self {
        ServiceError::Parse {
            message: message.into(),
        }
    }
}

/// Errors from the test lifecycle controller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("Detection did not finish after {attempts} status checks ({elapsed_secs}s)")]
    Timeout { attempts: u32, elapsed_secs: u64 },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Detection is already running")]
    AlreadyDetecting,

    #[error("No test code has been generated yet")]
    NoTestCode,

    #[error("Test session was cancelled")]
    Cancelled,

    #[error("Service reported the test as {status}")]
    RemoteFailure { status: String },

    #[error("Giving up after {attempts} consecutive failed status checks: {last}")]
    RetriesExhausted { attempts: u32, last: ServiceError },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Coarse classification shown to users and recorded on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Service,
    NotFound,
    Timeout,
    Parse,
    Cancelled,
    Config,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Service => write!(f, "service"),
            ErrorKind::NotFound => write!(f, "not found"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Parse => write!(f, "parse"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
            ErrorKind::Config => write!(f, "config"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Transport { .. } | ServiceError::Status { .. } => ErrorKind::Service,
            ServiceError::NotFound { .. } => ErrorKind::NotFound,
            ServiceError::Parse { .. } => ErrorKind::Parse,
        }
    }
}

impl LifecycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LifecycleError::Timeout { .. } => ErrorKind::Timeout,
            LifecycleError::Cancelled => ErrorKind::Cancelled,
            LifecycleError::RemoteFailure { .. } => ErrorKind::Service,
            LifecycleError::RetriesExhausted { last, .. } => last.kind(),
            LifecycleError::InvalidTransition { .. }
            | LifecycleError::AlreadyDetecting
            | LifecycleError::NoTestCode => ErrorKind::Internal,
        }
    }
}

impl InboxCheckError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InboxCheckError::Validation(_) => ErrorKind::Validation,
            InboxCheckError::Service(e) => e.kind(),
            InboxCheckError::Lifecycle(e) => e.kind(),
            InboxCheckError::Config(_) => ErrorKind::Config,
            InboxCheckError::Io(_) => ErrorKind::Internal,
            InboxCheckError::Serialization(_) => ErrorKind::Parse,
        }
    }
}

/// A short, cloneable record of an error, stored on a session snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&ServiceError> for ErrorDescriptor {
    fn from(err: &ServiceError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<&LifecycleError> for ErrorDescriptor {
    fn from(err: &LifecycleError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<&InboxCheckError> for ErrorDescriptor {
    fn from(err: &InboxCheckError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// A type alias for results using the top-level `InboxCheckError`.
pub type Result<T> = std::result::Result<T, InboxCheckError>;
