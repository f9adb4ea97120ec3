use std::fmt;

use thiserror::Error;

use crate::classify::{Condition, ErrorClassifier};

/// Stable classification of every storage failure.
///
/// Callers branch on the kind, never on the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The object (or its container) does not exist.
    NotFound,
    /// Authentication or authorization was rejected.
    Unauthorized,
    /// Transient server or network condition; a retry may succeed.
    TemporaryFailure,
    /// The request was malformed, too large or too long.
    InvalidArgument,
    /// Unexpected failure inside the backend or this library.
    Internal,
    /// The operation exceeded its deadline.
    Timeout,
    /// The operation was cancelled through its cancellation token.
    Cancelled,
}

impl ErrorKind {
    /// Whether an operation failing with this kind may succeed when retried
    /// without caller intervention.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::TemporaryFailure | ErrorKind::Timeout)
    }

    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::TemporaryFailure => "temporary failure",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::Internal => "internal error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error returned by every storage operation.
#[derive(Error, Debug)]
#[error("{kind}: {message}")]
pub struct StorageError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

/// Result type for storage operations
pub type Result<T, E = StorageError> = std::result::Result<T, E>;

impl StorageError {
    /// Creates an error of the given kind with a diagnostic message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attaches the underlying cause.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Classifies a provider condition with the default tables.
    pub fn from_condition(condition: Condition<'_>, message: impl Into<String>) -> Self {
        Self::new(ErrorClassifier::default().classify(condition), message)
    }

    /// The object `name` does not exist.
    pub fn not_found(name: &str) -> Self {
        Self::new(ErrorKind::NotFound, format!("object '{name}' does not exist"))
    }

    /// The operation observed a cancelled token.
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled")
    }

    /// Shorthand for [`ErrorKind::InvalidArgument`].
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// Shorthand for [`ErrorKind::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// The classified kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Raw diagnostic message, for logs only.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// See [`ErrorKind::is_retryable`].
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        let kind = ErrorClassifier::default().classify(Condition::Io(err.kind()));
        Self::new(kind, err.to_string()).with_source(err)
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            Self::cancelled().with_source(err)
        } else {
            Self::internal(format!("background task failed: {err}")).with_source(err)
        }
    }
}
