//! Error taxonomy for sensor operations and verifications.

/// Errors raised by an event source collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("source refused registration for sensor '{sensor}': {reason}")]
    RegistrationRefused { sensor: String, reason: String },

    #[error("unknown registration: {0}")]
    UnknownRegistration(u64),

    #[error("flush refused for registration {id}: {reason}")]
    FlushRefused { id: u64, reason: String },
}

/// Invalid verification or operation parameters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("expected value must be -1, 0, or 1, got {0}")]
    InvalidSign(i8),

    #[error("{what}: expected {expected} channels, got {actual}")]
    ChannelMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("sampling rate {0} has no numeric period")]
    UntestableRate(String),
}

/// A single verification unit whose check did not hold.
///
/// Metrics for the unit have already been recorded when this is returned.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct VerificationFailure {
    /// Name of the verification that failed.
    pub verification: &'static str,
    /// Human-readable explanation.
    pub message: String,
}

impl VerificationFailure {
    pub fn new(verification: &'static str, message: impl Into<String>) -> Self {
        Self {
            verification,
            message: message.into(),
        }
    }
}

/// Aggregated assertion-style failure raised once per operation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct AssertionFailure {
    /// Flat, comma-joined message of every contributing failure.
    pub message: String,
    /// Earliest underlying failure when wrapping child operations.
    #[source]
    pub cause: Option<Box<OperationError>>,
}

impl AssertionFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(message: impl Into<String>, cause: OperationError) -> Self {
        Self {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }
}

/// Errors surfaced by [`crate::operation::SensorOperation::execute`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum OperationError {
    /// One or more checks failed; expected and recoverable by the caller.
    #[error(transparent)]
    Assertion(#[from] AssertionFailure),

    /// The event source faulted; fatal to the operation.
    #[error("event source error: {0}")]
    Source(#[from] SourceError),

    /// The operation observed cancellation while blocked.
    #[error("operation interrupted")]
    Interrupted,

    /// `execute` was called on an operation that already ran.
    #[error("operation already executed")]
    AlreadyExecuted,

    /// A child task panicked.
    #[error("operation panicked: {0}")]
    Panicked(String),
}

impl OperationError {
    /// Create an assertion failure with the given message.
    pub fn assertion(message: impl Into<String>) -> Self {
        OperationError::Assertion(AssertionFailure::new(message))
    }

    /// Whether this is an assertion-style failure (as opposed to a runtime fault).
    pub fn is_assertion(&self) -> bool {
        matches!(self, OperationError::Assertion(_))
    }
}

/// Result type for sensor operations.
pub type Result<T> = std::result::Result<T, OperationError>;
