//! Error types for neural_kpcn.

use thiserror::Error;

/// Diagnostic payload of a numeric failure during a training step.
///
/// Carries the operation that produced the invalid value and the names of its
/// inputs and outputs, so the failing step can be located after the run.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericFailure {
    /// Operation that produced the non-finite value.
    pub op: String,
    /// Names of the operation inputs.
    pub inputs: Vec<String>,
    /// Names of the operation outputs.
    pub outputs: Vec<String>,
    /// Human readable description.
    pub message: String,
}

impl std::fmt::Display for NumericFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (op: {}, inputs: {:?}, outputs: {:?})",
            self.message, self.op, self.inputs, self.outputs
        )
    }
}

/// Errors that can occur while training or validating a completion network.
#[derive(Error, Debug)]
pub enum CompletionError {
    /// Tensor shape mismatch.
    #[error("tensor shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        got: Vec<usize>,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// A numeric operation produced NaN or infinity.
    #[error("invalid argument: {0}")]
    InvalidArgument(NumericFailure),

    /// Unrecoverable training failure. The caller is expected to terminate.
    #[error("fatal training error: {0}")]
    Fatal(NumericFailure),

    /// A label validation routine ran on a model that emits no label predictions.
    #[error("model produced no label predictions for {task} validation")]
    MissingPredictions {
        /// Task that required the predictions.
        task: String,
    },

    /// The training session was already closed.
    #[error("training session is closed")]
    SessionClosed,

    /// Checkpoint save or restore failure.
    #[error("checkpoint error: {message}")]
    Checkpoint {
        /// Description of the error.
        message: String,
    },

    /// Kernel point export failure.
    #[error("export error: {message}")]
    Export {
        /// Description of the error.
        message: String,
    },

    /// File format or filesystem error from kpcn_io.
    #[error("I/O error: {0}")]
    Io(#[from] kpcn_io::KpcnIoError),

    /// Point set error from kpcn_core.
    #[error("point set error: {0}")]
    Core(#[from] kpcn_core::CoreError),

    /// Invalid or unreadable tensor data.
    #[error("invalid data: {0}")]
    Data(String),
}

impl From<std::io::Error> for CompletionError {
    fn from(err: std::io::Error) -> Self {
        CompletionError::Io(err.into())
    }
}

impl CompletionError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        CompletionError::InvalidConfig {
            message: message.into(),
        }
    }
}

/// Result type for neural_kpcn operations.
pub type Result<T> = std::result::Result<T, CompletionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_display_carries_payload() {
        let err = CompletionError::Fatal(NumericFailure {
            op: "forward".into(),
            inputs: vec!["points".into()],
            outputs: vec!["output_loss".into()],
            message: "NaN in output loss".into(),
        });
        let text = err.to_string();
        assert!(text.contains("forward"));
        assert!(text.contains("points"));
        assert!(text.contains("output_loss"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: CompletionError = io.into();
        assert!(matches!(err, CompletionError::Io(_)));
    }
}
