//! Error types for kpcn_core operations.
//!
//! Plain enum with no external dependencies.

use core::fmt;

/// Errors that can occur during kpcn_core operations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoreError {
    /// Two point sets were expected to share a point count.
    PointCountMismatch {
        /// Point count of the first set.
        left: usize,
        /// Point count of the second set.
        right: usize,
    },
    /// A flat coordinate buffer does not hold the expected number of values.
    InvalidPointData {
        /// Number of f32 values expected.
        expected: usize,
        /// Number of f32 values provided.
        got: usize,
    },
    /// Paired sequences differ in length.
    LengthMismatch {
        /// Length of the first sequence.
        left: usize,
        /// Length of the second sequence.
        right: usize,
    },
    /// A label is outside the configured number of classes.
    LabelOutOfRange {
        /// The offending label.
        label: usize,
        /// Number of classes.
        num_classes: usize,
    },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::PointCountMismatch { left, right } => {
                write!(f, "point count mismatch: {} vs {}", left, right)
            }
            CoreError::InvalidPointData { expected, got } => {
                write!(
                    f,
                    "invalid point data: expected {} values, got {}",
                    expected, got
                )
            }
            CoreError::LengthMismatch { left, right } => {
                write!(f, "length mismatch: {} vs {}", left, right)
            }
            CoreError::LabelOutOfRange { label, num_classes } => {
                write!(f, "label {} out of range for {} classes", label, num_classes)
            }
        }
    }
}

impl std::error::Error for CoreError {}

/// Result type alias for kpcn_core operations.
pub type Result<T> = core::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::PointCountMismatch {
            left: 1024,
            right: 2048,
        };
        assert_eq!(format!("{}", err), "point count mismatch: 1024 vs 2048");

        let err = CoreError::InvalidPointData {
            expected: 9,
            got: 8,
        };
        assert_eq!(
            format!("{}", err),
            "invalid point data: expected 9 values, got 8"
        );
    }

    #[test]
    fn test_error_equality() {
        let a = CoreError::LabelOutOfRange {
            label: 3,
            num_classes: 2,
        };
        let b = CoreError::LabelOutOfRange {
            label: 3,
            num_classes: 2,
        };
        assert_eq!(a, b);
        assert_ne!(
            a,
            CoreError::PointCountMismatch { left: 1, right: 2 }
        );
    }
}
