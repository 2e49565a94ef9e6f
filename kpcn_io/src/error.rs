//! Error types for kpcn_io operations.
//!
//! Covers malformed files, shape disagreements and underlying I/O failures.

use core::fmt;

/// Errors that can occur during kpcn_io operations.
#[derive(Debug, Clone, PartialEq)]
pub enum KpcnIoError {
    /// Invalid file format during deserialization.
    InvalidFormat {
        /// Description of the format error.
        message: String,
    },

    /// The number of values does not match the declared shape.
    ShapeMismatch {
        /// Declared shape.
        shape: Vec<usize>,
        /// Number of values provided.
        values: usize,
    },

    /// A column count that the format cannot express.
    UnsupportedLayout {
        /// Description of the layout problem.
        message: &'static str,
    },

    /// I/O error during serialization/deserialization.
    Io(String),
}

impl fmt::Display for KpcnIoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KpcnIoError::InvalidFormat { message } => {
                write!(f, "invalid file format: {}", message)
            }
            KpcnIoError::ShapeMismatch { shape, values } => {
                write!(f, "shape {:?} does not hold {} values", shape, values)
            }
            KpcnIoError::UnsupportedLayout { message } => {
                write!(f, "unsupported layout: {}", message)
            }
            KpcnIoError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for KpcnIoError {}

impl From<std::io::Error> for KpcnIoError {
    fn from(err: std::io::Error) -> Self {
        KpcnIoError::Io(err.to_string())
    }
}

impl KpcnIoError {
    pub(crate) fn format(message: impl Into<String>) -> Self {
        KpcnIoError::InvalidFormat {
            message: message.into(),
        }
    }
}

/// Result type alias for kpcn_io operations.
pub type Result<T> = core::result::Result<T, KpcnIoError>;

/// Number of elements described by a shape, `None` on overflow.
pub(crate) fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

/// Byte length of an f32 payload with the given shape.
pub(crate) fn payload_len(shape: &[usize]) -> Result<usize> {
    element_count(shape)
        .and_then(|count| count.checked_mul(4))
        .ok_or_else(|| KpcnIoError::format(format!("shape {:?} is too large", shape)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KpcnIoError::ShapeMismatch {
            shape: vec![4, 3],
            values: 10,
        };
        assert_eq!(format!("{}", err), "shape [4, 3] does not hold 10 values");

        let err = KpcnIoError::format("bad magic");
        assert_eq!(format!("{}", err), "invalid file format: bad magic");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: KpcnIoError = io.into();
        assert!(matches!(err, KpcnIoError::Io(ref m) if m.contains("gone")));
    }

    #[test]
    fn test_element_count() {
        assert_eq!(element_count(&[2, 3, 4]), Some(24));
        assert_eq!(element_count(&[]), Some(1));
        assert_eq!(element_count(&[1 << 62, 8]), None);
        assert!(payload_len(&[1 << 62]).is_err());
    }
}
