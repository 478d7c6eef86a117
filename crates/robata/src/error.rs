//! Error taxonomy shared by every layer of the engine.
//!
//! Factories and operations fail fast with the most specific kind available.
//! Manager cleanup is the one place that swallows errors: a failing resource is
//! logged and its siblings are still closed.

use thiserror::Error;
use crate::types::Shape;

/// Errors raised by managers, arrays, sessions and predictors
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed shape, data or index input
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operand shapes cannot be broadcast together
    #[error("shape mismatch in {op}: {lhs} vs {rhs}")]
    ShapeMismatch {
        /// Name of the operation that rejected the operands
        op: String,
        /// Shape of the receiver
        lhs: Shape,
        /// Shape of the other operand
        rhs: Shape,
    },

    /// Operation or type the active backend does not implement
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A requested output cannot be reached from the bound inputs
    #[error("unresolved dependency: {0}")]
    UnresolvedDependency(String),

    /// Use of a closed array or manager, or of a model that was never loaded
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Failure reported by the underlying tensor library
    #[error("backend error: {0}")]
    Backend(String),

    /// Failure reported by a translator while converting user types
    #[error("translation failed: {0}")]
    Translate(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn shape_mismatch(op: impl Into<String>, lhs: &Shape, rhs: &Shape) -> Self {
        Error::ShapeMismatch {
            op: op.into(),
            lhs: lhs.clone(),
            rhs: rhs.clone(),
        }
    }
}

#[cfg(feature = "candle")]
impl From<candle_core::Error> for Error {
    fn from(err: candle_core::Error) -> Self {
        Error::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_mismatch_message_names_both_shapes() {
        let err = Error::shape_mismatch("add", &Shape::from([2, 3]), &Shape::from([4]));
        assert_eq!(err.to_string(), "shape mismatch in add: (2, 3) vs (4)");
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.safetensors");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.to_string(), "missing.safetensors");
    }
}
