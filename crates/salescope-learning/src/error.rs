//! Error types for the salescope-learning crate.
//!
//! This module defines [`LearningError`], the error type used throughout the
//! crate. All public API functions return `Result<T, LearningError>`.

use thiserror::Error;

/// The main error type for salescope-learning operations.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LearningError {
    /// Invalid data provided for training or prediction.
    ///
    /// Common causes:
    /// - empty feature matrix or target vector
    /// - non-binary labels passed to a binary classifier
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Feature matrix and target vector disagree on length, or a prediction
    /// input has a different width than the training data.
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// The expected dimension.
        expected: usize,
        /// The dimension that was provided.
        actual: usize,
    },

    /// Training failed to produce a usable model.
    #[error("Training failed: {0}")]
    TrainingFailed(String),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, LearningError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LearningError::InvalidData("empty target".to_string());
        assert_eq!(err.to_string(), "Invalid data: empty target");

        let err = LearningError::ShapeMismatch {
            expected: 4,
            actual: 3,
        };
        assert_eq!(err.to_string(), "Shape mismatch: expected 4, got 3");
    }
}
