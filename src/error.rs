use thiserror::Error;

/// Errors surfaced by the alignment engine.
///
/// A failed estimate never degrades into a zero shift: callers get one of
/// these and the whole estimate for that stack is abandoned.
#[derive(Debug, Error)]
pub enum AlignError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Dimension mismatch for {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: String,
        actual: String,
    },

    #[error("Estimation failed: {0}")]
    EstimationFailure(String),

    #[error("Stack carries no alignment record")]
    MissingAlignment,
}

impl AlignError {
    pub fn invalid(message: impl Into<String>) -> Self {
        AlignError::InvalidParameter(message.into())
    }

    pub fn estimation(message: impl Into<String>) -> Self {
        AlignError::EstimationFailure(message.into())
    }

    pub fn mismatch(
        what: &'static str,
        expected: impl std::fmt::Debug,
        actual: impl std::fmt::Debug,
    ) -> Self {
        AlignError::DimensionMismatch {
            what,
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_message() {
        let err = AlignError::mismatch("shift table length", 5, 4);
        assert_eq!(
            err.to_string(),
            "Dimension mismatch for shift table length: expected 5, got 4"
        );
    }

    #[test]
    fn test_estimation_message() {
        let err = AlignError::estimation("zero-variance frame 3");
        assert!(err.to_string().contains("zero-variance frame 3"));
    }
}
