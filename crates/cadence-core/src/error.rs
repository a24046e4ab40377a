//! Error types for the Cadence scheduling core.

use crate::request::UnitId;

/// Result type alias for Cadence operations
pub type CadenceResult<T> = Result<T, CadenceError>;

/// Main error type for Cadence scheduling operations
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CadenceError {
    /// Request rejected at admission (empty text, bad parameters)
    #[error("Validation failed: {message}")]
    ValidationError {
        /// Error message describing the invalid input
        message: String,
    },

    /// Referenced voice is not registered
    #[error("Voice '{voice_id}' not found")]
    VoiceNotFound {
        /// The voice reference ID that was not found
        voice_id: String,
    },

    /// No request with the given identifier is known to the scheduler
    #[error("Request '{request_id}' not found")]
    RequestNotFound {
        /// The request ID that was not found
        request_id: String,
    },

    /// No artifact recorded for the given request
    #[error("Artifact for request '{request_id}' not found")]
    ArtifactNotFound {
        /// The request ID with no recorded artifact
        request_id: String,
    },

    /// Input text could not be split into sentence units
    #[error("Segmentation failed: {message}")]
    SegmentationError {
        /// Error message describing why the text is unsegmentable
        message: String,
    },

    /// Pending pool is full; admission rejected
    #[error("Scheduler overloaded: {pending} units pending, limit is {limit}")]
    Overloaded {
        /// Units currently in the pending pool
        pending: usize,
        /// Configured pool limit
        limit: usize,
    },

    /// Batched inference failed for a whole bucket
    #[error("Inference failed: {message}")]
    InferenceError {
        /// Error message describing the failure
        message: String,
        /// Identities of the units whose synthesis did not complete
        failed_units: Vec<UnitId>,
    },

    /// Inference exceeded the configured time budget
    #[error("Inference timed out: {message}")]
    TimeoutError {
        /// Error message describing the timeout
        message: String,
        /// Identities of the units whose synthesis did not complete
        failed_units: Vec<UnitId>,
    },

    /// Request was cancelled before completion
    #[error("Request '{request_id}' was cancelled")]
    Cancelled {
        /// The cancelled request ID
        request_id: String,
    },

    /// File I/O error
    #[error("File I/O error: {message}")]
    FileError {
        /// Error message describing the file operation failure
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigurationError {
        /// Error message describing the configuration issue
        message: String,
    },
}

impl CadenceError {
    /// Create a new validation error
    #[must_use]
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    /// Create a new voice not found error
    #[must_use]
    pub fn voice_not_found<S: Into<String>>(voice_id: S) -> Self {
        Self::VoiceNotFound {
            voice_id: voice_id.into(),
        }
    }

    /// Create a new request not found error
    #[must_use]
    pub fn request_not_found<S: ToString>(request_id: &S) -> Self {
        Self::RequestNotFound {
            request_id: request_id.to_string(),
        }
    }

    /// Create a new artifact not found error
    #[must_use]
    pub fn artifact_not_found<S: ToString>(request_id: &S) -> Self {
        Self::ArtifactNotFound {
            request_id: request_id.to_string(),
        }
    }

    /// Create a new segmentation error
    #[must_use]
    pub fn segmentation<S: Into<String>>(message: S) -> Self {
        Self::SegmentationError {
            message: message.into(),
        }
    }

    /// Create a new overloaded error
    #[must_use]
    pub const fn overloaded(pending: usize, limit: usize) -> Self {
        Self::Overloaded { pending, limit }
    }

    /// Create a new inference error carrying the failed unit set
    #[must_use]
    pub fn inference<S: Into<String>>(message: S, failed_units: Vec<UnitId>) -> Self {
        Self::InferenceError {
            message: message.into(),
            failed_units,
        }
    }

    /// Create a new timeout error carrying the failed unit set
    #[must_use]
    pub fn timeout<S: Into<String>>(message: S, failed_units: Vec<UnitId>) -> Self {
        Self::TimeoutError {
            message: message.into(),
            failed_units,
        }
    }

    /// Create a new cancelled error
    #[must_use]
    pub fn cancelled<S: ToString>(request_id: &S) -> Self {
        Self::Cancelled {
            request_id: request_id.to_string(),
        }
    }

    /// Create a new file error
    #[must_use]
    pub fn file<S: Into<String>>(message: S) -> Self {
        Self::FileError {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    #[must_use]
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }

    /// Check if this error is retriable by the scheduler's bounded retry
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::InferenceError { .. } | Self::TimeoutError { .. } | Self::Overloaded { .. }
        )
    }

    /// Check if this error is due to invalid caller input
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::ValidationError { .. }
                | Self::VoiceNotFound { .. }
                | Self::SegmentationError { .. }
                | Self::ConfigurationError { .. }
        )
    }

    /// Get the error category for logging/metrics
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::ValidationError { .. } => "validation",
            Self::VoiceNotFound { .. } => "voice",
            Self::RequestNotFound { .. } => "request",
            Self::ArtifactNotFound { .. } => "artifact",
            Self::SegmentationError { .. } => "segmentation",
            Self::Overloaded { .. } => "overloaded",
            Self::InferenceError { .. } => "inference",
            Self::TimeoutError { .. } => "timeout",
            Self::Cancelled { .. } => "cancelled",
            Self::FileError { .. } => "file",
            Self::ConfigurationError { .. } => "configuration",
        }
    }

    /// Identities of the units left unresolved by an execution failure
    #[must_use]
    pub fn failed_units(&self) -> &[UnitId] {
        match self {
            Self::InferenceError { failed_units, .. } | Self::TimeoutError { failed_units, .. } => {
                failed_units
            }
            _ => &[],
        }
    }
}

// Convert from common error types
impl From<std::io::Error> for CadenceError {
    fn from(err: std::io::Error) -> Self {
        Self::file(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for CadenceError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::timeout(format!("operation timed out: {err}"), Vec::new())
    }
}

impl From<anyhow::Error> for CadenceError {
    fn from(err: anyhow::Error) -> Self {
        Self::inference(err.to_string(), Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestId;

    #[test]
    fn test_error_creation() {
        let err = CadenceError::validation("empty text");
        assert_eq!(err.category(), "validation");
        assert!(!err.is_retriable());
        assert!(err.is_user_error());
    }

    #[test]
    fn test_error_display() {
        let err = CadenceError::voice_not_found("alto_7");
        assert_eq!(err.to_string(), "Voice 'alto_7' not found");

        let err = CadenceError::overloaded(300, 256);
        assert_eq!(
            err.to_string(),
            "Scheduler overloaded: 300 units pending, limit is 256"
        );
    }

    #[test]
    fn test_retriable_errors() {
        assert!(CadenceError::inference("boom", Vec::new()).is_retriable());
        assert!(CadenceError::timeout("slow", Vec::new()).is_retriable());
        assert!(CadenceError::overloaded(10, 5).is_retriable());
        assert!(!CadenceError::validation("bad").is_retriable());
        assert!(!CadenceError::segmentation("empty").is_retriable());
    }

    #[test]
    fn test_failed_units_carried() {
        let request = RequestId::new();
        let units = vec![UnitId::new(request, 0), UnitId::new(request, 1)];
        let err = CadenceError::inference("device fault", units.clone());
        assert_eq!(err.failed_units(), units.as_slice());

        let err = CadenceError::validation("bad");
        assert!(err.failed_units().is_empty());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = CadenceError::from(io_err);
        assert!(matches!(err, CadenceError::FileError { .. }));
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(CadenceError::segmentation("x").category(), "segmentation");
        assert_eq!(CadenceError::overloaded(1, 1).category(), "overloaded");
        assert_eq!(
            CadenceError::inference("x", Vec::new()).category(),
            "inference"
        );
        assert_eq!(CadenceError::file("x").category(), "file");
    }
}
