//! Error types for the DSE operator desired-state constructor

use thiserror::Error;

/// Errors that can occur while building or persisting datacenter resources
#[derive(Error, Debug)]
pub enum OperatorError {
    /// The datacenter's structured configuration could not be rendered
    #[error("Config serialization error: {0}")]
    ConfigSerialization(String),

    /// The API server rejected a write because the object changed underneath us
    #[error("Update conflict: {0}")]
    UpdateConflict(String),

    /// Any other failure reported by the API server while persisting an object
    #[error("Persistence error: {0}")]
    Persistence(#[source] kube::Error),

    /// A required field is missing or malformed
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML serialization error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

/// Result type for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

impl From<kube::Error> for OperatorError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ref response) if response.code == 409 => {
                OperatorError::UpdateConflict(response.message.clone())
            }
            other => OperatorError::Persistence(other),
        }
    }
}

impl OperatorError {
    /// Check if the caller may retry the failed operation unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OperatorError::UpdateConflict(_) | OperatorError::Persistence(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("operation failed: {}", reason),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_error_display() {
        let err = OperatorError::ConfigSerialization("config must be a JSON object".to_string());
        assert!(err.to_string().contains("Config serialization"));
        assert!(err.to_string().contains("JSON object"));
    }

    #[test]
    fn test_conflict_is_classified() {
        let err = OperatorError::from(api_error(409, "Conflict"));
        assert!(matches!(err, OperatorError::UpdateConflict(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_other_api_errors_are_persistence() {
        let err = OperatorError::from(api_error(500, "InternalError"));
        assert!(matches!(err, OperatorError::Persistence(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_retryable_errors() {
        let invalid = OperatorError::InvalidConfig("test".to_string());
        assert!(!invalid.is_retryable());

        let config = OperatorError::ConfigSerialization("test".to_string());
        assert!(!config.is_retryable());
    }
}
