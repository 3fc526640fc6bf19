//! Service error types.

use thiserror::Error;

/// Errors that can occur when talking to the backing services.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Authentication failed (invalid or expired API token).
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The service returned an error response.
    #[error("service error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// A network error occurred.
    #[error("network error: {0}")]
    Network(String),

    /// A template directory could not be loaded.
    #[error("template load failed: {0}")]
    TemplateLoad(String),
}

impl ServiceError {
    /// Classify an HTTP failure status into the right variant.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => ServiceError::AuthenticationFailed(message),
            _ => ServiceError::Api { status, message },
        }
    }

    /// Returns `true` for errors where retrying the same request may
    /// succeed: timeouts, network failures, and server-side errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Timeout | ServiceError::Network(_) => true,
            ServiceError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ServiceError::Timeout
        } else {
            ServiceError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            ServiceError::from_status(401, "bad token".into()),
            ServiceError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            ServiceError::from_status(503, "maintenance".into()),
            ServiceError::Api { status: 503, .. }
        ));
    }

    #[test]
    fn retryability_tracks_error_class() {
        assert!(ServiceError::Timeout.is_retryable());
        assert!(ServiceError::Network("connection reset".into()).is_retryable());
        assert!(ServiceError::Api {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(!ServiceError::Api {
            status: 422,
            message: String::new()
        }
        .is_retryable());
        assert!(!ServiceError::AuthenticationFailed("expired".into()).is_retryable());
    }
}
