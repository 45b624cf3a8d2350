//! Error types
//!
//! `DsisError` is what every public client operation returns. Configuration
//! errors surface while a query is being built or rendered; authentication
//! and API errors end a running stream at the point where they occur.

use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::models::ValidationError;
use crate::odata::TransportError;
use reqwest::StatusCode;
use thiserror::Error;

/// Client errors
#[derive(Error, Debug)]
pub enum DsisError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication error: {0}")]
    Authentication(#[from] AuthError),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl DsisError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Authentication(AuthError::Unauthorized { status, .. }) => Some(*status),
            _ => None,
        }
    }

    /// True for an API error with status 404
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND.as_u16())
    }
}

impl From<ConfigError> for DsisError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_of_api_error() {
        let err = DsisError::Api {
            status: 404,
            body: "missing".to_string(),
        };
        assert_eq!(err.status(), Some(404));
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "API error (404): missing");
    }

    #[test]
    fn test_status_of_unauthorized() {
        let err = DsisError::from(AuthError::Unauthorized {
            status: 401,
            body: String::new(),
        });
        assert_eq!(err.status(), Some(401));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_configuration_has_no_status() {
        let err = DsisError::configuration("schema must be set");
        assert_eq!(err.status(), None);
        assert!(err.to_string().contains("schema must be set"));
    }
}
