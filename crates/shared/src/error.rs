use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::Method;

/// Message returned for every internal gateway failure. Diagnostic detail
/// only goes to the logs.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// JSON error body returned to gateway callers: `{ "error": "..." }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Primary key is required for {method} request")]
    MissingKey { method: Method },
    #[error("Request body must be valid JSON")]
    InvalidBody,
    #[error("Unknown resource '{resource}'")]
    UnknownResource { resource: String },
    #[error("{message}")]
    Backend { status: u16, message: String },
    #[error("Internal server error")]
    Internal,
}

impl GatewayError {
    pub fn status(&self) -> u16 {
        match self {
            Self::MissingKey { .. } | Self::InvalidBody => 400,
            Self::UnknownResource { .. } => 404,
            Self::Backend { status, .. } => *status,
            Self::Internal => 500,
        }
    }
}

impl From<&GatewayError> for ApiError {
    fn from(value: &GatewayError) -> Self {
        Self::new(value.to_string())
    }
}

impl From<GatewayError> for ApiError {
    fn from(value: GatewayError) -> Self {
        Self::from(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_a_client_error() {
        let err = GatewayError::MissingKey {
            method: Method::Patch,
        };
        assert_eq!(err.status(), 400);
        assert_eq!(
            ApiError::from(err).error,
            "Primary key is required for PATCH request"
        );
    }

    #[test]
    fn internal_error_hides_detail() {
        let body = serde_json::to_value(ApiError::from(GatewayError::Internal)).expect("json");
        assert_eq!(body, serde_json::json!({ "error": "Internal server error" }));
    }

    #[test]
    fn backend_error_keeps_status() {
        let err = GatewayError::Backend {
            status: 404,
            message: "not found".into(),
        };
        assert_eq!(err.status(), 404);
        assert_eq!(err.to_string(), "not found");
    }
}
