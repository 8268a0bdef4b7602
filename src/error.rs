//! Error types for the certificate signer

use std::io;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use cert_policy::PolicyRejection;
use serde_json::json;
use thiserror::Error;

/// Result type alias for the certificate signer
pub type Result<T> = std::result::Result<T, Error>;

/// Certificate signer errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing or malformed `Authorization: Bearer` header
    #[error("{0}")]
    Authentication(String),

    /// Unknown or inactive token, or a principal the token may not request
    #[error("{0}")]
    Authorization(String),

    /// Malformed request body or a TTL outside policy
    #[error("{0}")]
    Validation(String),

    /// The CA signing program failed; carries its diagnostic output
    #[error("signing failed: {0}")]
    Signing(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status this error maps to.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::Authorization(_) => StatusCode::FORBIDDEN,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Signing(_)
            | Self::Config(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Audit category name.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "authentication",
            Self::Authorization(_) => "authorization",
            Self::Validation(_) => "validation",
            Self::Signing(_) => "signing",
            _ => "internal",
        }
    }
}

impl From<PolicyRejection> for Error {
    fn from(rejection: PolicyRejection) -> Self {
        if rejection.is_authorization() {
            Self::Authorization(rejection.to_string())
        } else {
            Self::Validation(rejection.to_string())
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match self {
            Self::Authentication(msg) | Self::Authorization(msg) | Self::Validation(msg) => {
                json!({ "error": msg })
            }
            Self::Signing(detail) => json!({ "error": "signing failed", "detail": detail }),
            // Internal detail stays in the server log
            _ => json!({ "error": "internal error" }),
        };
        (status, Json(body)).into_response()
    }
}
