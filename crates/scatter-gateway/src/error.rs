//! Gateway error type and its HTTP mapping.
//!
//! Error bodies are short plain-text messages, which is what browser and
//! player front ends display as-is.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use scatter_codec::FormatError;
use scatter_engine::{DownloadError, TransferError};

/// Errors returned by gateway handlers.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// A required query parameter or header is missing or invalid.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The share code could not be decoded.
    #[error("invalid share code: {0}")]
    InvalidShareCode(#[from] FormatError),

    /// The requested range lies outside the file.
    #[error("range not satisfiable for {size} bytes")]
    RangeNotSatisfiable {
        /// Size of the whole file.
        size: u64,
    },

    /// An upload or download failed.
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// The access key was missing or wrong.
    #[error("access key required")]
    AccessDenied,

    /// The request came from a web page that may not read this endpoint.
    #[error("cross-origin access forbidden")]
    CrossOrigin,

    /// No task with this id.
    #[error("no such task: {0}")]
    NoSuchTask(u64),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            // Failed transfers and bad input all surface as 500, matching
            // what existing front ends expect from this gateway.
            Self::InvalidRequest(_) | Self::InvalidShareCode(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::Transfer(TransferError::Download(DownloadError::RangeNotSatisfiable {
                ..
            })) => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::Transfer(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::AccessDenied | Self::CrossOrigin => StatusCode::FORBIDDEN,
            Self::NoSuchTask(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn unsatisfied_size(&self) -> Option<u64> {
        match self {
            Self::RangeNotSatisfiable { size } => Some(*size),
            Self::Transfer(TransferError::Download(DownloadError::RangeNotSatisfiable {
                size,
                ..
            })) => Some(*size),
            _ => None,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = (status, self.to_string()).into_response();
        if let Some(size) = self.unsatisfied_size()
            && let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}"))
        {
            response.headers_mut().insert(header::CONTENT_RANGE, value);
        }
        response
    }
}
