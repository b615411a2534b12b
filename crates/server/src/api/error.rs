//! JSON error responses.

use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;
use transmute_core::{BatchError, ConversionError, ErrorKind};

/// Error body: `{"error": "...", "kind": "..."}`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: ErrorKind,
}

/// An error ready to be sent to the client.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorKind::InvalidRequest, message)
    }

    /// Multipart failures keep the status axum assigned (413 past the body limit).
    pub fn multipart(err: MultipartError) -> Self {
        let status = err.status();
        let kind = if status == StatusCode::PAYLOAD_TOO_LARGE {
            ErrorKind::SizeExceeded
        } else {
            ErrorKind::InvalidRequest
        };
        Self::new(status, kind, format!("Invalid multipart body: {}", err.body_text()))
    }
}

/// HTTP status for an error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound | ErrorKind::NothingToBundle => StatusCode::NOT_FOUND,
        ErrorKind::UnsupportedFormat
        | ErrorKind::InvalidConversion
        | ErrorKind::BatchTooLarge
        | ErrorKind::EmptyBatch
        | ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorKind::InputMissing | ErrorKind::OutputMissing => StatusCode::GONE,
        ErrorKind::UnsupportedConversion => StatusCode::NOT_IMPLEMENTED,
        ErrorKind::SizeExceeded => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::AlreadyTerminal | ErrorKind::InProgress | ErrorKind::NotReady => {
            StatusCode::CONFLICT
        }
        ErrorKind::ConversionFailure | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<ConversionError> for ApiError {
    fn from(err: ConversionError) -> Self {
        let kind = err.kind();
        let status = status_for(kind);
        if kind == ErrorKind::Internal {
            error!("Internal error: {}", err);
        }
        Self::new(status, kind, err.to_string())
    }
}

impl From<BatchError> for ApiError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::Conversion(e) => e.into(),
            other => {
                let kind = other.kind();
                if kind == ErrorKind::Internal {
                    error!("Batch error: {}", other);
                }
                Self::new(status_for(kind), kind, other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
                kind: self.kind,
            }),
        )
            .into_response()
    }
}
