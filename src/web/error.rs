//! Mapping service errors onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::error::{Error, ErrorKind, UploadFailure};

const INTERNAL_MESSAGE: &str = "internal server error";

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

/// An [`Error`] on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub Error);

pub type ApiResult<T> = Result<T, ApiError>;

impl<E: Into<Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::UploadFailure => match &self.0 {
                Error::Upload(UploadFailure::Empty { .. }) => StatusCode::BAD_REQUEST,
                Error::Upload(UploadFailure::Downstream { .. }) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if self.0.kind() == ErrorKind::Internal {
            tracing::error!(error = %self.0, "Request failed");
            INTERNAL_MESSAGE.to_string()
        } else {
            if status.is_server_error() {
                tracing::warn!(error = ?self.0, "Request failed");
            }
            self.0.to_string()
        };

        let body = ErrorBody {
            code: self.0.reason_code(),
            message,
        };
        (status, Json(body)).into_response()
    }
}
