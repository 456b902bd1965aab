//! Error-to-HTTP response conversion.
//!
//! Implements `IntoResponse` for [`vs_core::Error`] so that route handlers
//! can return `Result<T, AppError>` and use `?` on core results.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError {
    inner: vs_core::Error,
    request_id: Option<String>,
}

impl AppError {
    pub fn new(inner: vs_core::Error) -> Self {
        Self {
            inner,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, id: String) -> Self {
        self.request_id = Some(id);
        self
    }

    pub fn inner(&self) -> &vs_core::Error {
        &self.inner
    }
}

impl From<vs_core::Error> for AppError {
    fn from(e: vs_core::Error) -> Self {
        Self::new(e)
    }
}

impl From<vs_storage::StorageError> for AppError {
    fn from(e: vs_storage::StorageError) -> Self {
        Self::new(e.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error = %self.inner,
                request_id = self.request_id.as_deref().unwrap_or("-"),
                "Server error in media handler"
            );
        } else {
            tracing::debug!(status = %status, error = %self.inner, "Client error");
        }

        let body = json!({
            "error": self.inner.to_string(),
            "code": self.inner.code(),
            "request_id": self.request_id,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_produces_404() {
        let err = AppError::new(vs_core::Error::not_found("file", "local/a.mkv"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn resolution_produces_502() {
        let err = AppError::new(vs_core::Error::resolution("rclone", "remote gone"));
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn storage_errors_convert() {
        let err: AppError = vs_storage::Locator::parse("").unwrap_err().into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn with_request_id() {
        let err = AppError::new(vs_core::Error::Internal("oops".into()))
            .with_request_id("req-123".into());
        assert_eq!(err.request_id.as_deref(), Some("req-123"));
    }
}
