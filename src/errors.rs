use crate::services::{blob_store::BlobError, post_service::PostError, validation::FieldErrors};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Body text for 500s; the underlying error is only logged.
const INTERNAL_MESSAGE: &str = "Internal server error.";

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Per-field messages for 422 responses.
    pub fields: Option<FieldErrors>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            fields: None,
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 401 Unauthorized
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }

    /// 422 carrying the offending fields.
    pub fn validation(fields: FieldErrors) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: fields.to_string(),
            fields: Some(fields),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = match self.fields {
            Some(fields) => json!({
                "error": self.message,
                "status": self.status.as_u16(),
                "fields": fields,
            }),
            None => json!({
                "error": self.message,
                "status": self.status.as_u16()
            }),
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<PostError> for AppError {
    fn from(err: PostError) -> Self {
        match err {
            PostError::Validation(fields) => AppError::validation(fields),
            PostError::NotFound(_) => AppError::not_found(err.to_string()),
            PostError::Forbidden { .. } => {
                AppError::new(StatusCode::FORBIDDEN, "This action is unauthorized.")
            }
            PostError::Storage(_) | PostError::Sqlx(_) => {
                tracing::error!(error = %err, "post operation failed");
                AppError::internal(INTERNAL_MESSAGE)
            }
        }
    }
}

impl From<BlobError> for AppError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::NotFound(_) | BlobError::InvalidKey => AppError::not_found(err.to_string()),
            BlobError::Io(_) => {
                tracing::error!(error = %err, "blob read failed");
                AppError::internal(INTERNAL_MESSAGE)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn storage_failures_hide_their_cause() {
        let cause = io::Error::other("/var/lib/postboard/blobs/ab/cd: Is a directory");
        let err = AppError::from(PostError::Storage(BlobError::Io(cause)));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "Internal server error.");

        let err = AppError::from(BlobError::Io(io::Error::other("disk gone")));
        assert_eq!(err.message, "Internal server error.");
    }

    #[test]
    fn forbidden_and_missing_map_to_client_errors() {
        let err = AppError::from(PostError::Forbidden {
            caller: uuid::Uuid::nil(),
            post: uuid::Uuid::nil(),
        });
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        let err = AppError::from(BlobError::NotFound("posts/x.png".into()));
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
