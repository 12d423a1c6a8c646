use crate::services::hierarchy_service::HierarchyError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error. The cause is logged, the
    /// caller only sees a generic message.
    pub fn internal(cause: impl fmt::Display) -> Self {
        tracing::error!("internal error: {}", cause);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
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
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<HierarchyError> for AppError {
    fn from(err: HierarchyError) -> Self {
        let status = match err {
            HierarchyError::Unauthorized => StatusCode::UNAUTHORIZED,
            HierarchyError::MissingField(_)
            | HierarchyError::InvalidField(_)
            | HierarchyError::ParentNotFound
            | HierarchyError::ParentNotFolder => StatusCode::BAD_REQUEST,
            HierarchyError::NotFound => StatusCode::NOT_FOUND,
            HierarchyError::Store(_) | HierarchyError::Io(_) => return AppError::internal(err),
        };
        AppError::new(status, err.to_string())
    }
}
