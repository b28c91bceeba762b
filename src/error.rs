use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Stable error codes surfaced to clients as `error { code, message }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotAuthenticated,
    InvalidRole,
    RoomNotFound,
    InvalidWebrtcFlow,
    JoinError,
    SignalError,
    BadRequest,
    InternalError,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("Invalid role: {0}")]
    InvalidRole(String),

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Invalid WebRTC flow: {0}")]
    InvalidWebrtcFlow(String),

    #[error("Join failed: {0}")]
    Join(String),

    #[error("Signal relay failed: {0}")]
    Signal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::NotAuthenticated(_) => ErrorCode::NotAuthenticated,
            AppError::InvalidRole(_) => ErrorCode::InvalidRole,
            AppError::RoomNotFound(_) => ErrorCode::RoomNotFound,
            AppError::InvalidWebrtcFlow(_) => ErrorCode::InvalidWebrtcFlow,
            AppError::Join(_) => ErrorCode::JoinError,
            AppError::Signal(_) => ErrorCode::SignalError,
            AppError::BadRequest(_) => ErrorCode::BadRequest,
            AppError::Internal(_) => ErrorCode::InternalError,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotAuthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::InvalidRole(_) => StatusCode::FORBIDDEN,
            AppError::RoomNotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidWebrtcFlow(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Join(_) | AppError::Signal(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "code": self.code(),
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        AppError::NotAuthenticated(format!("Invalid token: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
