use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

// Struktur response error yang konsisten untuk endpoint non-Click
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

// Enum untuk semua jenis error yang mungkin terjadi di payment service.
// Endpoint Click tidak pernah memakai IntoResponse ini, selalu 200 dengan kode Click.
#[derive(Debug)]
pub enum AppError {
    DatabaseError(sqlx::Error),
    ValidationError(String),
    UnauthorizedError(String),
    ForbiddenError(String),
    NotFoundError(String),
    InternalError(String),
    TokenError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::DatabaseError(e) => write!(f, "Database error: {}", e),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::UnauthorizedError(msg) => write!(f, "Unauthorized error: {}", msg),
            AppError::ForbiddenError(msg) => write!(f, "Forbidden error: {}", msg),
            AppError::NotFoundError(msg) => write!(f, "Not found: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::TokenError(msg) => write!(f, "Token error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

// Konversi dari sqlx::Error ke AppError
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err)
    }
}

// Konversi dari JwtError ke AppError
impl From<crate::utils::jwt::JwtError> for AppError {
    fn from(err: crate::utils::jwt::JwtError) -> Self {
        AppError::TokenError(err.to_string())
    }
}

// Implementasi IntoResponse untuk AppError agar bisa langsung digunakan sebagai response di axum
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message, details) = match &self {
            AppError::DatabaseError(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    "Terjadi kesalahan pada database",
                    if cfg!(debug_assertions) {
                        Some(e.to_string())
                    } else {
                        None
                    },
                )
            }
            AppError::ValidationError(msg) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                msg.as_str(),
                None,
            ),
            AppError::UnauthorizedError(msg) => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                msg.as_str(),
                None,
            ),
            AppError::ForbiddenError(msg) => (
                StatusCode::FORBIDDEN,
                "forbidden",
                msg.as_str(),
                None,
            ),
            AppError::NotFoundError(msg) => {
                (StatusCode::NOT_FOUND, "not_found", msg.as_str(), None)
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Terjadi kesalahan internal server",
                    if cfg!(debug_assertions) {
                        Some(msg.clone())
                    } else {
                        None
                    },
                )
            }
            AppError::TokenError(msg) => (
                StatusCode::UNAUTHORIZED,
                "token_error",
                "Token tidak valid atau sudah kadaluarsa",
                if cfg!(debug_assertions) {
                    Some(msg.clone())
                } else {
                    None
                },
            ),
        };

        let error_response = ErrorResponse {
            error: error_type.to_string(),
            message: message.to_string(),
            details,
        };

        (status, Json(error_response)).into_response()
    }
}

// Helper functions untuk membuat error dengan mudah
impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::ValidationError(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFoundError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::InternalError(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        AppError::UnauthorizedError(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        AppError::ForbiddenError(msg.into())
    }
}

// Type alias untuk Result dengan AppError sebagai error type
pub type AppResult<T> = Result<T, AppError>;
