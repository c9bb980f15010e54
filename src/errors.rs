use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

/// Reason codes attached to authentication failures, used for metrics and the auth-deny audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDenyReason {
    Missing,
    Denied,
    InvalidToken,
}

impl AuthDenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthDenyReason::Missing => "auth_missing",
            AuthDenyReason::Denied => "auth_denied",
            AuthDenyReason::InvalidToken => "auth_invalid_token",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(anyhow::Error),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("slot is not available")]
    SlotNotAvailable,

    #[error("cannot {action} a booking that is {status}")]
    InvalidState { action: &'static str, status: String },

    #[error("unauthorized")]
    Unauthorized(AuthDenyReason),

    #[error("forbidden")]
    Forbidden,

    #[error("rate limited, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Database(e) if is_constraint_violation(e) => StatusCode::CONFLICT,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::SlotNotAvailable | AppError::InvalidState { .. } => StatusCode::CONFLICT,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(e) if is_constraint_violation(e) => "CONFLICT",
            AppError::Database(_) | AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::SlotNotAvailable => "SLOT_NOT_AVAILABLE",
            AppError::InvalidState { .. } => "INVALID_STATE",
            AppError::Unauthorized(reason) => reason.as_str(),
            AppError::Forbidden => AuthDenyReason::Denied.as_str(),
            AppError::RateLimited { .. } => "RATE_LIMITED",
            AppError::Unavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    /// JSON body for this error. Internal details never leave the process.
    pub fn body(&self) -> serde_json::Value {
        let message = match self.status() {
            StatusCode::INTERNAL_SERVER_ERROR => "an internal error occurred".to_string(),
            StatusCode::CONFLICT if matches!(self, AppError::Database(_)) => {
                "conflicting state, please retry".to_string()
            }
            _ => self.to_string(),
        };
        serde_json::json!({ "error": message, "code": self.code() })
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<rusqlite::Error>() {
            Ok(db) => AppError::Database(db),
            Err(e) => AppError::Internal(e),
        }
    }
}

pub fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(rusqlite::ErrorCode::ConstraintViolation)
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = axum::Json(self.body());
        match self {
            AppError::RateLimited { retry_after_secs } => (
                status,
                [(header::RETRY_AFTER, retry_after_secs.to_string())],
                body,
            )
                .into_response(),
            _ => (status, body).into_response(),
        }
    }
}
