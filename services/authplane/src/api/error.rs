//! API error types and helpers.
//!
//! # Purpose and responsibility
//! Centralizes HTTP error response construction so every endpoint, and the request
//! pipeline, returns the same `{code, message, request_id}` shape.
//!
//! # Key invariants and assumptions
//! - Error responses include a stable `code` and a generic `message`.
//! - Status codes align with the error category.
//!
//! # Security considerations
//! - Internal and upstream errors are logged server-side; clients get generic messages.
//! - Messages never echo tokens, verification secrets or store details.
use crate::api::types::ErrorResponse;
use crate::auth::admin::AdminError;
use crate::auth::rbac::EngineError;
use crate::store::StoreError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;

/// Structured API error returned by handlers.
///
/// # Invariants
/// - `status` must match the semantics of `body.code`.
///
/// # Example
/// ```rust
/// use axum::http::StatusCode;
/// use authplane::api::error::ApiError;
/// use authplane::api::types::ErrorResponse;
///
/// let err = ApiError {
///     status: StatusCode::NOT_FOUND,
///     body: ErrorResponse {
///         code: "not_found".to_string(),
///         message: "not found".to_string(),
///         request_id: None,
///     },
/// };
/// ```
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn api_error(status: StatusCode, code: &str, message: &str) -> ApiError {
    ApiError {
        status,
        body: ErrorResponse {
            code: code.to_string(),
            message: message.to_string(),
            request_id: None,
        },
    }
}

/// Build a 404 Not Found error.
pub fn api_not_found(message: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, "not_found", message)
}

/// Build a 409 Conflict error with a caller-provided code.
pub fn api_conflict(code: &str, message: &str) -> ApiError {
    api_error(StatusCode::CONFLICT, code, message)
}

/// Build a 500 Internal Server Error from a store error.
///
/// Logs the store error and returns a generic internal error response.
pub fn api_internal(message: &str, err: &StoreError) -> ApiError {
    tracing::error!(error = ?err, "authplane storage error");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

/// Build a 500 Internal Server Error without a store error.
pub fn api_internal_message(message: &str) -> ApiError {
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

pub fn api_unauthorized(message: &str) -> ApiError {
    api_error(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

pub fn api_forbidden(message: &str) -> ApiError {
    api_error(StatusCode::FORBIDDEN, "forbidden", message)
}

pub fn api_validation_error(message: &str) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, "validation_error", message)
}

/// Build a 503 error for a failed dependency (identity provider, domain lookup).
pub fn api_unavailable(message: &str) -> ApiError {
    api_error(StatusCode::SERVICE_UNAVAILABLE, "upstream_unavailable", message)
}

/// Build a 410 error for an elapsed deadline.
pub fn api_gone(code: &str, message: &str) -> ApiError {
    api_error(StatusCode::GONE, code, message)
}

impl From<AdminError> for ApiError {
    fn from(err: AdminError) -> Self {
        match err {
            AdminError::NotFound(what) => api_not_found(&format!("{what} not found")),
            AdminError::Conflict(what) => api_conflict("already_exists", &what),
            AdminError::Protected(message) => api_forbidden(&message),
            AdminError::Invalid(message) => api_validation_error(&message),
            AdminError::Expired => api_gone("verification_expired", "verification expired"),
            AdminError::Store(err) => {
                tracing::error!(error = ?err, "authplane storage error");
                api_internal_message("storage failure")
            }
            AdminError::Engine(err) => err.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Store(StoreError::NotFound(what)) => {
                api_not_found(&format!("{what} not found"))
            }
            EngineError::Store(err) => api_internal("storage failure", &err),
            other => {
                tracing::error!(error = %other, "authorization engine error");
                api_internal_message("authorization engine failure")
            }
        }
    }
}
