//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::OrderError;
use service::ServiceError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Service or domain rejection.
    Service(ServiceError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, None, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, None, msg),
            ApiError::Service(err) => service_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, None, msg)
            }
        };

        let body = match code {
            Some(code) => serde_json::json!({ "error": message, "code": code }),
            None => serde_json::json!({ "error": message }),
        };
        (status, axum::Json(body)).into_response()
    }
}

fn service_error_to_response(err: ServiceError) -> (StatusCode, Option<&'static str>, String) {
    match &err {
        ServiceError::Rejected(order_err) => {
            let status = match order_err {
                _ if order_err.is_validation() => StatusCode::BAD_REQUEST,
                OrderError::ReturnNotFound => StatusCode::NOT_FOUND,
                // Everything else is a state conflict the client cannot
                // fix by rephrasing the request.
                _ => StatusCode::CONFLICT,
            };
            (status, Some(order_err.reason_code()), err.to_string())
        }
        ServiceError::OrderNotFound(_) | ServiceError::RefundNotFound(_) => {
            (StatusCode::NOT_FOUND, None, err.to_string())
        }
        ServiceError::UnknownProduct(_) => (StatusCode::NOT_FOUND, None, err.to_string()),
        ServiceError::InsufficientStock { .. } => {
            (StatusCode::CONFLICT, Some("INSUFFICIENT_STOCK"), err.to_string())
        }
        ServiceError::Contention(_) => (StatusCode::CONFLICT, Some("CONTENTION"), err.to_string()),
        ServiceError::Store(_) => {
            tracing::error!(error = %err, "storage failure");
            (StatusCode::INTERNAL_SERVER_ERROR, None, err.to_string())
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError::Service(err)
    }
}
