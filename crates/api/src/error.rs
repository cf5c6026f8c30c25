use axum::http::{HeaderValue, StatusCode, header};
use axum::{Json, response::IntoResponse};
use idlink_domain::backfill::BackfillError;
use idlink_domain::ports::registration::RegistrationError;
use idlink_domain::resolution::{ErrorCategory, ResolutionError};
use serde::Serialize;
use thiserror::Error;

const RETRY_AFTER_SECONDS: &str = "5";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{message}")]
    BadRequest { code: &'static str, message: String },
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    ServiceUnavailable(String),
    #[error("internal error")]
    Internal,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::BadRequest { code, .. } => *code,
            ApiError::Unauthorized => "unauthorized",
            ApiError::Forbidden => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
            ApiError::Internal => "internal_error",
        }
    }

    pub fn with_correlation(self, correlation_id: impl Into<String>) -> CorrelatedError {
        CorrelatedError {
            error: self,
            correlation_id: Some(correlation_id.into()),
        }
    }
}

impl From<&ResolutionError> for ApiError {
    fn from(err: &ResolutionError) -> Self {
        match err.category() {
            ErrorCategory::NotFound => ApiError::NotFound(err.to_string()),
            ErrorCategory::Conflict => ApiError::Conflict(err.to_string()),
            ErrorCategory::ServiceUnavailable => {
                ApiError::ServiceUnavailable("identity provider unavailable".into())
            }
            ErrorCategory::Invalid => ApiError::BadRequest {
                code: invalid_code(err),
                message: err.to_string(),
            },
            ErrorCategory::Internal => ApiError::Internal,
        }
    }
}

fn invalid_code(err: &ResolutionError) -> &'static str {
    match err {
        ResolutionError::Registration(RegistrationError::InvalidEmail(_)) => "invalid_email",
        ResolutionError::Registration(RegistrationError::NotVerified(_)) => "email_not_verified",
        ResolutionError::Registration(RegistrationError::MissingAuthenticationId) => {
            "missing_authentication_id"
        }
        ResolutionError::IncompleteRegistration { .. } => "incomplete_registration",
        _ => "invalid_request",
    }
}

impl From<BackfillError> for ApiError {
    fn from(err: BackfillError) -> Self {
        if matches!(err, BackfillError::AlreadyRunning) {
            return ApiError::Conflict(err.to_string());
        }
        tracing::error!(error = %err, outcome = ?err.partial_outcome(), "identity backfill failed");
        ApiError::Internal
    }
}

/// An `ApiError` that echoes the request correlation id in its body.
#[derive(Debug)]
pub struct CorrelatedError {
    error: ApiError,
    correlation_id: Option<String>,
}

impl From<ApiError> for CorrelatedError {
    fn from(error: ApiError) -> Self {
        Self {
            error,
            correlation_id: None,
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
}

impl IntoResponse for CorrelatedError {
    fn into_response(self) -> axum::response::Response {
        let status = self.error.status_code();
        let body = ErrorEnvelope {
            error: ErrorBody {
                code: self.error.error_code(),
                message: self.error.to_string(),
                correlation_id: self.correlation_id,
            },
        };
        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from_static(RETRY_AFTER_SECONDS),
            );
        }
        response
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        CorrelatedError::from(self).into_response()
    }
}
