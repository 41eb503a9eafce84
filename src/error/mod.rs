use actix_web::{HttpResponse, error::ResponseError, http::StatusCode};
use serde::{Deserialize, Serialize};
use sqlx::error::Error as SqlxError;
use std::error::Error as StdError;
use std::fmt;

/// Sub-classification for an admission-chain rejection, rendered as the classifier
/// token callers match on (budget/token/request/rate/blocked/provider).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionDenialKind {
    Budget,
    TokenRate,
    RequestRate,
    Inactive,
    NoProviderForModel,
}

impl AdmissionDenialKind {
    pub fn token(&self) -> &'static str {
        match self {
            AdmissionDenialKind::Budget => "budget",
            AdmissionDenialKind::TokenRate => "token",
            AdmissionDenialKind::RequestRate => "request",
            AdmissionDenialKind::Inactive => "blocked",
            AdmissionDenialKind::NoProviderForModel => "provider",
        }
    }
}

#[derive(Debug)]
pub enum AppError {
    Database(String),
    Internal(String),
    Auth(String),
    Unauthorized(String),
    NotFound(String),
    BadRequest(String),
    Forbidden(String),
    Configuration(String),
    Validation(String),
    InvalidArgument(String),
    Serialization(String),
    LockPoisoned(String),
    NotImplemented(String),
    TooManyRequests(String),
    AlreadyExists(String),
    DataIntegrity(String),
    /// Admission-chain rejection (budget exhausted, rate-limited, inactive key, no
    /// provider available for the requested model).
    AdmissionDenied(AdmissionDenialKind, String),
}

#[derive(Serialize, Deserialize)]
struct ErrorResponse {
    code: u16,
    message: String,
    error_type: String,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Database(e) => write!(f, "Database error: {}", e),
            AppError::Internal(e) => write!(f, "Internal error: {}", e),
            AppError::Auth(e) => write!(f, "Authentication error: {}", e),
            AppError::Unauthorized(e) => write!(f, "Unauthorized: {}", e),
            AppError::NotFound(e) => write!(f, "Not found: {}", e),
            AppError::BadRequest(e) => write!(f, "Bad request: {}", e),
            AppError::Forbidden(e) => write!(f, "Forbidden: {}", e),
            AppError::Configuration(e) => write!(f, "Configuration error: {}", e),
            AppError::Validation(e) => write!(f, "Validation error: {}", e),
            AppError::InvalidArgument(e) => write!(f, "Invalid argument: {}", e),
            AppError::Serialization(e) => write!(f, "Serialization error: {}", e),
            AppError::LockPoisoned(e) => write!(f, "Lock poisoned: {}", e),
            AppError::NotImplemented(e) => write!(f, "Not implemented: {}", e),
            AppError::TooManyRequests(e) => write!(f, "Too many requests: {}", e),
            AppError::AlreadyExists(e) => write!(f, "Already exists: {}", e),
            AppError::DataIntegrity(e) => write!(f, "Data integrity error: {}", e),
            AppError::AdmissionDenied(kind, e) => {
                write!(f, "Admission denied ({}): {}", kind.token(), e)
            }
        }
    }
}

impl StdError for AppError {}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status_code, error_type) = match self {
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            AppError::Auth(_) => (StatusCode::UNAUTHORIZED, "authentication_error"),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            AppError::Configuration(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error")
            }
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            AppError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "invalid_argument"),
            AppError::Serialization(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "serialization_error")
            }
            AppError::LockPoisoned(_) => (StatusCode::INTERNAL_SERVER_ERROR, "lock_poisoned"),
            AppError::NotImplemented(_) => (StatusCode::NOT_IMPLEMENTED, "not_implemented"),
            AppError::TooManyRequests(_) => (StatusCode::TOO_MANY_REQUESTS, "too_many_requests"),
            AppError::AlreadyExists(_) => (StatusCode::CONFLICT, "already_exists"),
            AppError::DataIntegrity(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "data_integrity_error")
            }
            AppError::AdmissionDenied(_, _) => (StatusCode::BAD_REQUEST, "admission_denied"),
        };

        let error_response = ErrorResponse {
            code: status_code.as_u16(),
            message: self.to_string(),
            error_type: error_type.to_string(),
        };

        HttpResponse::build(status_code).json(error_response)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::LockPoisoned(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            AppError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::AlreadyExists(_) => StatusCode::CONFLICT,
            AppError::DataIntegrity(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::AdmissionDenied(_, _) => StatusCode::BAD_REQUEST,
        }
    }
}

impl AppError {
    /// Returns true if this error is permanent and should not be retried.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            AppError::Auth(_)
                | AppError::InvalidArgument(_)
                | AppError::Validation(_)
                | AppError::NotFound(_)
                | AppError::AlreadyExists(_)
                | AppError::Configuration(_)
                | AppError::BadRequest(_)
                | AppError::Forbidden(_)
                | AppError::AdmissionDenied(_, _)
        )
    }
}

impl From<SqlxError> for AppError {
    fn from(error: SqlxError) -> Self {
        match error {
            SqlxError::RowNotFound => AppError::NotFound("Record not found".to_string()),
            _ => AppError::Database(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::Internal(format!(
            "JSON deserialization/serialization error: {}",
            error
        ))
    }
}

pub type AppResult<T> = Result<T, AppError>;
