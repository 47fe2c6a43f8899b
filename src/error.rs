// HTTP API error types and the auth-domain failure taxonomy
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};
use thiserror::Error;

use crate::database::manager::PoolError;

/// Failures surfaced by the credential and session lifecycle.
///
/// Client errors carry stable machine-readable kinds and deliberately
/// generic messages; infrastructure errors are logged and collapsed into a
/// generic response at the HTTP boundary.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("A user with this identifier already exists")]
    AlreadyExists,

    #[error("Invalid login credentials")]
    InvalidCredentials,

    #[error("Email address not confirmed")]
    EmailNotConfirmed,

    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,

    /// OTP mismatch. Distinct internally (it drives the attempt counter) but
    /// serialized as the generic invalid-token kind to avoid oracle behavior.
    #[error("Invalid or expired token")]
    InvalidCode,

    #[error("Too many verification attempts")]
    TooManyAttempts,

    /// A revoked refresh token was presented again: treat the whole session
    /// chain as compromised.
    #[error("Refresh token has already been used")]
    TokenReused,

    #[error("User is banned")]
    Banned,

    #[error("Identity provider is not configured: {0}")]
    ProviderMisconfigured(String),

    #[error("Upstream identity provider error: {0}")]
    UpstreamProvider(String),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Admission failures raised ahead of any handler work.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("Too many requests")]
    RateLimited { retry_after_secs: u64, message: String },

    #[error("Too many failed attempts, try again later")]
    LockedOut,

    #[error("Service suspended")]
    Suspended,
}

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Gone(String),
    TooManyRequests { message: String, retry_after_secs: Option<u64> },
    InternalServerError(String),
    BadGateway(String),
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Gone(_) => StatusCode::GONE,
            ApiError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::Gone(msg)
            | ApiError::InternalServerError(msg)
            | ApiError::BadGateway(msg)
            | ApiError::ServiceUnavailable(msg) => msg,
            ApiError::TooManyRequests { message, .. } => message,
        }
    }

    /// Stable code for client-side handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Gone(_) => "GONE",
            ApiError::TooManyRequests { .. } => "TOO_MANY_REQUESTS",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::BadGateway(_) => "BAD_GATEWAY",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "error": true,
            "message": self.message(),
            "code": self.error_code(),
        });
        if let ApiError::TooManyRequests { retry_after_secs: Some(secs), .. } = self {
            body["retry_after"] = json!(secs);
        }
        body
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::AlreadyExists => ApiError::conflict(err.to_string()),
            AuthError::InvalidCredentials => ApiError::unauthorized(err.to_string()),
            AuthError::EmailNotConfirmed => ApiError::forbidden(err.to_string()),
            AuthError::InvalidOrExpiredToken | AuthError::InvalidCode => {
                ApiError::unauthorized("Invalid or expired token")
            }
            AuthError::TooManyAttempts => ApiError::TooManyRequests {
                message: err.to_string(),
                retry_after_secs: None,
            },
            AuthError::TokenReused => ApiError::unauthorized(err.to_string()),
            AuthError::Banned => ApiError::forbidden(err.to_string()),
            AuthError::ProviderMisconfigured(_) => {
                tracing::error!("{}", err);
                ApiError::bad_request("Identity provider is not configured")
            }
            AuthError::UpstreamProvider(msg) => {
                tracing::error!("upstream provider failure: {}", msg);
                ApiError::BadGateway("Identity provider unavailable".to_string())
            }
            AuthError::Pool(e) => {
                tracing::error!("pool error: {}", e);
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            AuthError::Database(e) => {
                // Log the real error but return a generic message
                tracing::error!("database error: {}", e);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
        }
    }
}

impl From<GuardError> for ApiError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::RateLimited { retry_after_secs, message } => ApiError::TooManyRequests {
                message,
                retry_after_secs: Some(retry_after_secs),
            },
            GuardError::LockedOut => ApiError::TooManyRequests {
                message: err.to_string(),
                retry_after_secs: None,
            },
            GuardError::Suspended => ApiError::ServiceUnavailable("Service suspended".to_string()),
        }
    }
}

impl From<PoolError> for ApiError {
    fn from(err: PoolError) -> Self {
        ApiError::from(AuthError::Pool(err))
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status_code(), Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_stable_codes() {
        let err: ApiError = AuthError::AlreadyExists.into();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.error_code(), "CONFLICT");

        let err: ApiError = AuthError::InvalidCredentials.into();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);

        let err: ApiError = AuthError::TooManyAttempts.into();
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn otp_mismatch_is_not_a_code_oracle() {
        let mismatch: ApiError = AuthError::InvalidCode.into();
        let expired: ApiError = AuthError::InvalidOrExpiredToken.into();
        assert_eq!(mismatch.message(), expired.message());
        assert_eq!(mismatch.status_code(), expired.status_code());
    }

    #[test]
    fn rate_limited_body_carries_retry_after() {
        let err: ApiError = GuardError::RateLimited {
            retry_after_secs: 42,
            message: "slow down".to_string(),
        }
        .into();
        let body = err.to_json();
        assert_eq!(body["retry_after"], 42);
        assert_eq!(body["code"], "TOO_MANY_REQUESTS");
    }
}
