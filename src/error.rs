use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for the rental proxy
#[derive(Error, Debug)]
pub enum RentError {
    // Client input errors
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    // Authorization errors
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Unknown tenant: {0}")]
    UnknownTenant(String),

    #[error("Tenant {0} has been deactivated")]
    TenantInactive(String),

    #[error("Rental for tenant {tenant} expired on {end}")]
    RentalExpired { tenant: String, end: String },

    #[error("Not found: {0}")]
    NotFound(String),

    // Upstream errors
    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("Too many redirects (limit {limit})")]
    TooManyRedirects { limit: u32 },

    #[error("Operation timed out")]
    Timeout,

    // Tenant store errors
    #[error("Tenant store error: {0}")]
    Store(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for rental proxy operations
pub type Result<T> = std::result::Result<T, RentError>;

impl RentError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            RentError::MissingParameter(_)
            | RentError::InvalidRequest(_)
            | RentError::InvalidUrl(_)
            | RentError::UnknownAction(_) => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            RentError::Unauthorized => StatusCode::UNAUTHORIZED,

            // 403 Forbidden
            RentError::UnknownTenant(_)
            | RentError::TenantInactive(_)
            | RentError::RentalExpired { .. } => StatusCode::FORBIDDEN,

            // 404 Not Found
            RentError::NotFound(_) => StatusCode::NOT_FOUND,

            // 502 Bad Gateway
            RentError::Upstream(_)
            | RentError::TooManyRedirects { .. }
            | RentError::Store(_) => StatusCode::BAD_GATEWAY,

            // 504 Gateway Timeout
            RentError::Timeout => StatusCode::GATEWAY_TIMEOUT,

            // 500 Internal Server Error
            RentError::InvalidConfig(_)
            | RentError::Io(_)
            | RentError::Serialization(_)
            | RentError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Tenant authorization failures that end a proxy request before any fetch
    pub fn is_access_denied(&self) -> bool {
        matches!(
            self,
            RentError::UnknownTenant(_)
                | RentError::TenantInactive(_)
                | RentError::RentalExpired { .. }
        )
    }

    /// Transient failures that are reported per request or per tenant and retried next run
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RentError::Timeout | RentError::Upstream(_) | RentError::TooManyRedirects { .. }
        )
    }
}

// Implement IntoResponse for API error responses
impl IntoResponse for RentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

impl From<reqwest::Error> for RentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RentError::Timeout
        } else {
            RentError::Upstream(err.to_string())
        }
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for RentError {
    fn from(err: url::ParseError) -> Self {
        RentError::InvalidUrl(err.to_string())
    }
}
