use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

/// Error body returned to HTTP callers.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Not Found",
    "message": "Order 1001 not found",
    "details": null,
    "timestamp": "2026-08-31T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    #[schema(example = "Not Found")]
    pub error: String,
    /// Human-readable error description
    #[schema(example = "Order 1001 not found")]
    pub message: String,
    /// Additional structured details (per-field errors, amount diagnostics)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// ISO 8601 timestamp when the error occurred
    #[schema(example = "2026-08-31T10:30:00.000Z")]
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Validation failure carrying the paid/expected amount diagnostics
    /// from payment confirmation and webhook verification.
    #[error("Amount mismatch: provider reported {paid_amount} {paid_currency}, expected {expected_amount} {expected_currency}")]
    AmountMismatch {
        paid_amount: i64,
        expected_amount: i64,
        paid_currency: String,
        expected_currency: String,
    },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Unexpected error: {0}")]
    Unexpected(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// The HTTP status code for this error. Single source of truth for
    /// the error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ValidationError(_) | Self::AmountMismatch { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::InvalidOperation(_) => StatusCode::BAD_REQUEST,
            Self::ProviderError(_) | Self::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The message exposed to HTTP callers. Unexpected and provider errors
    /// are logged with full detail but reported generically.
    pub fn response_message(&self) -> String {
        match self {
            Self::Unexpected(_) => "Internal server error".to_string(),
            Self::ProviderError(_) => "Payment provider error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Structured details for the response body, where the variant carries
    /// any.
    pub fn response_details(&self) -> Option<serde_json::Value> {
        match self {
            Self::AmountMismatch {
                paid_amount,
                expected_amount,
                paid_currency,
                expected_currency,
            } => Some(json!({
                "paidAmount": paid_amount,
                "expectedAmount": expected_amount,
                "paidCurrency": paid_currency,
                "expectedCurrency": expected_currency,
            })),
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: self.response_details(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
