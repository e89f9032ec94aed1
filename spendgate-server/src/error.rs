//! HTTP error mapping for the service.
//!
//! Every failure is rendered as `{"status": false, "message": ...}`.
//! Settlement failures additionally carry `"stage": "settlement"` and the
//! failing `phase`, so a caller can tell them apart from storage failures.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use spendgate::{CollectError, SettlementError};

/// Errors returned by the route handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The collection flow failed.
    #[error(transparent)]
    Collect(#[from] CollectError),

    /// The request body is not valid JSON.
    #[error("Invalid request body: {0}")]
    InvalidBody(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidBody(rejection.body_text())
    }
}

impl From<spendgate::ValidationError> for ApiError {
    fn from(err: spendgate::ValidationError) -> Self {
        Self::Collect(err.into())
    }
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidBody(_) | Self::Collect(CollectError::Validation(_)) => {
                StatusCode::BAD_REQUEST
            }
            Self::Collect(CollectError::Storage(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Collect(CollectError::NotFound) => StatusCode::NOT_FOUND,
            Self::Collect(CollectError::SettlementDisabled) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Collect(CollectError::Settlement(SettlementError::AllowanceExceeded { .. })) => {
                StatusCode::CONFLICT
            }
            Self::Collect(CollectError::Settlement(_)) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        let body = match &self {
            Self::Collect(CollectError::Settlement(err)) => {
                tracing::warn!(phase = %err.phase(), error = ?err, "Settlement failed");
                json!({
                    "status": false,
                    "message": message,
                    "stage": "settlement",
                    "phase": err.phase(),
                })
            }
            Self::Collect(CollectError::Storage(err)) => {
                tracing::error!(error = ?err, "Record store failed");
                json!({ "status": false, "message": message })
            }
            _ => json!({ "status": false, "message": message }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;
    use spendgate::{SettlementPhase, StorageError, ValidationError};

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::from(ValidationError::MissingSignature), StatusCode::BAD_REQUEST),
            (
                ApiError::Collect(StorageError::ConnectionFailure("down".into()).into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (ApiError::Collect(CollectError::NotFound), StatusCode::NOT_FOUND),
            (
                ApiError::Collect(CollectError::SettlementDisabled),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ApiError::Collect(
                    SettlementError::AllowanceExceeded {
                        requested: U256::from(2u64),
                        remaining: U256::from(1u64),
                    }
                    .into(),
                ),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::Collect(SettlementError::SubmissionRejected("AA21".into()).into()),
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.status(), status, "{err}");
        }
    }

    #[test]
    fn test_settlement_phase_is_serialized_lowercase() {
        assert_eq!(
            serde_json::to_value(SettlementPhase::Confirmation).unwrap(),
            json!("confirmation")
        );
    }
}
