use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use signet_openid::OpenIdError;

/// API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication initiation failed: {0}")]
    InitiationFailed(#[from] OpenIdError),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            // A bad provider URL is our misconfiguration, not the
            // provider's fault
            ApiError::InitiationFailed(OpenIdError::ConfigInvalid(msg)) => {
                tracing::error!(error = %msg, "Invalid provider configuration");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIG_INVALID",
                    "Identity provider is misconfigured".to_string(),
                )
            }
            ApiError::InitiationFailed(err) => {
                tracing::warn!(error = %err, "Failed to initiate authentication");
                (
                    StatusCode::BAD_GATEWAY,
                    "AUTH_INITIATION_FAILED",
                    format!("Could not initiate authentication: {}", err),
                )
            }
            ApiError::Internal(err) => {
                tracing::error!("Internal error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: ErrorDetails {
                code: code.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}
