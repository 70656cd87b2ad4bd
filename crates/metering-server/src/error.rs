//! API error responses.
//!
//! Handlers return `Result<_, ApiError>`; the error serializes to a JSON
//! body with a stable machine-readable code. Webhook errors map their
//! terminal/retryable split onto status codes: terminal verification
//! failures are 4xx, retryable persistence failures are 503 so the
//! provider redelivers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use metering_store::StoreError;
use metering_webhooks::WebhookError;
use serde_json::json;

use crate::client::CompletionError;

/// An error that renders as an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status to return.
    pub status: StatusCode,
    /// Stable machine-readable code.
    pub code: &'static str,
    /// Human-readable detail.
    pub message: String,
}

impl ApiError {
    /// 400 with a caller-supplied message.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: message.into(),
        }
    }

    /// 404 with a caller-supplied message.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            message: message.into(),
        }
    }

    /// 500 with a caller-supplied message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal_error",
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "code": self.code,
                "message": self.message,
            }
        }));
        (self.status, body).into_response()
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        // A rejected delivery never echoes payload content; the message is
        // the error's own description only.
        match &err {
            WebhookError::MissingSecret => Self {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "webhook_unconfigured",
                message: err.to_string(),
            },
            WebhookError::MissingSignature
            | WebhookError::InvalidSignature
            | WebhookError::SignatureExpired => Self {
                status: StatusCode::UNAUTHORIZED,
                code: "invalid_signature",
                message: err.to_string(),
            },
            WebhookError::MalformedPayload(_) => Self {
                status: StatusCode::BAD_REQUEST,
                code: "malformed_payload",
                message: err.to_string(),
            },
            WebhookError::Crypto(_) => Self::internal(err.to_string()),
            WebhookError::Store(store) => {
                if store.is_retryable() {
                    Self {
                        status: StatusCode::SERVICE_UNAVAILABLE,
                        code: "storage_unavailable",
                        message: "temporary storage failure, please redeliver".into(),
                    }
                } else {
                    Self::internal(err.to_string())
                }
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        if err.is_retryable() {
            Self {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "storage_unavailable",
                message: err.to_string(),
            }
        } else {
            Self::internal(err.to_string())
        }
    }
}

impl From<CompletionError> for ApiError {
    fn from(err: CompletionError) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            code: "completion_backend_error",
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_error_status_mapping() {
        let cases = [
            (WebhookError::MissingSecret, StatusCode::SERVICE_UNAVAILABLE),
            (WebhookError::MissingSignature, StatusCode::UNAUTHORIZED),
            (WebhookError::InvalidSignature, StatusCode::UNAUTHORIZED),
            (WebhookError::SignatureExpired, StatusCode::UNAUTHORIZED),
            (
                WebhookError::MalformedPayload("x".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                WebhookError::Store(StoreError::Connection("down".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn test_rejected_webhook_never_echoes_payload() {
        let err = ApiError::from(WebhookError::MalformedPayload("invalid JSON".into()));
        assert!(!err.message.contains('{'));
    }
}
