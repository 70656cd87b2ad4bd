//! Webhook processing errors.
//!
//! The terminal/retryable split drives the HTTP status the server returns:
//! verification and parse failures are terminal (the provider must not
//! redeliver the same bytes), while persistence failures after successful
//! verification ask for redelivery.

use metering_store::StoreError;

/// Result type for webhook processing.
pub type Result<T> = std::result::Result<T, WebhookError>;

/// Errors raised while verifying or applying a webhook delivery.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// No shared secret is configured; every delivery is refused.
    #[error("Webhook secret not configured, refusing all deliveries")]
    MissingSecret,

    /// The delivery carried no signature header.
    #[error("Missing webhook signature header")]
    MissingSignature,

    /// The signature did not match the payload.
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// The signature timestamp fell outside the accepted window.
    #[error("Webhook signature timestamp outside tolerance")]
    SignatureExpired,

    /// The payload did not parse into a canonical subscription event.
    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),

    /// Signature computation itself failed.
    #[error("Signature computation failed: {0}")]
    Crypto(String),

    /// Persistence failed after successful verification.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WebhookError {
    /// Whether the provider should redeliver the same payload.
    ///
    /// Only post-verification persistence failures are retryable; a
    /// signature or parse failure will fail identically on every retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_retryable())
    }
}
