//! HMAC signature verification for webhook deliveries.
//!
//! Signatures are computed over the exact raw request bytes, never over
//! re-serialized JSON. The header format is `t=<unix_ts>,v1=<hex_hmac>`
//! where the MAC input is `"{timestamp}:{hex(payload)}"`. Comparison is
//! constant time.

use crate::error::{Result, WebhookError};
use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::time::Duration;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

fn hmac_sha256_hex(key: &[u8], data: &[u8]) -> Result<String> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| WebhookError::Crypto(format!("invalid HMAC key: {e}")))?;
    mac.update(data);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Produce a signature header for a payload. Used by test senders and the
/// replay tooling; the gateway itself only verifies.
///
/// # Errors
/// Returns an error if the MAC cannot be computed.
pub fn sign(secret: &str, payload: &[u8]) -> Result<String> {
    let timestamp = Utc::now().timestamp();
    let signed_payload = format!("{}:{}", timestamp, hex::encode(payload));
    let signature = hmac_sha256_hex(secret.as_bytes(), signed_payload.as_bytes())?;
    Ok(format!("t={timestamp},v1={signature}"))
}

/// Verifies webhook signature headers against a shared secret.
///
/// A verifier without a secret refuses everything: a missing secret is a
/// deployment misconfiguration, never an allow-all fallback.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Option<SecretString>,
    tolerance: Duration,
}

impl SignatureVerifier {
    /// Create a verifier. `tolerance` bounds the accepted clock skew
    /// between the signature timestamp and now, in either direction.
    #[must_use]
    pub const fn new(secret: Option<SecretString>, tolerance: Duration) -> Self {
        Self { secret, tolerance }
    }

    /// Verify a delivery.
    ///
    /// # Errors
    /// Returns a terminal error for a missing secret, missing or malformed
    /// header, expired timestamp, or MAC mismatch.
    pub fn verify(&self, payload: &[u8], header: Option<&str>) -> Result<()> {
        let Some(secret) = &self.secret else {
            warn!("Webhook delivery refused: no signing secret configured");
            return Err(WebhookError::MissingSecret);
        };
        let Some(header) = header else {
            return Err(WebhookError::MissingSignature);
        };

        let parts: Vec<&str> = header.split(',').collect();
        if parts.len() < 2 {
            return Err(WebhookError::InvalidSignature);
        }

        let timestamp = parts[0]
            .strip_prefix("t=")
            .and_then(|t| t.parse::<i64>().ok())
            .ok_or(WebhookError::InvalidSignature)?;

        let sig_value = parts
            .iter()
            .find_map(|p| p.strip_prefix("v1="))
            .ok_or(WebhookError::InvalidSignature)?;

        let now = Utc::now().timestamp();
        if (now - timestamp).unsigned_abs() > self.tolerance.as_secs() {
            return Err(WebhookError::SignatureExpired);
        }

        let signed_payload = format!("{}:{}", timestamp, hex::encode(payload));
        let expected =
            hmac_sha256_hex(secret.expose_secret().as_bytes(), signed_payload.as_bytes())?;

        if !constant_time_eq(expected.as_bytes(), sig_value.as_bytes()) {
            return Err(WebhookError::InvalidSignature);
        }

        Ok(())
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("tolerance", &self.tolerance)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: Duration = Duration::from_secs(300);

    fn verifier(secret: &str) -> SignatureVerifier {
        SignatureVerifier::new(Some(SecretString::from(secret.to_string())), TOLERANCE)
    }

    #[test]
    fn test_round_trip() {
        let payload = br#"{"type":"subscription.created","user_id":"u1"}"#;
        let header = sign("whsec_test", payload).unwrap();
        verifier("whsec_test").verify(payload, Some(&header)).unwrap();
    }

    #[test]
    fn test_tampered_body_rejected() {
        let header = sign("whsec_test", b"original").unwrap();
        let err = verifier("whsec_test")
            .verify(b"tampered", Some(&header))
            .unwrap_err();
        assert!(matches!(err, WebhookError::InvalidSignature));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let header = sign("secret1", b"payload").unwrap();
        let err = verifier("secret2").verify(b"payload", Some(&header)).unwrap_err();
        assert!(matches!(err, WebhookError::InvalidSignature));
    }

    #[test]
    fn test_missing_header_rejected() {
        let err = verifier("whsec_test").verify(b"payload", None).unwrap_err();
        assert!(matches!(err, WebhookError::MissingSignature));
    }

    #[test]
    fn test_missing_secret_refuses_even_valid_signature() {
        let header = sign("whsec_test", b"payload").unwrap();
        let unconfigured = SignatureVerifier::new(None, TOLERANCE);
        let err = unconfigured.verify(b"payload", Some(&header)).unwrap_err();
        assert!(matches!(err, WebhookError::MissingSecret));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let timestamp = Utc::now().timestamp() - 600;
        let payload = b"payload";
        let signed_payload = format!("{}:{}", timestamp, hex::encode(payload));
        let sig = hmac_sha256_hex(b"whsec_test", signed_payload.as_bytes()).unwrap();
        let header = format!("t={timestamp},v1={sig}");
        let err = verifier("whsec_test")
            .verify(payload, Some(&header))
            .unwrap_err();
        assert!(matches!(err, WebhookError::SignatureExpired));
    }

    #[test]
    fn test_garbage_header_rejected() {
        for header in ["", "t=abc,v1=def", "v1=aaaa", "t=123"] {
            let err = verifier("whsec_test")
                .verify(b"payload", Some(header))
                .unwrap_err();
            assert!(
                matches!(err, WebhookError::InvalidSignature),
                "header {header:?}"
            );
        }
    }
}
