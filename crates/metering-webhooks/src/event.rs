//! Canonicalization of heterogeneous provider payloads.
//!
//! Real billing providers and test senders deliver differently shaped JSON.
//! Everything is parsed into one [`CanonicalEvent`] before any business
//! logic runs; a payload that fails to parse into the union is rejected
//! terminally.
//!
//! Two shapes are accepted:
//! - flat: `{"type", "user_id", "tier"/"new_tier", "old_tier", "status",
//!   "occurred_at"}`
//! - nested: `{"type", "created", "data": {"object": {"customer"/"user_id",
//!   "plan"/"tier", "previous_plan"/"previous_tier", "status"}}}`

use crate::error::{Result, WebhookError};
use chrono::{DateTime, TimeZone, Utc};
use metering_core::{tier_rank, SubscriptionEventType, SubscriptionStatus, Tier, UserId};
use serde_json::Value;

/// A provider-agnostic subscription event.
#[derive(Debug, Clone)]
pub struct CanonicalEvent {
    /// Affected user.
    pub user_id: UserId,
    /// Canonical classification.
    pub event_type: SubscriptionEventType,
    /// Tier label before the change, exactly as the provider wrote it.
    pub old_tier_label: Option<String>,
    /// Tier label after the change, exactly as the provider wrote it.
    pub new_tier_label: Option<String>,
    /// Status the provider asserts, when it asserts one.
    pub asserted_status: Option<SubscriptionStatus>,
    /// When the event occurred at the provider, when stated.
    pub occurred_at: Option<DateTime<Utc>>,
    /// The payload as delivered, preserved for the audit trail.
    pub raw: Value,
}

impl CanonicalEvent {
    /// Parse raw webhook bytes into a canonical event.
    ///
    /// # Errors
    /// Returns [`WebhookError::MalformedPayload`] when the bytes are not
    /// JSON, carry no event type, or carry no user identifier.
    pub fn parse(raw_body: &[u8]) -> Result<Self> {
        let raw: Value = serde_json::from_slice(raw_body)
            .map_err(|e| WebhookError::MalformedPayload(format!("invalid JSON: {e}")))?;

        let kind = raw
            .get("type")
            .or_else(|| raw.get("event"))
            .and_then(Value::as_str)
            .ok_or_else(|| WebhookError::MalformedPayload("missing event type".into()))?
            .to_lowercase();

        // Nested provider payloads wrap the subject in data.object.
        let object = raw
            .get("data")
            .and_then(|d| d.get("object"))
            .unwrap_or(&raw);

        let user_id = object
            .get("user_id")
            .or_else(|| object.get("customer"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(UserId::from)
            .ok_or_else(|| WebhookError::MalformedPayload("missing user identifier".into()))?;

        let new_tier_label = string_field(object, &["new_tier", "tier", "plan"]);
        let old_tier_label = string_field(object, &["old_tier", "previous_tier", "previous_plan"]);

        let asserted_status = if kind.contains("payment_failed") {
            Some(SubscriptionStatus::PastDue)
        } else {
            string_field(object, &["status"]).and_then(|s| s.parse().ok())
        };

        let occurred_at = raw
            .get("occurred_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| {
                raw.get("created")
                    .and_then(Value::as_i64)
                    .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            });

        let event_type = classify(&kind, old_tier_label.as_deref(), new_tier_label.as_deref());

        Ok(Self {
            user_id,
            event_type,
            old_tier_label,
            new_tier_label,
            asserted_status,
            occurred_at,
            raw,
        })
    }

    /// The old tier, when its label is in the catalog.
    #[must_use]
    pub fn old_tier(&self) -> Option<Tier> {
        self.old_tier_label.as_deref().and_then(|s| s.parse().ok())
    }

    /// The new tier, when its label is in the catalog.
    #[must_use]
    pub fn new_tier(&self) -> Option<Tier> {
        self.new_tier_label.as_deref().and_then(|s| s.parse().ok())
    }
}

fn string_field(object: &Value, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| object.get(name))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Map provider vocabulary onto the canonical classification.
///
/// An update is an upgrade or downgrade only when both tier labels are
/// present and differ; rank comparison tolerates labels outside the
/// catalog (they rank below free). Equal labels classify as unknown and
/// mutate nothing downstream.
fn classify(
    kind: &str,
    old_tier: Option<&str>,
    new_tier: Option<&str>,
) -> SubscriptionEventType {
    if kind.contains("created") || kind.contains("activated") {
        return SubscriptionEventType::Activation;
    }
    if kind.contains("deleted") || kind.contains("cancel") {
        return SubscriptionEventType::Cancellation;
    }
    if kind.contains("updated") {
        if let (Some(old), Some(new)) = (old_tier, new_tier) {
            if old != new {
                return if tier_rank(new) > tier_rank(old) {
                    SubscriptionEventType::Upgrade
                } else {
                    SubscriptionEventType::Downgrade
                };
            }
        }
    }
    SubscriptionEventType::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> CanonicalEvent {
        CanonicalEvent::parse(json.as_bytes()).unwrap()
    }

    #[test]
    fn test_flat_activation() {
        let event = parse(
            r#"{"type":"subscription.created","user_id":"u1","tier":"core","status":"active"}"#,
        );
        assert_eq!(event.event_type, SubscriptionEventType::Activation);
        assert_eq!(event.user_id.as_str(), "u1");
        assert_eq!(event.new_tier(), Some(Tier::Core));
        assert_eq!(event.asserted_status, Some(SubscriptionStatus::Active));
    }

    #[test]
    fn test_nested_provider_shape() {
        let event = parse(
            r#"{"type":"customer.subscription.updated","created":1724900000,
                "data":{"object":{"customer":"u2","plan":"studio","previous_plan":"core"}}}"#,
        );
        assert_eq!(event.event_type, SubscriptionEventType::Upgrade);
        assert_eq!(event.user_id.as_str(), "u2");
        assert_eq!(event.old_tier(), Some(Tier::Core));
        assert_eq!(event.new_tier(), Some(Tier::Studio));
        assert!(event.occurred_at.is_some());
    }

    #[test]
    fn test_update_classification_by_rank() {
        let upgrade = parse(
            r#"{"type":"subscription.updated","user_id":"u","old_tier":"core","new_tier":"studio"}"#,
        );
        assert_eq!(upgrade.event_type, SubscriptionEventType::Upgrade);

        let downgrade = parse(
            r#"{"type":"subscription.updated","user_id":"u","old_tier":"studio","new_tier":"free"}"#,
        );
        assert_eq!(downgrade.event_type, SubscriptionEventType::Downgrade);

        // Unrecognized labels rank below free.
        let from_unknown = parse(
            r#"{"type":"subscription.updated","user_id":"u","old_tier":"platinum","new_tier":"free"}"#,
        );
        assert_eq!(from_unknown.event_type, SubscriptionEventType::Upgrade);
    }

    #[test]
    fn test_update_equal_tiers_is_unknown() {
        let event = parse(
            r#"{"type":"subscription.updated","user_id":"u","old_tier":"core","new_tier":"core"}"#,
        );
        assert_eq!(event.event_type, SubscriptionEventType::Unknown);
    }

    #[test]
    fn test_update_missing_old_tier_is_unknown() {
        let event = parse(r#"{"type":"subscription.updated","user_id":"u","new_tier":"studio"}"#);
        assert_eq!(event.event_type, SubscriptionEventType::Unknown);
    }

    #[test]
    fn test_cancellation_spellings() {
        for kind in [
            "subscription.deleted",
            "subscription.cancelled",
            "subscription_canceled",
        ] {
            let event = parse(&format!(r#"{{"type":"{kind}","user_id":"u"}}"#));
            assert_eq!(
                event.event_type,
                SubscriptionEventType::Cancellation,
                "kind {kind}"
            );
        }
    }

    #[test]
    fn test_payment_failed_asserts_past_due() {
        let event = parse(r#"{"type":"invoice.payment_failed","user_id":"u"}"#);
        assert_eq!(event.event_type, SubscriptionEventType::Unknown);
        assert_eq!(event.asserted_status, Some(SubscriptionStatus::PastDue));
    }

    #[test]
    fn test_rejects_non_events() {
        assert!(CanonicalEvent::parse(b"not json").is_err());
        assert!(CanonicalEvent::parse(b"{}").is_err());
        assert!(CanonicalEvent::parse(br#"{"type":"subscription.created"}"#).is_err());
        assert!(CanonicalEvent::parse(br#"{"user_id":"u1"}"#).is_err());
    }
}
