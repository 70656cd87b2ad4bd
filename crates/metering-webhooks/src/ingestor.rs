//! Webhook ingestion: verify, canonicalize, audit, apply.
//!
//! Every accepted delivery appends exactly one audit entry, mutations
//! included or not. Profile mutation always sets the asserted target state
//! rather than applying a delta, so redelivering an identical event is
//! idempotent on state while still growing the audit trail.

use crate::error::Result;
use crate::event::CanonicalEvent;
use crate::signature::SignatureVerifier;
use chrono::Utc;
use metering_core::{
    SubscriptionAuditEntry, SubscriptionEventType, SubscriptionStatus, Tier, UserProfile,
};
use metering_store::MeteringStore;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of an accepted delivery.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    /// The canonical event the payload parsed into.
    pub event: CanonicalEvent,
    /// Whether the delivery mutated the user's profile.
    pub applied: bool,
}

/// Processes signed subscription webhooks end to end.
#[derive(Clone)]
pub struct WebhookIngestor {
    store: Arc<dyn MeteringStore>,
    verifier: SignatureVerifier,
}

impl WebhookIngestor {
    /// Create an ingestor over a store and a signature verifier.
    #[must_use]
    pub fn new(store: Arc<dyn MeteringStore>, verifier: SignatureVerifier) -> Self {
        Self { store, verifier }
    }

    /// Process one delivery.
    ///
    /// # Errors
    /// Verification and parse failures are terminal; store failures after
    /// verification are retryable and the caller should request redelivery.
    pub async fn process(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
        provider: &str,
    ) -> Result<IngestOutcome> {
        if let Err(err) = self.verifier.verify(raw_body, signature_header) {
            // Security event; the payload itself is never logged or echoed.
            warn!(provider, error = %err, "Rejected webhook delivery");
            return Err(err);
        }

        let event = CanonicalEvent::parse(raw_body)?;
        let current = self.store.profile(&event.user_id).await?;

        // Out-of-order redelivery guard: an event older than the profile's
        // last accepted mutation must not overwrite newer state.
        let stale = match (event.occurred_at, &current) {
            (Some(occurred_at), Some(profile)) => occurred_at < profile.updated_at,
            _ => false,
        };

        let target = if stale {
            warn!(
                user_id = %event.user_id,
                event_type = %event.event_type,
                "Stale webhook event, auditing without applying"
            );
            None
        } else {
            target_state(&event, current.as_ref())
        };

        let entry = SubscriptionAuditEntry::new(
            event.user_id.clone(),
            event.event_type,
            event.old_tier().or_else(|| current.as_ref().map(|p| p.tier)),
            target.as_ref().map(|p| p.tier).or_else(|| event.new_tier()),
            provider,
            event.raw.clone(),
        );

        let applied = target.is_some();
        self.store.apply_subscription(&entry, target.as_ref()).await?;

        info!(
            user_id = %event.user_id,
            event_type = %event.event_type,
            provider,
            applied,
            "Processed subscription webhook"
        );
        Ok(IngestOutcome { event, applied })
    }
}

impl std::fmt::Debug for WebhookIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookIngestor").finish_non_exhaustive()
    }
}

/// Compute the asserted target profile for an event, or `None` for an
/// audited no-op.
fn target_state(event: &CanonicalEvent, current: Option<&UserProfile>) -> Option<UserProfile> {
    let updated_at = event.occurred_at.unwrap_or_else(Utc::now);
    let current_status = current.map_or(SubscriptionStatus::Active, |p| p.status);

    match event.event_type {
        SubscriptionEventType::Activation => {
            // An activation asserting a tier outside the catalog cannot be
            // applied; it stays in the audit trail only.
            let tier = event.new_tier()?;
            Some(UserProfile {
                user_id: event.user_id.clone(),
                tier,
                status: event.asserted_status.unwrap_or(SubscriptionStatus::Active),
                updated_at,
            })
        }
        SubscriptionEventType::Cancellation => Some(UserProfile {
            user_id: event.user_id.clone(),
            tier: Tier::Free,
            status: SubscriptionStatus::Cancelled,
            updated_at,
        }),
        SubscriptionEventType::Upgrade | SubscriptionEventType::Downgrade => {
            let tier = event.new_tier()?;
            Some(UserProfile {
                user_id: event.user_id.clone(),
                tier,
                status: event.asserted_status.unwrap_or(current_status),
                updated_at,
            })
        }
        SubscriptionEventType::Unknown => {
            // A payment failure asserts past_due on the current tier;
            // every other unknown event is an audited no-op.
            let status = event.asserted_status?;
            if status == SubscriptionStatus::PastDue {
                Some(UserProfile {
                    user_id: event.user_id.clone(),
                    tier: current.map_or(Tier::Free, |p| p.tier),
                    status,
                    updated_at,
                })
            } else {
                None
            }
        }
    }
}
