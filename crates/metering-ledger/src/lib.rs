//! # Metering Ledger
//!
//! The enforcement core: admit-or-deny decisions for prospective requests,
//! post-generation cost reconciliation, and audited administrative resets.
//!
//! The ledger itself holds no counters. Admission is delegated to the
//! store's single atomic increment-and-compare primitive, so two concurrent
//! requests can never both squeeze through the last quota slot. The ledger
//! layers the policy on top: tier resolution against the catalog, the
//! deny-reason taxonomy, and the rule that an unknown tier is denied before
//! storage is ever consulted.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use chrono::NaiveDate;
use metering_core::{
    DenyReason, SubscriptionAuditEntry, SubscriptionEventType, Tier, TierCatalog, UsageKey,
    UsageRecord, UsdMicros, UserId, UserProfile,
};
use metering_store::{MeteringStore, ReserveOutcome, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerDecision {
    /// The request was admitted and its slot reserved.
    Allowed {
        /// Key of the usage row that absorbed the reservation.
        key: UsageKey,
        /// Message count after the reservation.
        message_count: i64,
        /// Accumulated cost after the reservation.
        cost_accumulated: UsdMicros,
    },
    /// The request was refused.
    Denied {
        /// Why the request was refused.
        reason: DenyReason,
    },
}

impl LedgerDecision {
    /// Whether the request was admitted.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Tier-aware usage accounting over a [`MeteringStore`].
#[derive(Clone)]
pub struct UsageLedger {
    store: Arc<dyn MeteringStore>,
    catalog: TierCatalog,
}

impl UsageLedger {
    /// Create a ledger over a store and a tier catalog.
    #[must_use]
    pub fn new(store: Arc<dyn MeteringStore>, catalog: TierCatalog) -> Self {
        Self { store, catalog }
    }

    /// The catalog this ledger enforces.
    #[must_use]
    pub const fn catalog(&self) -> &TierCatalog {
        &self.catalog
    }

    /// Resolve a user's current profile, defaulting to an active free
    /// subscription for users no webhook has ever described.
    ///
    /// # Errors
    /// Propagates store failures.
    pub async fn profile_or_free(&self, user_id: &UserId) -> Result<UserProfile> {
        Ok(self
            .store
            .profile(user_id)
            .await?
            .unwrap_or_else(|| UserProfile::free(user_id.clone())))
    }

    /// Check limits for today's period and, if both admit, atomically
    /// reserve one message slot and `estimated_cost` of budget.
    ///
    /// `tier_label` is taken as written by the caller; a label outside the
    /// catalog denies with `unknown_tier` before storage is touched.
    ///
    /// # Errors
    /// Propagates store failures; callers on the request path treat those
    /// as denials rather than admitting unmetered traffic.
    pub async fn check_and_increment(
        &self,
        user_id: &UserId,
        tier_label: &str,
        estimated_cost: UsdMicros,
    ) -> Result<LedgerDecision> {
        let Ok(tier) = tier_label.parse::<Tier>() else {
            warn!(user_id = %user_id, tier = %tier_label, "Denying request for unknown tier");
            return Ok(LedgerDecision::Denied {
                reason: DenyReason::UnknownTier,
            });
        };
        self.check_and_increment_tier(user_id, tier, estimated_cost)
            .await
    }

    /// [`check_and_increment`](Self::check_and_increment) for an already
    /// resolved tier.
    ///
    /// # Errors
    /// Propagates store failures.
    pub async fn check_and_increment_tier(
        &self,
        user_id: &UserId,
        tier: Tier,
        estimated_cost: UsdMicros,
    ) -> Result<LedgerDecision> {
        let definition = self.catalog.get(tier);
        let key = UsageKey::today(user_id.clone(), tier);

        let outcome = self
            .store
            .reserve_usage(
                &key,
                definition.daily_message_quota,
                definition.budget_ceiling,
                estimated_cost,
            )
            .await?;

        Ok(match outcome {
            ReserveOutcome::Reserved {
                message_count,
                cost_accumulated,
            } => LedgerDecision::Allowed {
                key,
                message_count,
                cost_accumulated,
            },
            ReserveOutcome::DailyLimitReached => LedgerDecision::Denied {
                reason: DenyReason::DailyLimitReached,
            },
            ReserveOutcome::BudgetCeilingExceeded => LedgerDecision::Denied {
                reason: DenyReason::BudgetCeilingExceeded,
            },
        })
    }

    /// Reconcile a reserved slot with the generation's actual cost.
    ///
    /// The delta (actual minus estimated) is applied to accumulated cost;
    /// the message slot stays consumed regardless of direction. Quota is
    /// never re-evaluated here.
    ///
    /// # Errors
    /// Propagates store failures.
    pub async fn record_actual_cost(
        &self,
        key: &UsageKey,
        estimated: UsdMicros,
        actual: UsdMicros,
    ) -> Result<()> {
        let delta = actual.saturating_sub(estimated);
        if delta == UsdMicros::ZERO {
            return Ok(());
        }
        self.store.adjust_usage_cost(key, delta).await
    }

    /// Read the usage row for a user and tier on `date`, synthesizing an
    /// empty row when the period has seen no traffic.
    ///
    /// # Errors
    /// Propagates store failures.
    pub async fn usage_on(
        &self,
        user_id: &UserId,
        tier: Tier,
        date: NaiveDate,
    ) -> Result<UsageRecord> {
        let key = UsageKey {
            user_id: user_id.clone(),
            tier,
            period_date: date,
        };
        Ok(self
            .store
            .usage(&key)
            .await?
            .unwrap_or_else(|| UsageRecord::empty(key)))
    }

    /// Zero today's counters for a user and tier, appending an audit entry
    /// that records the counters as they stood.
    ///
    /// # Errors
    /// Propagates store failures.
    pub async fn reset_usage(&self, user_id: &UserId, tier: Tier) -> Result<UsageRecord> {
        let key = UsageKey::today(user_id.clone(), tier);
        let before = self.store.reset_usage(&key).await?;

        let entry = SubscriptionAuditEntry::new(
            user_id.clone(),
            SubscriptionEventType::Unknown,
            None,
            None,
            "admin",
            serde_json::json!({
                "action": "usage_reset",
                "tier": tier.as_str(),
                "period_date": key.period_date,
                "message_count_before": before.message_count,
                "cost_accumulated_micros_before": before.cost_accumulated.as_micros(),
            }),
        );
        self.store.apply_subscription(&entry, None).await?;

        info!(
            user_id = %user_id,
            tier = %tier,
            messages = before.message_count,
            "Usage counters reset"
        );
        Ok(before)
    }
}

impl std::fmt::Debug for UsageLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageLedger").finish_non_exhaustive()
    }
}

/// Re-exported so callers can match on storage failures without a direct
/// `metering-store` dependency.
pub use metering_store::StoreError as LedgerStoreError;
