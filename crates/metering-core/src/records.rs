//! Persistent record types: usage counters, subscription audit entries,
//! user profiles, and daily snapshots.

use crate::money::UsdMicros;
use crate::tier::{Tier, TierDefinition};
use crate::types::UserId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Key of a usage record: one row per user per tier per UTC day.
///
/// Embedding the date in the key means a new period implicitly starts with
/// fresh counters; nothing ever resets in place except the audited admin
/// reset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsageKey {
    /// Owning user.
    pub user_id: UserId,
    /// Tier the usage was accrued under.
    pub tier: Tier,
    /// UTC day of the period.
    pub period_date: NaiveDate,
}

impl UsageKey {
    /// Key for the current UTC day.
    #[must_use]
    pub fn today(user_id: UserId, tier: Tier) -> Self {
        Self {
            user_id,
            tier,
            period_date: Utc::now().date_naive(),
        }
    }
}

/// Live per-period counters, owned exclusively by the usage ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Record key.
    pub key: UsageKey,
    /// Accepted messages this period.
    pub message_count: i64,
    /// Accumulated cost this period.
    pub cost_accumulated: UsdMicros,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl UsageRecord {
    /// A fresh zeroed record for a key.
    #[must_use]
    pub fn empty(key: UsageKey) -> Self {
        Self {
            key,
            message_count: 0,
            cost_accumulated: UsdMicros::ZERO,
            updated_at: Utc::now(),
        }
    }
}

/// Canonical classification of a subscription webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionEventType {
    /// A subscription became active on an asserted tier.
    Activation,
    /// A subscription ended; the user returns to free.
    Cancellation,
    /// Tier changed to a higher rank.
    Upgrade,
    /// Tier changed to a lower rank.
    Downgrade,
    /// Anything else, including audited no-ops.
    Unknown,
}

impl SubscriptionEventType {
    /// Stable snake_case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Activation => "activation",
            Self::Cancellation => "cancellation",
            Self::Upgrade => "upgrade",
            Self::Downgrade => "downgrade",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for SubscriptionEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubscriptionEventType {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "activation" => Ok(Self::Activation),
            "cancellation" => Ok(Self::Cancellation),
            "upgrade" => Ok(Self::Upgrade),
            "downgrade" => Ok(Self::Downgrade),
            "unknown" => Ok(Self::Unknown),
            other => Err(crate::error::CoreError::UnknownLabel(other.to_string())),
        }
    }
}

/// Subscription payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// In good standing.
    Active,
    /// Cancelled by the user or provider.
    Cancelled,
    /// Payment failed; subscription pending resolution.
    PastDue,
}

impl SubscriptionStatus {
    /// Stable snake_case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::PastDue => "past_due",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            "past_due" => Ok(Self::PastDue),
            other => Err(crate::error::CoreError::UnknownLabel(other.to_string())),
        }
    }
}

/// Current subscription state for a user. Within this service the webhook
/// ingestor is the sole writer of `tier` and `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    /// Owning user.
    pub user_id: UserId,
    /// Current tier.
    pub tier: Tier,
    /// Current payment status.
    pub status: SubscriptionStatus,
    /// Time of the last accepted mutation.
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    /// A fresh free/active profile, the implicit state of an unseen user.
    #[must_use]
    pub fn free(user_id: UserId) -> Self {
        Self {
            user_id,
            tier: Tier::Free,
            status: SubscriptionStatus::Active,
            updated_at: Utc::now(),
        }
    }
}

/// Immutable append-only record of one processed webhook delivery,
/// including no-ops. Redelivery appends a new entry each time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionAuditEntry {
    /// Entry id.
    pub id: Uuid,
    /// Affected user.
    pub user_id: UserId,
    /// Canonical classification.
    pub event_type: SubscriptionEventType,
    /// Tier before the event, when known.
    pub old_tier: Option<Tier>,
    /// Tier asserted by the event, when present.
    pub new_tier: Option<Tier>,
    /// Payment provider that delivered the event.
    pub provider: String,
    /// Raw payload as delivered, for reconstruction.
    pub raw_payload: serde_json::Value,
    /// Append time.
    pub created_at: DateTime<Utc>,
}

impl SubscriptionAuditEntry {
    /// Build an entry with a fresh id and the current time.
    #[must_use]
    pub fn new(
        user_id: UserId,
        event_type: SubscriptionEventType,
        old_tier: Option<Tier>,
        new_tier: Option<Tier>,
        provider: impl Into<String>,
        raw_payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            event_type,
            old_tier,
            new_tier,
            provider: provider.into(),
            raw_payload,
            created_at: Utc::now(),
        }
    }
}

/// Derived enforcement status of a usage row at snapshot time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotStatus {
    /// Under both limits.
    Active,
    /// Daily message quota consumed.
    BlockedDailyLimit,
    /// Budget ceiling reached.
    BlockedBudgetCeiling,
}

impl SnapshotStatus {
    /// Derive the status from the tier's thresholds, using the same
    /// evaluation order the ledger enforces: quota before budget.
    #[must_use]
    pub fn derive(definition: &TierDefinition, message_count: i64, cost: UsdMicros) -> Self {
        if !definition.is_unlimited() && message_count >= i64::from(definition.daily_message_quota)
        {
            Self::BlockedDailyLimit
        } else if cost >= definition.budget_ceiling {
            Self::BlockedBudgetCeiling
        } else {
            Self::Active
        }
    }

    /// Stable SCREAMING_SNAKE_CASE label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::BlockedDailyLimit => "BLOCKED_DAILY_LIMIT",
            Self::BlockedBudgetCeiling => "BLOCKED_BUDGET_CEILING",
        }
    }
}

impl std::fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SnapshotStatus {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "BLOCKED_DAILY_LIMIT" => Ok(Self::BlockedDailyLimit),
            "BLOCKED_BUDGET_CEILING" => Ok(Self::BlockedBudgetCeiling),
            other => Err(crate::error::CoreError::UnknownLabel(other.to_string())),
        }
    }
}

/// Immutable daily copy of a usage row plus the thresholds that applied at
/// snapshot time. One row per (user, date); re-creation is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Owning user.
    pub user_id: UserId,
    /// Snapshotted day.
    pub snapshot_date: NaiveDate,
    /// Tier at snapshot time.
    pub tier: Tier,
    /// Copied message count.
    pub message_count: i64,
    /// Copied accumulated cost.
    pub cost_accumulated: UsdMicros,
    /// Quota that applied at snapshot time.
    pub daily_message_quota: i32,
    /// Ceiling that applied at snapshot time.
    pub budget_ceiling: UsdMicros,
    /// Derived enforcement status.
    pub status: SnapshotStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}
