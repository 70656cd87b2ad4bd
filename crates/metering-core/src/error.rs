//! Error taxonomy and enforcement reason codes.

use serde::{Deserialize, Serialize};

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core domain errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A tier label was not one of the catalog tiers.
    #[error("Unknown tier: {0}")]
    UnknownTier(String),

    /// The tier catalog failed validation at startup.
    #[error("Invalid tier catalog: {0}")]
    InvalidCatalog(String),

    /// A stored label was not a member of its enum.
    #[error("Unrecognized label: {0}")]
    UnknownLabel(String),
}

/// Why a prospective request was denied by the usage ledger.
///
/// Denials are expected outcomes, not faults; they travel as structured
/// values so callers can present a specific message per reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// The user's tier is not present in the catalog.
    UnknownTier,
    /// The daily message quota for the tier is already consumed.
    DailyLimitReached,
    /// Admitting the request would push accumulated cost past the ceiling.
    BudgetCeilingExceeded,
}

impl DenyReason {
    /// Stable snake_case reason code used in API responses and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownTier => "unknown_tier",
            Self::DailyLimitReached => "daily_limit_reached",
            Self::BudgetCeilingExceeded => "budget_ceiling_exceeded",
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
