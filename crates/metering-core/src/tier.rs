//! Subscription tiers and the immutable tier catalog.
//!
//! Tiers are totally ordered (`free < core < studio`). The catalog is loaded
//! once at startup and passed explicitly to every component; it is never
//! mutated at runtime.

use crate::error::CoreError;
use crate::money::UsdMicros;
use crate::types::ModelId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A subscription tier. Ordering follows rank: free < core < studio.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// No-cost entry tier.
    Free,
    /// Paid standard tier.
    Core,
    /// Paid top tier.
    Studio,
}

impl Tier {
    /// All tiers in rank order.
    pub const ALL: [Self; 3] = [Self::Free, Self::Core, Self::Studio];

    /// Numeric rank: free = 0, core = 1, studio = 2.
    #[must_use]
    pub const fn rank(self) -> i8 {
        match self {
            Self::Free => 0,
            Self::Core => 1,
            Self::Studio => 2,
        }
    }

    /// Lowercase tier label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Core => "core",
            Self::Studio => "studio",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "core" => Ok(Self::Core),
            "studio" => Ok(Self::Studio),
            other => Err(CoreError::UnknownTier(other.to_string())),
        }
    }
}

/// Rank of an arbitrary tier label: free = 0, core = 1, studio = 2,
/// anything unrecognized = −1.
///
/// Used by webhook transition classification, which must tolerate provider
/// payloads carrying labels outside the catalog.
#[must_use]
pub fn tier_rank(label: &str) -> i8 {
    label.parse::<Tier>().map_or(-1, Tier::rank)
}

/// Immutable per-tier limits, one catalog row per tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierDefinition {
    /// Tier this row defines.
    pub tier: Tier,
    /// Accepted messages per user per day; −1 means unlimited.
    pub daily_message_quota: i32,
    /// Maximum accumulated cost per user per day before denial.
    pub budget_ceiling: UsdMicros,
    /// Models this tier may use, ordered simplest to most capable.
    pub allowed_models: Vec<ModelId>,
    /// Monthly subscription price.
    pub monthly_price: UsdMicros,
}

impl TierDefinition {
    /// Whether the daily message quota is unlimited.
    #[must_use]
    pub const fn is_unlimited(&self) -> bool {
        self.daily_message_quota < 0
    }

    /// Whether the tier permits the given model.
    #[must_use]
    pub fn allows_model(&self, model: &ModelId) -> bool {
        self.allowed_models.contains(model)
    }
}

/// The static tier catalog: exactly one definition per tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierCatalog {
    definitions: BTreeMap<Tier, TierDefinition>,
}

impl TierCatalog {
    /// Build a catalog from definitions.
    ///
    /// # Errors
    /// Returns an error unless every tier appears exactly once.
    pub fn new(definitions: Vec<TierDefinition>) -> Result<Self, CoreError> {
        let mut map = BTreeMap::new();
        for def in definitions {
            let tier = def.tier;
            if map.insert(tier, def).is_some() {
                return Err(CoreError::InvalidCatalog(format!(
                    "duplicate definition for tier {tier}"
                )));
            }
        }
        for tier in Tier::ALL {
            if !map.contains_key(&tier) {
                return Err(CoreError::InvalidCatalog(format!(
                    "missing definition for tier {tier}"
                )));
            }
        }
        Ok(Self { definitions: map })
    }

    /// The stock catalog shipped with the service. Deployments override it
    /// through configuration.
    #[must_use]
    pub fn standard() -> Self {
        let definitions = [
            TierDefinition {
                tier: Tier::Free,
                daily_message_quota: 15,
                budget_ceiling: UsdMicros::from_usd(0.50),
                allowed_models: vec![ModelId::from("nova-mini")],
                monthly_price: UsdMicros::ZERO,
            },
            TierDefinition {
                tier: Tier::Core,
                daily_message_quota: 200,
                budget_ceiling: UsdMicros::from_usd(5.00),
                allowed_models: vec![ModelId::from("nova-mini"), ModelId::from("nova-standard")],
                monthly_price: UsdMicros::from_usd(9.99),
            },
            TierDefinition {
                tier: Tier::Studio,
                daily_message_quota: -1,
                budget_ceiling: UsdMicros::from_usd(20.00),
                allowed_models: vec![
                    ModelId::from("nova-mini"),
                    ModelId::from("nova-standard"),
                    ModelId::from("nova-max"),
                ],
                monthly_price: UsdMicros::from_usd(29.99),
            },
        ];
        Self {
            definitions: definitions.into_iter().map(|d| (d.tier, d)).collect(),
        }
    }

    /// Look up the definition for a tier.
    #[must_use]
    pub fn get(&self, tier: Tier) -> &TierDefinition {
        // Construction guarantees one row per tier.
        &self.definitions[&tier]
    }

    /// All definitions in rank order.
    pub fn iter(&self) -> impl Iterator<Item = &TierDefinition> {
        self.definitions.values()
    }
}
