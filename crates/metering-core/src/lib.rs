//! # Metering Core
//!
//! Core types for the subscription metering gateway.
//!
//! This crate provides the foundational types used throughout the service:
//! - Subscription tiers and the tier catalog
//! - Fixed-point USD money
//! - The static price table and cost estimation
//! - Deterministic tier-bounded model selection
//! - Usage, audit, profile, and snapshot records

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod money;
pub mod pricing;
pub mod records;
pub mod selector;
pub mod tier;
pub mod types;

// Re-export commonly used types
pub use error::{CoreError, DenyReason};
pub use money::UsdMicros;
pub use pricing::{CostEstimator, ModelPrice, PriceTable};
pub use records::{
    SnapshotStatus, SubscriptionAuditEntry, SubscriptionEventType, SubscriptionStatus, UsageKey,
    UsageRecord, UsageSnapshot, UserProfile,
};
pub use selector::ModelSelector;
pub use tier::{tier_rank, Tier, TierCatalog, TierDefinition};
pub use types::{ModelId, UserId};
