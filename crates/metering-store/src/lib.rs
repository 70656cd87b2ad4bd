//! # Metering Store
//!
//! Storage abstraction for the metering gateway.
//!
//! The store exposes exactly the primitives the enforcement core needs:
//! - `reserve_usage`: a single atomic increment-and-compare against quota
//!   and budget ceiling. This is the only way usage counters grow; callers
//!   never read-then-write.
//! - append-only audit insert, transactional with profile mutation
//! - uniqueness-constrained snapshot insert for idempotent rollups
//!
//! Two backends exist: [`MemoryStore`] for tests and local development, and
//! [`PostgresStore`] for production. Both are constructed through explicit
//! two-phase init: `connect()` (or `new()`) returns a ready handle that is
//! passed by reference; there are no lazily-initialized proxies.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod memory;
pub mod postgres;
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::NaiveDate;
use metering_core::{
    SubscriptionAuditEntry, UsageKey, UsageRecord, UsageSnapshot, UsdMicros, UserId, UserProfile,
};

/// Result of an atomic usage reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Counters were incremented; values are post-increment.
    Reserved {
        /// Message count after the increment.
        message_count: i64,
        /// Accumulated cost after the increment.
        cost_accumulated: UsdMicros,
    },
    /// The daily message quota is already consumed.
    DailyLimitReached,
    /// Admitting the estimated cost would exceed the budget ceiling.
    BudgetCeilingExceeded,
}

/// Storage operations required by the metering gateway.
#[async_trait]
pub trait MeteringStore: Send + Sync + 'static {
    /// Atomically check quota and ceiling for a usage key and, if both
    /// admit, increment the message count by one and the accumulated cost
    /// by `estimated_cost`.
    ///
    /// Boundaries are inclusive: a reservation landing exactly at the quota
    /// or exactly at the ceiling succeeds; only one that would exceed either
    /// is refused. A negative `quota` means unlimited. The row is created
    /// lazily on first use of a period.
    async fn reserve_usage(
        &self,
        key: &UsageKey,
        quota: i32,
        ceiling: UsdMicros,
        estimated_cost: UsdMicros,
    ) -> Result<ReserveOutcome>;

    /// Adjust accumulated cost by a signed delta (actual minus estimated),
    /// clamped at zero. Never re-evaluates quota.
    async fn adjust_usage_cost(&self, key: &UsageKey, delta: UsdMicros) -> Result<()>;

    /// Zero the counters for a key, returning the record as it stood before
    /// the reset.
    async fn reset_usage(&self, key: &UsageKey) -> Result<UsageRecord>;

    /// Read one usage record.
    async fn usage(&self, key: &UsageKey) -> Result<Option<UsageRecord>>;

    /// All usage records for a period date.
    async fn usage_for_date(&self, date: NaiveDate) -> Result<Vec<UsageRecord>>;

    /// Read a user's subscription profile.
    async fn profile(&self, user_id: &UserId) -> Result<Option<UserProfile>>;

    /// Append an audit entry and, when `new_state` is present, set the
    /// profile to the asserted state, both in one transaction. The audit
    /// entry is appended even for no-op deliveries.
    async fn apply_subscription(
        &self,
        entry: &SubscriptionAuditEntry,
        new_state: Option<&UserProfile>,
    ) -> Result<()>;

    /// Most recent audit entries for a user, newest first.
    async fn audit_entries(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<SubscriptionAuditEntry>>;

    /// Insert a snapshot unless one already exists for (user, date).
    /// Returns whether a row was created.
    async fn insert_snapshot(&self, snapshot: &UsageSnapshot) -> Result<bool>;

    /// Snapshots for one user over the `days` ending at `until`, oldest
    /// first.
    async fn snapshots_for_user(
        &self,
        user_id: &UserId,
        days: u32,
        until: NaiveDate,
    ) -> Result<Vec<UsageSnapshot>>;

    /// All snapshots for one date.
    async fn snapshots_for_date(&self, date: NaiveDate) -> Result<Vec<UsageSnapshot>>;
}
