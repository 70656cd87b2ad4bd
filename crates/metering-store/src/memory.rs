//! In-memory store backend.
//!
//! Used by tests and local development. Usage mutation happens while
//! holding the dashmap entry guard for the key, so each (user, tier, day)
//! row sees one writer at a time. That matches the atomicity contract the
//! SQL backend gets from its conditional UPDATE.

use crate::error::Result;
use crate::{MeteringStore, ReserveOutcome};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use metering_core::{
    SubscriptionAuditEntry, UsageKey, UsageRecord, UsageSnapshot, UsdMicros, UserId, UserProfile,
};
use parking_lot::Mutex;

/// In-memory metering store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    usage: DashMap<UsageKey, Counters>,
    profiles: DashMap<UserId, UserProfile>,
    audit: Mutex<Vec<SubscriptionAuditEntry>>,
    snapshots: DashMap<(UserId, NaiveDate), UsageSnapshot>,
}

#[derive(Debug, Clone)]
struct Counters {
    message_count: i64,
    cost_accumulated: UsdMicros,
    updated_at: chrono::DateTime<Utc>,
}

impl Counters {
    fn zero() -> Self {
        Self {
            message_count: 0,
            cost_accumulated: UsdMicros::ZERO,
            updated_at: Utc::now(),
        }
    }

    fn record(&self, key: UsageKey) -> UsageRecord {
        UsageRecord {
            key,
            message_count: self.message_count,
            cost_accumulated: self.cost_accumulated,
            updated_at: self.updated_at,
        }
    }
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a profile directly. Test/setup helper; production mutation goes
    /// through `apply_subscription`.
    pub fn seed_profile(&self, profile: UserProfile) {
        self.profiles.insert(profile.user_id.clone(), profile);
    }
}

#[async_trait]
impl MeteringStore for MemoryStore {
    async fn reserve_usage(
        &self,
        key: &UsageKey,
        quota: i32,
        ceiling: UsdMicros,
        estimated_cost: UsdMicros,
    ) -> Result<ReserveOutcome> {
        let mut entry = self.usage.entry(key.clone()).or_insert_with(Counters::zero);

        if quota >= 0 && entry.message_count >= i64::from(quota) {
            return Ok(ReserveOutcome::DailyLimitReached);
        }
        if entry.cost_accumulated.saturating_add(estimated_cost) > ceiling {
            return Ok(ReserveOutcome::BudgetCeilingExceeded);
        }

        entry.message_count += 1;
        entry.cost_accumulated = entry.cost_accumulated.saturating_add(estimated_cost);
        entry.updated_at = Utc::now();

        Ok(ReserveOutcome::Reserved {
            message_count: entry.message_count,
            cost_accumulated: entry.cost_accumulated,
        })
    }

    async fn adjust_usage_cost(&self, key: &UsageKey, delta: UsdMicros) -> Result<()> {
        let mut entry = self.usage.entry(key.clone()).or_insert_with(Counters::zero);
        let adjusted = entry.cost_accumulated.saturating_add(delta);
        entry.cost_accumulated = if adjusted.is_negative() {
            UsdMicros::ZERO
        } else {
            adjusted
        };
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn reset_usage(&self, key: &UsageKey) -> Result<UsageRecord> {
        let mut entry = self.usage.entry(key.clone()).or_insert_with(Counters::zero);
        let before = entry.record(key.clone());
        *entry = Counters::zero();
        Ok(before)
    }

    async fn usage(&self, key: &UsageKey) -> Result<Option<UsageRecord>> {
        Ok(self.usage.get(key).map(|c| c.record(key.clone())))
    }

    async fn usage_for_date(&self, date: NaiveDate) -> Result<Vec<UsageRecord>> {
        Ok(self
            .usage
            .iter()
            .filter(|item| item.key().period_date == date)
            .map(|item| item.value().record(item.key().clone()))
            .collect())
    }

    async fn profile(&self, user_id: &UserId) -> Result<Option<UserProfile>> {
        Ok(self.profiles.get(user_id).map(|p| p.clone()))
    }

    async fn apply_subscription(
        &self,
        entry: &SubscriptionAuditEntry,
        new_state: Option<&UserProfile>,
    ) -> Result<()> {
        // The audit lock spans the profile write so redeliveries observe
        // audit and state move together, as the SQL transaction does.
        let mut audit = self.audit.lock();
        audit.push(entry.clone());
        if let Some(profile) = new_state {
            self.profiles.insert(profile.user_id.clone(), profile.clone());
        }
        Ok(())
    }

    async fn audit_entries(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<SubscriptionAuditEntry>> {
        let audit = self.audit.lock();
        Ok(audit
            .iter()
            .rev()
            .filter(|e| &e.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn insert_snapshot(&self, snapshot: &UsageSnapshot) -> Result<bool> {
        let key = (snapshot.user_id.clone(), snapshot.snapshot_date);
        match self.snapshots.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(snapshot.clone());
                Ok(true)
            }
        }
    }

    async fn snapshots_for_user(
        &self,
        user_id: &UserId,
        days: u32,
        until: NaiveDate,
    ) -> Result<Vec<UsageSnapshot>> {
        let from = until - chrono::Duration::days(i64::from(days.saturating_sub(1)));
        let mut rows: Vec<UsageSnapshot> = self
            .snapshots
            .iter()
            .filter(|item| {
                let (user, date) = item.key();
                user == user_id && *date >= from && *date <= until
            })
            .map(|item| item.value().clone())
            .collect();
        rows.sort_by_key(|s| s.snapshot_date);
        Ok(rows)
    }

    async fn snapshots_for_date(&self, date: NaiveDate) -> Result<Vec<UsageSnapshot>> {
        let mut rows: Vec<UsageSnapshot> = self
            .snapshots
            .iter()
            .filter(|item| item.key().1 == date)
            .map(|item| item.value().clone())
            .collect();
        rows.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metering_core::{SnapshotStatus, SubscriptionEventType, SubscriptionStatus, Tier};
    use std::sync::Arc;

    fn key(user: &str) -> UsageKey {
        UsageKey {
            user_id: UserId::from(user),
            tier: Tier::Free,
            period_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_reserve_creates_row_lazily() {
        let store = MemoryStore::new();
        let k = key("u1");
        assert!(store.usage(&k).await.unwrap().is_none());

        let outcome = store
            .reserve_usage(&k, 15, UsdMicros::from_usd(0.50), UsdMicros::from_usd(0.01))
            .await
            .unwrap();
        assert!(matches!(outcome, ReserveOutcome::Reserved { message_count: 1, .. }));
        assert_eq!(store.usage(&k).await.unwrap().unwrap().message_count, 1);
    }

    #[tokio::test]
    async fn test_quota_boundary_inclusive() {
        let store = MemoryStore::new();
        let k = key("u1");
        // quota = 2: two reservations land, the third is refused.
        for _ in 0..2 {
            let outcome = store
                .reserve_usage(&k, 2, UsdMicros::from_usd(1.0), UsdMicros::ZERO)
                .await
                .unwrap();
            assert!(matches!(outcome, ReserveOutcome::Reserved { .. }));
        }
        let outcome = store
            .reserve_usage(&k, 2, UsdMicros::from_usd(1.0), UsdMicros::ZERO)
            .await
            .unwrap();
        assert_eq!(outcome, ReserveOutcome::DailyLimitReached);
    }

    #[tokio::test]
    async fn test_ceiling_boundary_inclusive() {
        let store = MemoryStore::new();
        let k = key("u1");
        let ceiling = UsdMicros::from_usd(20.00);

        let outcome = store
            .reserve_usage(&k, -1, ceiling, UsdMicros::from_usd(19.50))
            .await
            .unwrap();
        assert!(matches!(outcome, ReserveOutcome::Reserved { .. }));

        // Exactly at the ceiling is allowed.
        let outcome = store
            .reserve_usage(&k, -1, ceiling, UsdMicros::from_usd(0.50))
            .await
            .unwrap();
        assert!(matches!(outcome, ReserveOutcome::Reserved { .. }));

        // One micro-dollar past it is not.
        let outcome = store
            .reserve_usage(&k, -1, ceiling, UsdMicros::from_micros(1))
            .await
            .unwrap();
        assert_eq!(outcome, ReserveOutcome::BudgetCeilingExceeded);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_reservations_never_exceed_quota() {
        let store = Arc::new(MemoryStore::new());
        let quota = 15;
        let mut handles = Vec::new();
        for i in 0..100 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let k = key("contended");
                // Stagger a little to interleave.
                if i % 3 == 0 {
                    tokio::task::yield_now().await;
                }
                store
                    .reserve_usage(&k, quota, UsdMicros::from_usd(100.0), UsdMicros::from_usd(0.01))
                    .await
                    .unwrap()
            }));
        }

        let mut reserved = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), ReserveOutcome::Reserved { .. }) {
                reserved += 1;
            }
        }
        assert_eq!(reserved, quota);
        let record = store.usage(&key("contended")).await.unwrap().unwrap();
        assert_eq!(record.message_count, i64::from(quota));
    }

    #[tokio::test]
    async fn test_adjust_cost_clamps_at_zero() {
        let store = MemoryStore::new();
        let k = key("u1");
        store
            .reserve_usage(&k, -1, UsdMicros::from_usd(1.0), UsdMicros::from_usd(0.10))
            .await
            .unwrap();
        store
            .adjust_usage_cost(&k, UsdMicros::from_usd(-5.0))
            .await
            .unwrap();
        let record = store.usage(&k).await.unwrap().unwrap();
        assert_eq!(record.cost_accumulated, UsdMicros::ZERO);
    }

    #[tokio::test]
    async fn test_reset_returns_prior_counts() {
        let store = MemoryStore::new();
        let k = key("u1");
        store
            .reserve_usage(&k, -1, UsdMicros::from_usd(1.0), UsdMicros::from_usd(0.25))
            .await
            .unwrap();

        let before = store.reset_usage(&k).await.unwrap();
        assert_eq!(before.message_count, 1);
        assert_eq!(before.cost_accumulated, UsdMicros::from_usd(0.25));

        let after = store.usage(&k).await.unwrap().unwrap();
        assert_eq!(after.message_count, 0);
        assert_eq!(after.cost_accumulated, UsdMicros::ZERO);
    }

    #[tokio::test]
    async fn test_apply_subscription_appends_every_delivery() {
        let store = MemoryStore::new();
        let user = UserId::from("u1");
        let profile = UserProfile {
            user_id: user.clone(),
            tier: Tier::Core,
            status: SubscriptionStatus::Active,
            updated_at: Utc::now(),
        };

        for _ in 0..3 {
            let entry = SubscriptionAuditEntry::new(
                user.clone(),
                SubscriptionEventType::Activation,
                None,
                Some(Tier::Core),
                "stripe",
                serde_json::json!({"event": "activated"}),
            );
            store.apply_subscription(&entry, Some(&profile)).await.unwrap();
        }

        // Three audit rows, one final state.
        assert_eq!(store.audit_entries(&user, 10).await.unwrap().len(), 3);
        let stored = store.profile(&user).await.unwrap().unwrap();
        assert_eq!(stored.tier, Tier::Core);
    }

    #[tokio::test]
    async fn test_snapshot_insert_is_idempotent() {
        let store = MemoryStore::new();
        let snapshot = UsageSnapshot {
            user_id: UserId::from("u1"),
            snapshot_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            tier: Tier::Free,
            message_count: 3,
            cost_accumulated: UsdMicros::from_usd(0.05),
            daily_message_quota: 15,
            budget_ceiling: UsdMicros::from_usd(0.50),
            status: SnapshotStatus::Active,
            created_at: Utc::now(),
        };

        assert!(store.insert_snapshot(&snapshot).await.unwrap());
        assert!(!store.insert_snapshot(&snapshot).await.unwrap());
        assert_eq!(
            store
                .snapshots_for_date(snapshot.snapshot_date)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_snapshot_trend_window() {
        let store = MemoryStore::new();
        let user = UserId::from("u1");
        for day in 1..=10 {
            let snapshot = UsageSnapshot {
                user_id: user.clone(),
                snapshot_date: NaiveDate::from_ymd_opt(2025, 1, day).unwrap(),
                tier: Tier::Free,
                message_count: i64::from(day),
                cost_accumulated: UsdMicros::ZERO,
                daily_message_quota: 15,
                budget_ceiling: UsdMicros::from_usd(0.50),
                status: SnapshotStatus::Active,
                created_at: Utc::now(),
            };
            store.insert_snapshot(&snapshot).await.unwrap();
        }

        let until = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        let trend = store.snapshots_for_user(&user, 7, until).await.unwrap();
        assert_eq!(trend.len(), 7);
        assert_eq!(
            trend.first().unwrap().snapshot_date,
            NaiveDate::from_ymd_opt(2025, 1, 4).unwrap()
        );
        assert_eq!(trend.last().unwrap().snapshot_date, until);
    }
}
