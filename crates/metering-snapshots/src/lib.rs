//! # Metering Snapshots
//!
//! Daily rollups of live usage counters into immutable [`UsageSnapshot`]
//! rows, plus the read queries built on them.
//!
//! Snapshots are keyed by (user, date) behind a uniqueness constraint, so
//! re-running a day creates zero new rows. The scheduler fires once per UTC
//! midnight and rolls up the day that just ended; operators can also
//! trigger a snapshot for any date on demand.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use metering_core::{SnapshotStatus, Tier, TierCatalog, UsageSnapshot, UsdMicros, UserId};
use metering_store::{MeteringStore, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

/// Aggregate counters for one tier on one date.
#[derive(Debug, Clone, Serialize)]
pub struct TierSummary {
    /// Tier being summarized.
    pub tier: Tier,
    /// Users under both limits at snapshot time.
    pub active_users: u64,
    /// Users blocked on the daily message quota.
    pub blocked_daily_limit: u64,
    /// Users blocked on the budget ceiling.
    pub blocked_budget_ceiling: u64,
    /// Summed accumulated cost across the tier.
    pub total_cost: UsdMicros,
    /// Mean accumulated cost per user, zero when the tier saw no users.
    pub average_cost: UsdMicros,
}

/// Rolls up usage counters into daily snapshots.
#[derive(Clone)]
pub struct SnapshotService {
    store: Arc<dyn MeteringStore>,
    catalog: TierCatalog,
}

impl SnapshotService {
    /// Create a service over a store and a tier catalog.
    #[must_use]
    pub fn new(store: Arc<dyn MeteringStore>, catalog: TierCatalog) -> Self {
        Self { store, catalog }
    }

    /// Snapshot every usage row recorded for `date`, returning how many
    /// snapshots were created. Rows already snapshotted count zero.
    ///
    /// # Errors
    /// Propagates store failures.
    pub async fn take_snapshot(&self, date: NaiveDate) -> Result<usize> {
        let records = self.store.usage_for_date(date).await?;
        let mut created = 0usize;

        for record in &records {
            let definition = self.catalog.get(record.key.tier);
            let snapshot = UsageSnapshot {
                user_id: record.key.user_id.clone(),
                snapshot_date: date,
                tier: record.key.tier,
                message_count: record.message_count,
                cost_accumulated: record.cost_accumulated,
                daily_message_quota: definition.daily_message_quota,
                budget_ceiling: definition.budget_ceiling,
                status: SnapshotStatus::derive(
                    definition,
                    record.message_count,
                    record.cost_accumulated,
                ),
                created_at: Utc::now(),
            };
            if self.store.insert_snapshot(&snapshot).await? {
                created += 1;
            }
        }

        info!(date = %date, examined = records.len(), created, "Snapshot run complete");
        Ok(created)
    }

    /// Per-user snapshot trend over the `days` ending at `until`, oldest
    /// first.
    ///
    /// # Errors
    /// Propagates store failures.
    pub async fn trend(
        &self,
        user_id: &UserId,
        days: u32,
        until: NaiveDate,
    ) -> Result<Vec<UsageSnapshot>> {
        self.store.snapshots_for_user(user_id, days, until).await
    }

    /// Per-tier aggregates for one date, in tier rank order. Tiers with no
    /// snapshots report zeroes.
    ///
    /// # Errors
    /// Propagates store failures.
    pub async fn tier_summary(&self, date: NaiveDate) -> Result<Vec<TierSummary>> {
        let snapshots = self.store.snapshots_for_date(date).await?;

        Ok(Tier::ALL
            .into_iter()
            .map(|tier| {
                let rows = snapshots.iter().filter(|s| s.tier == tier);
                let mut active = 0u64;
                let mut blocked_daily = 0u64;
                let mut blocked_budget = 0u64;
                let mut total = UsdMicros::ZERO;
                let mut users = 0u64;
                for snapshot in rows {
                    users += 1;
                    total = total.saturating_add(snapshot.cost_accumulated);
                    match snapshot.status {
                        SnapshotStatus::Active => active += 1,
                        SnapshotStatus::BlockedDailyLimit => blocked_daily += 1,
                        SnapshotStatus::BlockedBudgetCeiling => blocked_budget += 1,
                    }
                }
                let average = if users == 0 {
                    UsdMicros::ZERO
                } else {
                    UsdMicros::from_micros(total.as_micros() / users as i64)
                };
                TierSummary {
                    tier,
                    active_users: active,
                    blocked_daily_limit: blocked_daily,
                    blocked_budget_ceiling: blocked_budget,
                    total_cost: total,
                    average_cost: average,
                }
            })
            .collect())
    }

    /// All snapshots for one date rendered as CSV, header included.
    ///
    /// # Errors
    /// Propagates store failures.
    pub async fn export_csv(&self, date: NaiveDate) -> Result<String> {
        let snapshots = self.store.snapshots_for_date(date).await?;
        let mut out = String::from(
            "user_id,snapshot_date,tier,message_count,cost_accumulated_usd,\
             daily_message_quota,budget_ceiling_usd,status\n",
        );
        for s in snapshots {
            out.push_str(&format!(
                "{},{},{},{},{},{},{},{}\n",
                s.user_id,
                s.snapshot_date,
                s.tier,
                s.message_count,
                s.cost_accumulated,
                s.daily_message_quota,
                s.budget_ceiling,
                s.status,
            ));
        }
        Ok(out)
    }
}

impl std::fmt::Debug for SnapshotService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotService").finish_non_exhaustive()
    }
}

/// Seconds until the next UTC midnight from `now`.
fn until_next_midnight(now: chrono::DateTime<Utc>) -> Duration {
    let tomorrow = now.date_naive() + ChronoDuration::days(1);
    tomorrow.and_hms_opt(0, 0, 0).map_or(
        // Midnight always exists; fall back to a short nap if chrono ever
        // says otherwise.
        Duration::from_secs(1),
        |midnight| {
            (midnight.and_utc() - now)
                .to_std()
                .unwrap_or(Duration::from_secs(1))
        },
    )
}

/// Run the daily scheduler until `shutdown` flips to `true`.
///
/// At each UTC midnight the day that just ended is rolled up. A failed run
/// is logged and retried at the next midnight; the uniqueness constraint
/// makes partial runs safe to repeat.
pub async fn run_daily(service: SnapshotService, mut shutdown: watch::Receiver<bool>) {
    loop {
        let sleep = until_next_midnight(Utc::now());
        info!(seconds = sleep.as_secs(), "Next snapshot run scheduled");

        tokio::select! {
            () = tokio::time::sleep(sleep) => {
                let completed_day = Utc::now().date_naive() - ChronoDuration::days(1);
                match service.take_snapshot(completed_day).await {
                    Ok(created) => {
                        info!(date = %completed_day, created, "Scheduled snapshot run finished");
                    }
                    Err(err) => {
                        error!(date = %completed_day, error = %err, "Scheduled snapshot run failed");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Snapshot scheduler stopping");
                    return;
                }
            }
        }
    }
}
