//! Postgres store backend.
//!
//! The conditional `UPDATE … RETURNING` in [`reserve_usage`] is the single
//! atomic arbiter for quota and ceiling: the database evaluates the guards
//! and the increment in one statement, so concurrent workers cannot both
//! observe headroom and both land past a limit. A follow-up read only
//! distinguishes which limit refused the row.
//!
//! [`reserve_usage`]: PostgresStore::reserve_usage

use crate::error::{Result, StoreError};
use crate::{schema, MeteringStore, ReserveOutcome};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use metering_core::{
    SnapshotStatus, SubscriptionAuditEntry, SubscriptionEventType, SubscriptionStatus, Tier,
    UsageKey, UsageRecord, UsageSnapshot, UsdMicros, UserId, UserProfile,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Postgres-backed metering store.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to the database, apply schema, and return a ready handle.
    ///
    /// # Errors
    /// Returns a connection error if the pool cannot be established or the
    /// schema cannot be applied. Startup failures surface here, once.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        sqlx::raw_sql(schema::DDL)
            .execute(&pool)
            .await
            .map_err(|e| StoreError::Connection(format!("schema apply failed: {e}")))?;

        info!(max_connections, "Postgres store connected");
        Ok(Self { pool })
    }

    /// Wrap an existing pool. The caller is responsible for schema.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_tier(label: &str) -> Result<Tier> {
    label
        .parse()
        .map_err(|_| StoreError::Corrupt(format!("tier label {label:?}")))
}

fn parse_opt_tier(label: Option<String>) -> Result<Option<Tier>> {
    label.as_deref().map(parse_tier).transpose()
}

fn usage_record_from_row(row: &PgRow) -> Result<UsageRecord> {
    Ok(UsageRecord {
        key: UsageKey {
            user_id: UserId::from(row.try_get::<String, _>("user_id")?),
            tier: parse_tier(&row.try_get::<String, _>("tier")?)?,
            period_date: row.try_get("period_date")?,
        },
        message_count: row.try_get("message_count")?,
        cost_accumulated: UsdMicros::from_micros(row.try_get("cost_accumulated_micros")?),
        updated_at: row.try_get("updated_at")?,
    })
}

fn snapshot_from_row(row: &PgRow) -> Result<UsageSnapshot> {
    let status: String = row.try_get("status")?;
    Ok(UsageSnapshot {
        user_id: UserId::from(row.try_get::<String, _>("user_id")?),
        snapshot_date: row.try_get("snapshot_date")?,
        tier: parse_tier(&row.try_get::<String, _>("tier")?)?,
        message_count: row.try_get("message_count")?,
        cost_accumulated: UsdMicros::from_micros(row.try_get("cost_accumulated_micros")?),
        daily_message_quota: row.try_get("daily_message_quota")?,
        budget_ceiling: UsdMicros::from_micros(row.try_get("budget_ceiling_micros")?),
        status: status
            .parse::<SnapshotStatus>()
            .map_err(|_| StoreError::Corrupt(format!("snapshot status {status:?}")))?,
        created_at: row.try_get("created_at")?,
    })
}

fn audit_from_row(row: &PgRow) -> Result<SubscriptionAuditEntry> {
    let event_type: String = row.try_get("event_type")?;
    Ok(SubscriptionAuditEntry {
        id: row.try_get::<Uuid, _>("id")?,
        user_id: UserId::from(row.try_get::<String, _>("user_id")?),
        event_type: event_type
            .parse::<SubscriptionEventType>()
            .map_err(|_| StoreError::Corrupt(format!("event type {event_type:?}")))?,
        old_tier: parse_opt_tier(row.try_get("old_tier")?)?,
        new_tier: parse_opt_tier(row.try_get("new_tier")?)?,
        provider: row.try_get("provider")?,
        raw_payload: row.try_get("raw_payload")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl MeteringStore for PostgresStore {
    async fn reserve_usage(
        &self,
        key: &UsageKey,
        quota: i32,
        ceiling: UsdMicros,
        estimated_cost: UsdMicros,
    ) -> Result<ReserveOutcome> {
        // Lazily create the period row; harmless if it already exists.
        sqlx::query(
            r"INSERT INTO usage_records (user_id, tier, period_date)
              VALUES ($1, $2, $3)
              ON CONFLICT (user_id, tier, period_date) DO NOTHING",
        )
        .bind(key.user_id.as_str())
        .bind(key.tier.as_str())
        .bind(key.period_date)
        .execute(&self.pool)
        .await?;

        // The atomic increment-and-compare. Both guards and both increments
        // evaluate inside this one statement.
        let row = sqlx::query(
            r"UPDATE usage_records
              SET message_count = message_count + 1,
                  cost_accumulated_micros = cost_accumulated_micros + $4,
                  updated_at = NOW()
              WHERE user_id = $1 AND tier = $2 AND period_date = $3
                AND ($5 < 0 OR message_count < $5)
                AND cost_accumulated_micros + $4 <= $6
              RETURNING message_count, cost_accumulated_micros",
        )
        .bind(key.user_id.as_str())
        .bind(key.tier.as_str())
        .bind(key.period_date)
        .bind(estimated_cost.as_micros())
        .bind(i64::from(quota))
        .bind(ceiling.as_micros())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(ReserveOutcome::Reserved {
                message_count: row.try_get("message_count")?,
                cost_accumulated: UsdMicros::from_micros(row.try_get("cost_accumulated_micros")?),
            });
        }

        // Refused: read the row once to name the limit. Ordering matches
        // the ledger's evaluation order: quota first.
        let row = sqlx::query(
            r"SELECT message_count, cost_accumulated_micros
              FROM usage_records
              WHERE user_id = $1 AND tier = $2 AND period_date = $3",
        )
        .bind(key.user_id.as_str())
        .bind(key.tier.as_str())
        .bind(key.period_date)
        .fetch_one(&self.pool)
        .await?;

        let message_count: i64 = row.try_get("message_count")?;
        if quota >= 0 && message_count >= i64::from(quota) {
            Ok(ReserveOutcome::DailyLimitReached)
        } else {
            Ok(ReserveOutcome::BudgetCeilingExceeded)
        }
    }

    async fn adjust_usage_cost(&self, key: &UsageKey, delta: UsdMicros) -> Result<()> {
        sqlx::query(
            r"UPDATE usage_records
              SET cost_accumulated_micros = GREATEST(0, cost_accumulated_micros + $4),
                  updated_at = NOW()
              WHERE user_id = $1 AND tier = $2 AND period_date = $3",
        )
        .bind(key.user_id.as_str())
        .bind(key.tier.as_str())
        .bind(key.period_date)
        .bind(delta.as_micros())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reset_usage(&self, key: &UsageKey) -> Result<UsageRecord> {
        // Read-then-zero under a row lock so the returned "before" values
        // cannot race a concurrent reservation.
        let mut tx = self.pool.begin().await?;
        let before = sqlx::query(
            r"SELECT user_id, tier, period_date, message_count,
                     cost_accumulated_micros, updated_at
              FROM usage_records
              WHERE user_id = $1 AND tier = $2 AND period_date = $3
              FOR UPDATE",
        )
        .bind(key.user_id.as_str())
        .bind(key.tier.as_str())
        .bind(key.period_date)
        .fetch_optional(&mut *tx)
        .await?;

        let before = match before {
            Some(row) => usage_record_from_row(&row)?,
            None => UsageRecord::empty(key.clone()),
        };

        sqlx::query(
            r"UPDATE usage_records
              SET message_count = 0, cost_accumulated_micros = 0, updated_at = NOW()
              WHERE user_id = $1 AND tier = $2 AND period_date = $3",
        )
        .bind(key.user_id.as_str())
        .bind(key.tier.as_str())
        .bind(key.period_date)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(before)
    }

    async fn usage(&self, key: &UsageKey) -> Result<Option<UsageRecord>> {
        let row = sqlx::query(
            r"SELECT user_id, tier, period_date, message_count,
                     cost_accumulated_micros, updated_at
              FROM usage_records
              WHERE user_id = $1 AND tier = $2 AND period_date = $3",
        )
        .bind(key.user_id.as_str())
        .bind(key.tier.as_str())
        .bind(key.period_date)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(usage_record_from_row).transpose()
    }

    async fn usage_for_date(&self, date: NaiveDate) -> Result<Vec<UsageRecord>> {
        let rows = sqlx::query(
            r"SELECT user_id, tier, period_date, message_count,
                     cost_accumulated_micros, updated_at
              FROM usage_records
              WHERE period_date = $1
              ORDER BY user_id",
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(usage_record_from_row).collect()
    }

    async fn profile(&self, user_id: &UserId) -> Result<Option<UserProfile>> {
        let row = sqlx::query(
            r"SELECT user_id, tier, status, updated_at
              FROM user_profiles WHERE user_id = $1",
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let status: String = row.try_get("status")?;
            Ok(UserProfile {
                user_id: UserId::from(row.try_get::<String, _>("user_id")?),
                tier: parse_tier(&row.try_get::<String, _>("tier")?)?,
                status: status
                    .parse::<SubscriptionStatus>()
                    .map_err(|_| StoreError::Corrupt(format!("status {status:?}")))?,
                updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
            })
        })
        .transpose()
    }

    async fn apply_subscription(
        &self,
        entry: &SubscriptionAuditEntry,
        new_state: Option<&UserProfile>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"INSERT INTO subscription_audit
              (id, user_id, event_type, old_tier, new_tier, provider, raw_payload, created_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(entry.id)
        .bind(entry.user_id.as_str())
        .bind(entry.event_type.as_str())
        .bind(entry.old_tier.map(Tier::as_str))
        .bind(entry.new_tier.map(Tier::as_str))
        .bind(&entry.provider)
        .bind(&entry.raw_payload)
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await?;

        if let Some(profile) = new_state {
            sqlx::query(
                r"INSERT INTO user_profiles (user_id, tier, status, updated_at)
                  VALUES ($1, $2, $3, $4)
                  ON CONFLICT (user_id) DO UPDATE
                  SET tier = EXCLUDED.tier,
                      status = EXCLUDED.status,
                      updated_at = EXCLUDED.updated_at",
            )
            .bind(profile.user_id.as_str())
            .bind(profile.tier.as_str())
            .bind(profile.status.as_str())
            .bind(profile.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn audit_entries(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<SubscriptionAuditEntry>> {
        let rows = sqlx::query(
            r"SELECT id, user_id, event_type, old_tier, new_tier, provider,
                     raw_payload, created_at
              FROM subscription_audit
              WHERE user_id = $1
              ORDER BY created_at DESC
              LIMIT $2",
        )
        .bind(user_id.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(audit_from_row).collect()
    }

    async fn insert_snapshot(&self, snapshot: &UsageSnapshot) -> Result<bool> {
        let result = sqlx::query(
            r"INSERT INTO usage_snapshots
              (user_id, snapshot_date, tier, message_count, cost_accumulated_micros,
               daily_message_quota, budget_ceiling_micros, status, created_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
              ON CONFLICT (user_id, snapshot_date) DO NOTHING",
        )
        .bind(snapshot.user_id.as_str())
        .bind(snapshot.snapshot_date)
        .bind(snapshot.tier.as_str())
        .bind(snapshot.message_count)
        .bind(snapshot.cost_accumulated.as_micros())
        .bind(snapshot.daily_message_quota)
        .bind(snapshot.budget_ceiling.as_micros())
        .bind(snapshot.status.as_str())
        .bind(snapshot.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn snapshots_for_user(
        &self,
        user_id: &UserId,
        days: u32,
        until: NaiveDate,
    ) -> Result<Vec<UsageSnapshot>> {
        let from = until - chrono::Duration::days(i64::from(days.saturating_sub(1)));
        let rows = sqlx::query(
            r"SELECT user_id, snapshot_date, tier, message_count,
                     cost_accumulated_micros, daily_message_quota,
                     budget_ceiling_micros, status, created_at
              FROM usage_snapshots
              WHERE user_id = $1 AND snapshot_date BETWEEN $2 AND $3
              ORDER BY snapshot_date",
        )
        .bind(user_id.as_str())
        .bind(from)
        .bind(until)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(snapshot_from_row).collect()
    }

    async fn snapshots_for_date(&self, date: NaiveDate) -> Result<Vec<UsageSnapshot>> {
        let rows = sqlx::query(
            r"SELECT user_id, snapshot_date, tier, message_count,
                     cost_accumulated_micros, daily_message_quota,
                     budget_ceiling_micros, status, created_at
              FROM usage_snapshots
              WHERE snapshot_date = $1
              ORDER BY user_id",
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(snapshot_from_row).collect()
    }
}
