//! Database schema for the Postgres backend.
//!
//! Applied idempotently at connect time. Monetary columns are micro-dollar
//! `BIGINT`s; the CHECK constraints back the ledger invariants that counts
//! and costs never go negative.

/// Full DDL, safe to re-run.
pub const DDL: &str = r#"
    -- Per (user, tier, day) usage counters. Mutated only through the
    -- atomic reserve/adjust/reset statements.
    CREATE TABLE IF NOT EXISTS usage_records (
        user_id                 TEXT NOT NULL,
        tier                    TEXT NOT NULL,
        period_date             DATE NOT NULL,
        message_count           BIGINT NOT NULL DEFAULT 0 CHECK (message_count >= 0),
        cost_accumulated_micros BIGINT NOT NULL DEFAULT 0 CHECK (cost_accumulated_micros >= 0),
        updated_at              TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (user_id, tier, period_date)
    );

    CREATE INDEX IF NOT EXISTS idx_usage_records_period
        ON usage_records(period_date);

    -- Current subscription state; the webhook ingestor is the sole writer.
    CREATE TABLE IF NOT EXISTS user_profiles (
        user_id    TEXT PRIMARY KEY,
        tier       TEXT NOT NULL,
        status     TEXT NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    );

    -- Append-only, one row per processed webhook delivery.
    CREATE TABLE IF NOT EXISTS subscription_audit (
        id          UUID PRIMARY KEY,
        user_id     TEXT NOT NULL,
        event_type  TEXT NOT NULL,
        old_tier    TEXT,
        new_tier    TEXT,
        provider    TEXT NOT NULL,
        raw_payload JSONB NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_subscription_audit_user
        ON subscription_audit(user_id, created_at DESC);

    -- Immutable daily rollups; the primary key makes re-runs no-ops.
    CREATE TABLE IF NOT EXISTS usage_snapshots (
        user_id                 TEXT NOT NULL,
        snapshot_date           DATE NOT NULL,
        tier                    TEXT NOT NULL,
        message_count           BIGINT NOT NULL,
        cost_accumulated_micros BIGINT NOT NULL,
        daily_message_quota     INTEGER NOT NULL,
        budget_ceiling_micros   BIGINT NOT NULL,
        status                  TEXT NOT NULL,
        created_at              TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (user_id, snapshot_date)
    );

    CREATE INDEX IF NOT EXISTS idx_usage_snapshots_date
        ON usage_snapshots(snapshot_date);
"#;
