//! HTTP request handlers for the metering gateway API.

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use chrono::{NaiveDate, Utc};
use metering_core::{DenyReason, ModelId, Tier, UsdMicros, UserId};
use metering_ledger::LedgerDecision;
use metering_snapshots::TierSummary;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::client::approx_tokens;
use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Output tokens assumed for the pre-generation cost estimate; reconciled
/// against the backend's actual usage after the turn completes.
pub const EXPECTED_OUTPUT_TOKENS: u32 = 500;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Version.
    pub version: String,
}

/// Health check endpoint.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check endpoint: verifies the store answers queries.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.usage_for_date(Utc::now().date_naive()).await {
        Ok(_) => (StatusCode::OK, "ready"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "store unavailable"),
    }
}

/// Webhook acceptance response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Always true for a 200; rejections are error responses.
    pub accepted: bool,
    /// Canonical classification of the delivery.
    pub event_type: String,
    /// Whether the delivery mutated the user's profile.
    pub applied: bool,
}

/// Subscription webhook endpoint.
///
/// The signature is verified over the exact raw bytes, so the body is
/// taken as [`Bytes`] and never re-serialized before verification.
#[instrument(skip(state, headers, body), fields(provider = %provider))]
pub async fn subscription_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = state.ingestor.process(&body, signature, &provider).await?;

    Ok(Json(WebhookResponse {
        accepted: true,
        event_type: outcome.event.event_type.to_string(),
        applied: outcome.applied,
    }))
}

/// Chat request body.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Requesting user.
    pub user_id: UserId,
    /// The message to answer.
    pub message: String,
}

/// Token and cost accounting for one answered turn.
#[derive(Debug, Serialize)]
pub struct ChatUsage {
    /// Prompt tokens reported by the backend.
    pub input_tokens: u32,
    /// Completion tokens reported by the backend.
    pub output_tokens: u32,
    /// Cost reserved before generation.
    pub estimated_cost: UsdMicros,
    /// Cost after reconciliation with actual usage.
    pub actual_cost: UsdMicros,
}

/// Chat response body.
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    /// Model that answered.
    pub model: ModelId,
    /// Generated text.
    pub message: String,
    /// Tier that was billed.
    pub tier: Tier,
    /// Accounting for this turn.
    pub usage: ChatUsage,
}

fn deny_response(reason: DenyReason) -> Response {
    let status = match reason {
        DenyReason::UnknownTier => StatusCode::FORBIDDEN,
        DenyReason::DailyLimitReached => StatusCode::TOO_MANY_REQUESTS,
        DenyReason::BudgetCeilingExceeded => StatusCode::PAYMENT_REQUIRED,
    };
    let message = match reason {
        DenyReason::UnknownTier => "subscription tier not recognized",
        DenyReason::DailyLimitReached => "daily message limit reached, resets at midnight UTC",
        DenyReason::BudgetCeilingExceeded => "daily budget ceiling reached",
    };
    (
        status,
        Json(json!({
            "allowed": false,
            "reason": reason,
            "message": message,
        })),
    )
        .into_response()
}

/// Chat endpoint: select model, estimate, enforce, generate, reconcile.
#[instrument(skip(state, body), fields(user_id = %body.user_id))]
pub async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    if body.message.is_empty() {
        return Err(ApiError::bad_request("message must not be empty"));
    }

    let profile = state.ledger.profile_or_free(&body.user_id).await?;
    let definition = state.catalog.get(profile.tier);

    let model = state
        .selector
        .select(definition, &body.message)
        .ok_or_else(|| ApiError::internal("tier permits no models"))?;

    let estimated = state
        .estimator
        .estimate(&model, approx_tokens(&body.message), EXPECTED_OUTPUT_TOKENS);

    let decision = state
        .ledger
        .check_and_increment_tier(&body.user_id, profile.tier, estimated)
        .await?;

    let key = match decision {
        LedgerDecision::Allowed { key, .. } => key,
        LedgerDecision::Denied { reason } => {
            info!(user_id = %body.user_id, tier = %profile.tier, reason = ?reason, "Chat denied");
            return Ok(deny_response(reason));
        }
    };

    let completion = match state.completions.complete(&model, &body.message).await {
        Ok(completion) => completion,
        Err(err) => {
            // The slot and the reserved estimate both stand; accounting is
            // deliberately conservative and never auto-refunds a failure.
            warn!(user_id = %body.user_id, model = %model, error = %err, "Generation failed");
            return Err(err.into());
        }
    };

    let actual = state
        .estimator
        .estimate(&model, completion.input_tokens, completion.output_tokens);
    state
        .ledger
        .record_actual_cost(&key, estimated, actual)
        .await?;

    info!(
        user_id = %body.user_id,
        tier = %profile.tier,
        model = %model,
        actual_cost = %actual,
        "Chat turn complete"
    );

    Ok(Json(ChatResponse {
        model,
        message: completion.content,
        tier: profile.tier,
        usage: ChatUsage {
            input_tokens: completion.input_tokens,
            output_tokens: completion.output_tokens,
            estimated_cost: estimated,
            actual_cost: actual,
        },
    })
    .into_response())
}

/// Current-day usage for a user.
#[derive(Debug, Serialize)]
pub struct UsageResponse {
    /// Queried user.
    pub user_id: UserId,
    /// Current tier.
    pub tier: Tier,
    /// Subscription status.
    pub status: String,
    /// Period date (today, UTC).
    pub date: NaiveDate,
    /// Messages accepted so far.
    pub message_count: i64,
    /// Tier quota; −1 means unlimited.
    pub daily_message_quota: i32,
    /// Messages left today, absent when unlimited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_messages: Option<i64>,
    /// Cost accumulated so far.
    pub cost_accumulated: UsdMicros,
    /// Tier budget ceiling.
    pub budget_ceiling: UsdMicros,
    /// Budget left today.
    pub remaining_budget: UsdMicros,
}

/// Usage endpoint.
#[instrument(skip(state))]
pub async fn usage(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<UsageResponse>, ApiError> {
    let profile = state.ledger.profile_or_free(&user_id).await?;
    let definition = state.catalog.get(profile.tier);
    let record = state
        .ledger
        .usage_on(&user_id, profile.tier, Utc::now().date_naive())
        .await?;

    let remaining_messages = if definition.is_unlimited() {
        None
    } else {
        Some((i64::from(definition.daily_message_quota) - record.message_count).max(0))
    };

    Ok(Json(UsageResponse {
        user_id,
        tier: profile.tier,
        status: profile.status.to_string(),
        date: record.key.period_date,
        message_count: record.message_count,
        daily_message_quota: definition.daily_message_quota,
        remaining_messages,
        cost_accumulated: record.cost_accumulated,
        budget_ceiling: definition.budget_ceiling,
        remaining_budget: definition
            .budget_ceiling
            .saturating_sub(record.cost_accumulated),
    }))
}

/// Query parameters for trend lookups.
#[derive(Debug, Deserialize)]
pub struct TrendQuery {
    /// Window size in days, default 7.
    pub days: Option<u32>,
}

/// Admin: per-user snapshot trend.
#[instrument(skip(state))]
pub async fn usage_trend(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(query): Query<TrendQuery>,
) -> Result<Response, ApiError> {
    let days = query.days.unwrap_or(7).clamp(1, 90);
    let trend = state
        .snapshots
        .trend(&user_id, days, Utc::now().date_naive())
        .await?;
    Ok(Json(json!({
        "user_id": user_id,
        "days": days,
        "snapshots": trend,
    }))
    .into_response())
}

/// Query parameters selecting a snapshot date.
#[derive(Debug, Deserialize)]
pub struct DateQuery {
    /// Date in `YYYY-MM-DD`, default today (UTC).
    pub date: Option<NaiveDate>,
}

impl DateQuery {
    fn resolve(&self) -> NaiveDate {
        self.date.unwrap_or_else(|| Utc::now().date_naive())
    }
}

/// Admin: per-tier aggregates for a date.
#[instrument(skip(state))]
pub async fn tiers_summary(
    State(state): State<AppState>,
    Query(query): Query<DateQuery>,
) -> Result<Json<Vec<TierSummary>>, ApiError> {
    Ok(Json(state.snapshots.tier_summary(query.resolve()).await?))
}

/// Admin: trigger a snapshot run.
#[instrument(skip(state))]
pub async fn take_snapshot(
    State(state): State<AppState>,
    Query(query): Query<DateQuery>,
) -> Result<Response, ApiError> {
    let date = query.resolve();
    let created = state.snapshots.take_snapshot(date).await?;
    Ok(Json(json!({ "date": date, "snapshots_created": created })).into_response())
}

/// Admin: export one day's snapshots as CSV.
#[instrument(skip(state))]
pub async fn export_snapshots(
    State(state): State<AppState>,
    Query(query): Query<DateQuery>,
) -> Result<Response, ApiError> {
    let csv = state.snapshots.export_csv(query.resolve()).await?;
    Ok(([(header::CONTENT_TYPE, "text/csv")], csv).into_response())
}

/// Body for an administrative usage reset.
#[derive(Debug, Default, Deserialize)]
pub struct ResetRequest {
    /// Tier whose counters to reset; defaults to the user's current tier.
    pub tier: Option<Tier>,
}

/// Admin: zero a user's counters for today. The reset is itself audited.
#[instrument(skip(state))]
pub async fn reset_usage(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    body: Option<Json<ResetRequest>>,
) -> Result<Response, ApiError> {
    let requested = body.and_then(|Json(b)| b.tier);
    let tier = match requested {
        Some(tier) => tier,
        None => state.ledger.profile_or_free(&user_id).await?.tier,
    };

    let before = state.ledger.reset_usage(&user_id, tier).await?;
    Ok(Json(json!({
        "user_id": user_id,
        "tier": tier,
        "message_count_before": before.message_count,
        "cost_accumulated_before": before.cost_accumulated,
    }))
    .into_response())
}

/// Query parameters for audit lookups.
#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    /// Maximum entries to return, default 50.
    pub limit: Option<usize>,
}

/// Admin: recent subscription audit entries for a user, newest first.
#[instrument(skip(state))]
pub async fn audit_entries(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(query): Query<AuditQuery>,
) -> Result<Response, ApiError> {
    let limit = query.limit.unwrap_or(50).min(500);
    let entries = state.store.audit_entries(&user_id, limit).await?;
    Ok(Json(json!({ "user_id": user_id, "entries": entries })).into_response())
}
