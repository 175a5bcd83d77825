use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::{
    clients::PaymentError,
    models::{
        is_valid_email, BookingRecord, CheckoutRequest, Decision, GateError, RiskLevel,
        TransactionContext,
    },
    resilience::{execute_with_retry, CircuitError, RetryConfig},
    security::middleware::ClientContext,
    state::AppState,
};

/// Checkout entry point. The rate limiter and IP gate have already run as
/// middleware; this handler runs the body-dependent gates in their fixed
/// order (velocity, then risk) and only then touches the payment provider.
pub async fn checkout(
    State(state): State<AppState>,
    Extension(ctx): Extension<ClientContext>,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<Value>, GateError> {
    state
        .velocity
        .check(
            ctx.ip.as_deref(),
            request.email.as_deref(),
            request.amount,
        )
        .await?;

    let booking_id = required(request.booking_id)?;
    let tour_id = required(request.tour_id)?;
    let email = request.email.unwrap_or_default();
    let amount = request.amount.unwrap_or_default();

    if !is_valid_email(&email) {
        return Err(GateError::Validation("Invalid email address".to_string()));
    }

    let tx = TransactionContext {
        booking_id: booking_id.clone(),
        tour_id,
        amount,
        email: email.clone(),
        ip: ctx.ip.clone(),
        user_agent: ctx.user_agent.clone(),
        correlation_id: request
            .correlation_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        timestamp: Utc::now().timestamp(),
    };

    let assessment = state.risk.assess(&tx).await?;
    let queued = assessment.level == RiskLevel::High;
    if queued {
        state
            .review_queue
            .enqueue(tx.clone(), assessment.clone())
            .await
            .map_err(GateError::Internal)?;
    }

    // Charge through the shared breaker so a struggling provider fails fast
    // for everyone instead of each request burning its own retry budget
    let charge = execute_with_retry(
        || {
            state
                .payment_breaker
                .call(|| state.payment.charge(&tx.booking_id, tx.amount, &tx.email))
        },
        &RetryConfig::payment(),
        "payment-charge",
    )
    .await;

    let receipt = match charge.outcome {
        Ok(receipt) => receipt,
        Err(CircuitError::Inner(PaymentError::Declined(reason))) => {
            state.risk.record_payment_failure(&tx.email).await?;
            return Err(GateError::PaymentFailed(format!(
                "Payment declined: {}",
                reason
            )));
        }
        Err(e) => {
            return Err(GateError::PaymentFailed(format!(
                "Payment could not be processed: {}",
                e
            )));
        }
    };

    let booking = BookingRecord {
        booking_id: tx.booking_id.clone(),
        tour_id: tx.tour_id.clone(),
        amount: tx.amount,
        email: tx.email.clone(),
        payment_id: receipt.payment_id.clone(),
        created_at: tx.timestamp,
    };
    let saved = execute_with_retry(
        || state.bookings.save(&booking),
        &RetryConfig::persistence(),
        "booking-save",
    )
    .await;
    if let Err(e) = saved.outcome {
        return Err(GateError::Internal(anyhow::anyhow!(
            "Failed to persist booking {} after {} attempts: {}",
            booking.booking_id,
            saved.attempts,
            e
        )));
    }

    // Confirmation mail is best-effort; the booking stands either way
    let notified = execute_with_retry(
        || state.notifier.send_confirmation(&tx.email, &tx.booking_id),
        &RetryConfig::notification(),
        "booking-confirmation",
    )
    .await;
    if let Err(e) = notified.outcome {
        eprintln!(
            "Confirmation for booking {} not delivered after {} attempts: {}",
            tx.booking_id, notified.attempts, e
        );
    }

    let mut body = json!({
        "success": true,
        "bookingId": booking.booking_id,
        "paymentId": receipt.payment_id,
    });
    if queued {
        body["riskAssessment"] = serde_json::to_value(&assessment)
            .map_err(|e| GateError::Internal(e.into()))?;
    }
    Ok(Json(body))
}

fn required(field: Option<String>) -> Result<String, GateError> {
    match field {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(GateError::Validation(
            "Missing required fields: bookingId, tourId, email, or amount".to_string(),
        )),
    }
}

// ---- operator surface -------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlacklistAddRequest {
    pub identifier: String,
    pub reason: String,
    pub added_by: String,
    pub expiration_days: Option<i64>,
}

pub async fn blacklist_add(
    State(state): State<AppState>,
    Json(request): Json<BlacklistAddRequest>,
) -> Result<Json<Value>, GateError> {
    let entry = state
        .blacklist
        .add(
            &request.identifier,
            &request.reason,
            &request.added_by,
            request.expiration_days,
        )
        .await
        .map_err(GateError::Internal)?;
    Ok(Json(json!({ "added": entry })))
}

pub async fn blacklist_remove(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, GateError> {
    let removed_by = params
        .get("removedBy")
        .map(|s| s.as_str())
        .unwrap_or("admin");
    let removed = state
        .blacklist
        .remove(&identifier, removed_by)
        .await
        .map_err(GateError::Internal)?;

    if removed {
        Ok(Json(json!({ "removed": true })))
    } else {
        Ok(Json(json!({
            "removed": false,
            "message": format!("Blacklist entry not found for {}", identifier),
        })))
    }
}

pub async fn blacklist_list(State(state): State<AppState>) -> Result<Json<Value>, GateError> {
    let entries = state.blacklist.list().await.map_err(GateError::Internal)?;
    if entries.is_empty() {
        return Ok(Json(json!({ "message": "No entries in blacklist", "entries": [] })));
    }
    Ok(Json(json!({ "entries": entries })))
}

pub async fn blacklist_history(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, GateError> {
    let limit = parse_limit(&params, 50);
    let records = state
        .blacklist
        .history(limit)
        .await
        .map_err(GateError::Internal)?;
    if records.is_empty() {
        return Ok(Json(json!({ "message": "No history found", "history": [] })));
    }
    Ok(Json(json!({ "history": records })))
}

pub async fn blacklist_cleanup(State(state): State<AppState>) -> Result<Json<Value>, GateError> {
    let removed = state.blacklist.cleanup().await.map_err(GateError::Internal)?;
    Ok(Json(json!({
        "removed": removed,
        "message": format!("Cleaned up {} expired blacklist entries", removed),
    })))
}

pub async fn review_list(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, GateError> {
    let limit = parse_limit(&params, 10);
    let entries = state
        .review_queue
        .list(limit)
        .await
        .map_err(GateError::Internal)?;
    if entries.is_empty() {
        return Ok(Json(json!({ "message": "No entries in review queue", "entries": [] })));
    }
    Ok(Json(json!({ "entries": entries })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    pub decision: Decision,
    pub reviewed_by: String,
    pub notes: Option<String>,
}

pub async fn review_decide(
    State(state): State<AppState>,
    Path(entry_id): Path<String>,
    Json(request): Json<ReviewRequest>,
) -> Result<Json<Value>, GateError> {
    let decision = state
        .review_queue
        .review(
            &entry_id,
            request.decision,
            &request.reviewed_by,
            request.notes,
        )
        .await?;
    Ok(Json(json!({ "decision": decision })))
}

pub async fn review_history(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, GateError> {
    let limit = parse_limit(&params, 50);
    let decisions = state
        .review_queue
        .history(limit)
        .await
        .map_err(GateError::Internal)?;
    if decisions.is_empty() {
        return Ok(Json(json!({ "message": "No review history found", "history": [] })));
    }
    Ok(Json(json!({ "history": decisions })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewCleanupRequest {
    pub max_age_days: i64,
}

pub async fn review_cleanup(
    State(state): State<AppState>,
    Json(request): Json<ReviewCleanupRequest>,
) -> Result<Json<Value>, GateError> {
    let removed = state
        .review_queue
        .cleanup(request.max_age_days)
        .await
        .map_err(GateError::Internal)?;
    Ok(Json(json!({
        "removed": removed,
        "message": format!("Cleaned up {} old entries", removed),
    })))
}

fn parse_limit(params: &HashMap<String, String>, default: usize) -> usize {
    params
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ---- operational endpoints --------------------------------------------

pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<Value>, StatusCode> {
    let redis_connected = state.redis.ping().await.unwrap_or(false);
    if !redis_connected {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(Json(json!({
        "healthy": true,
        "redis_connected": true,
        "timestamp": Utc::now().timestamp(),
    })))
}

pub async fn metrics_export(State(state): State<AppState>) -> String {
    state.metrics.render()
}
