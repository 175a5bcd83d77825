use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

/// Basic shape check on an email address before it is used as a counter or
/// blacklist identity
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Checkout request body as sent by the booking frontend. Fields are
/// optional so the gates own the missing-field validation and its exact
/// error messages.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub booking_id: Option<String>,
    pub tour_id: Option<String>,
    /// Amount in the smallest currency unit. Deserialized as a float so a
    /// fractional value reaches the risk scorer instead of failing parse.
    pub amount: Option<f64>,
    pub email: Option<String>,
    pub correlation_id: Option<String>,
}

/// Per-request transaction context threaded through the velocity and risk
/// gates. Not persisted unless the transaction is queued or blacklisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionContext {
    pub booking_id: String,
    pub tour_id: String,
    pub amount: f64,
    pub email: String,
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub correlation_id: String,
    /// Unix seconds, UTC
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Deterministic weighted assessment of a transaction. The score is the sum
/// of triggered factor weights; the level is a threshold function of the
/// score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskAssessment {
    pub score: u32,
    pub level: RiskLevel,
    pub factors: Vec<String>,
}

/// One durable blacklist entry, keyed by identifier (email or IP). No
/// `expires_at` means permanent. Expired entries are treated as absent on
/// reads but only physically deleted by explicit cleanup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlacklistEntry {
    pub identifier: String,
    pub reason: String,
    pub added_at: i64,
    pub added_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl BlacklistEntry {
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(expires) if now > expires)
    }
}

/// Append-only audit record for blacklist mutations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub action: String,
    pub identifier: String,
    pub reason: String,
    pub actor: String,
    pub at: i64,
}

/// A risk-flagged transaction waiting for human adjudication. The id is
/// generated at enqueue time so reviewers address entries stably instead of
/// by list position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReviewQueueEntry {
    pub id: String,
    pub transaction: TransactionContext,
    pub assessment: RiskAssessment,
    pub queued_at: i64,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

/// Immutable record of a review decision, appended to the review audit log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewDecision {
    pub entry: ReviewQueueEntry,
    pub decision: Decision,
    pub reviewed_by: String,
    pub reviewed_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// High-but-allowed amount recorded for later inspection; never blocks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspiciousTransaction {
    pub email: String,
    pub ip: String,
    pub amount: f64,
    pub recorded_at: i64,
}

/// Receipt returned by the payment provider on a successful charge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub payment_id: String,
    pub status: String,
}

/// Booking record persisted once a transaction clears every gate and the
/// charge succeeds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRecord {
    pub booking_id: String,
    pub tour_id: String,
    pub amount: f64,
    pub email: String,
    pub payment_id: String,
    pub created_at: i64,
}

/// HTTP-facing error taxonomy for the gating pipeline. Every denial carries
/// a stable message string; store failures surface as `Internal` rather than
/// being masked as allows.
#[derive(Debug, Error)]
pub enum GateError {
    /// 400 - missing or malformed input
    #[error("{0}")]
    Validation(String),
    /// 403 - blacklist or geography denial
    #[error("{0}")]
    AccessDenied(String),
    /// 429 - window, quota, or velocity breach
    #[error("{0}")]
    RateExceeded(String),
    /// 400 - critical-risk transaction
    #[error("{0}")]
    RiskBlocked(String),
    /// 402 - payment provider declined or gave up
    #[error("{0}")]
    PaymentFailed(String),
    /// 500 - store or collaborator failure; never treated as allow
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl GateError {
    fn status(&self) -> StatusCode {
        match self {
            GateError::Validation(_) | GateError::RiskBlocked(_) => StatusCode::BAD_REQUEST,
            GateError::AccessDenied(_) => StatusCode::FORBIDDEN,
            GateError::RateExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            GateError::PaymentFailed(_) => StatusCode::PAYMENT_REQUIRED,
            GateError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            GateError::Internal(e) => {
                eprintln!("Internal error: {:#}", e);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_shape_check() {
        assert!(is_valid_email("guest@example.com"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("two@@example.com"));
        assert!(!is_valid_email("spaces in@example.com"));
    }

    #[test]
    fn test_blacklist_entry_expiry() {
        let entry = BlacklistEntry {
            identifier: "1.2.3.4".to_string(),
            reason: "Exceeded request limit".to_string(),
            added_at: 1_000,
            added_by: "ip-gate".to_string(),
            expires_at: Some(2_000),
        };
        assert!(!entry.is_expired(2_000));
        assert!(entry.is_expired(2_001));

        let permanent = BlacklistEntry {
            expires_at: None,
            ..entry
        };
        assert!(!permanent.is_expired(i64::MAX));
    }

    #[test]
    fn test_gate_error_status_codes() {
        assert_eq!(
            GateError::Validation("Invalid IP address".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GateError::AccessDenied("Access denied: IP is blacklisted".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            GateError::RateExceeded("Too many requests from this IP".into()).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GateError::RiskBlocked("Critical risk: Unusual amount".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_review_entry_round_trips_exactly() {
        // Review removal is by exact serialized value; the entry must
        // serialize deterministically.
        let entry = ReviewQueueEntry {
            id: "e1".to_string(),
            transaction: TransactionContext {
                booking_id: "b1".to_string(),
                tour_id: "t1".to_string(),
                amount: 900.0,
                email: "guest@example.com".to_string(),
                ip: Some("10.0.0.1".to_string()),
                user_agent: None,
                correlation_id: "c1".to_string(),
                timestamp: 1_700_000_000,
            },
            assessment: RiskAssessment {
                score: 60,
                level: RiskLevel::High,
                factors: vec!["Unusual amount".to_string()],
            },
            queued_at: 1_700_000_000,
            status: "pending_review".to_string(),
        };
        let a = serde_json::to_string(&entry).unwrap();
        let b = serde_json::to_string(&serde_json::from_str::<ReviewQueueEntry>(&a).unwrap())
            .unwrap();
        assert_eq!(a, b);
    }
}
