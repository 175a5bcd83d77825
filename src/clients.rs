//! Collaborator interfaces around the gates: payment provider, notification
//! service, and booking persistence. Each boundary maps its raw failures
//! onto a tagged error type so retry classification dispatches on variants
//! instead of message text.

use crate::models::{BookingRecord, PaymentReceipt};
use crate::redis_client::RedisClient;
use crate::resilience::TransientError;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

const BOOKING_TTL_SECONDS: u64 = 31_536_000; // 1 year

/// Definitive decline reasons; never retried regardless of the retry budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclineReason {
    InsufficientFunds,
    InvalidCard,
    ExpiredCard,
    AuthenticationRequired,
    /// Provider declined without a definitive reason; worth one more try
    Other(String),
}

impl DeclineReason {
    pub fn from_code(code: &str) -> Self {
        match code {
            "insufficient_funds" => DeclineReason::InsufficientFunds,
            "invalid_card" | "incorrect_number" => DeclineReason::InvalidCard,
            "expired_card" => DeclineReason::ExpiredCard,
            "authentication_required" => DeclineReason::AuthenticationRequired,
            other => DeclineReason::Other(other.to_string()),
        }
    }

    fn is_definitive(&self) -> bool {
        !matches!(self, DeclineReason::Other(_))
    }
}

impl std::fmt::Display for DeclineReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeclineReason::InsufficientFunds => write!(f, "insufficient funds"),
            DeclineReason::InvalidCard => write!(f, "invalid card"),
            DeclineReason::ExpiredCard => write!(f, "expired card"),
            DeclineReason::AuthenticationRequired => write!(f, "authentication required"),
            DeclineReason::Other(code) => write!(f, "{}", code),
        }
    }
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment provider unreachable: {0}")]
    Network(String),
    #[error("payment provider timed out")]
    Timeout,
    #[error("payment provider rate limited the request")]
    RateLimited,
    #[error("payment provider temporarily unavailable")]
    ServiceUnavailable,
    #[error("payment provider internal error")]
    Internal,
    #[error("payment processing error: {0}")]
    Processing(String),
    #[error("card declined: {0}")]
    Declined(DeclineReason),
}

impl TransientError for PaymentError {
    fn is_transient(&self) -> bool {
        match self {
            PaymentError::Declined(reason) => !reason.is_definitive(),
            // Network, timeout, rate-limit, availability, internal, and
            // generic processing errors are all worth another attempt
            _ => true,
        }
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification service unreachable: {0}")]
    Network(String),
    #[error("notification service timed out")]
    Timeout,
    #[error("notification service rate limited the request")]
    RateLimited,
    #[error("notification service temporarily unavailable")]
    ServiceUnavailable,
    #[error("invalid recipient address")]
    InvalidAddress,
    #[error("notification template not found")]
    TemplateNotFound,
    #[error("recipient has blocked delivery")]
    Blocked,
    #[error("recipient address bounced")]
    Bounced,
}

impl TransientError for NotificationError {
    fn is_transient(&self) -> bool {
        !matches!(
            self,
            NotificationError::InvalidAddress
                | NotificationError::TemplateNotFound
                | NotificationError::Blocked
                | NotificationError::Bounced
        )
    }
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("store connection lost: {0}")]
    ConnectionLost(String),
    #[error("store deadlock detected")]
    Deadlock,
    #[error("store lock wait timed out")]
    LockTimeout,
    #[error("store rejected the write: {0}")]
    Rejected(String),
}

impl TransientError for PersistenceError {
    fn is_transient(&self) -> bool {
        !matches!(self, PersistenceError::Rejected(_))
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(
        &self,
        booking_id: &str,
        amount: f64,
        email: &str,
    ) -> Result<PaymentReceipt, PaymentError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_confirmation(&self, email: &str, booking_id: &str)
        -> Result<(), NotificationError>;
}

/// Payment provider spoken to over HTTP. Transport failures and provider
/// status codes are mapped to tags here, at the boundary.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPaymentGateway {
    pub fn new(endpoint: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, endpoint }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn charge(
        &self,
        booking_id: &str,
        amount: f64,
        email: &str,
    ) -> Result<PaymentReceipt, PaymentError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "bookingId": booking_id,
                "amount": amount,
                "email": email,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PaymentError::Timeout
                } else {
                    PaymentError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<PaymentReceipt>()
                .await
                .map_err(|e| PaymentError::Processing(e.to_string()));
        }

        match status.as_u16() {
            402 => {
                let body: serde_json::Value = response.json().await.unwrap_or_default();
                let code = body
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .unwrap_or("card_declined");
                Err(PaymentError::Declined(DeclineReason::from_code(code)))
            }
            429 => Err(PaymentError::RateLimited),
            503 => Err(PaymentError::ServiceUnavailable),
            s if s >= 500 => Err(PaymentError::Internal),
            s => Err(PaymentError::Processing(format!("provider returned {}", s))),
        }
    }
}

/// Notification service spoken to over HTTP (template rendering lives on the
/// other side of this wall)
pub struct HttpNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpNotifier {
    pub fn new(endpoint: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self { client, endpoint }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send_confirmation(
        &self,
        email: &str,
        booking_id: &str,
    ) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "template": "booking_confirmation",
                "to": email,
                "bookingId": booking_id,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NotificationError::Timeout
                } else {
                    NotificationError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body: serde_json::Value = response.json().await.unwrap_or_default();
        let code = body.get("error").and_then(|v| v.as_str()).unwrap_or("");
        match (status.as_u16(), code) {
            (_, "invalid_address") => Err(NotificationError::InvalidAddress),
            (_, "template_not_found") | (404, _) => Err(NotificationError::TemplateNotFound),
            (_, "blocked") => Err(NotificationError::Blocked),
            (_, "bounced") => Err(NotificationError::Bounced),
            (429, _) => Err(NotificationError::RateLimited),
            _ => Err(NotificationError::ServiceUnavailable),
        }
    }
}

/// Booking persistence over the shared store, behind the persistence retry
/// preset
#[derive(Clone)]
pub struct BookingStore {
    redis: RedisClient,
}

impl BookingStore {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }

    pub async fn save(&self, booking: &BookingRecord) -> Result<(), PersistenceError> {
        let json = serde_json::to_string(booking)
            .map_err(|e| PersistenceError::Rejected(e.to_string()))?;
        let key = format!("booking:{}", booking.booking_id);
        self.redis
            .set_ex(&key, &json, BOOKING_TTL_SECONDS)
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PersistenceError::LockTimeout
                } else if e.is_connection_dropped() || e.is_io_error() {
                    PersistenceError::ConnectionLost(e.to_string())
                } else {
                    PersistenceError::Rejected(e.to_string())
                }
            })
    }
}
