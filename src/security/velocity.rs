use crate::models::{GateError, SuspiciousTransaction};
use crate::security::identity_hash;
use crate::store::Store;
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::sync::Arc;

const SUSPICIOUS_LIST_KEY: &str = "velocity:suspicious";
const DAY_TTL_SECONDS: i64 = 90_000; // 25h, survives the day rollover
const HOUR_TTL_SECONDS: i64 = 3_900;

/// Ceilings for the per-transaction financial and frequency guards. Amounts
/// are in the smallest currency unit.
#[derive(Debug, Clone)]
pub struct VelocityConfig {
    /// Hard ceiling for a single transaction
    pub max_amount_per_transaction: f64,
    /// Ceiling for one identity's cumulative amount per UTC day
    pub max_daily_amount: i64,
    /// Transactions allowed per identity per UTC hour
    pub max_transactions_per_hour: i64,
    /// Transactions allowed per email per UTC day
    pub max_transactions_per_email: i64,
    /// Transactions allowed per IP per UTC day
    pub max_transactions_per_ip: i64,
    /// Amounts at or above this (but within the hard ceiling) are recorded
    /// as suspicious without blocking
    pub suspicious_amount_threshold: f64,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            max_amount_per_transaction: 1_000.0,
            max_daily_amount: 5_000,
            max_transactions_per_hour: 5,
            max_transactions_per_email: 10,
            max_transactions_per_ip: 20,
            suspicious_amount_threshold: 800.0,
        }
    }
}

/// Per-request financial velocity guard. Checks run in a fixed order and the
/// first failure wins, so the error message for a given breach is
/// deterministic and no further store round trips happen after a denial.
#[derive(Clone)]
pub struct VelocityChecker {
    store: Arc<dyn Store>,
    config: VelocityConfig,
}

impl VelocityChecker {
    pub fn new(store: Arc<dyn Store>, config: VelocityConfig) -> Self {
        Self { store, config }
    }

    /// Input validation, performed before any store access
    pub fn validate(
        ip: Option<&str>,
        email: Option<&str>,
        amount: Option<f64>,
    ) -> Result<(), GateError> {
        let ip_missing = ip.map_or(true, |v| v.trim().is_empty());
        let email_missing = email.map_or(true, |v| v.trim().is_empty());
        if ip_missing || email_missing || amount.is_none() {
            return Err(GateError::Validation(
                "Missing required fields: ip, email, or amount".to_string(),
            ));
        }
        Ok(())
    }

    /// Run the ordered velocity checks for one transaction. On success the
    /// transaction may additionally be recorded as suspicious (non-blocking).
    pub async fn check(
        &self,
        ip: Option<&str>,
        email: Option<&str>,
        amount: Option<f64>,
    ) -> Result<(), GateError> {
        Self::validate(ip, email, amount)?;
        let ip = ip.unwrap();
        let email = email.unwrap();
        let amount = amount.unwrap();

        let now = Utc::now();
        let day = day_bucket(&now);
        let hour = hour_bucket(&now);
        let email_key = identity_hash(email);

        // 1. Single-transaction ceiling
        if amount > self.config.max_amount_per_transaction {
            return Err(GateError::RateExceeded(
                "Transaction amount too high".to_string(),
            ));
        }

        // 2. Cumulative daily amount for this identity
        let daily_amount_key = format!("velocity:amount:{}:{}", day, email_key);
        let daily_total = self
            .counter_incr_by(&daily_amount_key, amount.round() as i64, DAY_TTL_SECONDS)
            .await?;
        if daily_total > self.config.max_daily_amount {
            return Err(GateError::RateExceeded(
                "Daily transaction limit exceeded".to_string(),
            ));
        }

        // 3. Hourly transaction count for this identity
        let hourly_key = format!("velocity:count:hour:{}:{}", hour, email_key);
        let hourly_count = self.counter_incr(&hourly_key, HOUR_TTL_SECONDS).await?;
        if hourly_count >= self.config.max_transactions_per_hour {
            return Err(GateError::RateExceeded(
                "Too many transactions per hour".to_string(),
            ));
        }

        // 4. Daily count keyed by email
        let email_day_key = format!("velocity:count:email:{}:{}", day, email_key);
        let email_count = self.counter_incr(&email_day_key, DAY_TTL_SECONDS).await?;
        if email_count > self.config.max_transactions_per_email {
            return Err(GateError::RateExceeded(
                "Too many transactions for this email today".to_string(),
            ));
        }

        // 5. Daily count keyed by IP
        let ip_day_key = format!("velocity:count:ip:{}:{}", day, ip);
        let ip_count = self.counter_incr(&ip_day_key, DAY_TTL_SECONDS).await?;
        if ip_count > self.config.max_transactions_per_ip {
            return Err(GateError::RateExceeded(
                "Too many transactions from this IP today".to_string(),
            ));
        }

        // High-but-allowed amounts are recorded for later inspection. This
        // must never block the transaction, so failures only log.
        if amount >= self.config.suspicious_amount_threshold {
            let record = SuspiciousTransaction {
                email: email.to_string(),
                ip: ip.to_string(),
                amount,
                recorded_at: now.timestamp(),
            };
            metrics::counter!("suspicious_transactions_total", 1);
            if let Err(e) = self.record_suspicious(&record).await {
                eprintln!("Failed to record suspicious transaction: {}", e);
            }
        }

        Ok(())
    }

    async fn record_suspicious(&self, record: &SuspiciousTransaction) -> anyhow::Result<()> {
        let json = serde_json::to_string(record)?;
        self.store
            .lpush(SUSPICIOUS_LIST_KEY, &json)
            .await
            .context("Failed to append suspicious transaction")?;
        Ok(())
    }

    /// Increment a counter, arming its TTL on first use so windows expire on
    /// their own
    async fn counter_incr(&self, key: &str, ttl: i64) -> Result<i64, GateError> {
        let count = self
            .store
            .incr(key)
            .await
            .map_err(|e| GateError::Internal(e.context(format!("Failed to increment {}", key))))?;
        if count == 1 {
            self.store
                .expire(key, ttl)
                .await
                .map_err(|e| GateError::Internal(e.context(format!("Failed to expire {}", key))))?;
        }
        Ok(count)
    }

    async fn counter_incr_by(&self, key: &str, amount: i64, ttl: i64) -> Result<i64, GateError> {
        let total = self
            .store
            .incr_by(key, amount)
            .await
            .map_err(|e| GateError::Internal(e.context(format!("Failed to increment {}", key))))?;
        if total == amount {
            self.store
                .expire(key, ttl)
                .await
                .map_err(|e| GateError::Internal(e.context(format!("Failed to expire {}", key))))?;
        }
        Ok(total)
    }
}

fn day_bucket(now: &DateTime<Utc>) -> String {
    now.format("%Y%m%d").to_string()
}

fn hour_bucket(now: &DateTime<Utc>) -> String {
    now.format("%Y%m%d%H").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use chrono::TimeZone;

    fn checker(config: VelocityConfig) -> (VelocityChecker, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (VelocityChecker::new(store.clone(), config), store)
    }

    fn rate_exceeded_message(result: Result<(), GateError>) -> String {
        match result {
            Err(GateError::RateExceeded(msg)) => msg,
            other => panic!("expected rate-exceeded error, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_rejects_missing_fields() {
        let expect = "Missing required fields: ip, email, or amount";

        for (ip, email, amount) in [
            (None, Some("a@b.com"), Some(100.0)),
            (Some("1.2.3.4"), None, Some(100.0)),
            (Some("1.2.3.4"), Some("a@b.com"), None),
            (Some(""), Some("a@b.com"), Some(100.0)),
            (Some("1.2.3.4"), Some("   "), Some(100.0)),
            (None, None, None),
        ] {
            match VelocityChecker::validate(ip, email, amount) {
                Err(GateError::Validation(msg)) => assert_eq!(msg, expect),
                other => panic!("expected validation error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_validation_accepts_complete_input() {
        assert!(VelocityChecker::validate(Some("1.2.3.4"), Some("a@b.com"), Some(900.0)).is_ok());
    }

    #[test]
    fn test_day_and_hour_buckets_are_utc() {
        let t = Utc.with_ymd_and_hms(2026, 3, 7, 23, 59, 59).unwrap();
        assert_eq!(day_bucket(&t), "20260307");
        assert_eq!(hour_bucket(&t), "2026030723");

        // One second later rolls both buckets; counters restart rather than
        // carrying stale totals across the boundary
        let t2 = Utc.with_ymd_and_hms(2026, 3, 8, 0, 0, 0).unwrap();
        assert_eq!(day_bucket(&t2), "20260308");
        assert_eq!(hour_bucket(&t2), "2026030800");
    }

    #[test]
    fn test_default_config_baseline() {
        let config = VelocityConfig::default();
        assert!(config.suspicious_amount_threshold < config.max_amount_per_transaction);
        assert_eq!(config.max_amount_per_transaction, 1_000.0);
        assert_eq!(config.max_daily_amount, 5_000);
    }

    #[tokio::test]
    async fn test_amount_ceiling_blocks_before_any_counter() {
        let (checker, store) = checker(VelocityConfig::default());

        let result = checker
            .check(Some("1.2.3.4"), Some("a@b.com"), Some(1_500.0))
            .await;
        assert_eq!(rate_exceeded_message(result), "Transaction amount too high");

        // Denied before the store is touched: no counters, no suspicious list
        assert!(store.kv_is_empty());
        assert!(store.lists_are_empty());
    }

    #[tokio::test]
    async fn test_invalid_input_leaves_store_untouched() {
        let (checker, store) = checker(VelocityConfig::default());
        assert!(checker.check(None, Some("a@b.com"), Some(100.0)).await.is_err());
        assert!(store.kv_is_empty());
        assert!(store.lists_are_empty());
    }

    #[tokio::test]
    async fn test_suspicious_band_records_without_blocking() {
        let (checker, store) = checker(VelocityConfig::default());

        // At the threshold but under the ceiling: allowed, recorded
        checker
            .check(Some("1.2.3.4"), Some("a@b.com"), Some(900.0))
            .await
            .unwrap();
        let records = store.list_items("velocity:suspicious");
        assert_eq!(records.len(), 1);
        let record: SuspiciousTransaction = serde_json::from_str(&records[0]).unwrap();
        assert_eq!(record.amount, 900.0);
        assert_eq!(record.email, "a@b.com");

        // Below the threshold: allowed, not recorded
        checker
            .check(Some("1.2.3.4"), Some("a@b.com"), Some(500.0))
            .await
            .unwrap();
        assert_eq!(store.list_items("velocity:suspicious").len(), 1);
    }

    #[tokio::test]
    async fn test_daily_amount_ceiling_message() {
        let (checker, _) = checker(VelocityConfig {
            max_daily_amount: 1_500,
            ..VelocityConfig::default()
        });

        checker
            .check(Some("1.2.3.4"), Some("a@b.com"), Some(800.0))
            .await
            .unwrap();
        let result = checker
            .check(Some("1.2.3.4"), Some("a@b.com"), Some(800.0))
            .await;
        assert_eq!(
            rate_exceeded_message(result),
            "Daily transaction limit exceeded"
        );
    }

    #[tokio::test]
    async fn test_hourly_count_ceiling_message() {
        let (checker, _) = checker(VelocityConfig {
            max_transactions_per_hour: 3,
            ..VelocityConfig::default()
        });

        for _ in 0..2 {
            checker
                .check(Some("1.2.3.4"), Some("a@b.com"), Some(50.0))
                .await
                .unwrap();
        }
        let result = checker.check(Some("1.2.3.4"), Some("a@b.com"), Some(50.0)).await;
        assert_eq!(rate_exceeded_message(result), "Too many transactions per hour");
    }

    #[tokio::test]
    async fn test_email_daily_count_ceiling_message() {
        let (checker, _) = checker(VelocityConfig {
            max_transactions_per_email: 2,
            ..VelocityConfig::default()
        });

        for _ in 0..2 {
            checker
                .check(Some("1.2.3.4"), Some("a@b.com"), Some(50.0))
                .await
                .unwrap();
        }
        let result = checker.check(Some("1.2.3.4"), Some("a@b.com"), Some(50.0)).await;
        assert_eq!(
            rate_exceeded_message(result),
            "Too many transactions for this email today"
        );
    }

    #[tokio::test]
    async fn test_ip_daily_count_ceiling_message() {
        let (checker, _) = checker(VelocityConfig {
            max_transactions_per_ip: 2,
            ..VelocityConfig::default()
        });

        // Distinct emails keep the per-email counters out of the way so the
        // shared IP is what trips
        for email in ["a@b.com", "b@b.com"] {
            checker
                .check(Some("1.2.3.4"), Some(email), Some(50.0))
                .await
                .unwrap();
        }
        let result = checker.check(Some("1.2.3.4"), Some("c@b.com"), Some(50.0)).await;
        assert_eq!(
            rate_exceeded_message(result),
            "Too many transactions from this IP today"
        );
    }
}
