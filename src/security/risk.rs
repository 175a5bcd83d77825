use crate::geo::GeoLookup;
use crate::models::{GateError, RiskAssessment, RiskLevel, TransactionContext};
use crate::security::{identity_hash, BlacklistStore};
use crate::store::Store;
use chrono::{TimeZone, Timelike, Utc};
use std::sync::Arc;

/// User-agent prefixes that mark scripted clients
const SCRIPTED_AGENTS: &[&str] = &["curl/", "python-requests", "go-http-client", "wget/"];

/// Factor weights, detection thresholds, and score-to-level boundaries.
/// All tunable so the rule set stays auditable independent of call sites.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub weight_unusual_amount: u32,
    pub weight_unusual_time: u32,
    pub weight_unusual_location: u32,
    pub weight_multiple_bookings: u32,
    pub weight_unusual_device: u32,
    pub weight_payment_failures: u32,
    pub weight_known_bad_actor: u32,

    /// Amounts at or above this are outside the normal band
    pub max_normal_amount: f64,
    /// Inclusive start / exclusive end of the low-traffic UTC window
    pub quiet_hours: (u32, u32),
    /// Uppercase ISO codes; empty disables the location factor
    pub allowed_countries: Vec<String>,
    /// Bookings within the window (current one included) that trigger the
    /// multiple-bookings factor
    pub booking_burst_threshold: i64,
    pub booking_burst_window_seconds: i64,
    /// Recorded payment failures that trigger the failure factor
    pub payment_failure_threshold: i64,

    /// Score boundaries; monotonic, checked from the top down
    pub medium_threshold: u32,
    pub high_threshold: u32,
    pub critical_threshold: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            weight_unusual_amount: 25,
            weight_unusual_time: 15,
            weight_unusual_location: 25,
            weight_multiple_bookings: 20,
            weight_unusual_device: 10,
            weight_payment_failures: 20,
            weight_known_bad_actor: 30,
            max_normal_amount: 10_000.0,
            quiet_hours: (2, 5),
            allowed_countries: Vec::new(),
            booking_burst_threshold: 3,
            booking_burst_window_seconds: 3_600,
            payment_failure_threshold: 3,
            medium_threshold: 25,
            high_threshold: 50,
            critical_threshold: 80,
        }
    }
}

/// Zero, fractional, or far outside the normal band. Amounts are minor
/// currency units, so any fractional part is already malformed input from a
/// scripted client.
fn is_unusual_amount(amount: f64, max_normal: f64) -> bool {
    amount <= 0.0 || amount.fract() != 0.0 || amount >= max_normal
}

fn is_quiet_hour(hour: u32, window: (u32, u32)) -> bool {
    let (start, end) = window;
    if start <= end {
        hour >= start && hour < end
    } else {
        // Window wraps midnight
        hour >= start || hour < end
    }
}

fn level_for(score: u32, config: &RiskConfig) -> RiskLevel {
    if score >= config.critical_threshold {
        RiskLevel::Critical
    } else if score >= config.high_threshold {
        RiskLevel::High
    } else if score >= config.medium_threshold {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

fn is_scripted_agent(user_agent: Option<&str>) -> bool {
    match user_agent {
        None => true,
        Some(ua) => {
            let ua = ua.trim();
            ua.is_empty()
                || SCRIPTED_AGENTS
                    .iter()
                    .any(|prefix| ua.to_lowercase().starts_with(prefix))
        }
    }
}

/// Weighted multi-factor scorer for checkout transactions. Each factor
/// triggers at most once per assessment; the score is the sum of triggered
/// weights and the level is a threshold function of the score, so two
/// assessments over identical inputs in the same time bucket are identical.
#[derive(Clone)]
pub struct RiskScorer {
    store: Arc<dyn Store>,
    blacklist: BlacklistStore,
    geo: GeoLookup,
    config: RiskConfig,
}

impl RiskScorer {
    pub fn new(
        store: Arc<dyn Store>,
        blacklist: BlacklistStore,
        geo: GeoLookup,
        config: RiskConfig,
    ) -> Self {
        Self { store, blacklist, geo, config }
    }

    pub fn validate(tx: &TransactionContext) -> Result<(), GateError> {
        if tx.booking_id.trim().is_empty()
            || tx.tour_id.trim().is_empty()
            || tx.email.trim().is_empty()
        {
            return Err(GateError::Validation(
                "Missing required fields: bookingId, tourId, email, or amount".to_string(),
            ));
        }
        Ok(())
    }

    /// Score one transaction. Critical scores return `RiskBlocked`; high
    /// scores are returned to the caller, which queues the transaction for
    /// review and still allows it.
    pub async fn assess(&self, tx: &TransactionContext) -> Result<RiskAssessment, GateError> {
        Self::validate(tx)?;

        let mut factors: Vec<String> = Vec::new();
        let mut score: u32 = 0;

        if is_unusual_amount(tx.amount, self.config.max_normal_amount) {
            factors.push("Unusual amount".to_string());
            score += self.config.weight_unusual_amount;
        }

        let hour = Utc
            .timestamp_opt(tx.timestamp, 0)
            .single()
            .map(|t| t.hour())
            .unwrap_or(12);
        if is_quiet_hour(hour, self.config.quiet_hours) {
            factors.push("Unusual time of day".to_string());
            score += self.config.weight_unusual_time;
        }

        if !self.config.allowed_countries.is_empty() {
            if let Some(ip) = tx.ip.as_deref() {
                // Lookup failure contributes nothing; only a resolved
                // out-of-set country is a factor
                if let Some(country) = self.geo.country(ip).await {
                    if !self.config.allowed_countries.contains(&country) {
                        factors.push("Unusual location".to_string());
                        score += self.config.weight_unusual_location;
                    }
                }
            }
        }

        let recent = self.record_and_count_booking(tx).await?;
        if recent >= self.config.booking_burst_threshold {
            factors.push("Multiple bookings".to_string());
            score += self.config.weight_multiple_bookings;
        }

        if is_scripted_agent(tx.user_agent.as_deref()) {
            factors.push("Unusual device".to_string());
            score += self.config.weight_unusual_device;
        }

        let failures = self.payment_failure_count(&tx.email).await?;
        if failures >= self.config.payment_failure_threshold {
            factors.push("Recent payment failures".to_string());
            score += self.config.weight_payment_failures;
        }

        let bad_actor = self
            .blacklist
            .is_blacklisted(&tx.email)
            .await
            .map_err(GateError::Internal)?;
        if bad_actor {
            factors.push("Known bad actor".to_string());
            score += self.config.weight_known_bad_actor;
        }

        let level = level_for(score, &self.config);
        let assessment = RiskAssessment { score, level, factors };

        if level == RiskLevel::Critical {
            metrics::counter!("gate_denials_total", 1, "cause" => "critical_risk");
            return Err(GateError::RiskBlocked(format!(
                "Critical risk: {}",
                assessment.factors.join(", ")
            )));
        }

        Ok(assessment)
    }

    /// Record this booking in the identity's time-ordered set and count the
    /// window, current booking included. Members carry a server-generated
    /// nonce: a caller replaying one correlation id must still add one set
    /// member per booking instead of overwriting the previous one.
    async fn record_and_count_booking(&self, tx: &TransactionContext) -> Result<i64, GateError> {
        let key = format!("risk:bookings:{}", identity_hash(&tx.email));
        let now = tx.timestamp as f64;
        let window_start = now - self.config.booking_burst_window_seconds as f64;
        let member = booking_member(&tx.correlation_id);

        self.store
            .zadd(&key, now, &member)
            .await
            .map_err(|e| GateError::Internal(e.context("Failed to record booking")))?;
        self.store
            .zrembyscore(&key, 0.0, window_start)
            .await
            .map_err(|e| GateError::Internal(e.context("Failed to trim booking window")))?;
        self.store
            .expire(&key, self.config.booking_burst_window_seconds + 60)
            .await
            .map_err(|e| GateError::Internal(e.context("Failed to expire booking window")))?;

        self.store
            .zcount(&key, window_start, now)
            .await
            .map_err(|e| GateError::Internal(e.context("Failed to count bookings")))
    }

    async fn payment_failure_count(&self, email: &str) -> Result<i64, GateError> {
        let key = payment_failure_key(email);
        let raw = self
            .store
            .get(&key)
            .await
            .map_err(|e| GateError::Internal(e.context("Failed to read payment failures")))?;
        Ok(raw.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    /// Called by the checkout handler when the provider declines; feeds the
    /// recent-payment-failures factor
    pub async fn record_payment_failure(&self, email: &str) -> Result<(), GateError> {
        let key = payment_failure_key(email);
        let count = self
            .store
            .incr(&key)
            .await
            .map_err(|e| GateError::Internal(e.context("Failed to count payment failure")))?;
        if count == 1 {
            self.store
                .expire(&key, 86_400)
                .await
                .map_err(|e| GateError::Internal(e.context("Failed to expire failures")))?;
        }
        Ok(())
    }
}

fn payment_failure_key(email: &str) -> String {
    format!("risk:payfail:{}", identity_hash(email))
}

/// Set member for one booking. The correlation id is kept as a prefix for
/// tracing, but uniqueness comes from the nonce so repeated client-supplied
/// ids cannot collapse the booking count.
fn booking_member(correlation_id: &str) -> String {
    format!("{}:{}", correlation_id, uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    // 2023-11-14T22:13:20Z: hour 22, outside the default quiet window
    const DAYTIME_TS: i64 = 1_700_000_000;

    fn scorer() -> RiskScorer {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        // Endpoint is never reached: allowed_countries stays empty
        let geo = GeoLookup::new("http://127.0.0.1:9/{ip}".to_string());
        RiskScorer::new(
            store.clone(),
            BlacklistStore::new(store),
            geo,
            RiskConfig::default(),
        )
    }

    fn baseline_tx() -> TransactionContext {
        TransactionContext {
            booking_id: "b1".to_string(),
            tour_id: "t1".to_string(),
            amount: 100.0,
            email: "a@b.com".to_string(),
            ip: Some("1.2.3.4".to_string()),
            user_agent: Some("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)".to_string()),
            correlation_id: "c1".to_string(),
            timestamp: DAYTIME_TS,
        }
    }

    #[test]
    fn test_unusual_amount_detection() {
        let ceiling = 10_000.0;
        assert!(is_unusual_amount(0.0, ceiling));
        assert!(is_unusual_amount(-50.0, ceiling));
        assert!(is_unusual_amount(12.5, ceiling));
        assert!(is_unusual_amount(9_007_199_254_740_991.0, ceiling));
        assert!(is_unusual_amount(10_000.0, ceiling));
        assert!(!is_unusual_amount(900.0, ceiling));
        assert!(!is_unusual_amount(1.0, ceiling));
    }

    #[test]
    fn test_quiet_hour_window() {
        assert!(is_quiet_hour(2, (2, 5)));
        assert!(is_quiet_hour(4, (2, 5)));
        assert!(!is_quiet_hour(5, (2, 5)));
        assert!(!is_quiet_hour(1, (2, 5)));
        assert!(!is_quiet_hour(14, (2, 5)));

        // Wrapping window
        assert!(is_quiet_hour(23, (22, 3)));
        assert!(is_quiet_hour(2, (22, 3)));
        assert!(!is_quiet_hour(12, (22, 3)));
    }

    #[test]
    fn test_level_thresholds_are_monotonic() {
        let config = RiskConfig::default();
        assert_eq!(level_for(0, &config), RiskLevel::Low);
        assert_eq!(level_for(24, &config), RiskLevel::Low);
        assert_eq!(level_for(25, &config), RiskLevel::Medium);
        assert_eq!(level_for(49, &config), RiskLevel::Medium);
        assert_eq!(level_for(50, &config), RiskLevel::High);
        assert_eq!(level_for(79, &config), RiskLevel::High);
        assert_eq!(level_for(80, &config), RiskLevel::Critical);
        assert_eq!(level_for(200, &config), RiskLevel::Critical);
    }

    #[test]
    fn test_all_primary_factors_reach_critical() {
        // Amount + time + location + frequency is the tested critical
        // combination from the baseline weights
        let config = RiskConfig::default();
        let combined = config.weight_unusual_amount
            + config.weight_unusual_time
            + config.weight_unusual_location
            + config.weight_multiple_bookings;
        assert!(combined >= config.critical_threshold);
    }

    #[test]
    fn test_scripted_agent_detection() {
        assert!(is_scripted_agent(None));
        assert!(is_scripted_agent(Some("")));
        assert!(is_scripted_agent(Some("curl/8.4.0")));
        assert!(is_scripted_agent(Some("python-requests/2.31")));
        assert!(!is_scripted_agent(Some(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)"
        )));
    }

    #[test]
    fn test_validation_requires_identity_fields() {
        let tx = TransactionContext {
            booking_id: String::new(),
            ..baseline_tx()
        };
        assert!(matches!(
            RiskScorer::validate(&tx),
            Err(GateError::Validation(_))
        ));
    }

    #[test]
    fn test_booking_members_are_unique_per_call() {
        assert_ne!(booking_member("c1"), booking_member("c1"));
        assert!(booking_member("c1").starts_with("c1:"));
    }

    #[tokio::test]
    async fn test_repeated_correlation_id_still_counts_each_booking() {
        let scorer = scorer();
        let tx = baseline_tx();

        // Same correlation id on every booking. The burst factor must fire
        // at the default threshold of three, so replaying an id cannot hide
        // a booking burst.
        let first = scorer.assess(&tx).await.unwrap();
        assert!(!first.factors.contains(&"Multiple bookings".to_string()));
        let second = scorer.assess(&tx).await.unwrap();
        assert!(!second.factors.contains(&"Multiple bookings".to_string()));

        let third = scorer.assess(&tx).await.unwrap();
        assert!(third.factors.contains(&"Multiple bookings".to_string()));
        assert_eq!(third.score, RiskConfig::default().weight_multiple_bookings);
        assert_eq!(third.level, RiskLevel::Low);
    }

    #[tokio::test]
    async fn test_payment_failures_feed_the_failure_factor() {
        let scorer = scorer();
        let tx = baseline_tx();

        for _ in 0..3 {
            scorer.record_payment_failure(&tx.email).await.unwrap();
        }

        let assessment = scorer.assess(&tx).await.unwrap();
        assert!(assessment
            .factors
            .contains(&"Recent payment failures".to_string()));
    }
}
