use crate::clients::{
    BookingStore, HttpNotifier, HttpPaymentGateway, Notifier, PaymentGateway,
};
use crate::geo::GeoLookup;
use crate::redis_client::RedisClient;
use crate::resilience::CircuitBreaker;
use crate::security::{
    ip_gate::IpGateConfig, rate_limiter::RateLimitConfig, risk::RiskConfig,
    velocity::VelocityConfig, BlacklistStore, IpGate, RateLimiter, ReviewQueue, RiskScorer,
    VelocityChecker,
};
use crate::store::Store;
use anyhow::Result;
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashSet;
use std::env;
use std::sync::Arc;
use std::time::Duration;

/// Environment-derived settings for the gates and collaborators. Component
/// thresholds and weights live in the per-component config structs; this
/// only carries what varies per deployment.
#[derive(Clone)]
pub struct AppConfig {
    pub redis_url: String,
    pub payment_endpoint: String,
    pub notify_endpoint: String,
    pub geo_endpoint: String,
    pub allowed_countries: Vec<String>,
    pub blacklisted_ips: HashSet<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let csv = |name: &str| -> Vec<String> {
            env::var(name)
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect()
        };

        Self {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            payment_endpoint: env::var("PAYMENT_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4100/charge".to_string()),
            notify_endpoint: env::var("NOTIFY_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4200/send".to_string()),
            geo_endpoint: env::var("GEO_ENDPOINT")
                .unwrap_or_else(|_| "https://ipapi.co/{ip}/country/".to_string()),
            allowed_countries: csv("ALLOWED_COUNTRIES"),
            blacklisted_ips: env::var("BLACKLISTED_IPS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub redis: RedisClient,
    pub rate_limiter: RateLimiter,
    pub ip_gate: IpGate,
    pub velocity: VelocityChecker,
    pub risk: RiskScorer,
    pub review_queue: ReviewQueue,
    pub blacklist: BlacklistStore,
    pub bookings: BookingStore,
    pub payment: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn Notifier>,
    /// One breaker instance guards the payment provider across all requests
    pub payment_breaker: CircuitBreaker,
    pub metrics: PrometheusHandle,
}

impl AppState {
    pub async fn new(config: &AppConfig, metrics: PrometheusHandle) -> Result<Self> {
        let redis = RedisClient::new(&config.redis_url).await?;
        let store: Arc<dyn Store> = Arc::new(redis.clone());
        let geo = GeoLookup::new(config.geo_endpoint.clone());
        let blacklist = BlacklistStore::new(store.clone());

        let rate_limiter = RateLimiter::new(store.clone(), RateLimitConfig::default());

        let ip_gate = IpGate::new(
            store.clone(),
            blacklist.clone(),
            geo.clone(),
            IpGateConfig {
                allowed_countries: config.allowed_countries.clone(),
                blacklisted_ips: config.blacklisted_ips.clone(),
                ..IpGateConfig::default()
            },
        );

        let velocity = VelocityChecker::new(store.clone(), VelocityConfig::default());

        let risk = RiskScorer::new(
            store.clone(),
            blacklist.clone(),
            geo,
            RiskConfig {
                allowed_countries: config.allowed_countries.clone(),
                ..RiskConfig::default()
            },
        );

        let review_queue = ReviewQueue::new(store.clone(), blacklist.clone());
        let bookings = BookingStore::new(redis.clone());

        let payment: Arc<dyn PaymentGateway> =
            Arc::new(HttpPaymentGateway::new(config.payment_endpoint.clone()));
        let notifier: Arc<dyn Notifier> =
            Arc::new(HttpNotifier::new(config.notify_endpoint.clone()));

        let payment_breaker = CircuitBreaker::new(5, Duration::from_secs(30));

        Ok(Self {
            redis,
            rate_limiter,
            ip_gate,
            velocity,
            risk,
            review_queue,
            blacklist,
            bookings,
            payment,
            notifier,
            payment_breaker,
            metrics,
        })
    }
}
