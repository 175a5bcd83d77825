use crate::geo::GeoLookup;
use crate::models::GateError;
use crate::security::BlacklistStore;
use crate::store::Store;
use std::collections::HashSet;
use std::sync::Arc;

/// Static configuration for the IP gate. Dynamic blacklisting goes through
/// the shared [`BlacklistStore`] so every instance sees the same denials.
#[derive(Debug, Clone)]
pub struct IpGateConfig {
    /// Uppercase ISO country codes; empty means geography is not enforced
    pub allowed_countries: Vec<String>,
    /// Operator-pinned blocks, checked before the store
    pub blacklisted_ips: HashSet<String>,
    /// Rolling request ceiling per IP within the tracking window
    pub max_requests_per_ip: i64,
    pub tracking_window_minutes: i64,
    /// How long an auto-blacklisted IP stays blocked; None is permanent
    pub auto_blacklist_days: Option<i64>,
}

impl Default for IpGateConfig {
    fn default() -> Self {
        Self {
            allowed_countries: Vec::new(),
            blacklisted_ips: HashSet::new(),
            max_requests_per_ip: 100,
            tracking_window_minutes: 15,
            auto_blacklist_days: Some(1),
        }
    }
}

/// Outcome attached to allowed requests so the middleware can report the
/// remaining per-IP quota in a response header
#[derive(Debug, Clone, Copy)]
pub struct IpGateOutcome {
    pub remaining_quota: i64,
}

/// Combines static and dynamic IP blacklist checks, optional geography
/// allow-listing, and a rolling per-IP quota that self-reinforces: a quota
/// breach writes a dynamic blacklist entry, so subsequent requests from that
/// IP are denied by the blacklist read without re-running the quota logic.
#[derive(Clone)]
pub struct IpGate {
    store: Arc<dyn Store>,
    blacklist: BlacklistStore,
    geo: GeoLookup,
    config: IpGateConfig,
}

impl IpGate {
    pub fn new(
        store: Arc<dyn Store>,
        blacklist: BlacklistStore,
        geo: GeoLookup,
        config: IpGateConfig,
    ) -> Self {
        Self { store, blacklist, geo, config }
    }

    pub async fn check(&self, ip: Option<&str>) -> Result<IpGateOutcome, GateError> {
        let ip = match ip {
            Some(ip) if !ip.trim().is_empty() => ip.trim(),
            _ => {
                return Err(GateError::Validation("Invalid IP address".to_string()));
            }
        };

        // Static blacklist wins over everything, including geography state
        if self.config.blacklisted_ips.contains(ip) {
            metrics::counter!("gate_denials_total", 1, "cause" => "ip_blacklist");
            return Err(GateError::AccessDenied(
                "Access denied: IP is blacklisted".to_string(),
            ));
        }

        // Dynamic blacklist, shared across instances
        let dynamically_blocked = self
            .blacklist
            .is_blacklisted(ip)
            .await
            .map_err(GateError::Internal)?;
        if dynamically_blocked {
            metrics::counter!("gate_denials_total", 1, "cause" => "ip_blacklist");
            return Err(GateError::AccessDenied(
                "Access denied: IP is blacklisted".to_string(),
            ));
        }

        // Geography: the lookup is best-effort and fails open; a resolved
        // country outside the allow-set is a hard denial
        if !self.config.allowed_countries.is_empty() {
            match self.geo.country(ip).await {
                Some(country) => {
                    if !self.config.allowed_countries.contains(&country) {
                        metrics::counter!("gate_denials_total", 1, "cause" => "geography");
                        return Err(GateError::AccessDenied(
                            "Access denied: Country not allowed".to_string(),
                        ));
                    }
                }
                None => {
                    eprintln!("Geo lookup unavailable for {}, allowing request", ip);
                }
            }
        }

        // Rolling request quota for this IP
        let window_seconds = self.config.tracking_window_minutes * 60;
        let counter_key = format!("ipgate:requests:{}", ip);
        let count = self
            .store
            .incr(&counter_key)
            .await
            .map_err(|e| GateError::Internal(e.context("Failed to count IP requests")))?;
        if count == 1 {
            self.store
                .expire(&counter_key, window_seconds)
                .await
                .map_err(|e| GateError::Internal(e.context("Failed to arm IP counter TTL")))?;
        }

        if count > self.config.max_requests_per_ip {
            // Self-reinforcing block: the next request from this IP is
            // denied by the dynamic blacklist read above
            self.blacklist
                .add(
                    ip,
                    "Exceeded request limit",
                    "ip-gate",
                    self.config.auto_blacklist_days,
                )
                .await
                .map_err(GateError::Internal)?;

            metrics::counter!("gate_denials_total", 1, "cause" => "ip_quota");
            eprintln!(
                "IP {} exceeded request limit ({} in {}m), auto-blacklisted",
                ip, count, self.config.tracking_window_minutes
            );
            return Err(GateError::RateExceeded(
                "Too many requests from this IP".to_string(),
            ));
        }

        Ok(IpGateOutcome {
            remaining_quota: (self.config.max_requests_per_ip - count).max(0),
        })
    }
}
