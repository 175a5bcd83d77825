pub mod blacklist;
pub mod ip_gate;
pub mod middleware;
pub mod rate_limiter;
pub mod review_queue;
pub mod risk;
pub mod velocity;

pub use blacklist::BlacklistStore;
pub use ip_gate::IpGate;
pub use rate_limiter::RateLimiter;
pub use review_queue::ReviewQueue;
pub use risk::RiskScorer;
pub use velocity::VelocityChecker;

use sha2::{Digest, Sha256};

/// Hash an identity (typically an email address) into a fixed-width hex key
/// so raw addresses never appear in counter key space. Blacklist entries,
/// which operators read back, keep plain identifiers.
pub fn identity_hash(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.trim().to_lowercase().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_hash_is_stable_and_case_insensitive() {
        let a = identity_hash("Guest@Example.com");
        let b = identity_hash("guest@example.com ");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_identity_hash_distinguishes_inputs() {
        assert_ne!(identity_hash("a@example.com"), identity_hash("b@example.com"));
    }
}
