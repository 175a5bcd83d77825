pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitError, CircuitState};
pub use retry::{execute_with_retry, RetryConfig, RetryResult, TransientError};
