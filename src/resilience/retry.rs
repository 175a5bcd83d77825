use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

/// Classification hook for the retry executor. Each external-call boundary
/// (payment, notification, persistence) maps its failures onto a typed error
/// and decides retryability from the variant, never from message text.
pub trait TransientError {
    fn is_transient(&self) -> bool;
}

/// Bounded-retry-with-backoff parameters
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts = max_retries + 1
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Payment calls: fewer, slower retries; definitive declines never retry
    pub fn payment() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(2_000),
            ..Self::default()
        }
    }

    /// Notification delivery is less urgent and more retry-tolerant
    pub fn notification() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1_000),
            ..Self::default()
        }
    }

    /// Persistence retries fast; contention clears quickly or not at all
    pub fn persistence() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            ..Self::default()
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled =
            self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32 - 1);
        Duration::from_millis((scaled as u64).min(self.max_delay.as_millis() as u64))
    }
}

/// Outcome of a retried operation, with how hard we had to try
#[derive(Debug)]
pub struct RetryResult<T, E> {
    pub outcome: Result<T, E>,
    pub attempts: u32,
    pub total_duration: Duration,
}

impl<T, E> RetryResult<T, E> {
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Run `operation` up to `config.max_retries + 1` times, sleeping with
/// exponential backoff between transient failures. A non-transient error
/// aborts immediately. The sleep suspends only the calling task.
pub async fn execute_with_retry<T, E, F, Fut>(
    mut operation: F,
    config: &RetryConfig,
    name: &str,
) -> RetryResult<T, E>
where
    E: TransientError + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    let max_attempts = config.max_retries + 1;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                return RetryResult {
                    outcome: Ok(value),
                    attempts: attempt,
                    total_duration: started.elapsed(),
                };
            }
            Err(e) => {
                metrics::counter!("retry_attempts_total", 1, "operation" => name.to_string());

                if !e.is_transient() || attempt >= max_attempts {
                    if e.is_transient() {
                        eprintln!("{} failed after {} attempts: {}", name, attempt, e);
                    } else {
                        eprintln!("{} failed terminally on attempt {}: {}", name, attempt, e);
                    }
                    return RetryResult {
                        outcome: Err(e),
                        attempts: attempt,
                        total_duration: started.elapsed(),
                    };
                }

                let delay = config.delay_for_attempt(attempt);
                eprintln!(
                    "{} attempt {} failed ({}), retrying in {}ms",
                    name,
                    attempt,
                    e,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
