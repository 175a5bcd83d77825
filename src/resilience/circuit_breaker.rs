use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

use super::retry::TransientError;

/// Circuit breaker state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through; consecutive failures are counted
    Closed,
    /// Calls fail immediately without invoking the operation
    Open,
    /// One trial call decides whether to close or re-open
    HalfOpen,
}

#[derive(Debug, Error)]
pub enum CircuitError<E: std::fmt::Debug + std::fmt::Display> {
    #[error("Circuit breaker is OPEN")]
    Open,
    #[error("{0}")]
    Inner(E),
}

impl<E> TransientError for CircuitError<E>
where
    E: TransientError + std::fmt::Debug + std::fmt::Display,
{
    fn is_transient(&self) -> bool {
        match self {
            // Retrying against an open circuit would just spin; let the
            // reset timeout do its job instead
            CircuitError::Open => false,
            CircuitError::Inner(e) => e.is_transient(),
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    /// Set while the single HALF_OPEN trial call is running
    trial_in_flight: bool,
}

/// Wraps calls to one downstream dependency in a three-state breaker.
///
/// CLOSED counts consecutive failures and trips at the threshold. OPEN
/// rejects until `reset_timeout` has elapsed since the last failure, then
/// admits a single HALF_OPEN trial: success closes the circuit and clears
/// the counter, failure re-opens it and restarts the clock.
#[derive(Clone)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Arc<Mutex<BreakerInner>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            inner: Arc::new(Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                trial_in_flight: false,
            })),
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Run one call through the breaker
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        E: std::fmt::Debug + std::fmt::Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        {
            let mut inner = self.inner.lock().await;
            match inner.state {
                CircuitState::Open => {
                    let cooled_down = inner
                        .last_failure
                        .map_or(true, |at| at.elapsed() >= self.reset_timeout);
                    if cooled_down {
                        inner.state = CircuitState::HalfOpen;
                        inner.trial_in_flight = true;
                    } else {
                        return Err(CircuitError::Open);
                    }
                }
                // Exactly one trial call is admitted; concurrent callers
                // arriving while it runs are rejected, not passed through
                CircuitState::HalfOpen => {
                    if inner.trial_in_flight {
                        return Err(CircuitError::Open);
                    }
                    inner.trial_in_flight = true;
                }
                CircuitState::Closed => {}
            }
        }

        let result = operation().await;

        let mut inner = self.inner.lock().await;
        match result {
            Ok(value) => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.last_failure = None;
                inner.trial_in_flight = false;
                Ok(value)
            }
            Err(e) => {
                inner.last_failure = Some(Instant::now());
                inner.trial_in_flight = false;
                match inner.state {
                    CircuitState::HalfOpen => {
                        // Trial failed; back to OPEN with a fresh clock
                        inner.state = CircuitState::Open;
                    }
                    CircuitState::Closed => {
                        inner.consecutive_failures += 1;
                        if inner.consecutive_failures >= self.failure_threshold {
                            eprintln!(
                                "Circuit opened after {} consecutive failures",
                                inner.consecutive_failures
                            );
                            inner.state = CircuitState::Open;
                        }
                    }
                    CircuitState::Open => {}
                }
                Err(CircuitError::Inner(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("downstream failed")]
    struct DownstreamError;

    #[tokio::test]
    async fn test_opens_after_threshold_and_rejects_without_invoking() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let result = breaker
                .call(|| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(DownstreamError) }
                })
                .await;
            assert!(matches!(result, Err(CircuitError::Inner(_))));
        }
        assert_eq!(breaker.state().await, CircuitState::Open);

        // Third call must fail fast with the OPEN message and must not
        // invoke the wrapped operation
        let result = breaker
            .call(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<(), DownstreamError>(()) }
            })
            .await;
        match result {
            Err(e @ CircuitError::Open) => {
                assert_eq!(e.to_string(), "Circuit breaker is OPEN");
            }
            other => panic!("expected open circuit, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_half_open_trial_success_closes() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));

        let _ = breaker
            .call(|| async { Err::<(), _>(DownstreamError) })
            .await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = breaker.call(|| async { Ok::<_, DownstreamError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_trial_failure_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));

        let _ = breaker
            .call(|| async { Err::<(), _>(DownstreamError) })
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Trial fails: straight back to OPEN, clock restarted
        let result = breaker
            .call(|| async { Err::<(), _>(DownstreamError) })
            .await;
        assert!(matches!(result, Err(CircuitError::Inner(_))));
        assert_eq!(breaker.state().await, CircuitState::Open);

        // Still within the fresh cooldown
        let result = breaker.call(|| async { Ok::<(), DownstreamError>(()) }).await;
        assert!(matches!(result, Err(CircuitError::Open)));
    }

    #[tokio::test]
    async fn test_half_open_admits_exactly_one_trial() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));

        let _ = breaker
            .call(|| async { Err::<(), _>(DownstreamError) })
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // First caller claims the trial slot and blocks on the downstream
        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        let trial_breaker = breaker.clone();
        let trial = tokio::spawn(async move {
            trial_breaker
                .call(|| async move {
                    gate.await.ok();
                    Ok::<(), DownstreamError>(())
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);

        // A second caller during the trial is rejected without running
        let calls = AtomicU32::new(0);
        let result = breaker
            .call(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<(), DownstreamError>(()) }
            })
            .await;
        assert!(matches!(result, Err(CircuitError::Open)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // The trial's outcome alone decides the next state
        release.send(()).unwrap();
        assert!(trial.await.unwrap().is_ok());
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));

        let _ = breaker
            .call(|| async { Err::<(), _>(DownstreamError) })
            .await;
        let _ = breaker.call(|| async { Ok::<(), DownstreamError>(()) }).await;
        // Counter cleared; one more failure must not trip the breaker
        let _ = breaker
            .call(|| async { Err::<(), _>(DownstreamError) })
            .await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }
}
