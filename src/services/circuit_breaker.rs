//! Circuit breaker for outbound dependencies (WhatsApp delivery).
//!
//! State is process-local; every instance trips independently.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            half_open_max_calls: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_calls: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    #[error("circuit {0} is open")]
    Open(String),
    #[error("{0}")]
    Inner(E),
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_calls: 0,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner
            .lock()
            .map(|i| i.state)
            .unwrap_or(CircuitState::Open)
    }

    /// Ask for permission to make a call. Moves `open -> half_open` once the cooldown elapsed.
    pub fn try_acquire(&self, now: Instant) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .map(|at| now.saturating_duration_since(at) >= self.config.cooldown)
                    .unwrap_or(true);
                if !cooled {
                    return false;
                }
                tracing::info!(circuit = %self.name, "circuit half-open, admitting trial call");
                inner.state = CircuitState::HalfOpen;
                inner.trial_calls = 1;
                true
            }
            CircuitState::HalfOpen => {
                if inner.trial_calls < self.config.half_open_max_calls {
                    inner.trial_calls += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn on_success(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.state != CircuitState::Closed {
            tracing::info!(circuit = %self.name, "circuit closed");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_calls = 0;
    }

    pub fn on_failure(&self, now: Instant) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        let trip = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if trip {
            tracing::warn!(
                circuit = %self.name,
                failures = inner.consecutive_failures,
                "circuit opened"
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            inner.trial_calls = 0;
        }
    }

    /// Run `f` under the breaker. While open, `f` is not called at all.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_acquire(Instant::now()) {
            return Err(BreakerError::Open(self.name.clone()));
        }
        match f().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure(Instant::now());
                Err(BreakerError::Inner(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, half_open: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                cooldown: Duration::from_secs(10),
                half_open_max_calls: half_open,
            },
        )
    }

    #[test]
    fn test_opens_after_threshold() {
        let b = breaker(3, 1);
        let t0 = Instant::now();
        for _ in 0..2 {
            assert!(b.try_acquire(t0));
            b.on_failure(t0);
        }
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.try_acquire(t0));
        b.on_failure(t0);
        assert_eq!(b.state(), CircuitState::Open);
        assert!(!b.try_acquire(t0 + Duration::from_secs(1)));
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let b = breaker(2, 1);
        let t0 = Instant::now();
        b.on_failure(t0);
        b.on_success();
        b.on_failure(t0);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_success_closes() {
        let b = breaker(1, 1);
        let t0 = Instant::now();
        b.on_failure(t0);
        assert_eq!(b.state(), CircuitState::Open);

        let later = t0 + Duration::from_secs(11);
        assert!(b.try_acquire(later));
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert!(!b.try_acquire(later), "only one trial call admitted");

        b.on_success();
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.try_acquire(later));
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let b = breaker(1, 2);
        let t0 = Instant::now();
        b.on_failure(t0);

        let later = t0 + Duration::from_secs(11);
        assert!(b.try_acquire(later));
        assert!(b.try_acquire(later));
        b.on_failure(later);
        assert_eq!(b.state(), CircuitState::Open);
        assert!(!b.try_acquire(later + Duration::from_secs(5)));
        assert!(b.try_acquire(later + Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn test_call_short_circuits_when_open() {
        let b = breaker(1, 1);
        let first: Result<(), BreakerError<anyhow::Error>> =
            b.call(|| async { Err(anyhow::anyhow!("down")) }).await;
        assert!(matches!(first, Err(BreakerError::Inner(_))));

        let mut invoked = false;
        let second: Result<(), BreakerError<anyhow::Error>> = b
            .call(|| {
                invoked = true;
                async { Ok(()) }
            })
            .await;
        assert!(matches!(second, Err(BreakerError::Open(_))));
        assert!(!invoked);
    }
}
