use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;

use crate::config::AppConfig;
use crate::errors::AppError;
use crate::services::circuit_breaker::CircuitBreakerConfig;
use crate::services::idempotency::{InFlight, StoredResponse};
use crate::services::messaging::MessagingProvider;
use crate::services::notifications::Notifier;
use crate::services::rate_limit::RateLimiter;

pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    pub rate_limiter: RateLimiter,
    pub in_flight: InFlight<StoredResponse>,
    pub notifier: Notifier,
}

impl AppState {
    pub fn new(conn: Connection, config: AppConfig, messaging: Box<dyn MessagingProvider>) -> Self {
        let rate_limiter = RateLimiter::in_memory(
            config.rate_limit_max_requests,
            config.rate_limit_window_secs,
            config.rate_limit_max_keys,
        );
        let notifier = Notifier::new(
            messaging,
            CircuitBreakerConfig {
                failure_threshold: config.breaker_failure_threshold,
                cooldown: Duration::from_secs(config.breaker_cooldown_secs),
                half_open_max_calls: config.breaker_half_open_calls,
            },
            Duration::from_secs(config.notification_timeout_secs),
        );

        Self {
            db: Arc::new(Mutex::new(conn)),
            config,
            rate_limiter,
            in_flight: InFlight::new(),
            notifier,
        }
    }

    /// Lock the shared connection. Never hold the guard across an `.await`.
    pub fn db(&self) -> Result<MutexGuard<'_, Connection>, AppError> {
        self.db
            .lock()
            .map_err(|_| AppError::Internal(anyhow::anyhow!("database mutex poisoned")))
    }
}
