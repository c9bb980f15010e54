use std::env;
use std::str::FromStr;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub app_env: String,
    pub admin_token: String,
    pub cron_secret: Option<String>,
    pub reservation_ttl_minutes: i64,
    pub pending_booking_max_age_hours: i64,
    pub idempotency_ttl_hours: i64,
    pub booking_retention_days: i64,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window_secs: u64,
    pub rate_limit_max_keys: usize,
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown_secs: u64,
    pub breaker_half_open_calls: u32,
    pub notification_timeout_secs: u64,
    pub pagination_max_limit: i64,
    pub cron_interval_secs: Option<u64>,
    pub metrics_port: Option<u16>,
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_whatsapp_number: String,
}

fn parsed<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn optional<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: parsed("PORT", 3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "salonbook.db".to_string()),
            app_env: env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            cron_secret: env::var("CRON_SECRET").ok().filter(|s| !s.is_empty()),
            reservation_ttl_minutes: parsed("RESERVATION_TTL_MINUTES", 10),
            pending_booking_max_age_hours: parsed("PENDING_BOOKING_MAX_AGE_HOURS", 24),
            idempotency_ttl_hours: parsed("IDEMPOTENCY_TTL_HOURS", 24),
            booking_retention_days: parsed("BOOKING_RETENTION_DAYS", 365),
            rate_limit_max_requests: parsed("RATE_LIMIT_MAX_REQUESTS", 30),
            rate_limit_window_secs: parsed("RATE_LIMIT_WINDOW_SECS", 60),
            rate_limit_max_keys: parsed("RATE_LIMIT_MAX_KEYS", 10_000),
            breaker_failure_threshold: parsed("BREAKER_FAILURE_THRESHOLD", 5),
            breaker_cooldown_secs: parsed("BREAKER_COOLDOWN_SECS", 30),
            breaker_half_open_calls: parsed("BREAKER_HALF_OPEN_CALLS", 1),
            notification_timeout_secs: parsed("NOTIFICATION_TIMEOUT_SECS", 5),
            pagination_max_limit: parsed("PAGINATION_MAX_LIMIT", 100),
            cron_interval_secs: optional("CRON_INTERVAL_SECS"),
            metrics_port: optional("METRICS_PORT"),
            twilio_account_sid: env::var("TWILIO_ACCOUNT_SID").unwrap_or_default(),
            twilio_auth_token: env::var("TWILIO_AUTH_TOKEN").unwrap_or_default(),
            twilio_whatsapp_number: env::var("TWILIO_WHATSAPP_NUMBER").unwrap_or_default(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    /// Clamp a client-supplied page size to `[1, pagination_max_limit]`, defaulting to 50.
    pub fn clamp_limit(&self, limit: Option<i64>) -> i64 {
        limit
            .unwrap_or(50)
            .clamp(1, self.pagination_max_limit.max(1))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            database_url: ":memory:".to_string(),
            app_env: "development".to_string(),
            admin_token: "changeme".to_string(),
            cron_secret: None,
            reservation_ttl_minutes: 10,
            pending_booking_max_age_hours: 24,
            idempotency_ttl_hours: 24,
            booking_retention_days: 365,
            rate_limit_max_requests: 30,
            rate_limit_window_secs: 60,
            rate_limit_max_keys: 10_000,
            breaker_failure_threshold: 5,
            breaker_cooldown_secs: 30,
            breaker_half_open_calls: 1,
            notification_timeout_secs: 5,
            pagination_max_limit: 100,
            cron_interval_secs: None,
            metrics_port: None,
            twilio_account_sid: String::new(),
            twilio_auth_token: String::new(),
            twilio_whatsapp_number: String::new(),
        }
    }
}
