pub mod audit;
pub mod bookings;
pub mod businesses;
pub mod calendar;
pub mod circuit_breaker;
pub mod cron;
pub mod idempotency;
pub mod intervals;
pub mod messaging;
pub mod notifications;
pub mod payments;
pub mod rate_limit;
pub mod slots;
