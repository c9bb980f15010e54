use std::time::Duration;

use crate::models::{AuditAction, Booking};
use crate::observability::NOTIFICATIONS_TOTAL;
use crate::services::circuit_breaker::{BreakerError, CircuitBreaker, CircuitBreakerConfig};
use crate::services::messaging::MessagingProvider;

/// Best-effort WhatsApp delivery. Failures are counted and logged, never returned: a booking
/// transition that already committed does not depend on the message going out.
pub struct Notifier {
    provider: Box<dyn MessagingProvider>,
    breaker: CircuitBreaker,
    timeout: Duration,
}

impl Notifier {
    pub fn new(
        provider: Box<dyn MessagingProvider>,
        config: CircuitBreakerConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            breaker: CircuitBreaker::new("whatsapp", config),
            timeout,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Returns whether the message was handed to the provider.
    pub async fn send(&self, to: &str, body: &str) -> bool {
        let result = self
            .breaker
            .call(|| async {
                // A provider that never answers counts as a failure.
                tokio::time::timeout(self.timeout, self.provider.send_message(to, body))
                    .await
                    .map_err(|_| anyhow::anyhow!("provider did not answer within {:?}", self.timeout))?
            })
            .await;

        let outcome = match &result {
            Ok(()) => "sent",
            Err(BreakerError::Open(_)) => "short_circuited",
            Err(BreakerError::Inner(_)) => "failed",
        };
        metrics::counter!(NOTIFICATIONS_TOTAL, "outcome" => outcome).increment(1);

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, outcome, "notification not delivered");
                false
            }
        }
    }

    /// Tell the customer what happened to their booking.
    pub async fn booking_event(&self, booking: &Booking, action: AuditAction, business_name: &str) {
        if let Some(body) = customer_message(booking, action, business_name) {
            self.send(&booking.customer_phone, &body).await;
        }
    }

    pub async fn owner_new_booking(&self, owner_phone: &str, booking: &Booking) {
        let body = format!(
            "New booking request {} for {} at {}. Reply in the dashboard to confirm or reject.",
            booking.reference,
            booking.date,
            short_time(&booking.start_time),
        );
        self.send(owner_phone, &body).await;
    }
}

fn short_time(t: &str) -> &str {
    t.get(..5).unwrap_or(t)
}

pub fn customer_message(booking: &Booking, action: AuditAction, business_name: &str) -> Option<String> {
    let when = format!("{} at {}", booking.date, short_time(&booking.start_time));
    let reference = &booking.reference;
    let body = match action {
        AuditAction::BookingCreated => {
            format!("{business_name} received your request {reference} for {when}. We'll confirm shortly.")
        }
        AuditAction::BookingConfirmed => {
            format!("Your booking {reference} at {business_name} on {when} is confirmed.")
        }
        AuditAction::BookingRejected => {
            format!("Sorry, {business_name} could not accept booking {reference} for {when}.")
        }
        AuditAction::BookingCancelled => {
            format!("Your booking {reference} at {business_name} on {when} has been cancelled.")
        }
        AuditAction::BookingExpired => {
            format!("Your request {reference} for {when} expired before {business_name} confirmed it.")
        }
        _ => return None,
    };
    Some(body)
}
