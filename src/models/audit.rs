use chrono::NaiveDateTime;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub actor: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub old_data: Option<serde_json::Value>,
    pub new_data: Option<serde_json::Value>,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    BookingCreated,
    BookingConfirmed,
    BookingRejected,
    BookingCancelled,
    BookingNoShow,
    BookingExpired,
    SlotReserved,
    SlotReleased,
    SlotReservationExpired,
    PaymentCreated,
    PaymentStatusChanged,
    AuthDenied,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::BookingCreated => "booking.created",
            AuditAction::BookingConfirmed => "booking.confirmed",
            AuditAction::BookingRejected => "booking.rejected",
            AuditAction::BookingCancelled => "booking.cancelled",
            AuditAction::BookingNoShow => "booking.no_show",
            AuditAction::BookingExpired => "booking.expired",
            AuditAction::SlotReserved => "slot.reserved",
            AuditAction::SlotReleased => "slot.released",
            AuditAction::SlotReservationExpired => "slot.reservation_expired",
            AuditAction::PaymentCreated => "payment.created",
            AuditAction::PaymentStatusChanged => "payment.status_changed",
            AuditAction::AuthDenied => "auth.denied",
        }
    }
}
