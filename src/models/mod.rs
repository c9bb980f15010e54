pub mod audit;
pub mod availability;
pub mod booking;
pub mod business;
pub mod cron_run;
pub mod idempotency;
pub mod payment;
pub mod slot;

pub use audit::{AuditAction, AuditEntry};
pub use availability::TimeRange;
pub use booking::{Actor, Booking, BookingResponse, BookingStatus, NewBooking};
pub use business::{Business, Closure, NewBusiness, NewClosure};
pub use cron_run::{CronRun, CronStatus};
pub use idempotency::IdempotencyRecord;
pub use payment::{NewPayment, Payment, PaymentStatus, PaymentStatusUpdate};
pub use slot::{Reservation, Slot, SlotResponse, SlotStatus};
