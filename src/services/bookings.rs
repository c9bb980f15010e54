//! Booking lifecycle.
//!
//! ```text
//! pending ──confirm──> confirmed ──cancel / no-show──> cancelled
//!    │
//!    ├──reject──> rejected
//!    ├──cancel──> cancelled
//!    └──expire──> expired
//! ```
//!
//! Every transition is a single transaction: the conditional booking update, the slot update and
//! the audit entry commit together or not at all. Repeating a transition that already happened
//! succeeds without touching anything.

use chrono::{Duration, NaiveDateTime};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::booking::NO_SHOW_REASON;
use crate::models::{Actor, AuditAction, Booking, BookingStatus, NewBooking, SlotStatus};
use crate::observability::BOOKING_TRANSITIONS_TOTAL;
use crate::services::audit::{self, AuditRecord};

/// Outcome of a transition request. `changed` is false when the booking was already there.
#[derive(Debug, Clone)]
pub struct Transition {
    pub booking: Booking,
    pub changed: bool,
}

fn lifecycle_event(booking_id: &str, slot_id: &str, action: AuditAction, actor: &str, source: &str) {
    tracing::info!(
        booking_id = %booking_id,
        slot_id = %slot_id,
        action = action.as_str(),
        actor = %actor,
        source = %source,
        "booking lifecycle"
    );
    metrics::counter!(BOOKING_TRANSITIONS_TOTAL, "action" => action.as_str()).increment(1);
}

fn new_reference() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("BK-{}", hex[..8].to_ascii_uppercase())
}

pub fn create(
    conn: &mut Connection,
    input: &NewBooking,
    source: &str,
    now: &NaiveDateTime,
) -> Result<Booking, AppError> {
    let customer_name = input.customer_name.trim();
    let customer_phone = input.customer_phone.trim();
    if customer_name.is_empty() || customer_phone.is_empty() {
        return Err(AppError::Validation(
            "customer_name and customer_phone are required".to_string(),
        ));
    }

    let tx = conn.savepoint()?;
    let slot = queries::get_slot(&tx, &input.slot_id)?
        .ok_or_else(|| AppError::NotFound("slot".to_string()))?;
    if slot.has_started(now) {
        return Err(AppError::Validation("slot has already started".to_string()));
    }

    let token = input.reservation_token.as_deref().filter(|t| !t.is_empty());
    if queries::claim_slot_for_booking(&tx, &slot.id, token, now)? == 0 {
        return Err(AppError::SlotNotAvailable);
    }

    let booking = Booking {
        id: Uuid::new_v4().to_string(),
        reference: new_reference(),
        slot_id: slot.id.clone(),
        business_id: slot.business_id.clone(),
        customer_name: customer_name.to_string(),
        customer_phone: customer_phone.to_string(),
        customer_user_id: input.customer_user_id.clone(),
        notes: input.notes.clone(),
        status: BookingStatus::Pending,
        date: slot.date,
        start_time: slot.start_time.clone(),
        end_time: slot.end_time.clone(),
        created_at: *now,
        updated_at: *now,
        confirmed_at: None,
        cancelled_at: None,
        cancellation_reason: None,
    };
    queries::insert_booking(&tx, &booking)?;

    audit::record(
        &tx,
        AuditRecord {
            actor: "customer",
            action: AuditAction::BookingCreated,
            entity_type: "booking",
            entity_id: &booking.id,
            old_data: None,
            new_data: Some(json!({
                "status": booking.status.as_str(),
                "reference": booking.reference,
                "slot_id": booking.slot_id,
                "customer_phone": booking.customer_phone,
            })),
            description: None,
        },
        now,
    )?;
    tx.commit()?;

    lifecycle_event(&booking.id, &booking.slot_id, AuditAction::BookingCreated, "customer", source);
    Ok(booking)
}

enum SlotEffect {
    Book,
    Release,
}

/// One edge of the state machine.
struct Rule {
    verb: &'static str,
    action: AuditAction,
    from: &'static [BookingStatus],
    to: BookingStatus,
    reason: Option<String>,
    slot: SlotEffect,
    customer_may_act: bool,
    already_done: fn(&Booking) -> bool,
}

fn may_act(actor: &Actor, booking: &Booking, customer_may_act: bool) -> bool {
    match actor {
        Actor::System { .. } => true,
        Actor::Customer { phone } => customer_may_act && phone.trim() == booking.customer_phone,
        _ => actor.manages(&booking.business_id),
    }
}

fn apply(
    conn: &mut Connection,
    id: &str,
    actor: &Actor,
    source: &str,
    rule: Rule,
    now: &NaiveDateTime,
) -> Result<Transition, AppError> {
    let tx = conn.savepoint()?;
    let booking = queries::get_booking(&tx, id)?
        .ok_or_else(|| AppError::NotFound("booking".to_string()))?;

    if !may_act(actor, &booking, rule.customer_may_act) {
        return Err(AppError::Forbidden);
    }
    if (rule.already_done)(&booking) {
        return Ok(Transition {
            booking,
            changed: false,
        });
    }
    if !rule.from.contains(&booking.status) {
        return Err(AppError::InvalidState {
            action: rule.verb,
            status: booking.status.as_str().to_string(),
        });
    }

    let updated = queries::transition_booking(
        &tx,
        &booking.id,
        booking.status,
        rule.to,
        rule.reason.as_deref(),
        now,
    )?;
    if updated == 0 {
        return Err(AppError::InvalidState {
            action: rule.verb,
            status: booking.status.as_str().to_string(),
        });
    }

    let (old_slot, new_slot) = match rule.slot {
        SlotEffect::Book => {
            if queries::book_slot(&tx, &booking.slot_id, now)? == 0 {
                return Err(AppError::SlotNotAvailable);
            }
            (SlotStatus::Reserved, SlotStatus::Booked)
        }
        SlotEffect::Release => {
            queries::release_slot(&tx, &booking.slot_id, now)?;
            (
                if booking.status == BookingStatus::Confirmed {
                    SlotStatus::Booked
                } else {
                    SlotStatus::Reserved
                },
                SlotStatus::Available,
            )
        }
    };

    let actor_label = actor.label();
    audit::record(
        &tx,
        AuditRecord {
            actor: &actor_label,
            action: rule.action,
            entity_type: "booking",
            entity_id: &booking.id,
            old_data: Some(json!({
                "status": booking.status.as_str(),
                "slot_status": old_slot.as_str(),
            })),
            new_data: Some(json!({
                "status": rule.to.as_str(),
                "slot_status": new_slot.as_str(),
                "reason": rule.reason,
            })),
            description: None,
        },
        now,
    )?;

    let booking = queries::get_booking(&tx, &booking.id)?
        .ok_or_else(|| AppError::NotFound("booking".to_string()))?;
    tx.commit()?;

    lifecycle_event(&booking.id, &booking.slot_id, rule.action, &actor_label, source);
    Ok(Transition {
        booking,
        changed: true,
    })
}

/// Owner or admin accepts a pending booking; the slot becomes `booked`.
pub fn confirm(
    conn: &mut Connection,
    id: &str,
    actor: &Actor,
    source: &str,
    now: &NaiveDateTime,
) -> Result<Transition, AppError> {
    let rule = Rule {
        verb: "confirm",
        action: AuditAction::BookingConfirmed,
        from: &[BookingStatus::Pending],
        to: BookingStatus::Confirmed,
        reason: None,
        slot: SlotEffect::Book,
        customer_may_act: false,
        already_done: |b| b.status == BookingStatus::Confirmed,
    };
    apply(conn, id, actor, source, rule, now)
}

pub fn reject(
    conn: &mut Connection,
    id: &str,
    actor: &Actor,
    reason: Option<&str>,
    source: &str,
    now: &NaiveDateTime,
) -> Result<Transition, AppError> {
    let rule = Rule {
        verb: "reject",
        action: AuditAction::BookingRejected,
        from: &[BookingStatus::Pending],
        to: BookingStatus::Rejected,
        reason: reason.map(str::to_string),
        slot: SlotEffect::Release,
        customer_may_act: false,
        already_done: |b| b.status == BookingStatus::Rejected,
    };
    apply(conn, id, actor, source, rule, now)
}

/// Customer (by phone), owner or admin withdraws a pending or confirmed booking.
pub fn cancel(
    conn: &mut Connection,
    id: &str,
    actor: &Actor,
    reason: Option<&str>,
    source: &str,
    now: &NaiveDateTime,
) -> Result<Transition, AppError> {
    let rule = Rule {
        verb: "cancel",
        action: AuditAction::BookingCancelled,
        from: &[BookingStatus::Pending, BookingStatus::Confirmed],
        to: BookingStatus::Cancelled,
        reason: reason.map(str::to_string),
        slot: SlotEffect::Release,
        customer_may_act: true,
        already_done: |b| b.status == BookingStatus::Cancelled,
    };
    apply(conn, id, actor, source, rule, now)
}

/// Confirmed booking where the customer never showed up. Stored as `cancelled` with reason
/// `no_show`.
pub fn mark_no_show(
    conn: &mut Connection,
    id: &str,
    actor: &Actor,
    source: &str,
    now: &NaiveDateTime,
) -> Result<Transition, AppError> {
    let rule = Rule {
        verb: "mark no-show",
        action: AuditAction::BookingNoShow,
        from: &[BookingStatus::Confirmed],
        to: BookingStatus::Cancelled,
        reason: Some(NO_SHOW_REASON.to_string()),
        slot: SlotEffect::Release,
        customer_may_act: false,
        already_done: |b| {
            b.status == BookingStatus::Cancelled
                && b.cancellation_reason.as_deref() == Some(NO_SHOW_REASON)
        },
    };
    apply(conn, id, actor, source, rule, now)
}

/// Expire pending bookings older than `max_age` and free their slots, all in one transaction.
/// Confirmed and terminal bookings are never matched.
pub fn expire_old_bookings(
    conn: &mut Connection,
    max_age: Duration,
    source: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<Vec<String>> {
    let cutoff = *now - max_age;
    let actor = format!("system:{source}");

    let tx = conn.transaction()?;
    queries::release_slots_of_stale_pending(&tx, &cutoff, now)?;
    let expired = queries::expire_stale_pending(&tx, &cutoff, now)?;
    for (booking_id, slot_id) in &expired {
        audit::record(
            &tx,
            AuditRecord {
                actor: &actor,
                action: AuditAction::BookingExpired,
                entity_type: "booking",
                entity_id: booking_id,
                old_data: Some(json!({ "status": BookingStatus::Pending.as_str() })),
                new_data: Some(json!({
                    "status": BookingStatus::Expired.as_str(),
                    "slot_id": slot_id,
                })),
                description: None,
            },
            now,
        )?;
    }
    tx.commit()?;

    for (booking_id, slot_id) in &expired {
        lifecycle_event(booking_id, slot_id, AuditAction::BookingExpired, &actor, source);
    }
    Ok(expired.into_iter().map(|(id, _)| id).collect())
}

/// Retention: physically delete terminal bookings untouched for `retention`. Audit entries stay.
pub fn purge_old_bookings(
    conn: &Connection,
    retention: Duration,
    now: &NaiveDateTime,
) -> anyhow::Result<usize> {
    let purged = queries::purge_terminal_bookings(conn, &(*now - retention))?;
    if purged > 0 {
        tracing::info!(purged, "purged terminal bookings past retention");
    }
    Ok(purged)
}
