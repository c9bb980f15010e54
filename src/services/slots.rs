use chrono::{Duration, NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use crate::db::queries::{self, fmt_ts};
use crate::errors::AppError;
use crate::models::{AuditAction, Reservation, Slot, SlotStatus, TimeRange};
use crate::observability::SLOT_RESERVATIONS_TOTAL;
use crate::services::audit::{self, AuditRecord};
use crate::services::intervals::{split_into_slots, subtract_occupied_from_full_day};

/// `available -> reserved` for `ttl`. Exactly one of several concurrent callers wins; the rest
/// get `SlotNotAvailable`.
pub fn reserve(
    conn: &mut Connection,
    slot_id: &str,
    actor: &str,
    ttl: Duration,
    now: &NaiveDateTime,
) -> Result<Reservation, AppError> {
    let token = Uuid::new_v4().to_string();
    let reserved_until = *now + ttl;

    let tx = conn.transaction()?;
    if queries::get_slot(&tx, slot_id)?.is_some_and(|slot| slot.has_started(now)) {
        return Err(AppError::Validation("slot has already started".to_string()));
    }
    if queries::reserve_slot(&tx, slot_id, &token, &reserved_until, now)? == 0 {
        let outcome = match queries::get_slot(&tx, slot_id)? {
            None => "not_found",
            Some(_) => "conflict",
        };
        metrics::counter!(SLOT_RESERVATIONS_TOTAL, "outcome" => outcome).increment(1);
        tracing::info!(slot_id = %slot_id, outcome, "slot reservation refused");
        return Err(if outcome == "not_found" {
            AppError::NotFound("slot".to_string())
        } else {
            AppError::SlotNotAvailable
        });
    }

    audit::record(
        &tx,
        AuditRecord {
            actor,
            action: AuditAction::SlotReserved,
            entity_type: "slot",
            entity_id: slot_id,
            old_data: Some(json!({ "status": SlotStatus::Available.as_str() })),
            new_data: Some(json!({
                "status": SlotStatus::Reserved.as_str(),
                "reserved_until": fmt_ts(&reserved_until),
            })),
            description: None,
        },
        now,
    )?;
    tx.commit()?;

    metrics::counter!(SLOT_RESERVATIONS_TOTAL, "outcome" => "reserved").increment(1);
    tracing::info!(slot_id = %slot_id, reserved_until = %reserved_until, "slot reserved");

    Ok(Reservation {
        slot_id: slot_id.to_string(),
        reservation_token: token,
        reserved_until: fmt_ts(&reserved_until),
    })
}

/// Give a reservation back. A no-op (not an error) when the slot is already available, unknown,
/// or held by a live booking.
pub fn release(
    conn: &mut Connection,
    slot_id: &str,
    actor: &str,
    now: &NaiveDateTime,
) -> Result<bool, AppError> {
    let tx = conn.transaction()?;
    let released = queries::release_reservation(&tx, slot_id, now)? > 0;
    if released {
        audit::record(
            &tx,
            AuditRecord {
                actor,
                action: AuditAction::SlotReleased,
                entity_type: "slot",
                entity_id: slot_id,
                old_data: Some(json!({ "status": SlotStatus::Reserved.as_str() })),
                new_data: Some(json!({ "status": SlotStatus::Available.as_str() })),
                description: None,
            },
            now,
        )?;
    }
    tx.commit()?;

    tracing::info!(slot_id = %slot_id, released, "slot release requested");
    Ok(released)
}

/// Sweep reservations whose hold has lapsed. Slots booked in the meantime are not touched.
pub fn release_expired_reservations(
    conn: &mut Connection,
    source: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<Vec<String>> {
    let actor = format!("system:{source}");
    let tx = conn.transaction()?;
    let released = queries::release_expired_reservations(&tx, now)?;
    for slot_id in &released {
        audit::record(
            &tx,
            AuditRecord {
                actor: &actor,
                action: AuditAction::SlotReservationExpired,
                entity_type: "slot",
                entity_id: slot_id,
                old_data: Some(json!({ "status": SlotStatus::Reserved.as_str() })),
                new_data: Some(json!({ "status": SlotStatus::Available.as_str() })),
                description: None,
            },
            now,
        )?;
    }
    tx.commit()?;

    if !released.is_empty() {
        tracing::info!(count = released.len(), source, "released expired reservations");
    }
    Ok(released)
}

/// Materialize the slot grid of a date and return every slot on it.
///
/// The working day minus closures and live bookings is cut into slot-sized pieces and inserted
/// with `INSERT OR IGNORE`, so repeated or concurrent calls converge on the same rows.
pub fn generate_slots_for_date(
    conn: &mut Connection,
    business_id: &str,
    date: NaiveDate,
    now: &NaiveDateTime,
) -> Result<Vec<Slot>, AppError> {
    let business = queries::get_business(conn, business_id)?
        .ok_or_else(|| AppError::NotFound("business".to_string()))?;
    if date < now.date() {
        return Err(AppError::Validation("date is in the past".to_string()));
    }

    let closures = queries::closures_for_date(conn, business_id, &date)?;
    if closures.iter().any(|c| c.is_full_day()) {
        return Ok(vec![]);
    }

    let mut occupied: Vec<TimeRange> = closures
        .iter()
        .filter_map(|c| match (&c.start_time, &c.end_time) {
            (Some(start), Some(end)) => Some(TimeRange::new(start.as_str(), end.as_str())),
            _ => None,
        })
        .collect();
    occupied.extend(queries::live_booking_ranges(conn, business_id, &date)?);

    let full_day = [TimeRange::new(
        business.opening_time.as_str(),
        business.closing_time.as_str(),
    )];
    let free = subtract_occupied_from_full_day(&full_day, &occupied);
    let pieces = split_into_slots(&free, business.slot_duration_minutes)?;
    let time_now = now.time().format("%H:%M:%S").to_string();

    let tx = conn.transaction()?;
    let mut created = 0;
    for piece in pieces {
        if date == now.date() && piece.start <= time_now {
            continue;
        }
        let slot = Slot {
            id: Uuid::new_v4().to_string(),
            business_id: business_id.to_string(),
            date,
            start_time: piece.start,
            end_time: piece.end,
            status: SlotStatus::Available,
            reserved_until: None,
            reservation_token: None,
        };
        if queries::insert_slot_if_absent(&tx, &slot, now)? {
            created += 1;
        }
    }
    tx.commit()?;

    if created > 0 {
        tracing::info!(business_id = %business_id, date = %date, created, "generated slots");
    }
    let slots = queries::slots_for_date(conn, business_id, &date)?;
    Ok(slots.into_iter().filter(|s| !s.has_started(now)).collect())
}
