use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{DATE_FORMAT, TIMESTAMP_FORMAT};
use crate::models::{
    AuditEntry, Booking, BookingStatus, Business, Closure, CronRun, CronStatus,
    IdempotencyRecord, Payment, PaymentStatus, Slot, SlotStatus, TimeRange,
};

pub fn fmt_ts(dt: &NaiveDateTime) -> String {
    dt.format(TIMESTAMP_FORMAT).to_string()
}

pub fn fmt_date(d: &NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

fn parse_ts(s: &str) -> anyhow::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .with_context(|| format!("invalid timestamp in database: {s}"))
}

fn parse_opt_ts(s: Option<String>) -> anyhow::Result<Option<NaiveDateTime>> {
    s.as_deref().map(parse_ts).transpose()
}

fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .with_context(|| format!("invalid date in database: {s}"))
}

fn parse_json(s: Option<String>) -> Option<serde_json::Value> {
    s.and_then(|raw| serde_json::from_str(&raw).ok())
}

// ── Businesses ──

pub fn insert_business(
    conn: &Connection,
    business: &Business,
    owner_token_hash: &str,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO businesses (id, name, opening_time, closing_time, slot_duration_minutes, owner_token_hash, owner_whatsapp, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            business.id,
            business.name,
            business.opening_time,
            business.closing_time,
            business.slot_duration_minutes,
            owner_token_hash,
            business.owner_whatsapp,
            fmt_ts(&business.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_business(conn: &Connection, id: &str) -> anyhow::Result<Option<Business>> {
    let row = conn
        .query_row(
            "SELECT id, name, opening_time, closing_time, slot_duration_minutes, owner_whatsapp, created_at
             FROM businesses WHERE id = ?1",
            params![id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            },
        )
        .optional()?;

    match row {
        Some((id, name, opening_time, closing_time, slot_duration_minutes, owner_whatsapp, created_at)) => {
            Ok(Some(Business {
                id,
                name,
                opening_time,
                closing_time,
                slot_duration_minutes,
                owner_whatsapp,
                created_at: parse_ts(&created_at)?,
            }))
        }
        None => Ok(None),
    }
}

pub fn find_business_by_token_hash(
    conn: &Connection,
    token_hash: &str,
) -> anyhow::Result<Option<String>> {
    let id = conn
        .query_row(
            "SELECT id FROM businesses WHERE owner_token_hash = ?1",
            params![token_hash],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

// ── Closures ──

pub fn insert_closure(conn: &Connection, closure: &Closure, now: &NaiveDateTime) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO closures (business_id, date, start_time, end_time, reason, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            closure.business_id,
            fmt_date(&closure.date),
            closure.start_time,
            closure.end_time,
            closure.reason,
            fmt_ts(now),
        ],
    )?;
    Ok(())
}

pub fn closures_for_date(
    conn: &Connection,
    business_id: &str,
    date: &NaiveDate,
) -> anyhow::Result<Vec<Closure>> {
    let mut stmt = conn.prepare(
        "SELECT business_id, date, start_time, end_time, reason
         FROM closures WHERE business_id = ?1 AND date = ?2 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![business_id, fmt_date(date)], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, Option<String>>(4)?,
        ))
    })?;

    let mut closures = vec![];
    for row in rows {
        let (business_id, date, start_time, end_time, reason) = row?;
        closures.push(Closure {
            business_id,
            date: parse_date(&date)?,
            start_time,
            end_time,
            reason,
        });
    }
    Ok(closures)
}

// ── Slots ──

const SLOT_COLUMNS: &str =
    "id, business_id, date, start_time, end_time, status, reserved_until, reservation_token";

fn parse_slot_row(row: &rusqlite::Row) -> anyhow::Result<Slot> {
    let date_str: String = row.get(2)?;
    let status_str: String = row.get(5)?;
    let reserved_until: Option<String> = row.get(6)?;

    Ok(Slot {
        id: row.get(0)?,
        business_id: row.get(1)?,
        date: parse_date(&date_str)?,
        start_time: row.get(3)?,
        end_time: row.get(4)?,
        status: SlotStatus::parse(&status_str)
            .with_context(|| format!("unknown slot status: {status_str}"))?,
        reserved_until: parse_opt_ts(reserved_until)?,
        reservation_token: row.get(7)?,
    })
}

pub fn get_slot(conn: &Connection, id: &str) -> anyhow::Result<Option<Slot>> {
    let result = conn.query_row(
        &format!("SELECT {SLOT_COLUMNS} FROM slots WHERE id = ?1"),
        params![id],
        |row| Ok(parse_slot_row(row)),
    );

    match result {
        Ok(slot) => Ok(Some(slot?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn slots_for_date(
    conn: &Connection,
    business_id: &str,
    date: &NaiveDate,
) -> anyhow::Result<Vec<Slot>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SLOT_COLUMNS} FROM slots WHERE business_id = ?1 AND date = ?2 ORDER BY start_time ASC"
    ))?;
    let rows = stmt.query_map(params![business_id, fmt_date(date)], |row| {
        Ok(parse_slot_row(row))
    })?;

    let mut slots = vec![];
    for row in rows {
        slots.push(row??);
    }
    Ok(slots)
}

/// Returns false when a slot with the same business/date/start already exists.
pub fn insert_slot_if_absent(conn: &Connection, slot: &Slot, now: &NaiveDateTime) -> anyhow::Result<bool> {
    let count = conn.execute(
        "INSERT OR IGNORE INTO slots (id, business_id, date, start_time, end_time, status, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            slot.id,
            slot.business_id,
            fmt_date(&slot.date),
            slot.start_time,
            slot.end_time,
            slot.status.as_str(),
            fmt_ts(now),
        ],
    )?;
    Ok(count > 0)
}

/// Conditional `available -> reserved`. Zero rows means the slot was taken (or does not exist).
pub fn reserve_slot(
    conn: &Connection,
    id: &str,
    token: &str,
    reserved_until: &NaiveDateTime,
    now: &NaiveDateTime,
) -> anyhow::Result<usize> {
    let count = conn.execute(
        "UPDATE slots SET status = 'reserved', reserved_until = ?1, reservation_token = ?2, updated_at = ?3
         WHERE id = ?4 AND status = 'available'",
        params![fmt_ts(reserved_until), token, fmt_ts(now), id],
    )?;
    Ok(count)
}

/// Hand a slot over to a new pending booking. With a token the caller must own a live
/// reservation; without one the slot must still be available. The reservation expiry is
/// cleared: from here on the slot is held by the booking.
pub fn claim_slot_for_booking(
    conn: &Connection,
    id: &str,
    token: Option<&str>,
    now: &NaiveDateTime,
) -> anyhow::Result<usize> {
    let count = match token {
        Some(token) => conn.execute(
            "UPDATE slots SET reserved_until = NULL, reservation_token = NULL, updated_at = ?1
             WHERE id = ?2 AND status = 'reserved' AND reservation_token = ?3 AND reserved_until > ?1",
            params![fmt_ts(now), id, token],
        )?,
        None => conn.execute(
            "UPDATE slots SET status = 'reserved', reserved_until = NULL, reservation_token = NULL, updated_at = ?1
             WHERE id = ?2 AND status = 'available'",
            params![fmt_ts(now), id],
        )?,
    };
    Ok(count)
}

/// Conditional `reserved -> booked`.
pub fn book_slot(conn: &Connection, id: &str, now: &NaiveDateTime) -> anyhow::Result<usize> {
    let count = conn.execute(
        "UPDATE slots SET status = 'booked', reserved_until = NULL, reservation_token = NULL, updated_at = ?1
         WHERE id = ?2 AND status = 'reserved'",
        params![fmt_ts(now), id],
    )?;
    Ok(count)
}

/// Unconditional release, used by booking transitions inside their transaction.
pub fn release_slot(conn: &Connection, id: &str, now: &NaiveDateTime) -> anyhow::Result<usize> {
    let count = conn.execute(
        "UPDATE slots SET status = 'available', reserved_until = NULL, reservation_token = NULL, updated_at = ?1
         WHERE id = ?2 AND status != 'available'",
        params![fmt_ts(now), id],
    )?;
    Ok(count)
}

/// Release a bare reservation. Slots held by a live booking are left untouched.
pub fn release_reservation(conn: &Connection, id: &str, now: &NaiveDateTime) -> anyhow::Result<usize> {
    let count = conn.execute(
        "UPDATE slots SET status = 'available', reserved_until = NULL, reservation_token = NULL, updated_at = ?1
         WHERE id = ?2 AND status = 'reserved'
           AND NOT EXISTS (
             SELECT 1 FROM bookings b
             WHERE b.slot_id = slots.id AND b.status IN ('pending', 'confirmed')
           )",
        params![fmt_ts(now), id],
    )?;
    Ok(count)
}

/// Single statement sweep; a slot booked in the meantime no longer matches.
pub fn release_expired_reservations(
    conn: &Connection,
    now: &NaiveDateTime,
) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "UPDATE slots SET status = 'available', reserved_until = NULL, reservation_token = NULL, updated_at = ?1
         WHERE status = 'reserved' AND reserved_until IS NOT NULL AND reserved_until <= ?1
         RETURNING id",
    )?;
    let rows = stmt.query_map(params![fmt_ts(now)], |row| row.get::<_, String>(0))?;

    let mut released = vec![];
    for row in rows {
        released.push(row?);
    }
    Ok(released)
}

// ── Bookings ──

const BOOKING_COLUMNS: &str = "id, reference, slot_id, business_id, customer_name, customer_phone, customer_user_id, notes, \
     status, date, start_time, end_time, created_at, updated_at, confirmed_at, cancelled_at, cancellation_reason";

fn parse_booking_row(row: &rusqlite::Row) -> anyhow::Result<Booking> {
    let status_str: String = row.get(8)?;
    let date_str: String = row.get(9)?;
    let created_at_str: String = row.get(12)?;
    let updated_at_str: String = row.get(13)?;

    Ok(Booking {
        id: row.get(0)?,
        reference: row.get(1)?,
        slot_id: row.get(2)?,
        business_id: row.get(3)?,
        customer_name: row.get(4)?,
        customer_phone: row.get(5)?,
        customer_user_id: row.get(6)?,
        notes: row.get(7)?,
        status: BookingStatus::parse(&status_str)
            .with_context(|| format!("unknown booking status: {status_str}"))?,
        date: parse_date(&date_str)?,
        start_time: row.get(10)?,
        end_time: row.get(11)?,
        created_at: parse_ts(&created_at_str)?,
        updated_at: parse_ts(&updated_at_str)?,
        confirmed_at: parse_opt_ts(row.get(14)?)?,
        cancelled_at: parse_opt_ts(row.get(15)?)?,
        cancellation_reason: row.get(16)?,
    })
}

pub fn insert_booking(conn: &Connection, booking: &Booking) -> anyhow::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO bookings ({BOOKING_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
        ),
        params![
            booking.id,
            booking.reference,
            booking.slot_id,
            booking.business_id,
            booking.customer_name,
            booking.customer_phone,
            booking.customer_user_id,
            booking.notes,
            booking.status.as_str(),
            fmt_date(&booking.date),
            booking.start_time,
            booking.end_time,
            fmt_ts(&booking.created_at),
            fmt_ts(&booking.updated_at),
            booking.confirmed_at.as_ref().map(fmt_ts),
            booking.cancelled_at.as_ref().map(fmt_ts),
            booking.cancellation_reason,
        ],
    )?;
    Ok(())
}

/// Look up by internal id or public reference.
pub fn get_booking(conn: &Connection, id_or_reference: &str) -> anyhow::Result<Option<Booking>> {
    let result = conn.query_row(
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1 OR reference = ?1"),
        params![id_or_reference],
        |row| Ok(parse_booking_row(row)),
    );

    match result {
        Ok(booking) => Ok(Some(booking?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Conditional status change: only applies while the booking is still in `from`.
pub fn transition_booking(
    conn: &Connection,
    id: &str,
    from: BookingStatus,
    to: BookingStatus,
    reason: Option<&str>,
    now: &NaiveDateTime,
) -> anyhow::Result<usize> {
    let now_str = fmt_ts(now);
    let confirmed_at = (to == BookingStatus::Confirmed).then(|| now_str.clone());
    let cancelled_at = (to == BookingStatus::Cancelled).then(|| now_str.clone());

    let count = conn.execute(
        "UPDATE bookings SET
           status = ?1,
           updated_at = ?2,
           confirmed_at = COALESCE(?3, confirmed_at),
           cancelled_at = COALESCE(?4, cancelled_at),
           cancellation_reason = COALESCE(?5, cancellation_reason)
         WHERE id = ?6 AND status = ?7",
        params![
            to.as_str(),
            now_str,
            confirmed_at,
            cancelled_at,
            reason,
            id,
            from.as_str(),
        ],
    )?;
    Ok(count)
}

pub fn list_bookings(
    conn: &Connection,
    status_filter: Option<BookingStatus>,
    business_filter: Option<&str>,
    limit: i64,
    offset: i64,
) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR business_id = ?2)
         ORDER BY created_at DESC, id ASC LIMIT ?3 OFFSET ?4"
    ))?;
    let rows = stmt.query_map(
        params![status_filter.map(|s| s.as_str()), business_filter, limit, offset],
        |row| Ok(parse_booking_row(row)),
    )?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

/// Time ranges held by pending or confirmed bookings on a date.
pub fn live_booking_ranges(
    conn: &Connection,
    business_id: &str,
    date: &NaiveDate,
) -> anyhow::Result<Vec<TimeRange>> {
    let mut stmt = conn.prepare(
        "SELECT start_time, end_time FROM bookings
         WHERE business_id = ?1 AND date = ?2 AND status IN ('pending', 'confirmed')",
    )?;
    let rows = stmt.query_map(params![business_id, fmt_date(date)], |row| {
        Ok(TimeRange::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut ranges = vec![];
    for row in rows {
        ranges.push(row?);
    }
    Ok(ranges)
}

/// Release every slot held by a pending booking created at or before `cutoff`.
pub fn release_slots_of_stale_pending(
    conn: &Connection,
    cutoff: &NaiveDateTime,
    now: &NaiveDateTime,
) -> anyhow::Result<usize> {
    let count = conn.execute(
        "UPDATE slots SET status = 'available', reserved_until = NULL, reservation_token = NULL, updated_at = ?1
         WHERE status = 'reserved' AND id IN (
           SELECT slot_id FROM bookings WHERE status = 'pending' AND created_at <= ?2
         )",
        params![fmt_ts(now), fmt_ts(cutoff)],
    )?;
    Ok(count)
}

/// Expire pending bookings created at or before `cutoff`. Returns `(id, slot_id)` pairs.
pub fn expire_stale_pending(
    conn: &Connection,
    cutoff: &NaiveDateTime,
    now: &NaiveDateTime,
) -> anyhow::Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        "UPDATE bookings SET status = 'expired', updated_at = ?1
         WHERE status = 'pending' AND created_at <= ?2
         RETURNING id, slot_id",
    )?;
    let rows = stmt.query_map(params![fmt_ts(now), fmt_ts(cutoff)], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut expired = vec![];
    for row in rows {
        expired.push(row?);
    }
    Ok(expired)
}

/// Physically remove terminal bookings last touched before `cutoff`. Payments cascade.
pub fn purge_terminal_bookings(conn: &Connection, cutoff: &NaiveDateTime) -> anyhow::Result<usize> {
    let count = conn.execute(
        "DELETE FROM bookings
         WHERE status IN ('rejected', 'cancelled', 'expired') AND updated_at < ?1",
        params![fmt_ts(cutoff)],
    )?;
    Ok(count)
}

// ── Payments ──

fn parse_payment_row(row: &rusqlite::Row) -> anyhow::Result<Payment> {
    let status_str: String = row.get(3)?;
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;

    Ok(Payment {
        id: row.get(0)?,
        booking_id: row.get(1)?,
        amount_cents: row.get(2)?,
        status: PaymentStatus::parse(&status_str)
            .with_context(|| format!("unknown payment status: {status_str}"))?,
        verified_at: parse_opt_ts(row.get(4)?)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

pub fn insert_payment(conn: &Connection, payment: &Payment) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO payments (id, booking_id, amount_cents, status, verified_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            payment.id,
            payment.booking_id,
            payment.amount_cents,
            payment.status.as_str(),
            payment.verified_at.as_ref().map(fmt_ts),
            fmt_ts(&payment.created_at),
            fmt_ts(&payment.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_payment(conn: &Connection, id: &str) -> anyhow::Result<Option<Payment>> {
    let result = conn.query_row(
        "SELECT id, booking_id, amount_cents, status, verified_at, created_at, updated_at
         FROM payments WHERE id = ?1",
        params![id],
        |row| Ok(parse_payment_row(row)),
    );

    match result {
        Ok(payment) => Ok(Some(payment?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn update_payment_status(
    conn: &Connection,
    id: &str,
    status: PaymentStatus,
    verified_at: Option<&NaiveDateTime>,
    now: &NaiveDateTime,
) -> anyhow::Result<usize> {
    let count = conn.execute(
        "UPDATE payments SET status = ?1, verified_at = COALESCE(?2, verified_at), updated_at = ?3
         WHERE id = ?4",
        params![status.as_str(), verified_at.map(fmt_ts), fmt_ts(now), id],
    )?;
    Ok(count)
}

// ── Audit ──

#[allow(clippy::too_many_arguments)]
pub fn insert_audit(
    conn: &Connection,
    actor: &str,
    action: &str,
    entity_type: &str,
    entity_id: &str,
    old_data: Option<&serde_json::Value>,
    new_data: Option<&serde_json::Value>,
    description: Option<&str>,
    now: &NaiveDateTime,
) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO audit_logs (actor, action, entity_type, entity_id, old_data, new_data, description, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            actor,
            action,
            entity_type,
            entity_id,
            old_data.map(|v| v.to_string()),
            new_data.map(|v| v.to_string()),
            description,
            fmt_ts(now),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn audit_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> anyhow::Result<Vec<AuditEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, actor, action, entity_type, entity_id, old_data, new_data, description, created_at
         FROM audit_logs WHERE entity_type = ?1 AND entity_id = ?2 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![entity_type, entity_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, Option<String>>(5)?,
            row.get::<_, Option<String>>(6)?,
            row.get::<_, Option<String>>(7)?,
            row.get::<_, String>(8)?,
        ))
    })?;

    let mut entries = vec![];
    for row in rows {
        let (id, actor, action, entity_type, entity_id, old_data, new_data, description, created_at) =
            row?;
        entries.push(AuditEntry {
            id,
            actor,
            action,
            entity_type,
            entity_id,
            old_data: parse_json(old_data),
            new_data: parse_json(new_data),
            description,
            created_at: parse_ts(&created_at)?,
        });
    }
    Ok(entries)
}

// ── Idempotency Keys ──

pub fn find_idempotency(
    conn: &Connection,
    scope: &str,
    key: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<Option<IdempotencyRecord>> {
    let row = conn
        .query_row(
            "SELECT scope, key, request_hash, response_status, response_body, created_at, expires_at
             FROM idempotency_keys WHERE scope = ?1 AND key = ?2 AND expires_at > ?3",
            params![scope, key, fmt_ts(now)],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u16>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            },
        )
        .optional()?;

    match row {
        Some((scope, key, request_hash, response_status, response_body, created_at, expires_at)) => {
            Ok(Some(IdempotencyRecord {
                scope,
                key,
                request_hash,
                response_status,
                response_body,
                created_at: parse_ts(&created_at)?,
                expires_at: parse_ts(&expires_at)?,
            }))
        }
        None => Ok(None),
    }
}

/// Upserts over an expired record with the same key; a live record wins and is kept.
pub fn insert_idempotency(conn: &Connection, record: &IdempotencyRecord) -> anyhow::Result<bool> {
    let count = conn.execute(
        "INSERT INTO idempotency_keys (scope, key, request_hash, response_status, response_body, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(scope, key) DO UPDATE SET
           request_hash = excluded.request_hash,
           response_status = excluded.response_status,
           response_body = excluded.response_body,
           created_at = excluded.created_at,
           expires_at = excluded.expires_at
         WHERE idempotency_keys.expires_at <= excluded.created_at",
        params![
            record.scope,
            record.key,
            record.request_hash,
            record.response_status,
            record.response_body,
            fmt_ts(&record.created_at),
            fmt_ts(&record.expires_at),
        ],
    )?;
    Ok(count > 0)
}

pub fn delete_expired_idempotency(conn: &Connection, now: &NaiveDateTime) -> anyhow::Result<usize> {
    let count = conn.execute(
        "DELETE FROM idempotency_keys WHERE expires_at <= ?1",
        params![fmt_ts(now)],
    )?;
    Ok(count)
}

// ── Cron Runs ──

pub fn insert_cron_run(conn: &Connection, job_name: &str, now: &NaiveDateTime) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO cron_runs (job_name, status, started_at) VALUES (?1, 'running', ?2)",
        params![job_name, fmt_ts(now)],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn finish_cron_run(
    conn: &Connection,
    id: i64,
    status: CronStatus,
    summary: Option<&serde_json::Value>,
    error: Option<&str>,
    now: &NaiveDateTime,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE cron_runs SET status = ?1, finished_at = ?2, summary = ?3, error = ?4 WHERE id = ?5",
        params![
            status.as_str(),
            fmt_ts(now),
            summary.map(|v| v.to_string()),
            error,
            id,
        ],
    )?;
    Ok(())
}

pub fn list_cron_runs(
    conn: &Connection,
    job_filter: Option<&str>,
    limit: i64,
    offset: i64,
) -> anyhow::Result<Vec<CronRun>> {
    let mut stmt = conn.prepare(
        "SELECT id, job_name, status, started_at, finished_at, summary, error
         FROM cron_runs WHERE (?1 IS NULL OR job_name = ?1)
         ORDER BY id DESC LIMIT ?2 OFFSET ?3",
    )?;
    let rows = stmt.query_map(params![job_filter, limit, offset], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, Option<String>>(5)?,
            row.get::<_, Option<String>>(6)?,
        ))
    })?;

    let mut runs = vec![];
    for row in rows {
        let (id, job_name, status, started_at, finished_at, summary, error) = row?;
        runs.push(CronRun {
            id,
            job_name,
            status: CronStatus::parse(&status),
            started_at: parse_ts(&started_at)?,
            finished_at: parse_opt_ts(finished_at)?,
            summary: parse_json(summary),
            error,
        });
    }
    Ok(runs)
}
