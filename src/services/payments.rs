use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Actor, AuditAction, Payment, PaymentStatus};
use crate::services::audit::{self, AuditRecord};

/// Record a payment against a booking. Payments are observational: the booking itself is never
/// modified here.
pub fn create_payment(
    conn: &mut Connection,
    booking_id: &str,
    amount_cents: i64,
    actor: &Actor,
    now: &NaiveDateTime,
) -> Result<Payment, AppError> {
    if amount_cents <= 0 {
        return Err(AppError::Validation("amount_cents must be positive".to_string()));
    }

    let tx = conn.savepoint()?;
    let booking = queries::get_booking(&tx, booking_id)?
        .ok_or_else(|| AppError::NotFound("booking".to_string()))?;

    let allowed = match actor {
        Actor::Customer { phone } => phone.trim() == booking.customer_phone,
        other => other.manages(&booking.business_id),
    };
    if !allowed {
        return Err(AppError::Forbidden);
    }
    if booking.status.is_terminal() {
        return Err(AppError::InvalidState {
            action: "pay for",
            status: booking.status.as_str().to_string(),
        });
    }

    let payment = Payment {
        id: Uuid::new_v4().to_string(),
        booking_id: booking.id.clone(),
        amount_cents,
        status: PaymentStatus::Created,
        verified_at: None,
        created_at: *now,
        updated_at: *now,
    };
    queries::insert_payment(&tx, &payment)?;
    audit::record(
        &tx,
        AuditRecord {
            actor: &actor.label(),
            action: AuditAction::PaymentCreated,
            entity_type: "payment",
            entity_id: &payment.id,
            old_data: None,
            new_data: Some(json!({
                "booking_id": payment.booking_id,
                "amount_cents": payment.amount_cents,
                "status": payment.status.as_str(),
            })),
            description: None,
        },
        now,
    )?;
    tx.commit()?;

    tracing::info!(payment_id = %payment.id, booking_id = %payment.booking_id, "payment created");
    Ok(payment)
}

/// Move a payment to `status`. Setting the current status again is a no-op.
pub fn update_status(
    conn: &mut Connection,
    payment_id: &str,
    status: PaymentStatus,
    actor: &Actor,
    now: &NaiveDateTime,
) -> Result<Payment, AppError> {
    let tx = conn.transaction()?;
    let payment = queries::get_payment(&tx, payment_id)?
        .ok_or_else(|| AppError::NotFound("payment".to_string()))?;
    if payment.status == status {
        return Ok(payment);
    }

    let verified_at = (status == PaymentStatus::Succeeded).then_some(*now);
    queries::update_payment_status(&tx, payment_id, status, verified_at.as_ref(), now)?;
    audit::record(
        &tx,
        AuditRecord {
            actor: &actor.label(),
            action: AuditAction::PaymentStatusChanged,
            entity_type: "payment",
            entity_id: payment_id,
            old_data: Some(json!({ "status": payment.status.as_str() })),
            new_data: Some(json!({ "status": status.as_str() })),
            description: None,
        },
        now,
    )?;
    let updated = queries::get_payment(&tx, payment_id)?
        .ok_or_else(|| AppError::NotFound("payment".to_string()))?;
    tx.commit()?;

    tracing::info!(
        payment_id = %payment_id,
        from = payment.status.as_str(),
        to = status.as_str(),
        "payment status changed"
    );
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BookingStatus;
    use crate::services::bookings::{self, tests::new_booking};
    use crate::services::slots::tests::{now, setup};

    #[test]
    fn test_payment_never_touches_booking() {
        let (mut conn, _, slots) = setup();
        let booking = bookings::create(&mut conn, &new_booking(&slots[0].id, None), "api", &now()).unwrap();
        let customer = Actor::Customer {
            phone: booking.customer_phone.clone(),
        };

        let payment = create_payment(&mut conn, &booking.id, 2500, &customer, &now()).unwrap();
        assert_eq!(payment.status, PaymentStatus::Created);

        let paid = update_status(&mut conn, &payment.id, PaymentStatus::Succeeded, &Actor::Admin, &now())
            .unwrap();
        assert_eq!(paid.status, PaymentStatus::Succeeded);
        assert!(paid.verified_at.is_some());

        let stored = queries::get_booking(&conn, &booking.id).unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Pending);

        let trail = queries::audit_for_entity(&conn, "payment", &payment.id).unwrap();
        let actions: Vec<&str> = trail.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, vec!["payment.created", "payment.status_changed"]);
    }

    #[test]
    fn test_repeat_status_is_noop() {
        let (mut conn, _, slots) = setup();
        let booking = bookings::create(&mut conn, &new_booking(&slots[0].id, None), "api", &now()).unwrap();
        let payment = create_payment(&mut conn, &booking.id, 1000, &Actor::Admin, &now()).unwrap();

        update_status(&mut conn, &payment.id, PaymentStatus::Failed, &Actor::Admin, &now()).unwrap();
        update_status(&mut conn, &payment.id, PaymentStatus::Failed, &Actor::Admin, &now()).unwrap();
        assert_eq!(
            queries::audit_for_entity(&conn, "payment", &payment.id).unwrap().len(),
            2
        );
    }

    #[test]
    fn test_stranger_cannot_pay() {
        let (mut conn, _, slots) = setup();
        let booking = bookings::create(&mut conn, &new_booking(&slots[0].id, None), "api", &now()).unwrap();
        let stranger = Actor::Customer {
            phone: "+15557776666".to_string(),
        };
        let err = create_payment(&mut conn, &booking.id, 1000, &stranger, &now()).unwrap_err();
        assert!(matches!(err, AppError::Forbidden));

        let err = create_payment(&mut conn, &booking.id, 0, &Actor::Admin, &now()).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
