use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::Json;
use serde_json::json;

use crate::errors::{AppError, AuthDenyReason};
use crate::handlers::auth::{deny, require_admin, resolve_actor};
use crate::handlers::{actor_scope, now, parse_body, run_idempotent};
use crate::models::{Actor, NewPayment, Payment, PaymentStatusUpdate};
use crate::services::idempotency::request_fingerprint;
use crate::services::payments;
use crate::state::AppState;

// POST /bookings/:id/payments
pub async fn create_payment(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let path = format!("/bookings/{booking_id}/payments");
    let actor = resolve_actor(&state, &headers, &path)?;
    let input: NewPayment = parse_body(&body)?;

    let fingerprint = request_fingerprint("POST", &path, &body);
    let executed = {
        let mut db = state.db()?;
        run_idempotent(
            &mut db,
            &state,
            &headers,
            &actor_scope("payments.create", &actor),
            &fingerprint,
            |conn| payments::create_payment(conn, &booking_id, input.amount_cents, &actor, &now()),
            |payment| (StatusCode::CREATED, json!(payment)),
        )
    };
    match executed {
        Err(AppError::Forbidden) => Err(deny(&state, AuthDenyReason::Denied, &path)),
        other => Ok(other?.into_response()),
    }
}

// POST /payments/:id/status
pub async fn update_payment_status(
    State(state): State<Arc<AppState>>,
    Path(payment_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Payment>, AppError> {
    require_admin(&state, &headers, &format!("/payments/{payment_id}/status"))?;
    let input: PaymentStatusUpdate = parse_body(&body)?;

    let payment = {
        let mut db = state.db()?;
        payments::update_status(&mut db, &payment_id, input.status, &Actor::Admin, &now())?
    };
    Ok(Json(payment))
}
