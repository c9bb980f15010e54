use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::Json;
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;

use crate::db::queries;
use crate::errors::{AppError, AuthDenyReason};
use crate::handlers::auth::{deny, require_staff, resolve_actor};
use crate::handlers::{
    actor_scope, client_ip, enforce_rate_limit, now, parse_body, run_idempotent, Executed,
};
use crate::models::{Actor, AuditAction, Booking, BookingResponse, NewBooking};
use crate::services::bookings::{self, Transition};
use crate::services::idempotency::request_fingerprint;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ReasonBody {
    pub reason: Option<String>,
}

/// Best-effort customer message; looks up the business name for the text.
async fn notify_customer(state: &AppState, booking: &Booking, action: AuditAction) {
    let business = state
        .db()
        .ok()
        .and_then(|db| queries::get_business(&db, &booking.business_id).ok().flatten());
    let name = business
        .as_ref()
        .map(|b| b.name.as_str())
        .unwrap_or("Your salon");
    state.notifier.booking_event(booking, action, name).await;
}

/// Send the customer message in the background. Responses never wait on the provider.
pub(crate) fn spawn_customer_notice(state: &Arc<AppState>, booking: Booking, action: AuditAction) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        notify_customer(&state, &booking, action).await;
    });
}

fn spawn_new_booking_notices(state: &Arc<AppState>, booking: Booking) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        notify_customer(&state, &booking, AuditAction::BookingCreated).await;
        let owner_phone = state
            .db()
            .ok()
            .and_then(|db| queries::get_business(&db, &booking.business_id).ok().flatten())
            .and_then(|b| b.owner_whatsapp);
        if let Some(phone) = owner_phone {
            state.notifier.owner_new_booking(&phone, &booking).await;
        }
    });
}

// POST /bookings
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    enforce_rate_limit(&state, &format!("ip:{}", client_ip(&headers))).await?;
    let input: NewBooking = parse_body(&body)?;
    enforce_rate_limit(&state, &format!("phone:{}", input.customer_phone.trim())).await?;

    let fingerprint = request_fingerprint("POST", "/bookings", &body);
    let scope = actor_scope(
        "bookings.create",
        &Actor::Customer {
            phone: input.customer_phone.trim().to_string(),
        },
    );
    let executed = {
        let mut db = state.db()?;
        run_idempotent(
            &mut db,
            &state,
            &headers,
            &scope,
            &fingerprint,
            |conn| bookings::create(conn, &input, "api", &now()),
            |booking| (StatusCode::CREATED, json!(BookingResponse::from(booking))),
        )?
    };

    if let Executed::Fresh(booking, _) = &executed {
        spawn_new_booking_notices(&state, booking.clone());
    }
    Ok(executed.into_response())
}

// GET /bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<BookingResponse>, AppError> {
    let path = format!("/bookings/{id}");
    let actor = resolve_actor(&state, &headers, &path)?;

    let booking = {
        let db = state.db()?;
        queries::get_booking(&db, &id)?
    }
    .ok_or_else(|| AppError::NotFound("booking".to_string()))?;

    let visible = match &actor {
        Actor::Customer { phone } => *phone == booking.customer_phone,
        other => other.manages(&booking.business_id),
    };
    if !visible {
        return Err(deny(&state, AuthDenyReason::Denied, &path));
    }
    Ok(Json(BookingResponse::from(&booking)))
}

/// Shared path for every state change: idempotency key handling, then the customer message
/// when something actually changed.
async fn run_transition(
    state: &Arc<AppState>,
    headers: &HeaderMap,
    scope: &str,
    path: &str,
    body: &[u8],
    action: AuditAction,
    op: impl FnOnce(&mut Connection) -> Result<Transition, AppError>,
) -> Result<Response, AppError> {
    let fingerprint = request_fingerprint("POST", path, body);
    let executed = {
        let mut db = state.db()?;
        run_idempotent(&mut db, state, headers, scope, &fingerprint, op, |t| {
            (StatusCode::OK, json!(BookingResponse::from(&t.booking)))
        })
    };
    // Actor mismatches found by the state machine go through the auth-deny path too.
    let executed = match executed {
        Err(AppError::Forbidden) => return Err(deny(state, AuthDenyReason::Denied, path)),
        other => other?,
    };

    if let Executed::Fresh(transition, _) = &executed {
        if transition.changed {
            spawn_customer_notice(state, transition.booking.clone(), action);
        }
    }
    Ok(executed.into_response())
}

// POST /bookings/:id/confirm
pub async fn confirm_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let path = format!("/bookings/{id}/confirm");
    let actor = require_staff(&state, &headers, &path)?;
    run_transition(
        &state,
        &headers,
        &actor_scope("bookings.confirm", &actor),
        &path,
        &body,
        AuditAction::BookingConfirmed,
        |conn| bookings::confirm(conn, &id, &actor, "api", &now()),
    )
    .await
}

// POST /bookings/:id/reject
pub async fn reject_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let path = format!("/bookings/{id}/reject");
    let actor = require_staff(&state, &headers, &path)?;
    let input: ReasonBody = parse_body(&body)?;
    run_transition(
        &state,
        &headers,
        &actor_scope("bookings.reject", &actor),
        &path,
        &body,
        AuditAction::BookingRejected,
        |conn| bookings::reject(conn, &id, &actor, input.reason.as_deref(), "api", &now()),
    )
    .await
}

// POST /bookings/:id/cancel
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let path = format!("/bookings/{id}/cancel");
    let actor = resolve_actor(&state, &headers, &path)?;
    let input: ReasonBody = parse_body(&body)?;
    run_transition(
        &state,
        &headers,
        &actor_scope("bookings.cancel", &actor),
        &path,
        &body,
        AuditAction::BookingCancelled,
        |conn| bookings::cancel(conn, &id, &actor, input.reason.as_deref(), "api", &now()),
    )
    .await
}

// POST /bookings/:id/no-show
pub async fn mark_no_show(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let path = format!("/bookings/{id}/no-show");
    let actor = require_staff(&state, &headers, &path)?;
    run_transition(
        &state,
        &headers,
        &actor_scope("bookings.no_show", &actor),
        &path,
        &body,
        AuditAction::BookingNoShow,
        |conn| bookings::mark_no_show(conn, &id, &actor, "api", &now()),
    )
    .await
}
