use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;

use crate::db::queries;
use crate::errors::AppError;
use crate::handlers::auth::check_cron;
use crate::handlers::bookings::spawn_customer_notice;
use crate::handlers::now;
use crate::models::AuditAction;
use crate::services::cron::{run_job, CronJob, CronOutcome};
use crate::state::AppState;

async fn trigger(
    state: &Arc<AppState>,
    headers: &HeaderMap,
    path: &str,
    job: CronJob,
    source: &str,
) -> Result<Json<CronOutcome>, AppError> {
    // Authenticate before anything touches the database.
    check_cron(state, headers, path)?;

    let outcome = {
        let mut db = state.db()?;
        run_job(&mut db, &state.config, job, source, &now())?
    };

    if job == CronJob::ExpireBookings {
        notify_expired(state, &outcome);
    }
    Ok(Json(outcome))
}

fn notify_expired(state: &Arc<AppState>, outcome: &CronOutcome) {
    let ids = outcome.summary["booking_ids"]
        .as_array()
        .map(|ids| ids.iter().filter_map(|v| v.as_str()).collect::<Vec<_>>())
        .unwrap_or_default();

    for id in ids {
        let booking = state
            .db()
            .ok()
            .and_then(|db| queries::get_booking(&db, id).ok().flatten());
        if let Some(booking) = booking {
            spawn_customer_notice(state, booking, AuditAction::BookingExpired);
        }
    }
}

// POST /cron/expire-bookings
pub async fn expire_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<CronOutcome>, AppError> {
    trigger(&state, &headers, "/cron/expire-bookings", CronJob::ExpireBookings, "cron").await
}

// POST /bookings/expire
// Older trigger for the same job, still routed for existing callers and held to the cron secret.
pub async fn legacy_expire_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<CronOutcome>, AppError> {
    trigger(&state, &headers, "/bookings/expire", CronJob::ExpireBookings, "legacy").await
}

// POST /cron/cleanup-reservations
pub async fn cleanup_reservations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<CronOutcome>, AppError> {
    trigger(
        &state,
        &headers,
        "/cron/cleanup-reservations",
        CronJob::CleanupReservations,
        "cron",
    )
    .await
}

// POST /cron/prune-idempotency-keys
pub async fn prune_idempotency_keys(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<CronOutcome>, AppError> {
    trigger(
        &state,
        &headers,
        "/cron/prune-idempotency-keys",
        CronJob::PruneIdempotencyKeys,
        "cron",
    )
    .await
}

// POST /cron/purge-bookings
pub async fn purge_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<CronOutcome>, AppError> {
    trigger(&state, &headers, "/cron/purge-bookings", CronJob::PurgeBookings, "cron").await
}
