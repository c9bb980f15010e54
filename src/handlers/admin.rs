use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::db::queries;
use crate::errors::AppError;
use crate::handlers::auth::{require_admin, require_manager};
use crate::handlers::{now, parse_body};
use crate::models::{AuditEntry, BookingResponse, BookingStatus, Closure, CronRun, NewBusiness, NewClosure};
use crate::services::businesses;
use crate::state::AppState;

// GET /admin/bookings
#[derive(Deserialize)]
pub struct BookingsQuery {
    pub status: Option<String>,
    pub business_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Serialize)]
pub struct Page<T> {
    items: Vec<T>,
    limit: i64,
    offset: i64,
}

pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<BookingsQuery>,
) -> Result<Json<Page<BookingResponse>>, AppError> {
    require_admin(&state, &headers, "/admin/bookings")?;

    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(s) => Some(
            BookingStatus::parse(s)
                .ok_or_else(|| AppError::Validation(format!("unknown status: {s}")))?,
        ),
    };
    let limit = state.config.clamp_limit(query.limit);
    let offset = query.offset.unwrap_or(0).max(0);

    let bookings = {
        let db = state.db()?;
        queries::list_bookings(&db, status, query.business_id.as_deref(), limit, offset)?
    };

    Ok(Json(Page {
        items: bookings.iter().map(BookingResponse::from).collect(),
        limit,
        offset,
    }))
}

// GET /admin/bookings/:id/lifecycle
#[derive(Serialize)]
pub struct LifecycleResponse {
    booking_id: String,
    current_status: Option<String>,
    entries: Vec<AuditEntry>,
}

pub async fn booking_lifecycle(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<LifecycleResponse>, AppError> {
    require_admin(&state, &headers, &format!("/admin/bookings/{id}/lifecycle"))?;

    // Purged bookings keep their audit trail, so a missing row is not yet a 404.
    let (booking, entries) = {
        let db = state.db()?;
        let booking = queries::get_booking(&db, &id)?;
        let booking_id = booking.as_ref().map(|b| b.id.as_str()).unwrap_or(id.as_str());
        let entries = queries::audit_for_entity(&db, "booking", booking_id)?;
        (booking, entries)
    };

    if booking.is_none() && entries.is_empty() {
        return Err(AppError::NotFound("booking".to_string()));
    }

    Ok(Json(LifecycleResponse {
        booking_id: booking.as_ref().map(|b| b.id.clone()).unwrap_or(id),
        current_status: booking.map(|b| b.status.as_str().to_string()),
        entries,
    }))
}

// GET /admin/cron-runs
#[derive(Deserialize)]
pub struct CronRunsQuery {
    pub job: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_cron_runs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<CronRunsQuery>,
) -> Result<Json<Page<CronRun>>, AppError> {
    require_admin(&state, &headers, "/admin/cron-runs")?;

    let limit = state.config.clamp_limit(query.limit);
    let offset = query.offset.unwrap_or(0).max(0);
    let runs = {
        let db = state.db()?;
        queries::list_cron_runs(&db, query.job.as_deref(), limit, offset)?
    };

    Ok(Json(Page {
        items: runs,
        limit,
        offset,
    }))
}

// POST /admin/businesses
pub async fn create_business(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_admin(&state, &headers, "/admin/businesses")?;
    let input: NewBusiness = parse_body(&body)?;

    let created = {
        let db = state.db()?;
        businesses::create_business(&db, &input, &now())?
    };

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "business": created.business,
            "owner_token": created.owner_token,
        })),
    ))
}

// POST /admin/businesses/:id/closures
pub async fn add_closure(
    State(state): State<Arc<AppState>>,
    Path(business_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Closure>), AppError> {
    let path = format!("/admin/businesses/{business_id}/closures");
    require_manager(&state, &headers, &path, &business_id)?;
    let input: NewClosure = parse_body(&body)?;

    let now = now();
    let closure = {
        let db = state.db()?;
        businesses::add_closure(&db, &business_id, &input, now.date(), &now)?
    };
    Ok((StatusCode::CREATED, Json(closure)))
}
