use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration, NaiveDate};
use serde::Deserialize;
use serde_json::json;

use crate::db::DATE_FORMAT;
use crate::errors::AppError;
use crate::handlers::auth::CUSTOMER_PHONE_HEADER;
use crate::handlers::{client_ip, enforce_rate_limit, now};
use crate::models::{Reservation, SlotResponse};
use crate::services::idempotency::StoredResponse;
use crate::services::slots;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct AvailabilityQuery {
    pub date: Option<String>,
}

fn availability_response(state: &AppState, business_id: &str, date: NaiveDate) -> StoredResponse {
    let result = state.db().and_then(|mut db| {
        slots::generate_slots_for_date(&mut db, business_id, date, &now())
    });
    match result {
        Ok(slots) => {
            let slots: Vec<SlotResponse> = slots.iter().map(SlotResponse::from).collect();
            let body = json!({
                "business_id": business_id,
                "date": date.format(DATE_FORMAT).to_string(),
                "slots": slots,
            });
            StoredResponse {
                status: StatusCode::OK.as_u16(),
                body: body.to_string(),
            }
        }
        Err(err) => {
            if err.status().is_server_error() {
                tracing::error!(error = %err, business_id = %business_id, "availability failed");
            }
            StoredResponse {
                status: err.status().as_u16(),
                body: err.body().to_string(),
            }
        }
    }
}

// GET /businesses/:id/availability?date=YYYY-MM-DD
pub async fn availability(
    State(state): State<Arc<AppState>>,
    Path(business_id): Path<String>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Response, AppError> {
    let raw = query
        .date
        .ok_or_else(|| AppError::Validation("date is required".to_string()))?;
    let date = NaiveDate::parse_from_str(&raw, DATE_FORMAT)
        .map_err(|_| AppError::Validation("date must be YYYY-MM-DD".to_string()))?;

    // Identical concurrent requests share one generation pass.
    let key = format!("availability:{business_id}:{date}");
    let response = state
        .in_flight
        .run(&key, || async { availability_response(&state, &business_id, date) })
        .await;
    Ok(response.into_response())
}

// POST /slots/:id/reserve
pub async fn reserve(
    State(state): State<Arc<AppState>>,
    Path(slot_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Reservation>, AppError> {
    enforce_rate_limit(&state, &format!("ip:{}", client_ip(&headers))).await?;
    if let Some(phone) = headers.get(CUSTOMER_PHONE_HEADER).and_then(|v| v.to_str().ok()) {
        enforce_rate_limit(&state, &format!("phone:{}", phone.trim())).await?;
    }

    let ttl = Duration::minutes(state.config.reservation_ttl_minutes);
    let reservation = {
        let mut db = state.db()?;
        slots::reserve(&mut db, &slot_id, "customer", ttl, &now())?
    };
    Ok(Json(reservation))
}

// POST /slots/:id/release
pub async fn release(
    State(state): State<Arc<AppState>>,
    Path(slot_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let released = {
        let mut db = state.db()?;
        slots::release(&mut db, &slot_id, "customer", &now())?
    };
    Ok(Json(json!({ "slot_id": slot_id, "released": released })))
}
