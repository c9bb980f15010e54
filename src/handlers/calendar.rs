use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::BookingStatus;
use crate::services::calendar::generate_ics;
use crate::state::AppState;

// GET /bookings/:id/calendar.ics
pub async fn download_ics(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let (booking, business) = {
        let db = state.db()?;
        let booking = queries::get_booking(&db, &id)?
            .filter(|b| b.status == BookingStatus::Confirmed)
            .ok_or_else(|| AppError::NotFound("booking".to_string()))?;
        let business = queries::get_business(&db, &booking.business_id)?;
        (booking, business)
    };

    let business_name = business
        .map(|b| b.name)
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "Booking".to_string());

    let ics = generate_ics(&booking, &business_name);
    let disposition = format!("attachment; filename=\"booking-{}.ics\"", booking.reference);

    Ok((
        [
            (header::CONTENT_TYPE, "text/calendar; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        ics,
    )
        .into_response())
}
