use base64::Engine;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use sha1::{Digest, Sha1};
use uuid::Uuid;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::availability::normalize_time;
use crate::models::{Business, Closure, NewBusiness, NewClosure};

/// Returned once at creation; only the token hash is stored.
#[derive(Debug, Clone)]
pub struct CreatedBusiness {
    pub business: Business,
    pub owner_token: String,
}

pub fn hash_token(token: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(Sha1::digest(token.as_bytes()))
}

fn time_field(value: &str, field: &str) -> Result<String, AppError> {
    normalize_time(value).map_err(|_| AppError::Validation(format!("{field} must be HH:MM or HH:MM:SS")))
}

pub fn create_business(
    conn: &Connection,
    input: &NewBusiness,
    now: &NaiveDateTime,
) -> Result<CreatedBusiness, AppError> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("name is required".to_string()));
    }
    let opening_time = time_field(&input.opening_time, "opening_time")?;
    let closing_time = time_field(&input.closing_time, "closing_time")?;
    if closing_time <= opening_time {
        return Err(AppError::Validation(
            "closing_time must be after opening_time".to_string(),
        ));
    }
    if input.slot_duration_minutes <= 0 || input.slot_duration_minutes > 24 * 60 {
        return Err(AppError::Validation(
            "slot_duration_minutes must be between 1 and 1440".to_string(),
        ));
    }

    let business = Business {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        opening_time,
        closing_time,
        slot_duration_minutes: input.slot_duration_minutes,
        owner_whatsapp: input
            .owner_whatsapp
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string),
        created_at: *now,
    };
    let owner_token = format!("own_{}", Uuid::new_v4().simple());
    queries::insert_business(conn, &business, &hash_token(&owner_token))?;

    tracing::info!(business_id = %business.id, "business created");
    Ok(CreatedBusiness {
        business,
        owner_token,
    })
}

pub fn add_closure(
    conn: &Connection,
    business_id: &str,
    input: &NewClosure,
    today: NaiveDate,
    now: &NaiveDateTime,
) -> Result<Closure, AppError> {
    if queries::get_business(conn, business_id)?.is_none() {
        return Err(AppError::NotFound("business".to_string()));
    }
    if input.date < today {
        return Err(AppError::Validation("date is in the past".to_string()));
    }

    let (start_time, end_time) = match (&input.start_time, &input.end_time) {
        (None, None) => (None, None),
        (Some(start), Some(end)) => {
            let start = time_field(start, "start_time")?;
            let end = time_field(end, "end_time")?;
            if end <= start {
                return Err(AppError::Validation(
                    "end_time must be after start_time".to_string(),
                ));
            }
            (Some(start), Some(end))
        }
        _ => {
            return Err(AppError::Validation(
                "start_time and end_time must be given together".to_string(),
            ))
        }
    };

    let closure = Closure {
        business_id: business_id.to_string(),
        date: input.date,
        start_time,
        end_time,
        reason: input.reason.clone(),
    };
    queries::insert_closure(conn, &closure, now)?;
    Ok(closure)
}

/// Business id owned by the bearer of `token`, if any.
pub fn owner_business(conn: &Connection, token: &str) -> anyhow::Result<Option<String>> {
    queries::find_business_by_token_hash(conn, &hash_token(token))
}
