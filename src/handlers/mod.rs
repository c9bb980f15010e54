pub mod admin;
pub mod auth;
pub mod bookings;
pub mod calendar;
pub mod cron;
pub mod health;
pub mod payments;
pub mod slots;

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::AppError;
use crate::models::Actor;
use crate::observability::RATE_LIMITED_TOTAL;
use crate::services::idempotency::{self, Lookup, StoredResponse};
use crate::state::AppState;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const REPLAY_HEADER: &str = "idempotent-replayed";

impl IntoResponse for StoredResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        (
            status,
            [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
            self.body,
        )
            .into_response()
    }
}

pub fn now() -> chrono::NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

/// Client address as reported by the proxy in front of us.
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

pub fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    let raw = if body.is_empty() { b"{}".as_slice() } else { body };
    serde_json::from_slice(raw).map_err(|e| AppError::Validation(format!("invalid JSON body: {e}")))
}

pub async fn enforce_rate_limit(state: &AppState, key: &str) -> Result<(), AppError> {
    match state.rate_limiter.check(key).await {
        Ok(decision) if decision.allowed => Ok(()),
        Ok(decision) => {
            metrics::counter!(RATE_LIMITED_TOTAL).increment(1);
            tracing::warn!(key = %key, retry_after = decision.retry_after_secs, "rate limited");
            Err(AppError::RateLimited {
                retry_after_secs: decision.retry_after_secs,
            })
        }
        Err(e) => {
            tracing::warn!(error = %e, "rate limit store unavailable, allowing request");
            Ok(())
        }
    }
}

fn idempotency_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
}

/// Idempotency scope bound to the caller. A key used by one actor never replays for another,
/// who runs the operation (and its permission checks) afresh instead.
pub fn actor_scope(operation: &str, actor: &Actor) -> String {
    match actor {
        Actor::Customer { phone } => format!("{operation}:customer:{phone}"),
        other => format!("{operation}:{}", other.label()),
    }
}

pub enum Executed<T> {
    Replayed(StoredResponse),
    Fresh(T, StoredResponse),
}

impl<T> Executed<T> {
    pub fn into_response(self) -> Response {
        match self {
            Executed::Replayed(stored) => {
                let mut response = stored.into_response();
                response
                    .headers_mut()
                    .insert(REPLAY_HEADER, HeaderValue::from_static("true"));
                response
            }
            Executed::Fresh(_, stored) => stored.into_response(),
        }
    }
}

/// Run `op` at most once per `Idempotency-Key` within the key TTL.
///
/// Must be called with the connection lock held, so lookup, execution and storing the result
/// cannot interleave with a concurrent request carrying the same key. A successful result and
/// its key record commit together in one savepoint: if the record cannot be written the
/// operation is rolled back and the request fails with a 500 the client may retry. Client
/// errors are stored and replayed as well; server errors are not.
pub fn run_idempotent<T>(
    conn: &mut Connection,
    state: &AppState,
    headers: &HeaderMap,
    scope: &str,
    fingerprint: &str,
    op: impl FnOnce(&mut Connection) -> Result<T, AppError>,
    render: impl FnOnce(&T) -> (StatusCode, Value),
) -> Result<Executed<T>, AppError> {
    let now = now();
    let Some(key) = idempotency_key(headers) else {
        let value = op(conn)?;
        let (status, body) = render(&value);
        let stored = StoredResponse {
            status: status.as_u16(),
            body: body.to_string(),
        };
        return Ok(Executed::Fresh(value, stored));
    };

    match idempotency::lookup(conn, scope, key, fingerprint, &now)? {
        Lookup::Replay(stored) => {
            tracing::info!(scope, "replaying idempotent response");
            return Ok(Executed::Replayed(stored));
        }
        Lookup::Mismatch => {
            return Err(AppError::Validation(
                "idempotency key was already used for a different request".to_string(),
            ))
        }
        Lookup::Miss => {}
    }

    let ttl = chrono::Duration::hours(state.config.idempotency_ttl_hours);
    conn.execute_batch("SAVEPOINT idempotent_request")?;
    let outcome = op(conn).and_then(|value| {
        let (status, body) = render(&value);
        let stored = StoredResponse {
            status: status.as_u16(),
            body: body.to_string(),
        };
        idempotency::store(conn, scope, key, fingerprint, &stored, ttl, &now)?;
        Ok((value, stored))
    });

    match outcome {
        Ok((value, stored)) => {
            conn.execute_batch("RELEASE idempotent_request")?;
            Ok(Executed::Fresh(value, stored))
        }
        Err(err) => {
            conn.execute_batch("ROLLBACK TO idempotent_request; RELEASE idempotent_request")?;
            if !err.status().is_server_error() {
                let stored = StoredResponse {
                    status: err.status().as_u16(),
                    body: err.body().to_string(),
                };
                if let Err(e) = idempotency::store(conn, scope, key, fingerprint, &stored, ttl, &now) {
                    tracing::error!(error = %e, scope, "failed to store idempotent error response");
                }
            }
            Err(err)
        }
    }
}
