use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::errors::{AppError, AuthDenyReason};
use crate::models::Actor;
use crate::services::{audit, businesses};
use crate::state::AppState;

type HmacSha1 = Hmac<Sha1>;

pub const CUSTOMER_PHONE_HEADER: &str = "x-customer-phone";

const COMPARE_KEY: &[u8] = b"salonbook-secret-compare";

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Compare two secrets without leaking the position of the first difference.
pub fn secrets_match(given: &str, expected: &str) -> bool {
    let Ok(mut expected_mac) = HmacSha1::new_from_slice(COMPARE_KEY) else {
        return false;
    };
    expected_mac.update(expected.as_bytes());
    let expected_tag = expected_mac.finalize().into_bytes();

    let Ok(mut given_mac) = HmacSha1::new_from_slice(COMPARE_KEY) else {
        return false;
    };
    given_mac.update(given.as_bytes());
    given_mac.verify_slice(&expected_tag).is_ok()
}

/// Log, count and audit a refused request, then turn the reason into the matching error.
pub fn deny(state: &AppState, reason: AuthDenyReason, path: &str) -> AppError {
    match state.db() {
        Ok(db) => audit::auth_denied(&db, reason, path, &super::now()),
        Err(e) => tracing::warn!(reason = reason.as_str(), path = %path, error = %e, "auth denied"),
    }
    match reason {
        AuthDenyReason::Denied => AppError::Forbidden,
        other => AppError::Unauthorized(other),
    }
}

/// Admin bearer, owner bearer, or a customer identified by phone.
pub fn resolve_actor(state: &AppState, headers: &HeaderMap, path: &str) -> Result<Actor, AppError> {
    if let Some(token) = bearer(headers) {
        if secrets_match(token, &state.config.admin_token) {
            return Ok(Actor::Admin);
        }
        let owned = {
            let db = state.db()?;
            businesses::owner_business(&db, token)?
        };
        return match owned {
            Some(business_id) => Ok(Actor::Owner { business_id }),
            None => Err(deny(state, AuthDenyReason::InvalidToken, path)),
        };
    }

    let phone = headers
        .get(CUSTOMER_PHONE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|p| !p.is_empty());
    match phone {
        Some(phone) => Ok(Actor::Customer {
            phone: phone.to_string(),
        }),
        None => Err(deny(state, AuthDenyReason::Missing, path)),
    }
}

/// Owners and admins only. A customer gets 403; the business-level check happens in the
/// service, which knows which business the booking belongs to.
pub fn require_staff(state: &AppState, headers: &HeaderMap, path: &str) -> Result<Actor, AppError> {
    let actor = resolve_actor(state, headers, path)?;
    match actor {
        Actor::Admin | Actor::Owner { .. } => Ok(actor),
        _ => Err(deny(state, AuthDenyReason::Denied, path)),
    }
}

pub fn require_admin(state: &AppState, headers: &HeaderMap, path: &str) -> Result<(), AppError> {
    match resolve_actor(state, headers, path)? {
        Actor::Admin => Ok(()),
        _ => Err(deny(state, AuthDenyReason::Denied, path)),
    }
}

/// Admin, or the owner of `business_id`.
pub fn require_manager(
    state: &AppState,
    headers: &HeaderMap,
    path: &str,
    business_id: &str,
) -> Result<Actor, AppError> {
    let actor = resolve_actor(state, headers, path)?;
    if actor.manages(business_id) {
        Ok(actor)
    } else {
        Err(deny(state, AuthDenyReason::Denied, path))
    }
}

/// Shared-secret check for cron triggers. With no secret configured the call passes outside
/// production and is refused in production.
pub fn check_cron(state: &AppState, headers: &HeaderMap, path: &str) -> Result<(), AppError> {
    let Some(secret) = state.config.cron_secret.as_deref() else {
        if state.config.is_production() {
            tracing::error!(path = %path, "CRON_SECRET is not set in production");
            return Err(deny(state, AuthDenyReason::Missing, path));
        }
        tracing::warn!(path = %path, "CRON_SECRET is not set, allowing cron call outside production");
        return Ok(());
    };

    match bearer(headers) {
        None => Err(deny(state, AuthDenyReason::Missing, path)),
        Some(token) if secrets_match(token, secret) => Ok(()),
        Some(_) => Err(deny(state, AuthDenyReason::InvalidToken, path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match("s3cret", "s3cret"));
        assert!(!secrets_match("s3cret", "s3creT"));
        assert!(!secrets_match("", "s3cret"));
    }

    #[test]
    fn test_bearer_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer(&headers), None);
        headers.insert("authorization", "Basic abc".parse().unwrap());
        assert_eq!(bearer(&headers), None);
        headers.insert("authorization", "Bearer tok".parse().unwrap());
        assert_eq!(bearer(&headers), Some("tok"));
    }
}
