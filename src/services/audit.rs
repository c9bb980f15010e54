use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde_json::Value;

use crate::db::queries;
use crate::errors::AuthDenyReason;
use crate::models::AuditAction;

const REDACTED: &str = "[REDACTED]";

/// Field names whose values never reach the audit table.
const PII_FIELDS: &[&str] = &[
    "phone",
    "customer_phone",
    "owner_whatsapp",
    "email",
    "customer_name",
    "name",
    "address",
    "password",
    "token",
    "owner_token",
    "reservation_token",
    "secret",
    "authorization",
];

fn is_pii_field(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    PII_FIELDS.contains(&lower.as_str())
}

/// Replace the values of deny-listed keys, recursively through objects and arrays.
pub fn redact_pii(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = if is_pii_field(k) && !v.is_null() {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact_pii(v)
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_pii).collect()),
        other => other.clone(),
    }
}

pub struct AuditRecord<'a> {
    pub actor: &'a str,
    pub action: AuditAction,
    pub entity_type: &'a str,
    pub entity_id: &'a str,
    pub old_data: Option<Value>,
    pub new_data: Option<Value>,
    pub description: Option<String>,
}

/// Append one audit entry. Runs on whatever connection or transaction it is given, so entries
/// written inside a state transition commit or roll back together with it.
pub fn record(conn: &Connection, entry: AuditRecord<'_>, now: &NaiveDateTime) -> anyhow::Result<i64> {
    let old_data = entry.old_data.as_ref().map(redact_pii);
    let new_data = entry.new_data.as_ref().map(redact_pii);

    queries::insert_audit(
        conn,
        entry.actor,
        entry.action.as_str(),
        entry.entity_type,
        entry.entity_id,
        old_data.as_ref(),
        new_data.as_ref(),
        entry.description.as_deref(),
        now,
    )
}

/// Auth-deny path: a warning with the reason code, a counter, and a best-effort audit entry.
pub fn auth_denied(conn: &Connection, reason: AuthDenyReason, path: &str, now: &NaiveDateTime) {
    tracing::warn!(reason = reason.as_str(), path = %path, "auth denied");
    metrics::counter!(crate::observability::AUTH_DENIED_TOTAL, "reason" => reason.as_str())
        .increment(1);

    let entry = AuditRecord {
        actor: "anonymous",
        action: AuditAction::AuthDenied,
        entity_type: "route",
        entity_id: path,
        old_data: None,
        new_data: None,
        description: Some(reason.as_str().to_string()),
    };
    if let Err(e) = record(conn, entry, now) {
        tracing::error!(error = %e, "failed to write auth-deny audit entry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use serde_json::json;

    #[test]
    fn test_redacts_nested_pii() {
        let input = json!({
            "status": "pending",
            "customer_phone": "+15550001111",
            "customer": { "name": "Alice", "email": "a@example.com", "visits": 3 },
            "history": [{ "phone": "+1555" }, { "status": "confirmed" }],
            "notes": null
        });
        let out = redact_pii(&input);
        assert_eq!(out["status"], "pending");
        assert_eq!(out["customer_phone"], REDACTED);
        assert_eq!(out["customer"]["name"], REDACTED);
        assert_eq!(out["customer"]["email"], REDACTED);
        assert_eq!(out["customer"]["visits"], 3);
        assert_eq!(out["history"][0]["phone"], REDACTED);
        assert_eq!(out["history"][1]["status"], "confirmed");
        assert!(out["notes"].is_null());
    }

    #[test]
    fn test_field_match_is_case_insensitive() {
        let out = redact_pii(&json!({ "Authorization": "Bearer x" }));
        assert_eq!(out["Authorization"], REDACTED);
    }

    #[test]
    fn test_record_is_redacted_and_append_only() {
        let conn = db::init_db(":memory:").unwrap();
        let now = chrono::Utc::now().naive_utc();
        let id = record(
            &conn,
            AuditRecord {
                actor: "admin",
                action: AuditAction::BookingCancelled,
                entity_type: "booking",
                entity_id: "b-1",
                old_data: Some(json!({ "status": "confirmed" })),
                new_data: Some(json!({ "status": "cancelled", "customer_phone": "+1555" })),
                description: None,
            },
            &now,
        )
        .unwrap();

        let entries = queries::audit_for_entity(&conn, "booking", "b-1").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[0].action, "booking.cancelled");
        let new_data = entries[0].new_data.as_ref().unwrap();
        assert_eq!(new_data["customer_phone"], REDACTED);

        assert!(conn
            .execute("UPDATE audit_logs SET actor = 'mallory' WHERE id = ?1", [id])
            .is_err());
        assert!(conn
            .execute("DELETE FROM audit_logs WHERE id = ?1", [id])
            .is_err());
    }
}
