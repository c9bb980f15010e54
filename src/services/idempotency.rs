use std::future::Future;
use std::sync::Arc;

use base64::Engine;
use chrono::{Duration, NaiveDateTime};
use dashmap::DashMap;
use rusqlite::Connection;
use sha1::{Digest, Sha1};
use tokio::sync::OnceCell;

use crate::db::queries;
use crate::models::IdempotencyRecord;

/// A finished HTTP outcome that can be replayed byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
    pub status: u16,
    pub body: String,
}

pub enum Lookup {
    Miss,
    Replay(StoredResponse),
    /// The key was already used for a different request.
    Mismatch,
}

/// Fingerprint of the logical operation a key is bound to.
pub fn request_fingerprint(method: &str, path: &str, body: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(method.as_bytes());
    hasher.update(b"\n");
    hasher.update(path.as_bytes());
    hasher.update(b"\n");
    hasher.update(body);
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

pub fn lookup(
    conn: &Connection,
    scope: &str,
    key: &str,
    fingerprint: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<Lookup> {
    match queries::find_idempotency(conn, scope, key, now)? {
        None => Ok(Lookup::Miss),
        Some(record) if record.request_hash != fingerprint => Ok(Lookup::Mismatch),
        Some(record) => Ok(Lookup::Replay(StoredResponse {
            status: record.response_status,
            body: record.response_body,
        })),
    }
}

/// Persist an outcome. Server errors are not stored so the client can retry them.
pub fn store(
    conn: &Connection,
    scope: &str,
    key: &str,
    fingerprint: &str,
    response: &StoredResponse,
    ttl: Duration,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    if response.status >= 500 {
        return Ok(false);
    }
    queries::insert_idempotency(
        conn,
        &IdempotencyRecord {
            scope: scope.to_string(),
            key: key.to_string(),
            request_hash: fingerprint.to_string(),
            response_status: response.status,
            response_body: response.body.clone(),
            created_at: *now,
            expires_at: *now + ttl,
        },
    )
}

pub fn prune_expired(conn: &Connection, now: &NaiveDateTime) -> anyhow::Result<usize> {
    queries::delete_expired_idempotency(conn, now)
}

/// In-flight request coalescing. Concurrent callers with the same key await one shared
/// computation; once it finishes the entry is dropped and the next call runs again.
///
/// Process-local only. Across instances, the persisted idempotency keys are the guarantee.
pub struct InFlight<T> {
    entries: DashMap<String, Arc<OnceCell<T>>>,
}

impl<T: Clone> Default for InFlight<T> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<T: Clone> InFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run<F, Fut>(&self, key: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        // The shard guard is released before awaiting.
        let cell = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let value = cell.get_or_init(f).await.clone();

        self.entries
            .remove_if(key, |_, current| Arc::ptr_eq(current, &cell));
        value
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
