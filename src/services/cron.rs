use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::MissedTickBehavior;

use crate::config::AppConfig;
use crate::db::queries;
use crate::errors::AppError;
use crate::models::CronStatus;
use crate::observability::CRON_RUNS_TOTAL;
use crate::services::{bookings, idempotency, slots};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CronJob {
    ExpireBookings,
    CleanupReservations,
    PruneIdempotencyKeys,
    PurgeBookings,
}

impl CronJob {
    pub const ALL: [CronJob; 4] = [
        CronJob::ExpireBookings,
        CronJob::CleanupReservations,
        CronJob::PruneIdempotencyKeys,
        CronJob::PurgeBookings,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CronJob::ExpireBookings => "expire-bookings",
            CronJob::CleanupReservations => "cleanup-reservations",
            CronJob::PruneIdempotencyKeys => "prune-idempotency-keys",
            CronJob::PurgeBookings => "purge-bookings",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CronOutcome {
    pub run_id: i64,
    pub job: &'static str,
    pub summary: Value,
}

fn execute(
    conn: &mut Connection,
    config: &AppConfig,
    job: CronJob,
    source: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<Value> {
    let summary = match job {
        CronJob::ExpireBookings => {
            let max_age = Duration::hours(config.pending_booking_max_age_hours);
            let ids = bookings::expire_old_bookings(conn, max_age, source, now)?;
            json!({ "expired": ids.len(), "booking_ids": ids })
        }
        CronJob::CleanupReservations => {
            let ids = slots::release_expired_reservations(conn, source, now)?;
            json!({ "released": ids.len(), "slot_ids": ids })
        }
        CronJob::PruneIdempotencyKeys => {
            json!({ "pruned": idempotency::prune_expired(conn, now)? })
        }
        CronJob::PurgeBookings => {
            let retention = Duration::days(config.booking_retention_days);
            json!({ "purged": bookings::purge_old_bookings(conn, retention, now)? })
        }
    };
    Ok(summary)
}

/// Record the final state of a run. A failure here must not hide the job's own outcome, so it
/// is only logged.
fn finalize(
    conn: &Connection,
    run_id: i64,
    job: CronJob,
    status: CronStatus,
    summary: Option<&Value>,
    error: Option<&str>,
) {
    let finished_at = chrono::Utc::now().naive_utc();
    if let Err(e) = queries::finish_cron_run(conn, run_id, status, summary, error, &finished_at) {
        tracing::error!(
            run_id,
            job = job.name(),
            status = status.as_str(),
            error = %e,
            "failed to record cron run outcome"
        );
    }
    metrics::counter!(CRON_RUNS_TOTAL, "job" => job.name(), "status" => status.as_str())
        .increment(1);
}

/// Run one job inside a run-log record: `running` first, then `succeeded` or `failed`.
pub fn run_job(
    conn: &mut Connection,
    config: &AppConfig,
    job: CronJob,
    source: &str,
    now: &NaiveDateTime,
) -> Result<CronOutcome, AppError> {
    let run_id = queries::insert_cron_run(conn, job.name(), now)?;

    match execute(conn, config, job, source, now) {
        Ok(summary) => {
            finalize(conn, run_id, job, CronStatus::Succeeded, Some(&summary), None);
            tracing::info!(run_id, job = job.name(), source, summary = %summary, "cron job succeeded");
            Ok(CronOutcome {
                run_id,
                job: job.name(),
                summary,
            })
        }
        Err(e) => {
            let message = format!("{e:#}");
            finalize(conn, run_id, job, CronStatus::Failed, None, Some(&message));
            tracing::error!(run_id, job = job.name(), source, error = %message, "cron job failed");
            Err(e.into())
        }
    }
}

/// In-process alternative to an external scheduler: runs every job each `every`.
pub fn spawn_scheduler(state: Arc<AppState>, every: std::time::Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            for job in CronJob::ALL {
                let now = chrono::Utc::now().naive_utc();
                let result = state
                    .db()
                    .and_then(|mut db| run_job(&mut db, &state.config, job, "scheduler", &now));
                if let Err(e) = result {
                    tracing::warn!(job = job.name(), error = %e, "scheduled cron job did not complete");
                }
            }
        }
    })
}
