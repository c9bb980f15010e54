pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod observability;
pub mod services;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route(
            "/businesses/:id/availability",
            get(handlers::slots::availability),
        )
        .route("/slots/:id/reserve", post(handlers::slots::reserve))
        .route("/slots/:id/release", post(handlers::slots::release))
        .route("/bookings", post(handlers::bookings::create_booking))
        .route("/bookings/expire", post(handlers::cron::legacy_expire_bookings))
        .route("/bookings/:id", get(handlers::bookings::get_booking))
        .route(
            "/bookings/:id/confirm",
            post(handlers::bookings::confirm_booking),
        )
        .route("/bookings/:id/reject", post(handlers::bookings::reject_booking))
        .route("/bookings/:id/cancel", post(handlers::bookings::cancel_booking))
        .route("/bookings/:id/no-show", post(handlers::bookings::mark_no_show))
        .route(
            "/bookings/:id/calendar.ics",
            get(handlers::calendar::download_ics),
        )
        .route(
            "/bookings/:id/payments",
            post(handlers::payments::create_payment),
        )
        .route(
            "/payments/:id/status",
            post(handlers::payments::update_payment_status),
        )
        .route("/cron/expire-bookings", post(handlers::cron::expire_bookings))
        .route(
            "/cron/cleanup-reservations",
            post(handlers::cron::cleanup_reservations),
        )
        .route(
            "/cron/prune-idempotency-keys",
            post(handlers::cron::prune_idempotency_keys),
        )
        .route("/cron/purge-bookings", post(handlers::cron::purge_bookings))
        .route("/admin/bookings", get(handlers::admin::list_bookings))
        .route(
            "/admin/bookings/:id/lifecycle",
            get(handlers::admin::booking_lifecycle),
        )
        .route("/admin/cron-runs", get(handlers::admin::list_cron_runs))
        .route("/admin/businesses", post(handlers::admin::create_business))
        .route(
            "/admin/businesses/:id/closures",
            post(handlers::admin::add_closure),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
