use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use salonbook::config::AppConfig;
use salonbook::db;
use salonbook::services::messaging::MessagingProvider;
use salonbook::state::AppState;

// ── Mock Providers ──

struct MockMessaging {
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl MessagingProvider for MockMessaging {
    async fn send_message(&self, to: &str, body: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));
        Ok(())
    }
}

/// Never answers, like a provider stuck behind a dead connection.
struct SilentMessaging;

#[async_trait]
impl MessagingProvider for SilentMessaging {
    async fn send_message(&self, _to: &str, _body: &str) -> anyhow::Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

// ── Helpers ──

type Sent = Arc<Mutex<Vec<(String, String)>>>;

const ADMIN: &str = "test-admin-token";
const CRON: &str = "test-cron-secret";
const CUSTOMER: &str = "+15550001111";

fn test_config() -> AppConfig {
    AppConfig {
        admin_token: ADMIN.to_string(),
        cron_secret: Some(CRON.to_string()),
        ..AppConfig::default()
    }
}

fn test_state_with_config(config: AppConfig) -> (Arc<AppState>, Sent) {
    let conn = db::init_db(":memory:").unwrap();
    let sent = Arc::new(Mutex::new(vec![]));
    let messaging = MockMessaging {
        sent: Arc::clone(&sent),
    };
    (
        Arc::new(AppState::new(conn, config, Box::new(messaging))),
        sent,
    )
}

fn test_state() -> Arc<AppState> {
    test_state_with_config(test_config()).0
}

fn app(state: &Arc<AppState>) -> Router {
    salonbook::router(Arc::clone(state))
}

fn tomorrow() -> String {
    (chrono::Utc::now().date_naive() + chrono::Duration::days(1))
        .format("%Y-%m-%d")
        .to_string()
}

fn request(method: &str, uri: &str, auth: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = auth {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(state: &Arc<AppState>, req: Request<Body>) -> Response {
    app(state).oneshot(req).await.unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn json_body(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Create a salon open 09:00-12:00 in 30 minute slots. Returns `(business_id, owner_token)`.
async fn create_salon(state: &Arc<AppState>) -> (String, String) {
    let response = send(
        state,
        request(
            "POST",
            "/admin/businesses",
            Some(ADMIN),
            Some(json!({
                "name": "Studio Nine",
                "opening_time": "09:00",
                "closing_time": "12:00",
                "slot_duration_minutes": 30,
                "owner_whatsapp": "+15559999999"
            })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    (
        body["business"]["id"].as_str().unwrap().to_string(),
        body["owner_token"].as_str().unwrap().to_string(),
    )
}

async fn availability(state: &Arc<AppState>, business_id: &str) -> Vec<Value> {
    let response = send(
        state,
        request(
            "GET",
            &format!("/businesses/{business_id}/availability?date={}", tomorrow()),
            None,
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    json_body(response).await["slots"].as_array().unwrap().clone()
}

async fn first_slot(state: &Arc<AppState>, business_id: &str) -> String {
    availability(state, business_id).await[0]["id"]
        .as_str()
        .unwrap()
        .to_string()
}

fn booking_request(slot_id: &str, idempotency_key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/bookings")
        .header("Content-Type", "application/json");
    if let Some(key) = idempotency_key {
        builder = builder.header("Idempotency-Key", key);
    }
    builder
        .body(Body::from(
            json!({
                "slot_id": slot_id,
                "customer_name": "Ana",
                "customer_phone": CUSTOMER,
            })
            .to_string(),
        ))
        .unwrap()
}

async fn create_booking(state: &Arc<AppState>, slot_id: &str) -> Value {
    let response = send(state, booking_request(slot_id, None)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    json_body(response).await
}

/// Messages go out in the background; wait until at least `n` have been sent.
async fn wait_for_messages(sent: &Sent, n: usize) -> Vec<(String, String)> {
    for _ in 0..200 {
        {
            let sent = sent.lock().unwrap();
            if sent.len() >= n {
                return sent.clone();
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {n} messages, got {}", sent.lock().unwrap().len());
}

fn count(state: &Arc<AppState>, sql: &str) -> i64 {
    let db = state.db.lock().unwrap();
    db.query_row(sql, [], |row| row.get(0)).unwrap()
}

// ── Health ──

#[tokio::test]
async fn test_health() {
    let state = test_state();
    let response = send(&state, request("GET", "/health", None, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
}

// ── Availability ──

#[tokio::test]
async fn test_availability_generates_slots_once() {
    let state = test_state();
    let (business_id, _) = create_salon(&state).await;

    let first = availability(&state, &business_id).await;
    assert_eq!(first.len(), 6);
    assert_eq!(first[0]["start_time"], "09:00:00");
    assert_eq!(first[5]["end_time"], "12:00:00");

    let second = availability(&state, &business_id).await;
    assert_eq!(first, second);
    assert_eq!(count(&state, "SELECT COUNT(*) FROM slots"), 6);
}

#[tokio::test]
async fn test_availability_requires_valid_date() {
    let state = test_state();
    let (business_id, _) = create_salon(&state).await;

    for uri in [
        format!("/businesses/{business_id}/availability"),
        format!("/businesses/{business_id}/availability?date=15-03-2025"),
    ] {
        let response = send(&state, request("GET", &uri, None, None)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    let response = send(
        &state,
        request(
            "GET",
            &format!("/businesses/nope/availability?date={}", tomorrow()),
            None,
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_full_day_closure_hides_slots() {
    let state = test_state();
    let (business_id, owner_token) = create_salon(&state).await;

    let response = send(
        &state,
        request(
            "POST",
            &format!("/admin/businesses/{business_id}/closures"),
            Some(owner_token.as_str()),
            Some(json!({ "date": tomorrow(), "reason": "holiday" })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    assert!(availability(&state, &business_id).await.is_empty());
}

// ── Reservations ──

#[tokio::test]
async fn test_reserve_then_conflict() {
    let state = test_state();
    let (business_id, _) = create_salon(&state).await;
    let slot_id = first_slot(&state, &business_id).await;
    let uri = format!("/slots/{slot_id}/reserve");

    let response = send(&state, request("POST", &uri, None, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["slot_id"], slot_id.as_str());
    assert!(body["reservation_token"].as_str().is_some());

    let response = send(&state, request("POST", &uri, None, None)).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["code"], "SLOT_NOT_AVAILABLE");

    let response = send(&state, request("POST", "/slots/missing/reserve", None, None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_concurrent_reserves_have_one_winner() {
    let state = test_state();
    let (business_id, _) = create_salon(&state).await;
    let slot_id = first_slot(&state, &business_id).await;

    let mut handles = vec![];
    for _ in 0..8 {
        let state = Arc::clone(&state);
        let uri = format!("/slots/{slot_id}/reserve");
        handles.push(tokio::spawn(async move {
            send(&state, request("POST", &uri, None, None)).await.status()
        }));
    }

    let mut statuses = vec![];
    for handle in handles {
        statuses.push(handle.await.unwrap());
    }
    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::OK).count(), 1);
    assert_eq!(
        statuses.iter().filter(|s| **s == StatusCode::CONFLICT).count(),
        7
    );
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let state = test_state();
    let (business_id, _) = create_salon(&state).await;
    let slot_id = first_slot(&state, &business_id).await;

    send(
        &state,
        request("POST", &format!("/slots/{slot_id}/reserve"), None, None),
    )
    .await;

    let uri = format!("/slots/{slot_id}/release");
    let response = send(&state, request("POST", &uri, None, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["released"], true);

    let response = send(&state, request("POST", &uri, None, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["released"], false);

    let response = send(&state, request("POST", "/slots/missing/release", None, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_reserve_is_rate_limited() {
    let config = AppConfig {
        rate_limit_max_requests: 2,
        ..test_config()
    };
    let (state, _) = test_state_with_config(config);
    let (business_id, _) = create_salon(&state).await;
    let slots = availability(&state, &business_id).await;

    let mut last = StatusCode::OK;
    for slot in slots.iter().take(3) {
        let uri = format!("/slots/{}/reserve", slot["id"].as_str().unwrap());
        last = send(&state, request("POST", &uri, None, None)).await.status();
    }
    assert_eq!(last, StatusCode::TOO_MANY_REQUESTS);
}

// ── Bookings ──

#[tokio::test]
async fn test_booking_with_reservation_token() {
    let (state, sent) = test_state_with_config(test_config());
    let (business_id, _) = create_salon(&state).await;
    let slot_id = first_slot(&state, &business_id).await;

    let response = send(
        &state,
        request("POST", &format!("/slots/{slot_id}/reserve"), None, None),
    )
    .await;
    let token = json_body(response).await["reservation_token"]
        .as_str()
        .unwrap()
        .to_string();

    let response = send(
        &state,
        request(
            "POST",
            "/bookings",
            None,
            Some(json!({
                "slot_id": slot_id,
                "customer_name": "Ana",
                "customer_phone": CUSTOMER,
                "reservation_token": token,
            })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let booking = json_body(response).await;
    assert_eq!(booking["status"], "pending");
    assert_eq!(booking["start_time"], "09:00:00");

    let sent = wait_for_messages(&sent, 2).await;
    assert!(sent.iter().any(|(to, _)| to == CUSTOMER));
    assert!(sent.iter().any(|(to, _)| to == "+15559999999"));
}

#[tokio::test]
async fn test_idempotent_booking_replay() {
    let state = test_state();
    let (business_id, _) = create_salon(&state).await;
    let slot_id = first_slot(&state, &business_id).await;

    let first = send(&state, booking_request(&slot_id, Some("key-1"))).await;
    assert_eq!(first.status(), StatusCode::CREATED);
    assert!(first.headers().get("idempotent-replayed").is_none());
    let first_body = body_bytes(first).await;

    let second = send(&state, booking_request(&slot_id, Some("key-1"))).await;
    assert_eq!(second.status(), StatusCode::CREATED);
    assert_eq!(second.headers().get("idempotent-replayed").unwrap(), "true");
    assert_eq!(body_bytes(second).await, first_body);

    assert_eq!(count(&state, "SELECT COUNT(*) FROM bookings"), 1);
}

#[tokio::test]
async fn test_idempotency_key_reused_for_other_request() {
    let state = test_state();
    let (business_id, _) = create_salon(&state).await;
    let slots = availability(&state, &business_id).await;

    let first = send(
        &state,
        booking_request(slots[0]["id"].as_str().unwrap(), Some("key-2")),
    )
    .await;
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = send(
        &state,
        booking_request(slots[1]["id"].as_str().unwrap(), Some("key-2")),
    )
    .await;
    assert_eq!(second.status(), StatusCode::BAD_REQUEST);
    assert_eq!(count(&state, "SELECT COUNT(*) FROM bookings"), 1);
}

#[tokio::test]
async fn test_unresponsive_provider_does_not_stall_requests() {
    let conn = db::init_db(":memory:").unwrap();
    let state = Arc::new(AppState::new(conn, test_config(), Box::new(SilentMessaging)));
    let (business_id, owner_token) = create_salon(&state).await;
    let slot_id = first_slot(&state, &business_id).await;

    let response = tokio::time::timeout(
        Duration::from_secs(2),
        send(&state, booking_request(&slot_id, None)),
    )
    .await
    .expect("booking request waited on the provider");
    assert_eq!(response.status(), StatusCode::CREATED);
    let booking = json_body(response).await;

    let uri = format!("/bookings/{}/confirm", booking["id"].as_str().unwrap());
    let response = tokio::time::timeout(
        Duration::from_secs(2),
        send(&state, request("POST", &uri, Some(owner_token.as_str()), None)),
    )
    .await
    .expect("confirm request waited on the provider");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_second_booking_for_slot_conflicts() {
    let state = test_state();
    let (business_id, _) = create_salon(&state).await;
    let slot_id = first_slot(&state, &business_id).await;

    create_booking(&state, &slot_id).await;
    let response = send(&state, booking_request(&slot_id, None)).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_confirm_is_idempotent() {
    let state = test_state();
    let (business_id, owner_token) = create_salon(&state).await;
    let slot_id = first_slot(&state, &business_id).await;
    let booking = create_booking(&state, &slot_id).await;
    let uri = format!("/bookings/{}/confirm", booking["id"].as_str().unwrap());

    let first = send(&state, request("POST", &uri, Some(owner_token.as_str()), None)).await;
    assert_eq!(first.status(), StatusCode::OK);
    let first = json_body(first).await;
    assert_eq!(first["status"], "confirmed");

    let second = send(&state, request("POST", &uri, Some(owner_token.as_str()), None)).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(json_body(second).await, first);

    let slots = availability(&state, &business_id).await;
    assert_eq!(slots[0]["status"], "booked");
    assert_eq!(
        count(
            &state,
            "SELECT COUNT(*) FROM audit_logs WHERE action = 'booking.confirmed'"
        ),
        1
    );
}

#[tokio::test]
async fn test_idempotency_key_is_bound_to_caller() {
    let state = test_state();
    let (business_id, owner_token) = create_salon(&state).await;
    let (_, other_owner) = create_salon(&state).await;
    let slot_id = first_slot(&state, &business_id).await;
    let booking = create_booking(&state, &slot_id).await;
    let uri = format!("/bookings/{}/confirm", booking["id"].as_str().unwrap());
    let confirm = |token: &str| {
        Request::builder()
            .method("POST")
            .uri(&uri)
            .header("Authorization", format!("Bearer {token}"))
            .header("Idempotency-Key", "k-1")
            .body(Body::empty())
            .unwrap()
    };

    let response = send(&state, confirm(owner_token.as_str())).await;
    assert_eq!(response.status(), StatusCode::OK);

    // Same key, same body, different salon: no replay of the first owner's response.
    let response = send(&state, confirm(other_owner.as_str())).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(response.headers().get("idempotent-replayed").is_none());
    assert_eq!(json_body(response).await["code"], "auth_denied");
    assert_eq!(
        count(&state, "SELECT COUNT(*) FROM audit_logs WHERE action = 'auth.denied'"),
        1
    );
}

#[tokio::test]
async fn test_customer_cancels_own_booking() {
    let state = test_state();
    let (business_id, _) = create_salon(&state).await;
    let slot_id = first_slot(&state, &business_id).await;
    let booking = create_booking(&state, &slot_id).await;
    let uri = format!("/bookings/{}/cancel", booking["id"].as_str().unwrap());

    let response = send(
        &state,
        Request::builder()
            .method("POST")
            .uri(&uri)
            .header("x-customer-phone", "+15550002222")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = send(
        &state,
        Request::builder()
            .method("POST")
            .uri(&uri)
            .header("x-customer-phone", CUSTOMER)
            .header("Content-Type", "application/json")
            .body(Body::from(json!({ "reason": "sick" }).to_string()))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "cancelled");
    assert_eq!(body["cancellation_reason"], "sick");

    assert_eq!(availability(&state, &business_id).await[0]["status"], "available");
}

#[tokio::test]
async fn test_reject_after_confirm_is_invalid() {
    let state = test_state();
    let (business_id, owner_token) = create_salon(&state).await;
    let slot_id = first_slot(&state, &business_id).await;
    let booking = create_booking(&state, &slot_id).await;
    let id = booking["id"].as_str().unwrap();

    send(
        &state,
        request("POST", &format!("/bookings/{id}/confirm"), Some(owner_token.as_str()), None),
    )
    .await;
    let response = send(
        &state,
        request("POST", &format!("/bookings/{id}/reject"), Some(owner_token.as_str()), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["code"], "INVALID_STATE");
}

// ── Auth ──

#[tokio::test]
async fn test_auth_failures() {
    let state = test_state();
    let (business_id, _) = create_salon(&state).await;
    let slot_id = first_slot(&state, &business_id).await;
    let booking = create_booking(&state, &slot_id).await;
    let uri = format!("/bookings/{}/confirm", booking["id"].as_str().unwrap());

    let response = send(&state, request("POST", &uri, None, None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["code"], "auth_missing");

    let response = send(&state, request("POST", &uri, Some("own_bogus"), None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["code"], "auth_invalid_token");

    // The owner of another salon may not touch this booking.
    let (_, other_owner) = create_salon(&state).await;
    let response = send(&state, request("POST", &uri, Some(other_owner.as_str()), None)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["code"], "auth_denied");

    let response = send(&state, request("GET", "/admin/bookings", Some(other_owner.as_str()), None)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    assert_eq!(
        count(&state, "SELECT COUNT(*) FROM audit_logs WHERE action = 'auth.denied'"),
        4
    );
    assert_eq!(
        count(&state, "SELECT COUNT(*) FROM bookings WHERE status = 'pending'"),
        1
    );
}

#[tokio::test]
async fn test_get_booking_visibility() {
    let state = test_state();
    let (business_id, owner_token) = create_salon(&state).await;
    let slot_id = first_slot(&state, &business_id).await;
    let booking = create_booking(&state, &slot_id).await;
    let uri = format!("/bookings/{}", booking["id"].as_str().unwrap());

    let response = send(
        &state,
        Request::builder()
            .uri(&uri)
            .header("x-customer-phone", CUSTOMER)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&state, request("GET", &uri, Some(owner_token.as_str()), None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(
        &state,
        Request::builder()
            .uri(&uri)
            .header("x-customer-phone", "+15550003333")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

// ── Cron ──

#[tokio::test]
async fn test_cron_requires_secret() {
    let state = test_state();
    let (business_id, _) = create_salon(&state).await;
    let slot_id = first_slot(&state, &business_id).await;
    create_booking(&state, &slot_id).await;
    {
        let db = state.db.lock().unwrap();
        db.execute(
            "UPDATE bookings SET created_at = '2000-01-01 00:00:00'",
            [],
        )
        .unwrap();
    }

    for uri in ["/cron/expire-bookings", "/bookings/expire"] {
        let response = send(&state, request("POST", uri, None, None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = send(&state, request("POST", uri, Some("wrong"), None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["code"], "auth_invalid_token");
    }

    assert_eq!(count(&state, "SELECT COUNT(*) FROM cron_runs"), 0);
    assert_eq!(
        count(&state, "SELECT COUNT(*) FROM bookings WHERE status = 'pending'"),
        1
    );
}

#[tokio::test]
async fn test_expire_skips_confirmed_bookings() {
    let (state, sent) = test_state_with_config(test_config());
    let (business_id, owner_token) = create_salon(&state).await;
    let slots = availability(&state, &business_id).await;
    let stale = create_booking(&state, slots[0]["id"].as_str().unwrap()).await;
    let confirmed = create_booking(&state, slots[1]["id"].as_str().unwrap()).await;
    let fresh = create_booking(&state, slots[2]["id"].as_str().unwrap()).await;

    send(
        &state,
        request(
            "POST",
            &format!("/bookings/{}/confirm", confirmed["id"].as_str().unwrap()),
            Some(owner_token.as_str()),
            None,
        ),
    )
    .await;
    {
        let db = state.db.lock().unwrap();
        db.execute(
            "UPDATE bookings SET created_at = '2000-01-01 00:00:00' WHERE id IN (?1, ?2)",
            [
                stale["id"].as_str().unwrap(),
                confirmed["id"].as_str().unwrap(),
            ],
        )
        .unwrap();
    }
    // Three requests and one confirmation, each messaging the customer, plus the owner alerts.
    let sent_before = wait_for_messages(&sent, 7).await.len();

    let response = send(&state, request("POST", "/cron/expire-bookings", Some(CRON), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = json_body(response).await;
    assert_eq!(outcome["job"], "expire-bookings");
    assert_eq!(outcome["summary"]["expired"], 1);
    assert_eq!(outcome["summary"]["booking_ids"][0], stale["id"]);

    let status_of = |id: &Value| {
        let db = state.db.lock().unwrap();
        db.query_row(
            "SELECT status FROM bookings WHERE id = ?1",
            [id.as_str().unwrap()],
            |row| row.get::<_, String>(0),
        )
        .unwrap()
    };
    assert_eq!(status_of(&stale["id"]), "expired");
    assert_eq!(status_of(&confirmed["id"]), "confirmed");
    assert_eq!(status_of(&fresh["id"]), "pending");

    let slots = availability(&state, &business_id).await;
    assert_eq!(slots[0]["status"], "available");
    assert_eq!(slots[1]["status"], "booked");

    let messages = wait_for_messages(&sent, sent_before + 1).await;
    assert_eq!(messages.len(), sent_before + 1);
    assert!(messages[sent_before].1.contains("expired"));

    let response = send(
        &state,
        request("GET", "/admin/cron-runs?job=expire-bookings", Some(ADMIN), None),
    )
    .await;
    let runs = json_body(response).await;
    assert_eq!(runs["items"][0]["status"], "succeeded");
}

// ── Admin ──

#[tokio::test]
async fn test_lifecycle_is_ordered() {
    let state = test_state();
    let (business_id, owner_token) = create_salon(&state).await;
    let slot_id = first_slot(&state, &business_id).await;
    let booking = create_booking(&state, &slot_id).await;
    let id = booking["id"].as_str().unwrap();

    send(
        &state,
        request("POST", &format!("/bookings/{id}/confirm"), Some(owner_token.as_str()), None),
    )
    .await;
    send(
        &state,
        request("POST", &format!("/bookings/{id}/no-show"), Some(owner_token.as_str()), None),
    )
    .await;

    let response = send(
        &state,
        request("GET", &format!("/admin/bookings/{id}/lifecycle"), Some(ADMIN), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["current_status"], "cancelled");
    let actions: Vec<&str> = body["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap())
        .collect();
    assert_eq!(
        actions,
        vec!["booking.created", "booking.confirmed", "booking.no_show"]
    );

    let response = send(
        &state,
        request("GET", "/admin/bookings/missing/lifecycle", Some(ADMIN), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_lists_bookings_by_status() {
    let state = test_state();
    let (business_id, owner_token) = create_salon(&state).await;
    let slots = availability(&state, &business_id).await;
    let first = create_booking(&state, slots[0]["id"].as_str().unwrap()).await;
    create_booking(&state, slots[1]["id"].as_str().unwrap()).await;

    send(
        &state,
        request(
            "POST",
            &format!("/bookings/{}/confirm", first["id"].as_str().unwrap()),
            Some(owner_token.as_str()),
            None,
        ),
    )
    .await;

    let response = send(
        &state,
        request("GET", "/admin/bookings?status=confirmed", Some(ADMIN), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let page = json_body(response).await;
    assert_eq!(page["items"].as_array().unwrap().len(), 1);
    assert_eq!(page["items"][0]["id"], first["id"]);
    assert_eq!(page["limit"], 50);

    let response = send(
        &state,
        request("GET", "/admin/bookings?status=bogus", Some(ADMIN), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ── Calendar & payments ──

#[tokio::test]
async fn test_calendar_only_for_confirmed() {
    let state = test_state();
    let (business_id, owner_token) = create_salon(&state).await;
    let slot_id = first_slot(&state, &business_id).await;
    let booking = create_booking(&state, &slot_id).await;
    let id = booking["id"].as_str().unwrap();
    let uri = format!("/bookings/{id}/calendar.ics");

    let response = send(&state, request("GET", &uri, None, None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    send(
        &state,
        request("POST", &format!("/bookings/{id}/confirm"), Some(owner_token.as_str()), None),
    )
    .await;
    let response = send(&state, request("GET", &uri, None, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/calendar; charset=utf-8"
    );
    let text = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(text.contains("BEGIN:VCALENDAR"));
    assert!(text.contains("Studio Nine"));
}

#[tokio::test]
async fn test_payment_flow() {
    let state = test_state();
    let (business_id, _) = create_salon(&state).await;
    let slot_id = first_slot(&state, &business_id).await;
    let booking = create_booking(&state, &slot_id).await;
    let uri = format!("/bookings/{}/payments", booking["id"].as_str().unwrap());

    let response = send(
        &state,
        Request::builder()
            .method("POST")
            .uri(&uri)
            .header("x-customer-phone", CUSTOMER)
            .header("Content-Type", "application/json")
            .body(Body::from(json!({ "amount_cents": 4500 }).to_string()))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let payment = json_body(response).await;
    assert_eq!(payment["status"], "created");

    let status_uri = format!("/payments/{}/status", payment["id"].as_str().unwrap());
    let response = send(
        &state,
        request("POST", &status_uri, Some(ADMIN), Some(json!({ "status": "succeeded" }))),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let updated = json_body(response).await;
    assert_eq!(updated["status"], "succeeded");
    assert!(updated["verified_at"].is_string());

    // Payments never move the booking.
    assert_eq!(
        count(&state, "SELECT COUNT(*) FROM bookings WHERE status = 'pending'"),
        1
    );
}
