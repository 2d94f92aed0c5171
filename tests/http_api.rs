use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use chrono::{NaiveDate, NaiveTime};
use serde_json::{Value, json};
use tower::ServiceExt;
use ulid::Ulid;

use reserva::config::CoreConfig;
use reserva::engine::Engine;
use reserva::http::{AppState, build_router};
use reserva::notify::NotifyHub;

// ── Test infrastructure ──────────────────────────────────────

const H: i64 = 3_600_000;
const M: i64 = 60_000;
const DATE: &str = "2026-03-14";

fn test_app(name: &str) -> Router {
    let dir = std::env::temp_dir().join("reserva_test_http");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{name}_{}.wal", Ulid::new()));
    let engine = Arc::new(
        Engine::new(path, Arc::new(NotifyHub::new()), CoreConfig::default()).unwrap(),
    );
    build_router(AppState { engine })
}

/// Instant `h` hours into the test date, unix ms.
fn at(h: i64) -> i64 {
    NaiveDate::from_ymd_opt(2026, 3, 14)
        .unwrap()
        .and_time(NaiveTime::MIN)
        .and_utc()
        .timestamp_millis()
        + h * H
}

async fn send(app: &Router, method: &str, path: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(path);
    let request = match body {
        Some(v) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(v.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Venue + provider + a 10:00-18:00 shift with a 13:00-14:00 break.
async fn seed(app: &Router) -> (String, String) {
    let (status, body) = send(
        app,
        "POST",
        "/venues",
        Some(json!({"name": "Kanda", "room_count": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let venue_id = body["venue_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        app,
        "POST",
        &format!("/venues/{venue_id}/providers"),
        Some(json!({"name": "Aoi"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let provider_id = body["provider_id"].as_str().unwrap().to_string();

    let (status, _) = send(
        app,
        "POST",
        &format!("/providers/{provider_id}/shifts"),
        Some(json!({
            "date": DATE,
            "start": at(10),
            "end": at(18),
            "breaks": [{"start": at(13), "end": at(14)}],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    (venue_id, provider_id)
}

fn reservation_body(venue_id: &str, provider_id: &str, start: i64, end: i64) -> Value {
    json!({
        "venue_id": venue_id,
        "provider_id": provider_id,
        "start": start,
        "end": end,
        "customer": {"name": "Aiko"},
    })
}

// ── Scenarios ────────────────────────────────────────────────

#[tokio::test]
async fn booking_inside_break_is_rejected_with_reason() {
    let app = test_app("on_break");
    let (venue_id, provider_id) = seed(&app).await;

    let (status, body) = send(
        &app,
        "POST",
        "/reservations",
        Some(reservation_body(
            &venue_id,
            &provider_id,
            at(13) + 30 * M,
            at(14) + 30 * M,
        )),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "booking_rejected");
    assert_eq!(body["reasons"], json!(["on_break"]));
}

#[tokio::test]
async fn booking_lifecycle_pending_to_declined() {
    let app = test_app("lifecycle");
    let (venue_id, provider_id) = seed(&app).await;

    let (status, body) = send(
        &app,
        "POST",
        "/reservations",
        Some(reservation_body(&venue_id, &provider_id, at(10), at(11))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "pending");
    let id = body["reservation_id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, "GET", &format!("/reservations/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");

    // pending → declined is legal
    let (status, body) = send(
        &app,
        "PATCH",
        &format!("/reservations/{id}/status"),
        Some(json!({"status": "declined"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "declined");

    // declined → confirmed is not
    let (status, body) = send(
        &app,
        "PATCH",
        &format!("/reservations/{id}/status"),
        Some(json!({"status": "confirmed"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_status_transition");

    // The row is retained for audit.
    let (status, body) = send(&app, "GET", &format!("/reservations/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["history"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn overlapping_shift_conflicts() {
    let app = test_app("shift_conflict");
    let (_, provider_id) = seed(&app).await;

    // Seeded shift covers 10:00-18:00; 11:00-13:00 collides.
    let (status, body) = send(
        &app,
        "POST",
        &format!("/providers/{provider_id}/shifts"),
        Some(json!({"date": DATE, "start": at(11), "end": at(13)})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "shift_overlaps_existing");
}

#[tokio::test]
async fn malformed_shift_window_is_bad_request() {
    let app = test_app("bad_window");
    let (_, provider_id) = seed(&app).await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/providers/{provider_id}/shifts"),
        Some(json!({"date": DATE, "start": at(12), "end": at(10)})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_time_range");
}

#[tokio::test]
async fn unknown_status_string_is_invalid_status() {
    let app = test_app("bad_status");
    let (venue_id, provider_id) = seed(&app).await;
    let (_, body) = send(
        &app,
        "POST",
        "/reservations",
        Some(reservation_body(&venue_id, &provider_id, at(10), at(11))),
    )
    .await;
    let id = body["reservation_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        "PATCH",
        &format!("/reservations/{id}/status"),
        Some(json!({"status": "paused"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_status");
}

#[tokio::test]
async fn unknown_reservation_is_not_found() {
    let app = test_app("not_found");
    let id = Ulid::new();
    let (status, body) = send(&app, "GET", &format!("/reservations/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn malformed_id_is_bad_request() {
    let app = test_app("bad_id");
    let (status, body) = send(&app, "GET", "/reservations/not-a-ulid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_id");
}

#[tokio::test]
async fn idempotency_key_replays_same_reservation() {
    let app = test_app("idempotent");
    let (venue_id, provider_id) = seed(&app).await;

    let mut body = reservation_body(&venue_id, &provider_id, at(10), at(11));
    body["idempotency_key"] = json!("client-req-7");

    let (status, first) = send(&app, "POST", "/reservations", Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, second) = send(&app, "POST", "/reservations", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["reservation_id"], second["reservation_id"]);
}

#[tokio::test]
async fn availability_calendar_and_free_views() {
    let app = test_app("availability");
    let (venue_id, provider_id) = seed(&app).await;
    send(
        &app,
        "POST",
        "/reservations",
        Some(reservation_body(&venue_id, &provider_id, at(10), at(11))),
    )
    .await;

    let (status, body) = send(
        &app,
        "GET",
        &format!("/availability/{provider_id}?from={DATE}&to={DATE}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let slots = body["days"][0]["slots"].as_array().unwrap();
    assert!(
        slots
            .iter()
            .any(|s| s["status"] == "booked" && s["start"] == json!(at(10)))
    );
    assert!(slots.iter().any(|s| s["status"] == "break"));

    let (status, body) = send(
        &app,
        "GET",
        &format!("/availability/{provider_id}?from={DATE}&to={DATE}&view=free"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let slots = body["days"][0]["slots"].as_array().unwrap();
    // 11:00-13:00 and 14:00-18:00 stay open
    assert_eq!(slots.len(), 2);
    assert_eq!(slots[0]["start"], json!(at(11)));
}

#[tokio::test]
async fn bookable_probe_reports_reasons() {
    let app = test_app("bookable");
    let (venue_id, provider_id) = seed(&app).await;

    let (status, body) = send(
        &app,
        "GET",
        &format!(
            "/bookable?venue_id={venue_id}&provider_id={provider_id}&start={}&end={}",
            at(11),
            at(12)
        ),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    let (_, body) = send(
        &app,
        "GET",
        &format!(
            "/bookable?venue_id={venue_id}&provider_id={provider_id}&start={}&end={}",
            at(13),
            at(14)
        ),
        None,
    )
    .await;
    assert_eq!(body["ok"], false);
    assert_eq!(body["reasons"], json!(["on_break"]));
}

#[tokio::test]
async fn deleted_shift_clears_availability() {
    let app = test_app("shift_delete");
    let (_, provider_id) = seed(&app).await;

    let (_, body) = send(
        &app,
        "GET",
        &format!("/providers/{provider_id}/shifts"),
        None,
    )
    .await;
    let shift_id = body["shifts"][0]["id"].as_str().unwrap().to_string();

    let (status, _) = send(&app, "DELETE", &format!("/shifts/{shift_id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = send(
        &app,
        "GET",
        &format!("/availability/{provider_id}?from={DATE}&to={DATE}&view=free"),
        None,
    )
    .await;
    assert!(body["days"][0]["slots"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn deliveries_listed_per_reservation() {
    let app = test_app("deliveries");
    let (venue_id, provider_id) = seed(&app).await;
    let (_, body) = send(
        &app,
        "POST",
        "/reservations",
        Some(reservation_body(&venue_id, &provider_id, at(10), at(11))),
    )
    .await;
    let id = body["reservation_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        "GET",
        &format!("/reservations/{id}/deliveries"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let deliveries = body["deliveries"].as_array().unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0]["channel"], "log");
    assert_eq!(deliveries[0]["status"], "pending");
}
