use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use super::common::*;
use crate::requests::domain::RequestStatus;
use crate::requests::request_router;

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request builds")
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::post(uri).body(Body::empty()).expect("request builds")
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).expect("request builds")
}

fn booking_payload() -> serde_json::Value {
    json!({
        "professional_ref": "p1",
        "scheduled_date": "2024-05-01",
        "scheduled_time": "14:00",
        "address": "123 Main"
    })
}

#[tokio::test(start_paused = true)]
async fn submit_route_returns_pending_view() {
    let (desk, store) = build_desk();
    let router = request_router(desk);

    let response = router
        .oneshot(post_json("/api/v1/requests", booking_payload()))
        .await
        .expect("route responds");

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = read_json_body(response).await;
    assert_eq!(body["id"], "r1");
    assert_eq!(body["status"], "pending");
    assert_eq!(body["scheduled_time"], "14:00");
    assert_eq!(store.create_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn resent_token_collapses_and_tokenless_posts_do_not() {
    let (desk, store) = build_desk();
    let router = request_router(desk);
    let mut with_token = booking_payload();
    with_token["idempotency_token"] = json!("6f1c2e1a-8d44-4c3b-9a57-0b7e6d2f9c10");

    let mut ids = Vec::new();
    for _ in 0..2 {
        let response = router
            .clone()
            .oneshot(post_json("/api/v1/requests", with_token.clone()))
            .await
            .expect("route responds");
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        ids.push(read_json_body(response).await["id"].clone());
    }
    assert_eq!(ids[0], ids[1]);
    assert_eq!(store.create_calls(), 1);

    for _ in 0..2 {
        let response = router
            .clone()
            .oneshot(post_json("/api/v1/requests", booking_payload()))
            .await
            .expect("route responds");
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
    assert_eq!(store.create_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn submit_route_lists_missing_fields() {
    let (desk, store) = build_desk();
    let router = request_router(desk);

    let response = router
        .oneshot(post_json(
            "/api/v1/requests",
            json!({ "professional_ref": "p1", "address": " " }),
        ))
        .await
        .expect("route responds");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = read_json_body(response).await;
    assert_eq!(
        body["missing"],
        json!(["scheduled_date", "scheduled_time", "address"])
    );
    assert_eq!(store.create_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn listing_arms_the_dwell_timer() {
    let (desk, store) = build_desk();
    let router = request_router(desk.clone());

    router
        .clone()
        .oneshot(post_json("/api/v1/requests", booking_payload()))
        .await
        .expect("submit responds");

    for _ in 0..3 {
        let response = router
            .clone()
            .oneshot(get("/api/v1/requests"))
            .await
            .expect("list responds");
        assert_eq!(response.status(), StatusCode::OK);
    }
    elapse_dwell().await;

    let response = router
        .oneshot(get("/api/v1/requests"))
        .await
        .expect("list responds");
    let body = read_json_body(response).await;
    assert_eq!(body["requests"][0]["status"], "accepted");
    assert_eq!(store.updates().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn explicit_reject_wins_over_the_timer() {
    let (desk, store) = build_desk();
    let router = request_router(desk);

    router
        .clone()
        .oneshot(post_json("/api/v1/requests", booking_payload()))
        .await
        .expect("submit responds");
    router
        .clone()
        .oneshot(get("/api/v1/requests"))
        .await
        .expect("list responds");

    let response = router
        .clone()
        .oneshot(post_empty("/api/v1/requests/r1/reject"))
        .await
        .expect("reject responds");
    assert_eq!(response.status(), StatusCode::OK);
    elapse_dwell().await;

    assert_eq!(store.status_of("r1"), Some(RequestStatus::Rejected));

    let response = router
        .oneshot(post_empty("/api/v1/requests/r1/accept"))
        .await
        .expect("accept responds");
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(store.updates().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unknown_request_is_not_found() {
    let (desk, _) = build_desk();
    let router = request_router(desk);

    let response = router
        .oneshot(get("/api/v1/requests/r404"))
        .await
        .expect("route responds");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn get_route_observes_and_reports_settled_status() {
    let (desk, _) = build_desk();
    let router = request_router(desk);

    router
        .clone()
        .oneshot(post_json("/api/v1/requests", booking_payload()))
        .await
        .expect("submit responds");
    let response = router
        .clone()
        .oneshot(get("/api/v1/requests/r1"))
        .await
        .expect("get responds");
    assert_eq!(read_json_body(response).await["status"], "pending");

    elapse_dwell().await;
    let response = router
        .oneshot(get("/api/v1/requests/r1"))
        .await
        .expect("get responds");
    assert_eq!(read_json_body(response).await["status"], "accepted");
}
