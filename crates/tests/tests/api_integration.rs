use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use concierge_api::{build_app_with, ApiConfig};
use concierge_core::chat::GREETING;
use concierge_core::weather::default_packing;
use concierge_providers::Providers;
use serde_json::{json, Value};
use tower::ServiceExt;

const API_KEY: &str = "dev-concierge-key";

async fn app() -> Router {
    build_app_with(ApiConfig::default(), Providers::offline(false))
        .await
        .expect("app should build")
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-api-key", API_KEY)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let response = app()
        .await
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["providers"]["tavily"], false);
}

#[tokio::test]
async fn concierge_requires_api_key() {
    let request = Request::builder()
        .method("POST")
        .uri("/v1/concierge")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "booking": {"location": "Paris, FR", "start_date": "2024-06-01", "end_date": "2024-06-02"}
            })
            .to_string(),
        ))
        .unwrap();

    let response = app().await.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn allowed_origin_skips_api_key() {
    let request = Request::builder()
        .method("POST")
        .uri("/v1/concierge/chat")
        .header("content-type", "application/json")
        .header("origin", "http://localhost:3000")
        .body(Body::from(json!({"messages": []}).to_string()))
        .unwrap();

    let response = app().await.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn concierge_returns_heuristic_plan_offline() {
    let response = app()
        .await
        .oneshot(post_json(
            "/v1/concierge",
            json!({
                "booking": {"location": "Paris, FR", "start_date": "2024-06-01", "end_date": "2024-06-02"},
                "prefs": {"budget": "mid", "interests": ["museums"]}
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;

    let plan = body["plan"].as_array().unwrap();
    assert_eq!(plan.len(), 2);
    assert_eq!(plan[0]["date"], "2024-06-01");
    for day in plan {
        for block in ["morning", "afternoon", "evening"] {
            assert!(day[block].as_array().unwrap().is_empty());
        }
    }
    assert!(body["restaurants"].as_array().unwrap().is_empty());
    assert_eq!(body["packing_checklist"], json!(default_packing()));
    assert!(body["reasoning_notes"]
        .as_array()
        .unwrap()
        .iter()
        .any(|note| note.as_str().unwrap_or_default().contains("heuristic")));
}

#[tokio::test]
async fn reversed_dates_are_a_client_error() {
    let response = app()
        .await
        .oneshot(post_json(
            "/v1/concierge",
            json!({
                "booking": {"location": "Paris, FR", "start_date": "2024-06-05", "end_date": "2024-06-01"}
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid_date_range");
}

#[tokio::test]
async fn stays_beyond_thirty_days_are_a_client_error() {
    let response = app()
        .await
        .oneshot(post_json(
            "/v1/concierge",
            json!({
                "booking": {"location": "Paris, FR", "start_date": "2024-01-01", "end_date": "2124-01-01"}
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "invalid_booking");
    assert!(body["message"].as_str().unwrap().contains("30-day limit"));
}

#[tokio::test]
async fn unknown_booking_is_not_found() {
    let response = app()
        .await
        .oneshot(post_json(
            "/v1/concierge",
            json!({
                "booking": {"booking_id": 404, "start_date": "2024-06-01", "end_date": "2024-06-02"}
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"], "booking_not_found");
}

#[tokio::test]
async fn malformed_body_is_a_client_error() {
    let request = Request::builder()
        .method("POST")
        .uri("/v1/concierge")
        .header("content-type", "application/json")
        .header("x-api-key", API_KEY)
        .body(Body::from("{not json"))
        .unwrap();

    let response = app().await.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid_request");
}

#[tokio::test]
async fn chat_greets_on_empty_transcript() {
    let response = app()
        .await
        .oneshot(post_json("/v1/concierge/chat", json!({"messages": []})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["reply"], GREETING);
}

#[tokio::test]
async fn legacy_chat_requires_booking() {
    let response = app()
        .await
        .oneshot(post_json("/v1/chat", json!({"message": "plan my stay"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid_booking");
}

#[tokio::test]
async fn history_without_booking_is_empty() {
    let request = Request::builder()
        .uri("/v1/history")
        .header("x-api-key", API_KEY)
        .body(Body::empty())
        .unwrap();

    let response = app().await.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["history"], json!([]));
}

#[tokio::test]
async fn rate_limit_rejects_excess_requests() {
    let config = ApiConfig {
        rate_limit_window: Duration::from_secs(60),
        rate_limit_max: 2,
        ..ApiConfig::default()
    };
    let app = build_app_with(config, Providers::offline(false))
        .await
        .expect("app should build");

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}
