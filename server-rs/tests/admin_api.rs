use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use listing_moderation::config::Config;
use listing_moderation::middleware::auth::issue_access_token;
use listing_moderation::models::{ListingRecord, ReviewRecord, ReviewStatus};
use listing_moderation::store::MemoryStore;
use listing_moderation::{build_router, AppState};

const SECRET: &str = "integration-secret";

struct Harness {
    store: MemoryStore,
    router: Router,
}

async fn harness_with(config: Config) -> Harness {
    let store = MemoryStore::new();
    store.insert_listing(&ListingRecord::new("L")).await;
    store.insert_review(&ReviewRecord::new("A", "L", 4)).await;
    store.insert_review(&ReviewRecord::new("B", "L", 2)).await;

    let state = AppState::new(config, Arc::new(store.clone()), None);
    Harness {
        store,
        router: build_router(state),
    }
}

async fn harness() -> Harness {
    harness_with(Config::for_tests(SECRET)).await
}

fn token(role: Option<&str>) -> String {
    issue_access_token("mod-1", role, SECRET, 600).unwrap()
}

fn moderator() -> String {
    token(Some("moderator"))
}

async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(t) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {t}"));
    }
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn assert_rating(body: &Value, avg: f64, count: u64) {
    let actual_avg = body["ratingAvg"].as_f64().unwrap();
    assert!((actual_avg - avg).abs() < 1e-9, "avg {actual_avg} != {avg}");
    assert_eq!(body["ratingCount"].as_u64(), Some(count));
}

#[tokio::test]
async fn approve_and_reject_update_listing_rating() {
    let h = harness().await;
    let t = moderator();

    let (status, body) = send(&h.router, Method::POST, "/api/v1/admin/reviews/A/approve", Some(&t), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "approved");
    assert_eq!(body["listingId"], "L");
    assert_rating(&body, 4.0, 1);

    let (_, body) = send(&h.router, Method::POST, "/api/v1/admin/reviews/B/approve", Some(&t), None).await;
    assert_rating(&body, 3.0, 2);

    let (status, body) = send(
        &h.router,
        Method::POST,
        "/api/v1/admin/reviews/A/reject",
        Some(&t),
        Some(json!({"reason": "Duplicate"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "rejected");
    assert_rating(&body, 2.0, 1);

    let review = h.store.review("A").await.unwrap();
    assert_eq!(review.status, ReviewStatus::Rejected);
    assert_eq!(review.rejection_reason.as_deref(), Some("Duplicate"));
    assert_eq!(review.moderated_by.as_deref(), Some("mod-1"));

    let (status, body) = send(&h.router, Method::GET, "/api/v1/listings/L/rating", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["listingId"], "L");
    assert_rating(&body, 2.0, 1);
}

#[tokio::test]
async fn reject_without_body_stores_empty_reason() {
    let h = harness().await;
    let (status, body) = send(&h.router, Method::POST, "/api/v1/admin/reviews/B/reject", Some(&moderator()), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "rejected");
    assert_rating(&body, 0.0, 0);
    assert_eq!(h.store.review("B").await.unwrap().rejection_reason.as_deref(), Some(""));
}

#[tokio::test]
async fn moderate_endpoint_validates_decision() {
    let h = harness().await;
    let t = moderator();

    let (status, body) = send(
        &h.router,
        Method::POST,
        "/api/v1/admin/reviews/A/moderate",
        Some(&t),
        Some(json!({"decision": "delete"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("delete"));

    let (status, body) = send(
        &h.router,
        Method::POST,
        "/api/v1/admin/reviews/A/moderate",
        Some(&t),
        Some(json!({"decision": "approve"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_rating(&body, 4.0, 1);
}

#[tokio::test]
async fn repeated_approval_is_idempotent_over_http() {
    let h = harness().await;
    let t = moderator();
    for _ in 0..3 {
        let (status, body) = send(&h.router, Method::POST, "/api/v1/admin/reviews/A/approve", Some(&t), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_rating(&body, 4.0, 1);
    }
}

#[tokio::test]
async fn unknown_review_is_404() {
    let h = harness().await;
    let uri = format!("/api/v1/admin/reviews/{}/approve", Uuid::new_v4());
    let (status, body) = send(&h.router, Method::POST, &uri, Some(&moderator()), None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn unknown_listing_rating_is_404() {
    let h = harness().await;
    let (status, _) = send(&h.router, Method::GET, "/api/v1/listings/nope/rating", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn moderation_requires_authenticated_moderator() {
    let h = harness().await;
    let uri = "/api/v1/admin/reviews/A/approve";

    let (status, _) = send(&h.router, Method::POST, uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&h.router, Method::POST, uri, Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&h.router, Method::POST, uri, Some(&token(Some("member"))), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&h.router, Method::POST, uri, Some(&token(None)), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    assert_eq!(h.store.review("A").await.unwrap().status, ReviewStatus::Pending);
}

#[tokio::test]
async fn storage_failure_is_retryable_503() {
    let h = harness().await;
    h.store.fail_next_commit();

    let (status, body) = send(&h.router, Method::POST, "/api/v1/admin/reviews/A/approve", Some(&moderator()), None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["retryable"], true);
    assert_eq!(h.store.review("A").await.unwrap().status, ReviewStatus::Pending);
}

#[tokio::test]
async fn moderation_is_rate_limited_per_moderator() {
    let mut config = Config::for_tests(SECRET);
    config.rate_limit.max_requests = 2;
    let h = harness_with(config).await;
    let t = moderator();

    for _ in 0..2 {
        let (status, _) = send(&h.router, Method::POST, "/api/v1/admin/reviews/A/approve", Some(&t), None).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, _) = send(&h.router, Method::POST, "/api/v1/admin/reviews/A/approve", Some(&t), None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn health_reports_store_without_cache() {
    let h = harness().await;
    let (status, body) = send(&h.router, Method::GET, "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"], true);
    assert!(body["redis"].is_null());
}
