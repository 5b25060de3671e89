mod common;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use axum::{
    Json, Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode, header},
    middleware::from_fn_with_state,
    routing::{get, post},
};
use chrono::Duration;
use rampart::CallerScope;
use rampart_axum::{
    DefenseState, IDEMPOTENT_REPLAYED_HEADER, csrf_middleware, idempotency_middleware,
    rate_limit_middleware,
};
use serde_json::json;

use common::{Store, body_bytes, body_json, harness, send};

const CLIENT: &str = "203.0.113.7";

fn login_request(password: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/login")
        .header("x-forwarded-for", CLIENT)
        .header("x-password", password)
        .body(Body::empty())
        .unwrap()
}

async fn login(headers: HeaderMap) -> StatusCode {
    match headers.get("x-password") {
        Some(password) if password == "hunter2" => StatusCode::OK,
        _ => StatusCode::UNAUTHORIZED,
    }
}

fn login_app(state: &DefenseState<Store>) -> Router {
    Router::new()
        .route("/login", post(login))
        .layer(from_fn_with_state(
            state.for_action("login"),
            rate_limit_middleware::<Store>,
        ))
}

#[tokio::test]
async fn test_rate_limit_answers_429_with_retry_after() {
    let harness = harness().await;
    let app = login_app(&DefenseState::new(harness.rampart.clone()));

    for _ in 0..5 {
        let response = send(&app, login_request("wrong")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = send(&app, login_request("hunter2")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "1800");
    assert_eq!(
        body_json(response).await,
        json!({"error": "Too many requests", "code": 429})
    );

    harness.clock.advance(Duration::minutes(31));
    let response = send(&app, login_request("hunter2")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_successful_login_clears_failures() {
    let harness = harness().await;
    let app = login_app(&DefenseState::new(harness.rampart.clone()));

    for _ in 0..4 {
        send(&app, login_request("wrong")).await;
    }
    assert_eq!(
        send(&app, login_request("hunter2")).await.status(),
        StatusCode::OK
    );

    for _ in 0..4 {
        send(&app, login_request("wrong")).await;
    }
    assert_eq!(
        send(&app, login_request("hunter2")).await.status(),
        StatusCode::OK
    );
}

#[tokio::test]
async fn test_rate_limit_is_per_client() {
    let harness = harness().await;
    let app = login_app(&DefenseState::new(harness.rampart.clone()));

    for _ in 0..6 {
        send(&app, login_request("wrong")).await;
    }

    let other = Request::builder()
        .method("POST")
        .uri("/login")
        .header("x-forwarded-for", "198.51.100.20")
        .header("x-password", "hunter2")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, other).await.status(), StatusCode::OK);
}

fn csrf_app(state: &DefenseState<Store>) -> Router {
    Router::new()
        .route("/invoices", get(|| async { "list" }).post(|| async { "created" }))
        .route("/api/webhooks/payments", post(|| async { "ack" }))
        .layer(from_fn_with_state(state.clone(), csrf_middleware::<Store>))
}

fn invoice_post(token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/invoices")
        .header(header::COOKIE, "session_id=sess-1");
    if let Some(token) = token {
        builder = builder.header("x-csrf-token", token);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_csrf_rejects_missing_and_forged_tokens() {
    let harness = harness().await;
    let app = csrf_app(&DefenseState::new(harness.rampart.clone()));
    harness.rampart.csrf().issue("sess-1");

    let response = send(&app, invoice_post(None)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        body_json(response).await,
        json!({"error": "Forbidden", "code": 403})
    );

    let response = send(&app, invoice_post(Some("forged"))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_csrf_accepts_issued_token() {
    let harness = harness().await;
    let app = csrf_app(&DefenseState::new(harness.rampart.clone()));
    let token = harness.rampart.csrf().issue("sess-1");

    let response = send(&app, invoice_post(Some(&token))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"created");
}

#[tokio::test]
async fn test_csrf_skips_safe_methods_and_exempt_paths() {
    let harness = harness().await;
    let app = csrf_app(&DefenseState::new(harness.rampart.clone()));

    let list = Request::builder()
        .uri("/invoices")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, list).await.status(), StatusCode::OK);

    let webhook = Request::builder()
        .method("POST")
        .uri("/api/webhooks/payments")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, webhook).await.status(), StatusCode::OK);
}

fn orders_app(state: &DefenseState<Store>, calls: Arc<AtomicUsize>) -> Router {
    Router::new()
        .route(
            "/orders",
            post(move |body: String| {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    (
                        StatusCode::CREATED,
                        Json(json!({"order": n, "payload": body})),
                    )
                }
            }),
        )
        .layer(from_fn_with_state(
            state.clone(),
            idempotency_middleware::<Store>,
        ))
}

fn order_request(key: Option<&str>, session: &str, body: &'static str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/orders")
        .header(header::COOKIE, format!("session_id={session}"));
    if let Some(key) = key {
        builder = builder.header("idempotency-key", key);
    }
    builder.body(Body::from(body)).unwrap()
}

#[tokio::test]
async fn test_retry_with_same_key_is_replayed() {
    let harness = harness().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let app = orders_app(&DefenseState::new(harness.rampart.clone()), calls.clone());

    let first = send(&app, order_request(Some("order-1"), "sess-1", "sku=A1")).await;
    assert_eq!(first.status(), StatusCode::CREATED);
    assert!(first.headers().get(&IDEMPOTENT_REPLAYED_HEADER).is_none());
    let first_body = body_json(first).await;

    let second = send(&app, order_request(Some("order-1"), "sess-1", "sku=A1")).await;
    assert_eq!(second.status(), StatusCode::CREATED);
    assert_eq!(second.headers()[&IDEMPOTENT_REPLAYED_HEADER], "true");
    assert_eq!(
        second.headers()[header::CONTENT_TYPE],
        "application/json"
    );
    assert_eq!(body_json(second).await, first_body);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_sessions_do_not_share_keys() {
    let harness = harness().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let app = orders_app(&DefenseState::new(harness.rampart.clone()), calls.clone());

    send(&app, order_request(Some("order-1"), "sess-1", "sku=A1")).await;
    let other = send(&app, order_request(Some("order-1"), "sess-2", "sku=A1")).await;

    assert!(other.headers().get(&IDEMPOTENT_REPLAYED_HEADER).is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_caller_scope_extension_takes_precedence() {
    let harness = harness().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let app = orders_app(&DefenseState::new(harness.rampart.clone()), calls.clone())
        .layer(axum::Extension(CallerScope::new("tenant-A")));

    send(&app, order_request(Some("order-1"), "sess-1", "sku=A1")).await;
    let replay = send(&app, order_request(Some("order-1"), "sess-2", "sku=A1")).await;

    assert_eq!(replay.headers()[&IDEMPOTENT_REPLAYED_HEADER], "true");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_key_is_derived_from_request() {
    let harness = harness().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let app = orders_app(&DefenseState::new(harness.rampart.clone()), calls.clone());

    send(&app, order_request(None, "sess-1", "sku=A1")).await;
    let replay = send(&app, order_request(None, "sess-1", "sku=A1")).await;
    assert_eq!(replay.headers()[&IDEMPOTENT_REPLAYED_HEADER], "true");

    let different = send(&app, order_request(None, "sess-1", "sku=B2")).await;
    assert!(different.headers().get(&IDEMPOTENT_REPLAYED_HEADER).is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_derived_key_covers_query_string() {
    let harness = harness().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let app = orders_app(&DefenseState::new(harness.rampart.clone()), calls.clone());

    let order = |query: &str| {
        Request::builder()
            .method("POST")
            .uri(format!("/orders?{query}"))
            .header(header::COOKIE, "session_id=sess-1")
            .body(Body::empty())
            .unwrap()
    };

    send(&app, order("sku=A1")).await;
    let other = send(&app, order("sku=B2")).await;
    assert!(other.headers().get(&IDEMPOTENT_REPLAYED_HEADER).is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let retry = send(&app, order("sku=A1")).await;
    assert_eq!(retry.headers()[&IDEMPOTENT_REPLAYED_HEADER], "true");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_invalid_key_is_rejected() {
    let harness = harness().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let app = orders_app(&DefenseState::new(harness.rampart.clone()), calls.clone());

    let response = send(&app, order_request(Some("has space"), "sess-1", "sku=A1")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let harness = harness().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let state = DefenseState::new(harness.rampart.clone()).with_max_body_bytes(8);
    let app = orders_app(&state, calls.clone());

    let response = send(
        &app,
        order_request(Some("order-1"), "sess-1", "sku=A1&quantity=1000"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_safe_methods_bypass_idempotency() {
    let harness = harness().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    let app = Router::new()
        .route(
            "/orders",
            get(move || {
                let counted = counted.clone();
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    "orders"
                }
            }),
        )
        .layer(from_fn_with_state(
            DefenseState::new(harness.rampart.clone()),
            idempotency_middleware::<Store>,
        ));

    for _ in 0..2 {
        let request = Request::builder()
            .uri("/orders")
            .header("idempotency-key", "list-1")
            .body(Body::empty())
            .unwrap();
        let response = send(&app, request).await;
        assert!(response.headers().get(&IDEMPOTENT_REPLAYED_HEADER).is_none());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
