mod common;

use axum::{
    Extension, Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use rampart_axum::AdminPrincipal;
use serde_json::json;

use common::{body_json, harness, send};

const ALICE: &str = "alice@example.com";

fn unlock_request(csrf_token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/admin/unlock")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::COOKIE, "session_id=ops-session");
    if let Some(token) = csrf_token {
        builder = builder.header("x-csrf-token", token);
    }
    builder
        .body(Body::from(json!({ "identifier": ALICE }).to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let harness = harness().await;
    let app = rampart_axum::routes(harness.rampart.clone()).build();

    let response = send(
        &app,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "healthy");
}

#[tokio::test]
async fn test_csrf_token_for_cookie_session() {
    let harness = harness().await;
    let app: Router = rampart_axum::routes(harness.rampart.clone()).into();

    let request = Request::builder()
        .uri("/csrf")
        .header(header::COOKIE, "session_id=sess-1")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");

    let body = body_json(response).await;
    assert_eq!(body["header"], "x-csrf-token");
    let token = body["token"].as_str().unwrap();
    assert!(harness.rampart.csrf().verify("sess-1", token));

    let again = send(
        &app,
        Request::builder()
            .uri("/csrf")
            .header(header::COOKIE, "session_id=sess-1")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(body_json(again).await["token"], token);
}

#[tokio::test]
async fn test_csrf_token_requires_session() {
    let harness = harness().await;
    let app = rampart_axum::routes(harness.rampart.clone()).build();

    let response = send(
        &app,
        Request::builder().uri("/csrf").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unlock_requires_admin_principal() {
    let harness = harness().await;
    let app = rampart_axum::routes(harness.rampart.clone())
        .without_admin_csrf()
        .build();

    let response = send(&app, unlock_request(None)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        body_json(response).await,
        json!({"error": "Forbidden", "code": 403})
    );
}

#[tokio::test]
async fn test_admin_unlock() {
    let harness = harness().await;
    let rampart = &harness.rampart;
    for _ in 0..5 {
        rampart.lockout().record_failure(ALICE, None).await.unwrap();
    }
    assert!(rampart.lockout().is_locked(ALICE).await);

    let app = rampart_axum::routes(rampart.clone())
        .build()
        .layer(Extension(AdminPrincipal("ops@example.com".to_string())));
    let token = rampart.csrf().issue("ops-session");

    let response = send(&app, unlock_request(Some(&token))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["identifier"], ALICE);
    assert_eq!(body["was_locked"], true);
    assert!(!rampart.lockout().is_locked(ALICE).await);
}

#[tokio::test]
async fn test_admin_unlock_checks_csrf() {
    let harness = harness().await;
    let app = rampart_axum::routes(harness.rampart.clone())
        .build()
        .layer(Extension(AdminPrincipal("ops@example.com".to_string())));

    let response = send(&app, unlock_request(None)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
