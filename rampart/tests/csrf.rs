mod common;

use chrono::Duration;
use rampart::{CsrfError, CsrfRequest, Event};

#[tokio::test]
async fn test_token_rejected_after_expiry() {
    let harness = common::harness().await;
    let csrf = harness.rampart.csrf();

    let token = csrf.issue("sess-1");
    assert!(csrf.verify("sess-1", &token));

    harness.clock.advance(Duration::milliseconds(3_700_000));
    assert!(!csrf.verify("sess-1", &token));
}

#[tokio::test]
async fn test_safe_methods_skip_validation() {
    let harness = common::harness().await;

    for method in ["GET", "HEAD", "OPTIONS"] {
        let request = CsrfRequest {
            method,
            path: "/account",
            token: Some("garbage"),
        };
        let validation = harness.rampart.validate_csrf(&request, None).await;
        assert!(validation.valid);
    }
    assert!(harness.events.events().is_empty());
}

#[tokio::test]
async fn test_rejection_publishes_event() {
    let harness = common::harness().await;
    harness.rampart.csrf().issue("sess-1");

    let request = CsrfRequest {
        method: "POST",
        path: "/invoices",
        token: Some("forged"),
    };
    let validation = harness.rampart.validate_csrf(&request, Some("sess-1")).await;
    assert!(!validation.valid);
    assert_eq!(validation.error, Some(CsrfError::InvalidToken));

    match harness.events.events().as_slice() {
        [Event::CsrfRejected { method, path, .. }] => {
            assert_eq!(method, "POST");
            assert_eq!(path, "/invoices");
        }
        other => panic!("unexpected events {other:?}"),
    }
}

#[tokio::test]
async fn test_valid_token_passes() {
    let harness = common::harness().await;
    let token = harness.rampart.csrf().get_or_issue("sess-1");

    let request = CsrfRequest {
        method: "DELETE",
        path: "/invoices/7",
        token: Some(&token),
    };
    assert!(
        harness
            .rampart
            .validate_csrf(&request, Some("sess-1"))
            .await
            .valid
    );
}
