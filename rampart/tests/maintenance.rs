mod common;

use std::collections::HashMap;

use chrono::Duration;
use rampart::{CachedResponse, CallerScope, Clock, IdempotencyKey, RequestFingerprint, SessionRecord};
use rampart_core::repositories::{SessionRepository, SessionRepositoryProvider};

#[tokio::test]
async fn test_sweep_once_expires_every_kind_of_state() {
    let harness = common::harness().await;
    let rampart = &harness.rampart;
    let now = harness.clock.now();

    rampart.record_attempt("203.0.113.7", "login", false);
    rampart.csrf().issue("sess-1");
    rampart
        .idempotency()
        .execute(
            &IdempotencyKey::parse("order-1").unwrap(),
            &CallerScope::new("tenant-A"),
            &RequestFingerprint::new("POST", "/orders", ""),
            || async { CachedResponse::new(201, b"{}".to_vec()) },
        )
        .await;
    rampart
        .repositories()
        .session()
        .create(SessionRecord {
            id: "sess-1".to_string(),
            identifier: "alice@example.com".to_string(),
            created_at: now,
            expires_at: now + Duration::hours(1),
        })
        .await
        .unwrap();

    harness.clock.advance(Duration::hours(25));

    let removed: HashMap<_, _> = rampart
        .sweep_once()
        .await
        .into_iter()
        .map(|report| (report.task, report.removed.unwrap()))
        .collect();

    assert_eq!(removed["rate_limit"], 1);
    assert_eq!(removed["csrf"], 1);
    assert_eq!(removed["idempotency"], 1);
    assert_eq!(removed["sessions"], 1);
    assert_eq!(removed["lockout"], 0);
    assert!(rampart.rate_limiter().is_empty());
    assert!(rampart.csrf().is_empty());
}

#[tokio::test]
async fn test_sweep_keeps_live_state() {
    let harness = common::harness().await;
    let rampart = &harness.rampart;

    rampart.record_attempt("203.0.113.7", "login", false);
    rampart.csrf().issue("sess-1");
    for _ in 0..5 {
        rampart
            .lockout()
            .record_failure("alice@example.com", None)
            .await
            .unwrap();
    }

    let reports = rampart.sweep_once().await;
    assert!(reports.iter().all(|r| matches!(r.removed, Ok(0))));
    assert_eq!(rampart.rate_limiter().len(), 1);
    assert_eq!(rampart.csrf().len(), 1);
    assert!(rampart.lockout().is_locked("alice@example.com").await);
}

#[tokio::test]
async fn test_stale_lockout_rows_are_purged_after_retention() {
    let harness = common::harness().await;
    let rampart = &harness.rampart;

    rampart
        .lockout()
        .record_failure("bob@example.com", None)
        .await
        .unwrap();
    harness.clock.advance(Duration::days(8));

    let reports = rampart.sweep_once().await;
    let lockout = reports.iter().find(|r| r.task == "lockout").unwrap();
    assert!(matches!(lockout.removed, Ok(1)));
    assert_eq!(
        rampart
            .lockout_status("bob@example.com")
            .await
            .unwrap()
            .failed_attempts,
        0
    );
}
