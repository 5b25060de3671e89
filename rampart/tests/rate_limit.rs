mod common;

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Duration;
use rampart::{Clock, Event, LoginAttempt};

const CLIENT: &str = "203.0.113.7";

#[tokio::test]
async fn test_five_failures_block_for_thirty_minutes() {
    let harness = common::harness().await;
    let rampart = &harness.rampart;
    let now = harness.clock.now();

    for _ in 0..5 {
        assert!(rampart.check_rate_limit(CLIENT, "login").await.allowed);
        rampart.record_attempt(CLIENT, "login", false);
    }

    let decision = rampart.check_rate_limit(CLIENT, "login").await;
    assert!(!decision.allowed);
    assert_eq!(decision.remaining_attempts, 0);
    assert_eq!(
        decision.blocked_until,
        Some(now + Duration::milliseconds(1_800_000))
    );
    assert_eq!(decision.retry_after_seconds(now), Some(1800));
}

#[tokio::test]
async fn test_block_emits_one_event() {
    let harness = common::harness().await;
    let rampart = &harness.rampart;

    for _ in 0..5 {
        rampart.record_attempt(CLIENT, "login", false);
    }
    assert!(!rampart.check_rate_limit(CLIENT, "login").await.allowed);
    assert!(!rampart.check_rate_limit(CLIENT, "login").await.allowed);

    let blocks: Vec<_> = harness
        .events
        .events()
        .into_iter()
        .filter(|e| matches!(e, Event::RateLimited { .. }))
        .collect();
    assert_eq!(blocks.len(), 1);
    match &blocks[0] {
        Event::RateLimited {
            action, client_key, ..
        } => {
            assert_eq!(action, "login");
            assert_eq!(client_key, CLIENT);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_block_lifts_after_duration() {
    let harness = common::harness().await;
    let rampart = &harness.rampart;

    for _ in 0..5 {
        rampart.record_attempt(CLIENT, "login", false);
    }
    assert!(!rampart.check_rate_limit(CLIENT, "login").await.allowed);

    harness.clock.advance(Duration::minutes(31));
    let decision = rampart.check_rate_limit(CLIENT, "login").await;
    assert!(decision.allowed);
    assert_eq!(decision.remaining_attempts, 5);
}

#[tokio::test]
async fn test_successful_login_resets_attempts() {
    let harness = common::harness().await;
    let rampart = &harness.rampart;

    for _ in 0..4 {
        rampart.record_attempt(CLIENT, "login", false);
    }
    assert_eq!(
        rampart
            .check_rate_limit(CLIENT, "login")
            .await
            .remaining_attempts,
        1
    );

    rampart.record_attempt(CLIENT, "login", true);
    assert_eq!(
        rampart
            .check_rate_limit(CLIENT, "login")
            .await
            .remaining_attempts,
        5
    );
}

#[tokio::test]
async fn test_clients_and_actions_are_independent() {
    let harness = common::harness().await;
    let rampart = &harness.rampart;

    for _ in 0..5 {
        rampart.record_attempt(CLIENT, "login", false);
    }
    assert!(!rampart.check_rate_limit(CLIENT, "login").await.allowed);
    assert!(rampart.check_rate_limit("198.51.100.1", "login").await.allowed);
    assert!(rampart.check_rate_limit(CLIENT, "register").await.allowed);
}

#[tokio::test]
async fn test_authenticate_skips_credentials_when_rate_limited() {
    let harness = common::harness().await;
    let rampart = &harness.rampart;

    for _ in 0..5 {
        rampart.record_attempt(CLIENT, "login", false);
    }

    let polled = AtomicBool::new(false);
    let attempt = rampart
        .authenticate("alice@example.com", CLIENT, async {
            polled.store(true, Ordering::SeqCst);
            Ok(true)
        })
        .await
        .unwrap();

    assert!(matches!(attempt, LoginAttempt::RateLimited(d) if !d.allowed));
    assert!(!polled.load(Ordering::SeqCst));
}
