mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{Duration, Utc};
use rampart::{Clock, CredentialCheck, DefenseError, LoginAttempt, RampartError, SessionRecord};
use rampart_core::repositories::{SessionRepository, SessionRepositoryProvider};

const ALICE: &str = "alice@example.com";
const PASSWORD: &str = "correct horse battery staple";

async fn check_password(given: &str) -> Result<bool, rampart_core::Error> {
    Ok(given == PASSWORD)
}

#[tokio::test]
async fn test_lock_reject_correct_password_then_unlock() {
    let harness = common::harness().await;
    let lockout = harness.rampart.lockout();

    for attempt in 1..=5 {
        let check = lockout
            .verify_credentials(ALICE, Some("203.0.113.7"), check_password("wrong"))
            .await
            .unwrap();
        assert_eq!(
            check,
            CredentialCheck::InvalidCredentials {
                failed_attempts: attempt,
                locked: attempt == 5,
            }
        );
    }
    assert!(lockout.is_locked(ALICE).await);

    // The correct password is rejected while locked, without being checked
    let checked = AtomicUsize::new(0);
    let check = lockout
        .verify_credentials(ALICE, None, async {
            checked.fetch_add(1, Ordering::SeqCst);
            check_password(PASSWORD).await
        })
        .await
        .unwrap();
    assert!(matches!(check, CredentialCheck::Locked { locked_until: Some(_) }));
    assert_eq!(checked.load(Ordering::SeqCst), 0);

    harness
        .rampart
        .unlock_account(ALICE, "admin@example.com")
        .await
        .unwrap();
    assert!(!lockout.is_locked(ALICE).await);

    let check = lockout
        .verify_credentials(ALICE, None, check_password(PASSWORD))
        .await
        .unwrap();
    assert_eq!(check, CredentialCheck::Verified);
}

#[tokio::test]
async fn test_lock_survives_restart() {
    let pool = common::memory_pool().await;
    let first = rampart::RampartBuilder::new()
        .with_sqlite_pool(pool.clone())
        .apply_migrations(true)
        .build()
        .await
        .unwrap();
    for _ in 0..5 {
        first.lockout().record_failure(ALICE, None).await.unwrap();
    }
    drop(first);

    let second = rampart::RampartBuilder::new()
        .with_sqlite_pool(pool)
        .build()
        .await
        .unwrap();
    assert!(second.lockout().is_locked(ALICE).await);
}

#[tokio::test]
async fn test_identifier_is_normalised() {
    let harness = common::harness().await;
    let lockout = harness.rampart.lockout();

    for _ in 0..5 {
        lockout
            .record_failure("  Alice@Example.COM ", None)
            .await
            .unwrap();
    }
    assert!(lockout.is_locked(ALICE).await);
}

#[tokio::test]
async fn test_lock_expires() {
    let harness = common::harness().await;
    let lockout = harness.rampart.lockout();

    for _ in 0..5 {
        lockout.record_failure(ALICE, None).await.unwrap();
    }
    let status = harness.rampart.lockout_status(ALICE).await.unwrap();
    assert_eq!(
        status.locked_until,
        Some(harness.clock.now() + Duration::minutes(15))
    );

    harness.clock.advance(Duration::minutes(15));
    assert!(!lockout.is_locked(ALICE).await);
}

#[tokio::test]
async fn test_unlock_revokes_sessions_and_csrf_tokens() {
    let harness = common::harness().await;
    let rampart = &harness.rampart;
    let sessions = rampart.repositories().session();

    let now = Utc::now();
    for id in ["sess-1", "sess-2"] {
        sessions
            .create(SessionRecord {
                id: id.to_string(),
                identifier: ALICE.to_string(),
                created_at: now,
                expires_at: now + Duration::hours(1),
            })
            .await
            .unwrap();
    }
    let token = rampart.csrf().issue("sess-1");
    let other = rampart.csrf().issue("sess-bob");

    for _ in 0..5 {
        rampart.lockout().record_failure(ALICE, None).await.unwrap();
    }

    let outcome = rampart.unlock_account(ALICE, "admin@example.com").await.unwrap();
    assert!(outcome.was_locked);
    assert_eq!(outcome.revoked_sessions.len(), 2);
    assert_eq!(sessions.count_active(ALICE, now).await.unwrap(), 0);

    assert!(!rampart.csrf().verify("sess-1", &token));
    assert!(rampart.csrf().verify("sess-bob", &other));

    let names = harness.events.names();
    assert!(names.contains(&"account_locked"));
    assert!(names.contains(&"account_unlocked"));
}

#[tokio::test]
async fn test_store_outage_fails_closed() {
    let harness = common::harness().await;
    harness.pool.close().await;

    assert!(harness.rampart.lockout().is_locked(ALICE).await);

    let attempt = harness
        .rampart
        .authenticate(ALICE, "203.0.113.7", check_password(PASSWORD))
        .await
        .unwrap();
    assert!(matches!(
        attempt,
        LoginAttempt::Checked(CredentialCheck::Locked { locked_until: None })
    ));

    let err = harness
        .rampart
        .unlock_account(ALICE, "admin@example.com")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RampartError::Defense(DefenseError::DurableStoreUnavailable(_))
    ));
}

#[tokio::test]
async fn test_authenticate_rejects_locked_account_from_any_client() {
    let harness = common::harness().await;
    let rampart = &harness.rampart;

    for _ in 0..5 {
        rampart
            .authenticate(ALICE, "203.0.113.7", check_password("wrong"))
            .await
            .unwrap();
    }

    let attempt = rampart
        .authenticate(ALICE, "198.51.100.20", check_password(PASSWORD))
        .await
        .unwrap();
    assert!(matches!(
        attempt,
        LoginAttempt::Checked(CredentialCheck::Locked { .. })
    ));
    assert!(!attempt.is_verified());
}
