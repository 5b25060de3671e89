//! Tests for the Rampart builder pattern

mod common;

use rampart::{LockoutConfig, RampartBuilder, RampartBuilderError};

#[tokio::test]
async fn test_builder_with_sqlite() {
    let rampart = RampartBuilder::new()
        .with_sqlite("sqlite::memory:")
        .await
        .expect("Failed to connect to SQLite")
        .apply_migrations(true)
        .build()
        .await
        .expect("Failed to build Rampart");

    rampart.health_check().await.expect("Health check failed");
}

#[tokio::test]
async fn test_builder_with_sqlite_pool() {
    let pool = common::memory_pool().await;

    let rampart = RampartBuilder::new()
        .with_sqlite_pool(pool)
        .apply_migrations(true)
        .build()
        .await
        .expect("Failed to build Rampart");

    rampart.health_check().await.expect("Health check failed");
    assert!(
        !rampart
            .lockout_status("alice@example.com")
            .await
            .unwrap()
            .is_locked
    );
}

#[tokio::test]
async fn test_builder_manual_migration() {
    let pool = common::memory_pool().await;
    let rampart = RampartBuilder::new()
        .with_sqlite_pool(pool)
        .build()
        .await
        .expect("Failed to build Rampart");

    // Tables do not exist yet
    assert!(rampart.lockout_status("alice@example.com").await.is_err());

    rampart.migrate().await.expect("Migration failed");
    rampart
        .lockout_status("alice@example.com")
        .await
        .expect("Status should work after migration");
}

#[tokio::test]
async fn test_builder_rejects_invalid_lockout_config() {
    let result = RampartBuilder::new()
        .with_sqlite_pool(common::memory_pool().await)
        .with_lockout(LockoutConfig {
            max_failed_attempts: 0,
            ..LockoutConfig::default()
        })
        .build()
        .await;

    assert!(matches!(
        result,
        Err(RampartBuilderError::InvalidConfiguration(_))
    ));
}

#[tokio::test]
async fn test_builder_bad_url() {
    let result = RampartBuilder::new()
        .with_sqlite("sqlite:///nonexistent-dir/for/rampart/test.db")
        .await;
    assert!(matches!(
        result,
        Err(RampartBuilderError::StorageConnection(_))
    ));
}

#[tokio::test]
async fn test_start_and_stop_maintenance() {
    let harness = common::harness().await;
    let rampart = &harness.rampart;

    assert!(!rampart.is_running().await);
    rampart.start().await;
    assert!(rampart.is_running().await);

    // Starting twice keeps the one task
    rampart.start().await;
    assert!(rampart.is_running().await);

    rampart.stop().await;
    assert!(!rampart.is_running().await);
}
