#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, Response},
};
use rampart::{ManualClock, Rampart, RampartBuilder, SqliteRepositoryProvider};
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use tower::ServiceExt;

pub type Store = SqliteRepositoryProvider;

pub struct Harness {
    pub rampart: Arc<Rampart<Store>>,
    pub clock: ManualClock,
}

pub async fn harness() -> Harness {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to connect to SQLite");
    let clock = ManualClock::starting_now();

    let rampart = RampartBuilder::new()
        .with_sqlite_pool(pool)
        .with_clock(Arc::new(clock.clone()))
        .apply_migrations(true)
        .build()
        .await
        .expect("Failed to build Rampart");

    Harness {
        rampart: Arc::new(rampart),
        clock,
    }
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
