#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rampart::{Event, EventHandler, ManualClock, Rampart, RampartBuilder, SqliteRepositoryProvider};
use rampart_core::error::EventError;
use sqlx::sqlite::SqlitePoolOptions;

/// A migrated in-memory database behind a single connection.
pub async fn memory_pool() -> sqlx::SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to connect to SQLite")
}

#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(Event::name).collect()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle_event(&self, event: &Event) -> Result<(), EventError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub struct Harness {
    pub rampart: Rampart<SqliteRepositoryProvider>,
    pub clock: ManualClock,
    pub events: Arc<RecordingHandler>,
    pub pool: sqlx::SqlitePool,
}

pub async fn harness() -> Harness {
    let pool = memory_pool().await;
    let clock = ManualClock::starting_now();
    let events = Arc::new(RecordingHandler::default());

    let rampart = RampartBuilder::new()
        .with_sqlite_pool(pool.clone())
        .with_clock(Arc::new(clock.clone()))
        .with_event_handler(events.clone())
        .apply_migrations(true)
        .build()
        .await
        .expect("Failed to build Rampart");

    Harness {
        rampart,
        clock,
        events,
        pool,
    }
}
