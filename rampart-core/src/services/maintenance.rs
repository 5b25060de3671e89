//! Background expiry of defense state.
//!
//! Every service that accumulates state implements [`Sweep`]. A
//! [`Maintenance`] runner owns a list of sweeps and, once started, runs them
//! on a fixed interval until its [`MaintenanceHandle`] is stopped.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    Error,
    clock::Clock,
    config::MaintenanceConfig,
    repositories::{IdempotencyRepository, LockoutRepository, SessionRepository},
    services::{CsrfService, IdempotencyService, LockoutService, RateLimiter},
};

/// One incremental expiry pass over a piece of state.
#[async_trait]
pub trait Sweep: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Remove expired entries, returning how many were removed.
    async fn sweep(&self) -> Result<u64, Error>;
}

#[async_trait]
impl Sweep for RateLimiter {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn sweep(&self) -> Result<u64, Error> {
        Ok(RateLimiter::sweep(self) as u64)
    }
}

#[async_trait]
impl Sweep for CsrfService {
    fn name(&self) -> &'static str {
        "csrf"
    }

    async fn sweep(&self) -> Result<u64, Error> {
        Ok(CsrfService::sweep(self) as u64)
    }
}

#[async_trait]
impl<R: LockoutRepository, S: SessionRepository> Sweep for LockoutService<R, S> {
    fn name(&self) -> &'static str {
        "lockout"
    }

    async fn sweep(&self) -> Result<u64, Error> {
        self.purge_stale().await
    }
}

#[async_trait]
impl<R: IdempotencyRepository> Sweep for IdempotencyService<R> {
    fn name(&self) -> &'static str {
        "idempotency"
    }

    async fn sweep(&self) -> Result<u64, Error> {
        self.purge_expired().await
    }
}

/// Deletes expired rows from the session table.
pub struct SessionCleanup<S: SessionRepository> {
    sessions: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: SessionRepository> SessionCleanup<S> {
    pub fn new(sessions: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { sessions, clock }
    }
}

#[async_trait]
impl<S: SessionRepository> Sweep for SessionCleanup<S> {
    fn name(&self) -> &'static str {
        "sessions"
    }

    async fn sweep(&self) -> Result<u64, Error> {
        self.sessions.cleanup_expired(self.clock.now()).await
    }
}

/// Result of one sweep within a pass.
#[derive(Debug)]
pub struct SweepReport {
    pub task: &'static str,
    pub removed: Result<u64, Error>,
}

/// Runs registered sweeps.
#[derive(Clone)]
pub struct Maintenance {
    tasks: Vec<Arc<dyn Sweep>>,
    config: MaintenanceConfig,
}

impl std::fmt::Debug for Maintenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.tasks.iter().map(|t| t.name()).collect();
        f.debug_struct("Maintenance")
            .field("tasks", &names)
            .field("config", &self.config)
            .finish()
    }
}

impl Maintenance {
    pub fn new(config: MaintenanceConfig) -> Self {
        Self {
            tasks: Vec::new(),
            config,
        }
    }

    pub fn with_task(mut self, task: Arc<dyn Sweep>) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn tasks(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tasks.iter().map(|t| t.name())
    }

    /// Run every sweep once. A failing sweep does not stop the others.
    pub async fn run_once(&self) -> Vec<SweepReport> {
        let mut reports = Vec::with_capacity(self.tasks.len());
        for task in &self.tasks {
            let removed = task.sweep().await;
            match &removed {
                Ok(count) if *count > 0 => {
                    tracing::debug!(task = task.name(), count, "Sweep removed expired entries");
                }
                Err(e) => {
                    tracing::warn!(task = task.name(), error = %e, "Sweep failed");
                }
                _ => {}
            }
            reports.push(SweepReport {
                task: task.name(),
                removed,
            });
        }
        reports
    }

    /// Spawn the periodic sweep loop.
    pub fn start(self) -> MaintenanceHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let interval = self.config.interval;

        let task = tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            // The first tick completes immediately.
            interval_timer.tick().await;

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        self.run_once().await;
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!("Shutting down maintenance task");
                        break;
                    }
                }
            }
        });

        MaintenanceHandle { shutdown, task }
    }
}

/// Handle to a running [`Maintenance`] loop.
#[derive(Debug)]
pub struct MaintenanceHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the loop to stop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Maintenance task ended abnormally");
        }
    }
}
