//! # Rampart Axum Integration
//!
//! Axum middleware, extractors and routes for the rampart request-defense
//! layer.
//!
//! ## Middleware
//!
//! - [`csrf_middleware`]: 403 for state-changing requests without a valid token
//! - [`rate_limit_middleware`]: 429 with `Retry-After` while a client is blocked
//! - [`idempotency_middleware`]: replays stored responses for retried requests
//!
//! ## Routes
//!
//! - `GET /health`
//! - `GET /csrf`: token for the `session_id` cookie session
//! - `POST /admin/unlock`: requires an [`AdminPrincipal`] in the request extensions
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use axum::{Router, middleware::from_fn_with_state, routing::post};
//! use rampart::{RampartBuilder, SqliteRepositoryProvider};
//! use rampart_axum::{DefenseState, csrf_middleware, idempotency_middleware, rate_limit_middleware};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let rampart = Arc::new(
//!         RampartBuilder::new()
//!             .with_sqlite("sqlite://rampart.db")
//!             .await?
//!             .apply_migrations(true)
//!             .build()
//!             .await?,
//!     );
//!     rampart.start().await;
//!
//!     let state = DefenseState::new(rampart.clone());
//!     type Store = SqliteRepositoryProvider;
//!
//!     let app = Router::new()
//!         .route("/login", post(login_handler))
//!         .layer(from_fn_with_state(state.for_action("login"), rate_limit_middleware::<Store>))
//!         .route("/orders", post(create_order))
//!         .layer(from_fn_with_state(state.clone(), idempotency_middleware::<Store>))
//!         .layer(from_fn_with_state(state.clone(), csrf_middleware::<Store>))
//!         .nest("/defense", rampart_axum::routes(rampart).build());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//!
//! async fn login_handler() -> &'static str { "welcome" }
//! async fn create_order() -> &'static str { "created" }
//! ```

mod error;
mod extractors;
mod middleware;
mod routes;
mod types;

pub use error::{DefenseRejection, Result};
pub use extractors::{AdminPrincipal, ClientKey, OptionalCallerScope, SessionIdFromCookie};
pub use middleware::{
    DEFAULT_MAX_BODY_BYTES, DefenseState, IDEMPOTENCY_KEY_HEADER, IDEMPOTENT_REPLAYED_HEADER,
    RateLimitState, csrf_middleware, idempotency_middleware, rate_limit_middleware,
};
pub use routes::create_router;
pub use types::{
    ClientKeyConfig, ClientKeySource, CsrfTokenResponse, ErrorBody, HealthResponse,
    UnlockRequest, UnlockResponse,
};

use axum::Router;
use rampart::{Rampart, RepositoryProvider};
use std::sync::Arc;

/// Create the rampart routes for your Axum application.
///
/// The returned router can be nested at any path, e.g. `/defense`.
pub fn routes<R>(rampart: Arc<Rampart<R>>) -> DefenseRouterBuilder<R>
where
    R: RepositoryProvider + 'static,
{
    DefenseRouterBuilder {
        state: DefenseState::new(rampart),
        csrf_on_admin: true,
    }
}

/// Builder for configuring the rampart routes
pub struct DefenseRouterBuilder<R: RepositoryProvider> {
    state: DefenseState<R>,
    csrf_on_admin: bool,
}

impl<R: RepositoryProvider + 'static> DefenseRouterBuilder<R> {
    pub fn with_client_keys(mut self, config: ClientKeyConfig) -> Self {
        self.state = self.state.with_client_keys(config);
        self
    }

    /// Skip CSRF validation on the admin routes, for deployments where
    /// operators authenticate with bearer tokens rather than cookies.
    pub fn without_admin_csrf(mut self) -> Self {
        self.csrf_on_admin = false;
        self
    }

    /// Build the router with the configured options
    pub fn build(self) -> Router {
        create_router(self.state, self.csrf_on_admin)
    }
}

impl<R: RepositoryProvider + 'static> From<DefenseRouterBuilder<R>> for Router {
    fn from(builder: DefenseRouterBuilder<R>) -> Self {
        builder.build()
    }
}
