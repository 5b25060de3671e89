use axum::{
    Json, Router,
    extract::State,
    http::{HeaderValue, header},
    response::IntoResponse,
    routing::{get, post},
};
use rampart::{Clock, RepositoryProvider};

use crate::{
    error::{DefenseRejection, Result},
    extractors::{AdminPrincipal, SessionIdFromCookie},
    middleware::{DefenseState, csrf_middleware},
    types::*,
};

pub fn create_router<R>(state: DefenseState<R>, protect_admin_with_csrf: bool) -> Router
where
    R: RepositoryProvider + 'static,
{
    let mut admin_routes = Router::new().route("/admin/unlock", post(unlock_handler::<R>));
    if protect_admin_with_csrf {
        admin_routes = admin_routes.layer(axum::middleware::from_fn_with_state(
            state.clone(),
            csrf_middleware::<R>,
        ));
    }

    Router::new()
        .route("/health", get(health_handler::<R>))
        .route("/csrf", get(csrf_token_handler::<R>))
        .merge(admin_routes)
        .with_state(state)
}

async fn health_handler<R>(State(state): State<DefenseState<R>>) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
{
    state.rampart.health_check().await?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

async fn csrf_token_handler<R>(
    State(state): State<DefenseState<R>>,
    SessionIdFromCookie(session_id): SessionIdFromCookie,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
{
    let session_id = session_id.ok_or(DefenseRejection::Forbidden)?;
    let csrf = state.rampart.csrf();

    Ok((
        [(header::CACHE_CONTROL, HeaderValue::from_static("no-store"))],
        Json(CsrfTokenResponse {
            token: csrf.get_or_issue(&session_id),
            header: csrf.config().header_name.clone(),
        }),
    ))
}

async fn unlock_handler<R>(
    State(state): State<DefenseState<R>>,
    AdminPrincipal(actor): AdminPrincipal,
    Json(payload): Json<UnlockRequest>,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
{
    let outcome = state
        .rampart
        .unlock_account(&payload.identifier, &actor)
        .await?;

    Ok(Json(UnlockResponse {
        identifier: outcome.identifier,
        was_locked: outcome.was_locked,
        revoked_sessions: outcome.revoked_sessions.len(),
        unlocked_at: state.rampart.clock().now(),
    }))
}
