use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{HeaderName, HeaderValue, StatusCode, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use rampart::{
    CachedResponse, CallerScope, Clock, CsrfRequest, IdempotencyKey, IdempotentResponse, Rampart,
    RepositoryProvider, RequestFingerprint,
};
use rampart_core::{crypto::hash_token, services::csrf::is_safe_method};

use crate::{
    error::DefenseRejection,
    extractors::{client_key_from, session_id_from},
    types::ClientKeyConfig,
};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const IDEMPOTENT_REPLAYED_HEADER: HeaderName = HeaderName::from_static("idempotent-replayed");

/// Default cap on request bodies buffered by the idempotency middleware.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared state for the defense middleware.
pub struct DefenseState<R: RepositoryProvider> {
    pub rampart: Arc<Rampart<R>>,
    pub client_keys: ClientKeyConfig,
    /// Largest request body the idempotency middleware will buffer
    pub max_body_bytes: usize,
}

impl<R: RepositoryProvider> Clone for DefenseState<R> {
    fn clone(&self) -> Self {
        Self {
            rampart: self.rampart.clone(),
            client_keys: self.client_keys.clone(),
            max_body_bytes: self.max_body_bytes,
        }
    }
}

impl<R: RepositoryProvider> DefenseState<R> {
    pub fn new(rampart: Arc<Rampart<R>>) -> Self {
        Self {
            rampart,
            client_keys: ClientKeyConfig::default(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_client_keys(mut self, config: ClientKeyConfig) -> Self {
        self.client_keys = config;
        self
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// State for [`rate_limit_middleware`] guarding `action`.
    pub fn for_action(&self, action: impl Into<String>) -> RateLimitState<R> {
        RateLimitState {
            defense: self.clone(),
            action: action.into().into(),
        }
    }

    fn client_key(&self, parts: &Parts) -> String {
        client_key_from(&parts.headers, &parts.extensions, &self.client_keys)
    }
}

/// State for [`rate_limit_middleware`]: the defense state plus the action the
/// layered routes count against.
pub struct RateLimitState<R: RepositoryProvider> {
    pub defense: DefenseState<R>,
    pub action: Arc<str>,
}

impl<R: RepositoryProvider> Clone for RateLimitState<R> {
    fn clone(&self) -> Self {
        Self {
            defense: self.defense.clone(),
            action: self.action.clone(),
        }
    }
}

/// Reject state-changing requests without a valid CSRF token for the cookie
/// session.
pub async fn csrf_middleware<R>(
    State(state): State<DefenseState<R>>,
    request: Request,
    next: Next,
) -> Result<Response, DefenseRejection>
where
    R: RepositoryProvider,
{
    let rampart = &state.rampart;
    let method = request.method().as_str().to_string();
    let path = request.uri().path().to_string();
    let token = request
        .headers()
        .get(rampart.csrf().config().header_name.as_str())
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let session_id = session_id_from(request.headers());

    let validation = rampart
        .validate_csrf(
            &CsrfRequest {
                method: &method,
                path: &path,
                token: token.as_deref(),
            },
            session_id.as_deref(),
        )
        .await;

    if !validation.valid {
        return Err(DefenseRejection::Csrf);
    }

    Ok(next.run(request).await)
}

/// Count requests against the configured action and answer 429 while the
/// client is blocked.
///
/// The attempt is recorded after the inner service responds; a 2xx response
/// counts as a success.
pub async fn rate_limit_middleware<R>(
    State(state): State<RateLimitState<R>>,
    request: Request,
    next: Next,
) -> Result<Response, DefenseRejection>
where
    R: RepositoryProvider,
{
    let (parts, body) = request.into_parts();
    let client_key = state.defense.client_key(&parts);
    let rampart = &state.defense.rampart;

    let decision = rampart.check_rate_limit(&client_key, &state.action).await;
    if !decision.allowed {
        let retry_after_seconds = decision
            .retry_after_seconds(rampart.clock().now())
            .unwrap_or(1);
        return Err(DefenseRejection::RateLimited {
            retry_after_seconds,
        });
    }

    let response = next.run(Request::from_parts(parts, body)).await;
    rampart.record_attempt(&client_key, &state.action, response.status().is_success());
    Ok(response)
}

/// Run unsafe requests at most once per idempotency key and caller scope.
///
/// The key comes from the `Idempotency-Key` header or is derived from the
/// request itself. The scope is the [`CallerScope`] extension when the
/// application set one, otherwise the cookie session, otherwise the client
/// key. Replayed responses carry `Idempotent-Replayed: true`.
pub async fn idempotency_middleware<R>(
    State(state): State<DefenseState<R>>,
    request: Request,
    next: Next,
) -> Result<Response, DefenseRejection>
where
    R: RepositoryProvider,
{
    if is_safe_method(request.method().as_str()) {
        return Ok(next.run(request).await);
    }

    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, state.max_body_bytes)
        .await
        .map_err(|_| DefenseRejection::PayloadTooLarge)?;

    let scope = caller_scope(&state, &parts);
    let guard = state.rampart.idempotency();
    let fingerprint = RequestFingerprint::new(
        parts.method.as_str(),
        parts.uri.path(),
        parts.uri.query().unwrap_or_default(),
    );

    let key = match parts.headers.get(IDEMPOTENCY_KEY_HEADER) {
        Some(value) => {
            let raw = value
                .to_str()
                .map_err(|_| DefenseRejection::BadRequest("Invalid idempotency key".to_string()))?;
            IdempotencyKey::parse(raw).map_err(|e| DefenseRejection::BadRequest(e.to_string()))?
        }
        None => match guard.derive_key(&fingerprint, &body, &scope) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(error = %e, path = %fingerprint.path, "Could not derive idempotency key, running unprotected");
                return Ok(next.run(Request::from_parts(parts, Body::from(body))).await);
            }
        },
    };

    let response = guard
        .execute(&key, &scope, &fingerprint, move || async move {
            let response = next.run(Request::from_parts(parts, Body::from(body))).await;
            capture(response).await
        })
        .await;

    Ok(into_response(response))
}

fn caller_scope<R: RepositoryProvider>(state: &DefenseState<R>, parts: &Parts) -> CallerScope {
    if let Some(scope) = parts.extensions.get::<CallerScope>() {
        return scope.clone();
    }
    match session_id_from(&parts.headers) {
        Some(session_id) => CallerScope::new(format!("session:{}", hash_token(&session_id))),
        None => CallerScope::new(format!("client:{}", state.client_key(parts))),
    }
}

async fn capture(response: Response) -> CachedResponse {
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    match axum::body::to_bytes(response.into_body(), usize::MAX).await {
        Ok(body) => CachedResponse {
            status,
            body: body.to_vec(),
            content_type,
        },
        Err(e) => {
            tracing::error!(error = %e, "Failed to read handler response body");
            CachedResponse::new(StatusCode::INTERNAL_SERVER_ERROR.as_u16(), Vec::new())
        }
    }
}

fn into_response(response: IdempotentResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut out = (status, Bytes::from(response.body)).into_response();

    if let Some(content_type) = response
        .content_type
        .and_then(|ct| HeaderValue::from_str(&ct).ok())
    {
        out.headers_mut().insert(header::CONTENT_TYPE, content_type);
    }
    if response.replayed {
        out.headers_mut()
            .insert(IDEMPOTENT_REPLAYED_HEADER, HeaderValue::from_static("true"));
    }
    out
}
