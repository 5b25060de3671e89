use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{Extensions, HeaderMap, StatusCode, request::Parts},
};
use axum_extra::extract::CookieJar;
use rampart::CallerScope;

use crate::{
    error::DefenseRejection,
    types::{ClientKeyConfig, ClientKeySource},
};

pub(crate) const SESSION_COOKIE: &str = "session_id";

/// Key used when no address can be determined at all.
const UNKNOWN_CLIENT: &str = "unknown";

pub(crate) fn client_key_from(
    headers: &HeaderMap,
    extensions: &Extensions,
    config: &ClientKeyConfig,
) -> String {
    let header_ip = |name: &str, first_of_list: bool| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| {
                if first_of_list {
                    value.split(',').next()
                } else {
                    Some(value)
                }
            })
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(str::to_string)
    };
    let from_headers =
        || header_ip("x-forwarded-for", true).or_else(|| header_ip("x-real-ip", false));

    let forwarded = match config.source {
        ClientKeySource::ForwardedHeaders => from_headers(),
        ClientKeySource::ConnectionOnly => None,
    };

    forwarded
        .or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

pub(crate) fn session_id_from(headers: &HeaderMap) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}

/// The rate-limit key of the calling client.
///
/// Uses the [`ClientKeyConfig`] found in the request extensions, or the
/// default when none was layered in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKey(pub String);

impl<S> FromRequestParts<S> for ClientKey
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let config = parts
            .extensions
            .get::<ClientKeyConfig>()
            .cloned()
            .unwrap_or_default();
        Ok(ClientKey(client_key_from(
            &parts.headers,
            &parts.extensions,
            &config,
        )))
    }
}

pub struct SessionIdFromCookie(pub Option<String>);

impl<S> FromRequestParts<S> for SessionIdFromCookie
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(SessionIdFromCookie(session_id_from(&parts.headers)))
    }
}

/// An operator allowed to run administrative actions.
///
/// The application's own authentication layer inserts this into the request
/// extensions; rampart never creates one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminPrincipal(pub String);

impl<S> FromRequestParts<S> for AdminPrincipal
where
    S: Send + Sync,
{
    type Rejection = DefenseRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AdminPrincipal>()
            .cloned()
            .ok_or(DefenseRejection::Forbidden)
    }
}

/// The caller scope set by the application, if any.
pub struct OptionalCallerScope(pub Option<CallerScope>);

impl<S> FromRequestParts<S> for OptionalCallerScope
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalCallerScope(
            parts.extensions.get::<CallerScope>().cloned(),
        ))
    }
}
