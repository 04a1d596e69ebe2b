//! Request authentication.
//!
//! Decision order for non-image requests: ban check, session cookie,
//! remembered fingerprint, HTTP Basic credentials, then a 401
//! challenge that advances the ban counter.

pub mod sessions;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use base64::Engine;

use crate::state::AppState;
use sessions::{SESSION_COOKIE, SESSION_MAX_AGE_SECS, fingerprint};

/// What the auth check decided. Exceptions never drive this flow.
#[derive(Debug, PartialEq, Eq)]
enum AuthDecision {
    /// Proceed; optionally mint a session cookie on the response.
    Authorized { set_cookie: Option<String> },
    Denied,
    BannedClient,
}

/// Peer address of the connection, defaulting to localhost when the
/// listener did not attach connect info (router-level tests).
pub fn peer_ip(request: &Request) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Cover and thumbnail requests bypass auth so OPDS clients that fetch
/// images anonymously keep working.
fn is_image_request(path: &str) -> bool {
    let path = path.to_lowercase();
    path.contains("/cover/")
        || path.contains("/thumbnail/")
        || path.ends_with(".jpeg")
        || path.ends_with(".jpg")
        || path.ends_with(".png")
}

fn basic_credentials(request: &Request) -> Option<(String, String)> {
    let value = request
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (user, password) = credentials.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

fn decide(state: &AppState, request: &Request, jar: &CookieJar, ip: IpAddr) -> AuthDecision {
    if state.config.auth.ban_clients && state.bans.is_banned(ip) {
        return AuthDecision::BannedClient;
    }

    if let Some(cookie) = jar.get(SESSION_COOKIE)
        && state.auth.validate(cookie.value(), ip).is_some()
    {
        return AuthDecision::Authorized { set_cookie: None };
    }

    let fp = fingerprint(ip);
    if state.config.auth.remember_clients && state.auth.is_remembered(&fp) {
        let token = state.auth.create_session(ip, "");
        return AuthDecision::Authorized {
            set_cookie: Some(token),
        };
    }

    if let Some((user, password)) = basic_credentials(request) {
        let valid = state
            .config
            .credentials()
            .iter()
            .any(|(u, p)| *u == user && *p == password);
        if valid {
            state
                .stats
                .successful_logins
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            state.bans.reset(ip);
            if state.config.auth.remember_clients {
                state.auth.remember(&fp);
            }
            let token = state.auth.create_session(ip, &user);
            tracing::info!(target: "auth", "{ip} Login: user={user}");
            return AuthDecision::Authorized {
                set_cookie: Some(token),
            };
        }
    }

    AuthDecision::Denied
}

/// Axum middleware enforcing the authentication policy.
pub async fn auth_layer(
    State(state): State<AppState>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response {
    let ip = peer_ip(&request);
    state.stats.record_request(&fingerprint(ip));

    if !state.config.auth.use_http_auth || is_image_request(request.uri().path()) {
        return next.run(request).await;
    }

    match decide(&state, &request, &jar, ip) {
        AuthDecision::Authorized { set_cookie } => {
            let mut response = next.run(request).await;
            if let Some(token) = set_cookie {
                session_cookie(&mut response, &token);
            }
            response
        }
        AuthDecision::BannedClient => {
            state
                .stats
                .banned_rejections
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            tracing::info!(target: "auth", "{ip} Rejected: address is banned");
            StatusCode::FORBIDDEN.into_response()
        }
        AuthDecision::Denied => {
            state
                .stats
                .wrong_logins
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let count = state.bans.register_failure(ip);
            tracing::info!(target: "auth", "{ip} Unauthorized (attempt {count})");
            (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Basic realm=\"TinyOPDS\"")],
            )
                .into_response()
        }
    }
}

fn session_cookie(response: &mut Response, token: &str) {
    let value = format!(
        "{SESSION_COOKIE}={token}; HttpOnly; Path=/; Max-Age={SESSION_MAX_AGE_SECS}"
    );
    if let Ok(header_value) = HeaderValue::from_str(&value) {
        response
            .headers_mut()
            .append(header::SET_COOKIE, header_value);
    }
}
