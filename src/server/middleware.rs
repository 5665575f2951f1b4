//! Request pipeline: app type resolution, kiosk IP guard, dual session handling,
//! origin/forgery checks and panic capture. Layers run in that order.

use std::net::{IpAddr, SocketAddr};
use std::panic::AssertUnwindSafe;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures_util::FutureExt;
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::{debug, error, warn};
use url::Url;

use crate::error::AppError;
use crate::identity::{app_type, AppType, ClientSignals, OriginHints, Principal, RequestContext, Session, LEGACY_COOKIE};
use crate::storage::AllowlistSource;
use super::cookies;
use super::AppState;

pub const IP_CHECK_PATH: &str = "/api/ip-check/";

/// Client address as seen by the guards; `None` when it cannot be determined.
#[derive(Debug, Clone)]
pub struct ClientIp(pub Option<String>);

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// First `X-Forwarded-For` entry when forwarded headers are trusted, else the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded: bool) -> Option<String> {
    if trust_forwarded {
        if let Some(first) = header_str(headers, "x-forwarded-for").and_then(|xff| xff.split(',').next()) {
            let first = first.trim();
            if !first.is_empty() { return Some(first.to_string()); }
        }
    }
    peer.map(|p| p.ip().to_string())
}

pub fn is_loopback(ip: &str) -> bool {
    ip.eq_ignore_ascii_case("localhost") || ip.parse::<IpAddr>().map(|a| a.is_loopback()).unwrap_or(false)
}

/// Loopback always passes; everything else must be on the allowlist.
pub fn ip_allowed(allowlist: &dyn AllowlistSource, ip: &str) -> anyhow::Result<bool> {
    if is_loopback(ip) { return Ok(true); }
    allowlist.contains(ip)
}

pub fn signals(headers: &HeaderMap) -> ClientSignals<'_> {
    ClientSignals {
        origin: header_str(headers, "origin"),
        user_agent: header_str(headers, "user-agent"),
        x_app_type: header_str(headers, "x-app-type"),
    }
}

pub fn origin_hints(state: &AppState) -> OriginHints {
    OriginHints { clock: state.config.clock_origin_hints.clone(), hub: state.config.hub_origin_hints.clone() }
}

pub async fn resolve_app_type(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let app = app_type::resolve(req.uri().path(), header_str(req.headers(), "x-app-type"));
    let peer = req.extensions().get::<ConnectInfo<SocketAddr>>().map(|c| c.0);
    let ip = client_ip(req.headers(), peer, state.config.trust_forwarded_for);
    req.extensions_mut().insert(app);
    req.extensions_mut().insert(ClientIp(ip));
    next.run(req).await
}

pub async fn ip_guard(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    if path == IP_CHECK_PATH {
        return next.run(req).await;
    }
    let app = req.extensions().get::<AppType>().copied().unwrap_or(AppType::Clock);
    if app != AppType::Clock || !app_type::is_clock_request(&path, &signals(req.headers()), &origin_hints(&state)) {
        return next.run(req).await;
    }

    let ip = req.extensions().get::<ClientIp>().and_then(|c| c.0.clone());
    let Some(ip) = ip else {
        warn!(target: "clockhub::ip_guard", path = %path, "clock request from unidentifiable client");
        return AppError::denied("ip_unknown", "Could not determine client IP address")
            .with_detail(json!({ "ip_address": null }))
            .into_response();
    };
    match ip_allowed(state.allowlist.as_ref(), &ip) {
        Ok(true) => next.run(req).await,
        Ok(false) => {
            warn!(target: "clockhub::ip_guard", ip = %ip, path = %path, "clock request from unlisted IP");
            AppError::denied(
                "ip_not_allowed".to_string(),
                format!("Your IP address {} is not authorized to access the clock app. Contact admin to add this IP.", ip),
            )
            .with_detail(json!({ "ip_address": ip }))
            .into_response()
        }
        Err(e) => {
            error!(target: "clockhub::ip_guard", ip = %ip, error = %e, "allowlist lookup failed; denying");
            AppError::denied("ip_check_failed", "Error checking IP authorization. Access denied for security.")
                .with_detail(json!({ "ip_address": ip }))
                .into_response()
        }
    }
}

/// Loads the app-specific session, resolves the principal, and emits the session
/// cookie for the same domain on the way out.
pub async fn session_layer(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let app = req.extensions().get::<AppType>().copied().unwrap_or(AppType::Clock);
    let ip = req.extensions().get::<ClientIp>().and_then(|c| c.0.clone());
    let inbound = cookies::inbound_session_key(req.headers(), app);

    let session = match inbound.as_deref() {
        Some(key) => state.sessions.load(key, app),
        None => Session::anonymous(app),
    };
    let principal = session.user_id().and_then(|cred_id| {
        state.auth.backend().identity_for_credential(cred_id).map(|identity| Principal::new(&identity, cred_id))
    });
    let ctx = RequestContext::new(app, ip, session, principal);
    req.extensions_mut().insert(ctx.clone());

    let mut response = next.run(req).await;

    let cfg = state.sessions.config(app);
    let mut session = ctx.session.lock();
    if let Err(e) = state.sessions.save(&mut session) {
        return e.into_response();
    }
    match session.key() {
        Some(key) => {
            let remaining = session
                .expire_date()
                .map(|exp| (exp - state.time.now()).num_seconds())
                .unwrap_or(cfg.max_age_secs)
                .min(cfg.max_age_secs);
            cookies::append_set_cookie(response.headers_mut(), &cookies::session_cookie(cfg, key, remaining));
            if cfg.cookie_name != LEGACY_COOKIE {
                cookies::append_set_cookie(response.headers_mut(), &cookies::deletion_cookie(LEGACY_COOKIE, cfg.path));
            }
        }
        None if inbound.is_some() => {
            cookies::append_set_cookie(response.headers_mut(), &cookies::deletion_cookie(cfg.cookie_name, cfg.path));
        }
        None => {}
    }
    response
}

/// Policy inputs for origin validation of unsafe API requests.
#[derive(Debug, Clone)]
pub struct OriginPolicy<'a> {
    pub allowed: &'a [String],
    pub debug: bool,
    pub allow_headerless: bool,
}

fn loopback_host(url: &Url) -> bool {
    matches!(url.host_str(), Some("localhost") | Some("127.0.0.1") | Some("::1") | Some("[::1]"))
}

fn origin_acceptable(candidate: &str, policy: &OriginPolicy<'_>) -> bool {
    if policy.allowed.iter().any(|a| a == candidate) { return true; }
    policy.debug && Url::parse(candidate).map(|u| loopback_host(&u)).unwrap_or(false)
}

/// Origin header first, then the scheme://host[:port] of the Referer.
pub fn check_origin(origin: Option<&str>, referer: Option<&str>, policy: &OriginPolicy<'_>) -> Result<(), AppError> {
    if let Some(origin) = origin.filter(|o| !o.is_empty()) {
        if origin_acceptable(origin, policy) { return Ok(()); }
        return Err(AppError::denied("invalid_origin", "Invalid origin for request").with_detail(json!({ "origin": origin })));
    }
    if let Some(referer) = referer.filter(|r| !r.is_empty()) {
        let derived = Url::parse(referer).ok().map(|u| u.origin().ascii_serialization());
        if let Some(derived) = derived {
            if origin_acceptable(&derived, policy) { return Ok(()); }
        }
        return Err(AppError::denied("invalid_referer", "Invalid referer for request").with_detail(json!({ "referer": referer })));
    }
    if policy.allow_headerless {
        Ok(())
    } else {
        Err(AppError::denied("missing_origin", "Origin or Referer header required"))
    }
}

fn is_safe_method(m: &Method) -> bool {
    matches!(*m, Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE)
}

pub async fn origin_guard(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if is_safe_method(req.method()) {
        return next.run(req).await;
    }
    let path = req.uri().path().to_string();
    if path.starts_with("/api/") {
        let policy = OriginPolicy {
            allowed: &state.config.allowed_origins,
            debug: state.config.debug,
            allow_headerless: state.config.allow_headerless_origin,
        };
        if let Err(e) = check_origin(header_str(req.headers(), "origin"), header_str(req.headers(), "referer"), &policy) {
            warn!(target: "clockhub::origin_guard", path = %path, detail = ?e.detail(), "rejected unsafe request");
            return e.into_response();
        }
        return next.run(req).await;
    }

    // Non-API routes keep token-based forgery protection (cookie + header double submit).
    let provided = header_str(req.headers(), "x-csrftoken");
    let expected = cookies::parse_cookie(req.headers(), cookies::CSRF_COOKIE);
    match (provided, expected) {
        (Some(p), Some(e)) if tokens_match(p, &e) => next.run(req).await,
        _ => {
            debug!(target: "clockhub::origin_guard", path = %path, "forgery token missing or mismatched");
            AppError::denied("csrf_failed", "CSRF token missing or incorrect").into_response()
        }
    }
}

fn tokens_match(provided: &str, expected: &str) -> bool {
    if provided.len() != expected.len() { return false; }
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Innermost layer: a panicking handler becomes a 500 instead of a dropped connection.
pub async fn catch_panics(req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(resp) => resp,
        Err(_) => {
            error!(target: "clockhub::server", path = %path, "handler panicked");
            AppError::internal("internal_error", "internal server error").into_response()
        }
    }
}
