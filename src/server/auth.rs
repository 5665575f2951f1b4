use axum::body::Bytes;
use axum::extract::{Extension, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::error::AppResult;
use crate::identity::{app_type, gen_token, AppType, RequestContext};
use super::cookies::{append_set_cookie, csrf_cookie, deletion_cookie, parse_cookie, ALL_SESSION_COOKIES, CSRF_COOKIE, LOGOUT_PATHS};
use super::middleware::{ip_allowed, origin_hints, signals, ClientIp};
use super::{parse_body, AppState};

#[derive(Debug, Deserialize)]
struct LoginPayload {
    #[serde(default)]
    access_code: String,
}

pub async fn login(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let payload: LoginPayload = parse_body(&body)?;
    let code = payload.access_code.trim().to_string();
    let identity = {
        let mut session = ctx.session.lock();
        state.auth.login(&state.sessions, &mut session, &code)?
    };
    Ok(Json(json!({
        "user_id": identity.id,
        "access_code": identity.access_code,
        "full_name": identity.full_name,
        "role": identity.role,
        "app_type": ctx.app_type,
        "target_hours_per_week": identity.target_hours_per_week,
    })))
}

pub async fn logout(State(state): State<AppState>, Extension(ctx): Extension<RequestContext>) -> AppResult<Response> {
    {
        let mut session = ctx.session.lock();
        state.sessions.flush(&mut session)?;
    }
    if let Some(p) = &ctx.principal {
        info!(target: "clockhub::auth", identity = p.user_id, app_type = %ctx.app_type, "logout");
    }
    let mut headers = HeaderMap::new();
    for name in ALL_SESSION_COOKIES {
        for path in LOGOUT_PATHS {
            append_set_cookie(&mut headers, &deletion_cookie(name, path));
        }
    }
    Ok((StatusCode::OK, headers, Json(json!({ "message": "Logged out successfully" }))).into_response())
}

pub async fn me(Extension(ctx): Extension<RequestContext>) -> AppResult<Json<Value>> {
    let p = ctx.authenticated()?;
    Ok(Json(json!({
        "user_id": p.user_id,
        "access_code": p.access_code,
        "full_name": p.full_name,
        "role": p.role,
    })))
}

/// Public probe the kiosk uses to learn whether this device may clock in.
pub async fn ip_check(
    State(state): State<AppState>,
    Extension(client): Extension<ClientIp>,
    Extension(app): Extension<AppType>,
    headers: HeaderMap,
) -> Response {
    let ip = client.0;
    let kiosk = app_type::is_clock_request(super::middleware::IP_CHECK_PATH, &signals(&headers), &origin_hints(&state));
    if !kiosk {
        return Json(json!({ "allowed": true, "ip_address": ip, "message": "Not a clock app request" })).into_response();
    }
    let Some(addr) = ip else {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "allowed": false, "ip_address": null, "message": "Could not determine client IP address" })),
        ).into_response();
    };
    match ip_allowed(state.allowlist.as_ref(), &addr) {
        Ok(true) => Json(json!({ "allowed": true, "ip_address": addr, "message": "IP address is authorized" })).into_response(),
        Ok(false) => {
            info!(target: "clockhub::ip_guard", ip = %addr, app_type = %app, "ip-check denied");
            (
                StatusCode::FORBIDDEN,
                Json(json!({
                    "allowed": false,
                    "ip_address": addr,
                    "message": format!("IP address {} is not authorized to access the clock app. Please contact an administrator.", addr),
                })),
            ).into_response()
        }
        Err(e) => {
            error!(target: "clockhub::ip_guard", ip = %addr, error = %e, "ip-check lookup failed");
            (
                StatusCode::FORBIDDEN,
                Json(json!({
                    "allowed": false,
                    "ip_address": addr,
                    "message": "Error checking IP authorization. Access denied for security.",
                })),
            ).into_response()
        }
    }
}

/// Issue (or reuse) the forgery token for non-API unsafe requests.
pub async fn csrf(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
    let token = match parse_cookie(&headers, CSRF_COOKIE) {
        Some(t) => t,
        None => gen_token()?,
    };
    let mut out = HeaderMap::new();
    append_set_cookie(&mut out, &csrf_cookie(&token, state.config.cookie_secure));
    Ok((out, Json(json!({ "status": "ok", "csrf": token }))).into_response())
}
