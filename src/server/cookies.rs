//! Cookie header parsing and `Set-Cookie` formatting for the two session domains.

use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};

use crate::identity::{AppType, SessionConfig, LEGACY_COOKIE};

/// Every name a session pointer may have been stored under.
pub const ALL_SESSION_COOKIES: [&str; 3] = ["hub_sessionid", "clock_sessionid", LEGACY_COOKIE];

/// Double-submit forgery token for non-API routes.
pub const CSRF_COOKIE: &str = "csrftoken";

/// Paths a session cookie may have been scoped to; the empty string means no Path attribute.
pub const LOGOUT_PATHS: [&str; 4] = ["/api/", "/", "/api", ""];

pub fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for value in headers.get_all(COOKIE) {
        let Ok(s) = value.to_str() else { continue };
        for part in s.split(';') {
            let p = part.trim();
            if let Some((k, v)) = p.split_once('=') {
                if k.trim() == name {
                    let v = v.trim();
                    if !v.is_empty() { return Some(v.to_string()); }
                }
            }
        }
    }
    None
}

/// Session key presented for `app`: the app cookie first, then the legacy generic cookie.
pub fn inbound_session_key(headers: &HeaderMap, app: AppType) -> Option<String> {
    parse_cookie(headers, app.cookie_name()).or_else(|| parse_cookie(headers, LEGACY_COOKIE))
}

pub fn session_cookie(cfg: &SessionConfig, key: &str, max_age_secs: i64) -> String {
    let secure_flag = if cfg.secure { "; Secure" } else { "" };
    let http_only = if cfg.http_only { "; HttpOnly" } else { "" };
    format!(
        "{}={}; Max-Age={}; Path={}{}{}; SameSite={}",
        cfg.cookie_name, key, max_age_secs.max(0), cfg.path, http_only, secure_flag, cfg.same_site.as_str()
    )
}

pub fn csrf_cookie(token: &str, secure: bool) -> String {
    let secure_flag = if secure { "; Secure" } else { "" };
    format!("{}={}; Path=/{}; SameSite=Strict", CSRF_COOKIE, token, secure_flag)
}

pub fn deletion_cookie(name: &str, path: &str) -> String {
    let path_attr = if path.is_empty() { String::new() } else { format!("; Path={}", path) };
    format!("{}=; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT{}", name, path_attr)
}

pub fn append_set_cookie(headers: &mut HeaderMap, cookie: &str) {
    if let Ok(v) = HeaderValue::from_str(cookie) {
        headers.append(SET_COOKIE, v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    #[test]
    fn app_cookie_preferred_over_legacy() {
        let mut h = HeaderMap::new();
        h.insert(COOKIE, HeaderValue::from_static("sessionid=legacy; hub_sessionid=hubkey"));
        assert_eq!(inbound_session_key(&h, AppType::Hub).as_deref(), Some("hubkey"));
        assert_eq!(inbound_session_key(&h, AppType::Clock).as_deref(), Some("legacy"));
    }

    #[test]
    fn empty_cookie_values_are_ignored() {
        let mut h = HeaderMap::new();
        h.insert(COOKIE, HeaderValue::from_static("clock_sessionid=; other=1"));
        assert_eq!(parse_cookie(&h, "clock_sessionid"), None);
    }

    #[test]
    fn cookie_attributes_follow_domain() {
        let cfg = ServerConfig::default();
        let clock = session_cookie(&SessionConfig::for_app(AppType::Clock, &cfg), "k", 120);
        assert_eq!(clock, "clock_sessionid=k; Max-Age=120; Path=/api/; HttpOnly; SameSite=Strict");
        let hub = session_cookie(&SessionConfig::for_app(AppType::Hub, &ServerConfig { cookie_secure: true, ..cfg }), "k", 3600);
        assert_eq!(hub, "hub_sessionid=k; Max-Age=3600; Path=/api/; HttpOnly; Secure; SameSite=Lax");
    }

    #[test]
    fn deletion_without_path() {
        assert_eq!(deletion_cookie("sessionid", ""), "sessionid=; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT");
        assert!(deletion_cookie("hub_sessionid", "/api").ends_with("; Path=/api"));
    }
}
