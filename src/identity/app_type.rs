use std::fmt;
use serde::{Deserialize, Serialize};

/// Which frontend a request belongs to. Every branch on it is exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppType {
    Clock,
    Hub,
}

impl AppType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppType::Clock => "clock",
            AppType::Hub => "hub",
        }
    }

    pub fn cookie_name(&self) -> &'static str {
        match self {
            AppType::Clock => "clock_sessionid",
            AppType::Hub => "hub_sessionid",
        }
    }

    fn from_header(raw: &str) -> Option<AppType> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "clock" => Some(AppType::Clock),
            "hub" => Some(AppType::Hub),
            _ => None,
        }
    }
}

impl fmt::Display for AppType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Generic cookie name read as a fallback and always cleared on response.
pub const LEGACY_COOKIE: &str = "sessionid";

/// Classify a request: path prefix first, then `X-App-Type`, then clock.
pub fn resolve(path: &str, x_app_type: Option<&str>) -> AppType {
    if path.starts_with("/api/clock/") {
        return AppType::Clock;
    }
    if path.starts_with("/api/hub/") || path.starts_with("/api/admin/") {
        return AppType::Hub;
    }
    x_app_type.and_then(AppType::from_header).unwrap_or(AppType::Clock)
}

/// Request signals consulted by the narrow kiosk detector.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientSignals<'a> {
    pub origin: Option<&'a str>,
    pub user_agent: Option<&'a str>,
    pub x_app_type: Option<&'a str>,
}

/// Origin fragments identifying each frontend.
#[derive(Debug, Clone)]
pub struct OriginHints {
    pub clock: Vec<String>,
    pub hub: Vec<String>,
}

/// Independent detector used for IP enforcement. Any hub signal wins, so hub traffic is
/// never restricted; otherwise clock signals or a kiosk endpoint mark the request.
pub fn is_clock_request(path: &str, signals: &ClientSignals<'_>, hints: &OriginHints) -> bool {
    let origin = signals.origin.unwrap_or("");
    let agent = signals.user_agent.unwrap_or("").to_ascii_lowercase();
    let header = signals.x_app_type.map(|h| h.trim().to_ascii_lowercase()).unwrap_or_default();

    let is_hub = header == "hub"
        || hints.hub.iter().any(|h| origin.contains(h.as_str()))
        || agent.contains("hub");
    if is_hub {
        return false;
    }

    header == "clock"
        || hints.clock.iter().any(|h| origin.contains(h.as_str()))
        || agent.contains("clock")
        || path.starts_with("/api/clock/")
        || path.starts_with("/api/ip-check/")
}
