//!
//! clockhub configuration
//! ----------------------
//! Server settings are read from environment variables; command-line flags override
//! them. Parsing is done against injectable lookups so tests never touch the process
//! environment.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: String, value: String },

    #[error("{name} must be greater than zero")]
    NonPositive { name: String },

    #[error("missing value after flag {0}")]
    MissingFlagValue(String),
}

/// Runtime configuration for the HTTP server and its security layers.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub http_port: u16,
    /// Directory for the JSON snapshot; `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    /// Permissive mode: any loopback origin passes origin validation.
    pub debug: bool,
    pub allowed_origins: Vec<String>,
    /// Whether unsafe API requests carrying neither Origin nor Referer are accepted.
    pub allow_headerless_origin: bool,
    /// Take the client address from the first `X-Forwarded-For` entry. Only safe behind
    /// a proxy that overwrites the header; otherwise clients can claim loopback.
    pub trust_forwarded_for: bool,
    pub cookie_secure: bool,
    pub clock_session_age_secs: i64,
    pub hub_session_age_secs: i64,
    pub hub_absolute_age_secs: i64,
    /// Origin fragments that mark a request as coming from the kiosk frontend.
    pub clock_origin_hints: Vec<String>,
    /// Origin fragments that mark a request as coming from the staff hub frontend.
    pub hub_origin_hints: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            http_port: 8000,
            data_dir: None,
            debug: false,
            allowed_origins: vec![
                "http://localhost:3000".into(),
                "http://localhost:3001".into(),
                "http://localhost:3002".into(),
                "http://127.0.0.1:3000".into(),
                "http://127.0.0.1:3001".into(),
            ],
            allow_headerless_origin: true,
            trust_forwarded_for: true,
            cookie_secure: false,
            clock_session_age_secs: 120,
            hub_session_age_secs: 3600,
            hub_absolute_age_secs: 12 * 3600,
            clock_origin_hints: vec!["localhost:3000".into(), "127.0.0.1:3000".into()],
            hub_origin_hints: vec!["localhost:3001".into(), "127.0.0.1:3001".into()],
        }
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { name: name.into(), value: raw.into() }),
    }
}

fn parse_positive_secs(name: &str, raw: &str) -> Result<i64, ConfigError> {
    let v = raw.trim().parse::<i64>().map_err(|_| ConfigError::InvalidValue { name: name.into(), value: raw.into() })?;
    if v <= 0 { return Err(ConfigError::NonPositive { name: name.into() }); }
    Ok(v)
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()).map(|s| s.to_string()).collect()
}

fn parse_port(name: &str, raw: &str) -> Result<u16, ConfigError> {
    raw.trim().parse::<u16>().map_err(|_| ConfigError::InvalidValue { name: name.into(), value: raw.into() })
}

fn flag_value(args: &[String], flag: &str) -> Result<Option<String>, ConfigError> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag {
            return match args.get(i + 1) {
                Some(v) if !v.starts_with("--") => Ok(Some(v.clone())),
                _ => Err(ConfigError::MissingFlagValue(flag.into())),
            };
        }
        i += 1;
    }
    Ok(None)
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

impl ServerConfig {
    /// Build from the real process environment and arguments.
    pub fn from_env_and_args(args: &[String]) -> Result<Self, ConfigError> {
        Self::from_sources(|k| std::env::var(k).ok(), args)
    }

    pub fn from_sources<F>(env: F, args: &[String]) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = ServerConfig::default();

        if let Some(v) = env("CLOCKHUB_BIND") { cfg.bind = v; }
        if let Some(v) = env("CLOCKHUB_HTTP_PORT") { cfg.http_port = parse_port("CLOCKHUB_HTTP_PORT", &v)?; }
        if let Some(v) = env("CLOCKHUB_DATA_DIR") { if !v.trim().is_empty() { cfg.data_dir = Some(PathBuf::from(v)); } }
        if let Some(v) = env("CLOCKHUB_DEBUG") { cfg.debug = parse_bool("CLOCKHUB_DEBUG", &v)?; }
        if let Some(v) = env("CLOCKHUB_ALLOWED_ORIGINS") { cfg.allowed_origins = parse_list(&v); }
        if let Some(v) = env("CLOCKHUB_ALLOW_HEADERLESS") { cfg.allow_headerless_origin = parse_bool("CLOCKHUB_ALLOW_HEADERLESS", &v)?; }
        if let Some(v) = env("CLOCKHUB_TRUST_FORWARDED_FOR") { cfg.trust_forwarded_for = parse_bool("CLOCKHUB_TRUST_FORWARDED_FOR", &v)?; }
        if let Some(v) = env("CLOCKHUB_COOKIE_SECURE") { cfg.cookie_secure = parse_bool("CLOCKHUB_COOKIE_SECURE", &v)?; }
        if let Some(v) = env("CLOCKHUB_CLOCK_SESSION_AGE") { cfg.clock_session_age_secs = parse_positive_secs("CLOCKHUB_CLOCK_SESSION_AGE", &v)?; }
        if let Some(v) = env("CLOCKHUB_HUB_SESSION_AGE") { cfg.hub_session_age_secs = parse_positive_secs("CLOCKHUB_HUB_SESSION_AGE", &v)?; }
        if let Some(v) = env("HUB_ABSOLUTE_SESSION_AGE") { cfg.hub_absolute_age_secs = parse_positive_secs("HUB_ABSOLUTE_SESSION_AGE", &v)?; }
        if let Some(v) = env("CLOCKHUB_CLOCK_ORIGINS") { cfg.clock_origin_hints = parse_list(&v); }
        if let Some(v) = env("CLOCKHUB_HUB_ORIGINS") { cfg.hub_origin_hints = parse_list(&v); }

        // CLI arguments override environment
        if let Some(v) = flag_value(args, "--bind")? { cfg.bind = v; }
        if let Some(v) = flag_value(args, "--http-port")? { cfg.http_port = parse_port("--http-port", &v)?; }
        if let Some(v) = flag_value(args, "--data-dir")? { cfg.data_dir = Some(PathBuf::from(v)); }
        if has_flag(args, "--debug") { cfg.debug = true; }

        Ok(cfg)
    }
}

pub const USAGE: &str = "clockhub\n\nUSAGE:\n  clockhub [--http-port N] [--bind ADDR] [--data-dir PATH] [--debug]\n\nOPTIONS:\n  --http-port N     HTTP port (env: CLOCKHUB_HTTP_PORT, default 8000)\n  --bind ADDR       Bind address (env: CLOCKHUB_BIND, default 0.0.0.0)\n  --data-dir PATH   Snapshot directory (env: CLOCKHUB_DATA_DIR; in-memory when unset)\n  --debug           Accept any loopback origin (env: CLOCKHUB_DEBUG)\n";

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_match_session_table() {
        let cfg = ServerConfig::from_sources(env_of(&[]), &[]).unwrap();
        assert_eq!(cfg.clock_session_age_secs, 120);
        assert_eq!(cfg.hub_session_age_secs, 3600);
        assert_eq!(cfg.hub_absolute_age_secs, 43200);
        assert!(cfg.allow_headerless_origin);
        assert!(cfg.trust_forwarded_for);
        assert!(!cfg.debug);
    }

    #[test]
    fn env_values_are_parsed() {
        let cfg = ServerConfig::from_sources(env_of(&[
            ("CLOCKHUB_HTTP_PORT", "9100"),
            ("CLOCKHUB_ALLOWED_ORIGINS", "https://clock.example.org, https://hub.example.org"),
            ("CLOCKHUB_ALLOW_HEADERLESS", "off"),
            ("HUB_ABSOLUTE_SESSION_AGE", "7200"),
            ("CLOCKHUB_TRUST_FORWARDED_FOR", "no"),
        ]), &[]).unwrap();
        assert!(!cfg.trust_forwarded_for);
        assert_eq!(cfg.http_port, 9100);
        assert_eq!(cfg.allowed_origins, vec!["https://clock.example.org", "https://hub.example.org"]);
        assert!(!cfg.allow_headerless_origin);
        assert_eq!(cfg.hub_absolute_age_secs, 7200);
    }

    #[test]
    fn args_override_env() {
        let args: Vec<String> = ["clockhub", "--http-port", "7000", "--debug"].iter().map(|s| s.to_string()).collect();
        let cfg = ServerConfig::from_sources(env_of(&[("CLOCKHUB_HTTP_PORT", "9100")]), &args).unwrap();
        assert_eq!(cfg.http_port, 7000);
        assert!(cfg.debug);
    }

    #[test]
    fn bad_values_are_rejected() {
        let err = ServerConfig::from_sources(env_of(&[("CLOCKHUB_DEBUG", "maybe")]), &[]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        let err = ServerConfig::from_sources(env_of(&[("CLOCKHUB_CLOCK_SESSION_AGE", "0")]), &[]).unwrap_err();
        assert_eq!(err, ConfigError::NonPositive { name: "CLOCKHUB_CLOCK_SESSION_AGE".into() });
        let args: Vec<String> = vec!["clockhub".into(), "--http-port".into()];
        assert!(matches!(ServerConfig::from_sources(env_of(&[]), &args), Err(ConfigError::MissingFlagValue(_))));
    }
}
