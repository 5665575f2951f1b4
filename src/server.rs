//!
//! clockhub HTTP server
//! --------------------
//! Axum router for the kiosk ("clock") and staff ("hub") frontends.
//!
//! Responsibilities:
//! - Per-request app type resolution and the kiosk IP allowlist guard.
//! - Two isolated cookie-backed session domains sharing one session store.
//! - Origin validation for unsafe API calls, token-based forgery checks elsewhere.
//! - Access-code login, time logs, team views, and admin management endpoints.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::body::Bytes;
use axum::http::header::{ACCEPT, ACCEPT_ENCODING, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE, COOKIE, DNT, ORIGIN, USER_AGENT};
use axum::http::{HeaderName, HeaderValue, Method};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{delete, get, patch, post};
use axum::Router;
use chrono::{DateTime, Utc};
use serde::de::{Deserialize, DeserializeOwned, Deserializer};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{AppError, AppResult};
use crate::identity::{AccessCodeAuthenticator, AccessCodeBackend, SessionStore, SystemTimeSource, TimeSource};
use crate::storage::models::{Identity, Role};
use crate::storage::tables::NewIdentity;
use crate::storage::{AllowlistSource, SharedStore};

pub mod cookies;
pub mod middleware;
pub mod views;
mod auth;
mod time_logs;
mod team;
mod admin;
mod allowed_ips;
mod committees;

/// Shared server state injected into all handlers and layers.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub sessions: SessionStore,
    pub auth: Arc<AccessCodeAuthenticator>,
    pub allowlist: Arc<dyn AllowlistSource>,
    pub time: Arc<dyn TimeSource>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(store: SharedStore, config: ServerConfig) -> Self {
        Self::with_time(store, config, Arc::new(SystemTimeSource))
    }

    pub fn with_time(store: SharedStore, config: ServerConfig, time: Arc<dyn TimeSource>) -> Self {
        let sessions = SessionStore::new(store.clone(), time.clone(), &config);
        let backend = AccessCodeBackend::new(store.clone(), time.clone());
        Self {
            allowlist: Arc::new(store.clone()),
            auth: Arc::new(AccessCodeAuthenticator::new(Arc::new(backend))),
            store,
            sessions,
            time,
            config: Arc::new(config),
        }
    }

    /// Swap the allowlist lookup (the store is used by default).
    pub fn with_allowlist(mut self, allowlist: Arc<dyn AllowlistSource>) -> Self {
        self.allowlist = allowlist;
        self
    }

    pub fn now(&self) -> DateTime<Utc> { self.time.now() }
}

/// Decode a JSON request body; an empty body reads as `{}`.
pub(crate) fn parse_body<T: DeserializeOwned>(body: &Bytes) -> AppResult<T> {
    let raw: &[u8] = if body.iter().all(|b| b.is_ascii_whitespace()) { b"{}" } else { body };
    serde_json::from_slice(raw).map_err(|e| {
        AppError::invalid("invalid_body".to_string(), format!("Malformed request body: {}", e))
    })
}

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
pub(crate) fn nullable<'de, D, T>(d: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(d).map(Some)
}

fn time_log_routes() -> Router<AppState> {
    Router::new()
        .route("/clock_in/", post(time_logs::clock_in))
        .route("/clock_out/", post(time_logs::clock_out))
        .route("/current_status/", get(time_logs::current_status))
        .route("/export_csv/", get(time_logs::export_csv))
}

fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/login/", post(auth::login))
        .route("/logout/", post(auth::logout))
        .route("/me/", get(auth::me))
}

/// Credentialed CORS for the configured frontend origins. Rejected origins get no
/// `Access-Control-Allow-Origin` and are logged.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    let allow_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _req: &axum::http::request::Parts| {
        let ok = allowed.contains(origin);
        if !ok {
            warn!(target: "clockhub::cors", origin = %origin.to_str().unwrap_or("<non-utf8>"), "CORS origin rejected");
        }
        ok
    });
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            ACCEPT,
            ACCEPT_ENCODING,
            AUTHORIZATION,
            CACHE_CONTROL,
            CONTENT_TYPE,
            COOKIE,
            DNT,
            ORIGIN,
            USER_AGENT,
            HeaderName::from_static("x-csrftoken"),
            HeaderName::from_static("x-requested-with"),
            HeaderName::from_static("x-app-type"),
        ])
        .max_age(Duration::from_secs(86400))
}

/// Build the full application router with its layer stack.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .merge(session_routes())
        .route("/ip-check/", get(auth::ip_check))
        .route("/time-logs/", get(time_logs::list))
        .nest("/time-logs", time_log_routes())
        .nest("/clock", time_log_routes().merge(session_routes()))
        .nest("/hub", session_routes())
        .route("/team/", get(team::list))
        .route("/team/{id}/member_timesheet/", get(team::member_timesheet))
        .route("/chair/my_committees/", get(team::my_committees))
        .route("/chair/team_summary/", get(team::team_summary))
        .route("/admin/", get(admin::stats))
        .route("/admin/create_user/", post(admin::create_user))
        .route("/admin/{id}/delete_user/", delete(admin::delete_user))
        .route("/admin/{id}/update_user_role/", patch(admin::update_user_role))
        .route("/admin/{id}/regenerate_access_code/", post(admin::regenerate_access_code))
        .route("/users/", get(admin::list_users).post(admin::create_user))
        .route("/users/{id}/", get(admin::get_user).patch(admin::update_user).put(admin::update_user).delete(admin::delete_user))
        .route("/allowed-ips/", get(allowed_ips::list).post(allowed_ips::create))
        .route("/allowed-ips/{id}/", get(allowed_ips::get_one).patch(allowed_ips::update).put(allowed_ips::update).delete(allowed_ips::remove))
        .route("/committees/", get(committees::list).post(committees::create))
        .route("/committees/{id}/", get(committees::get_one).patch(committees::update).put(committees::update).delete(committees::remove))
        .route("/committees/{id}/add_members/", post(committees::add_members))
        .route("/committees/{id}/remove_members/", post(committees::remove_members));

    // Layers listed innermost first; CORS answers preflights before anything else runs.
    Router::new()
        .route("/", get(|| async { "clockhub ok" }))
        .route("/csrf", get(auth::csrf))
        .nest("/api", api)
        .layer(from_fn(middleware::catch_panics))
        .layer(from_fn_with_state(state.clone(), middleware::origin_guard))
        .layer(from_fn_with_state(state.clone(), middleware::session_layer))
        .layer(from_fn_with_state(state.clone(), middleware::ip_guard))
        .layer(from_fn_with_state(state.clone(), middleware::resolve_app_type))
        .layer(build_cors_layer(&state.config.allowed_origins))
        .with_state(state)
}

/// Create an admin identity when the store has none, so the hub can be reached.
pub fn ensure_default_admin(store: &SharedStore, now: DateTime<Utc>) -> AppResult<Option<Identity>> {
    store.write(|t| {
        if t.identity_count() > 0 { return Ok(None); }
        let admin = t.insert_identity(NewIdentity {
            full_name: "Administrator".into(),
            role: Role::Admin,
            target_hours_per_week: 0,
            access_code: None,
        }, now)?;
        Ok(Some(admin))
    })
}

fn log_startup(config: &ServerConfig, store: &SharedStore) {
    let snapshot = store.0.lock().snapshot_path().map(|p| p.display().to_string());
    info!(
        target: "startup",
        bind = %config.bind,
        port = config.http_port,
        snapshot = ?snapshot,
        debug = config.debug,
        allow_headerless_origin = config.allow_headerless_origin,
        trust_forwarded_for = config.trust_forwarded_for,
        "clockhub starting"
    );
    if config.debug {
        warn!(target: "startup", "debug mode: any loopback origin is accepted");
    }
}

/// Start the HTTP server and serve until the process is stopped.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let store = match &config.data_dir {
        Some(dir) => SharedStore::open(dir).with_context(|| format!("While opening store under {}", dir.display()))?,
        None => SharedStore::in_memory(),
    };
    log_startup(&config, &store);

    if let Some(admin) = ensure_default_admin(&store, Utc::now()).map_err(|e| anyhow::anyhow!("bootstrapping admin: {}", e))? {
        warn!(target: "startup", access_code = %admin.access_code, "empty store: created default admin identity");
    }

    let ip: IpAddr = config.bind.parse().with_context(|| format!("Invalid bind address: {}", config.bind))?;
    let addr = SocketAddr::new(ip, config.http_port);
    let app = build_router(AppState::new(store, config));

    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
