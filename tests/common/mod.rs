//! Shared harness: drives the full router in-process with a settable clock.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::ConnectInfo;
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tower::ServiceExt;

use clockhub::config::ServerConfig;
use clockhub::identity::ManualTimeSource;
use clockhub::server::{build_router, AppState};
use clockhub::storage::models::{Identity, Role};
use clockhub::storage::tables::NewIdentity;
use clockhub::storage::SharedStore;

pub const LOOPBACK: &str = "127.0.0.1:40000";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 5, 9, 0, 0).unwrap()
}

pub struct TestApp {
    pub router: Router,
    pub store: SharedStore,
    pub time: Arc<ManualTimeSource>,
    pub peer: SocketAddr,
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub text: String,
}

impl Reply {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.text).unwrap_or(Value::Null)
    }

    pub fn set_cookies(&self) -> Vec<String> {
        self.headers.get_all(SET_COOKIE).iter().filter_map(|v| v.to_str().ok()).map(|s| s.to_string()).collect()
    }

    /// Value of a non-empty `Set-Cookie` for `name`.
    pub fn cookie(&self, name: &str) -> Option<String> {
        let prefix = format!("{}=", name);
        self.set_cookies().iter().find_map(|c| {
            let first = c.split(';').next()?;
            let value = first.strip_prefix(&prefix)?;
            (!value.is_empty()).then(|| value.to_string())
        })
    }
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        Self::with_store(SharedStore::in_memory(), config)
    }

    pub fn with_store(store: SharedStore, config: ServerConfig) -> Self {
        let time = Arc::new(ManualTimeSource::new(t0()));
        let state = AppState::with_time(store.clone(), config, time.clone());
        Self::from_state(state, store, time)
    }

    pub fn from_state(state: AppState, store: SharedStore, time: Arc<ManualTimeSource>) -> Self {
        Self { router: build_router(state), store, time, peer: LOOPBACK.parse().unwrap() }
    }

    pub fn seed(&self, name: &str, code: &str, role: Role) -> Identity {
        let now = t0();
        self.store
            .write(|t| {
                t.insert_identity(
                    NewIdentity { full_name: name.into(), role, target_hours_per_week: 10, access_code: Some(code.into()) },
                    now,
                )
            })
            .unwrap()
    }

    pub async fn send(&self, method: Method, path: &str, headers: &[(&str, &str)], body: Option<Value>) -> Reply {
        let mut builder = Request::builder().method(method).uri(path);
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        let body = match body {
            Some(v) => {
                builder = builder.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let mut req = builder.body(body).unwrap();
        req.extensions_mut().insert(ConnectInfo(self.peer));
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        Reply { status, headers, text: String::from_utf8_lossy(&bytes).into_owned() }
    }

    pub async fn get(&self, path: &str, headers: &[(&str, &str)]) -> Reply {
        self.send(Method::GET, path, headers, None).await
    }

    pub async fn post(&self, path: &str, headers: &[(&str, &str)], body: Value) -> Reply {
        self.send(Method::POST, path, headers, Some(body)).await
    }

    /// Log in on the hub domain and return the `hub_sessionid` value.
    pub async fn hub_login(&self, code: &str) -> String {
        let r = self.post("/api/hub/login/", &[], serde_json::json!({ "access_code": code })).await;
        assert_eq!(r.status, StatusCode::OK, "hub login failed: {}", r.text);
        r.cookie("hub_sessionid").expect("hub session cookie")
    }

    /// Log in on the kiosk domain and return the `clock_sessionid` value.
    pub async fn clock_login(&self, code: &str) -> String {
        let r = self.post("/api/clock/login/", &[], serde_json::json!({ "access_code": code })).await;
        assert_eq!(r.status, StatusCode::OK, "clock login failed: {}", r.text);
        r.cookie("clock_sessionid").expect("clock session cookie")
    }
}
