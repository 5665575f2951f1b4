use std::sync::Arc;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use crate::tprintln;

use crate::config::ServerConfig;
use crate::error::{AppError, AppResult};
use crate::storage::models::SessionRecord;
use crate::storage::SharedStore;
use super::app_type::AppType;
use super::time::TimeSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
        }
    }
}

/// Cookie and expiry policy for one session domain.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub app_type: AppType,
    pub cookie_name: &'static str,
    pub max_age_secs: i64,
    /// Hub sessions slide on save; clock sessions keep their creation expiry.
    pub sliding: bool,
    pub same_site: SameSite,
    pub path: &'static str,
    pub secure: bool,
    pub http_only: bool,
    /// Hard ceiling from creation, independent of activity.
    pub absolute_cap_secs: Option<i64>,
}

impl SessionConfig {
    pub fn for_app(app: AppType, cfg: &ServerConfig) -> Self {
        match app {
            AppType::Clock => Self {
                app_type: app,
                cookie_name: app.cookie_name(),
                max_age_secs: cfg.clock_session_age_secs,
                sliding: false,
                same_site: SameSite::Strict,
                path: "/api/",
                secure: cfg.cookie_secure,
                http_only: true,
                absolute_cap_secs: None,
            },
            AppType::Hub => Self {
                app_type: app,
                cookie_name: app.cookie_name(),
                max_age_secs: cfg.hub_session_age_secs,
                sliding: true,
                same_site: SameSite::Lax,
                path: "/api/",
                secure: cfg.cookie_secure,
                http_only: true,
                absolute_cap_secs: Some(cfg.hub_absolute_age_secs),
            },
        }
    }
}

/// Stored session payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(rename = "_app_type", default, skip_serializing_if = "Option::is_none")]
    pub app_type: Option<AppType>,
    /// Absolute expiry, epoch seconds (hub only).
    #[serde(rename = "_abs_exp", default, skip_serializing_if = "Option::is_none")]
    pub abs_exp: Option<i64>,
    /// Backing credential id of the authenticated identity.
    #[serde(rename = "_auth_user_id", default, skip_serializing_if = "Option::is_none")]
    pub auth_user_id: Option<i64>,
}

impl SessionData {
    fn has_content(&self) -> bool {
        self.auth_user_id.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    key: Option<String>,
    app_type: AppType,
    data: SessionData,
    expire_date: Option<DateTime<Utc>>,
    /// Payload changed since it was loaded or last stored.
    dirty: bool,
}

impl Session {
    pub fn anonymous(app_type: AppType) -> Self {
        Self { key: None, app_type, data: SessionData::default(), expire_date: None, dirty: false }
    }

    pub fn key(&self) -> Option<&str> { self.key.as_deref() }
    pub fn app_type(&self) -> AppType { self.app_type }
    pub fn data(&self) -> &SessionData { &self.data }
    pub fn expire_date(&self) -> Option<DateTime<Utc>> { self.expire_date }

    pub fn user_id(&self) -> Option<i64> { self.data.auth_user_id }
    pub fn is_authenticated(&self) -> bool { self.data.auth_user_id.is_some() }
    pub fn set_user_id(&mut self, credential_id: i64) {
        if self.data.auth_user_id != Some(credential_id) {
            self.data.auth_user_id = Some(credential_id);
            self.dirty = true;
        }
    }
}

/// Random 256-bit token, base64url without padding.
pub fn gen_token() -> AppResult<String> {
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).map_err(|e| {
        tracing::error!(error = %e, "random source unavailable");
        AppError::internal("entropy_unavailable", "internal server error")
    })?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

/// Per-app-type session persistence over the shared store.
#[derive(Clone)]
pub struct SessionStore {
    store: SharedStore,
    time: Arc<dyn TimeSource>,
    clock: SessionConfig,
    hub: SessionConfig,
}

impl SessionStore {
    pub fn new(store: SharedStore, time: Arc<dyn TimeSource>, cfg: &ServerConfig) -> Self {
        Self {
            store,
            time,
            clock: SessionConfig::for_app(AppType::Clock, cfg),
            hub: SessionConfig::for_app(AppType::Hub, cfg),
        }
    }

    pub fn config(&self, app: AppType) -> &SessionConfig {
        match app {
            AppType::Clock => &self.clock,
            AppType::Hub => &self.hub,
        }
    }

    /// New persisted session stamped with its app type (and absolute expiry for hub).
    pub fn create(&self, app: AppType) -> AppResult<Session> {
        let mut s = Session::anonymous(app);
        self.persist_new(&mut s)?;
        Ok(s)
    }

    /// Unknown, expired, or foreign-domain keys yield an anonymous session.
    pub fn load(&self, key: &str, app: AppType) -> Session {
        let now = self.time.now();
        let Some(record) = self.store.read(|t| t.session(key).cloned()) else {
            return Session::anonymous(app);
        };
        if record.expire_date <= now {
            debug!(target: "clockhub::session", app_type = %app, "session expired");
            self.discard(key);
            return Session::anonymous(app);
        }
        let data: SessionData = match serde_json::from_str(&record.payload) {
            Ok(d) => d,
            Err(e) => {
                debug!(target: "clockhub::session", error = %e, "undecodable session payload");
                return Session::anonymous(app);
            }
        };
        if data.app_type != Some(app) {
            debug!(target: "clockhub::session", presented = %app, stored = ?data.app_type, "session belongs to another app type");
            return Session::anonymous(app);
        }
        if past_absolute_cap(&data, now) {
            debug!(target: "clockhub::session", "hub session past absolute lifetime");
            tprintln!("session.abs_expired app={}", app);
            self.discard(key);
            return Session::anonymous(app);
        }
        Session { key: Some(record.key), app_type: app, data, expire_date: Some(record.expire_date), dirty: false }
    }

    /// Persist the session. Empty anonymous sessions are not stored, and a fixed-expiry
    /// session whose payload is unchanged is left as is.
    pub fn save(&self, s: &mut Session) -> AppResult<()> {
        let Some(key) = s.key.clone() else {
            if s.data.has_content() { self.persist_new(s)?; }
            return Ok(());
        };
        let cfg = self.config(s.app_type);
        if !cfg.sliding && !s.dirty && s.expire_date.is_some() {
            return Ok(());
        }
        let now = self.time.now();
        let expire_date = match (cfg.sliding, s.expire_date) {
            (false, Some(fixed)) => fixed,
            _ => now + Duration::seconds(cfg.max_age_secs),
        };
        let payload = encode(&s.data)?;
        self.store.write(|t| {
            t.put_session(SessionRecord { key, payload, expire_date });
            Ok(())
        })?;
        s.expire_date = Some(expire_date);
        s.dirty = false;
        Ok(())
    }

    /// Destroy the stored record and reset to an empty anonymous session.
    pub fn flush(&self, s: &mut Session) -> AppResult<()> {
        if let Some(key) = s.key.take() {
            self.delete(&key)?;
            tprintln!("session.flush app={}", s.app_type);
        }
        s.data = SessionData::default();
        s.expire_date = None;
        s.dirty = false;
        Ok(())
    }

    /// Keep the payload under a fresh key; the old record is removed.
    pub fn cycle_key(&self, s: &mut Session) -> AppResult<()> {
        if let Some(old) = s.key.take() {
            self.delete(&old)?;
        }
        s.expire_date = None;
        self.persist_new(s)
    }

    pub fn delete(&self, key: &str) -> AppResult<()> {
        self.store.write(|t| {
            t.remove_session(key);
            Ok(())
        })
    }

    pub fn exists(&self, key: &str) -> bool { self.store.read(|t| t.has_session(key)) }

    fn discard(&self, key: &str) {
        if let Err(e) = self.delete(key) {
            debug!(target: "clockhub::session", error = %e, "failed to discard stale session");
        }
    }

    fn persist_new(&self, s: &mut Session) -> AppResult<()> {
        let cfg = self.config(s.app_type);
        let now = self.time.now();
        s.data.app_type = Some(s.app_type);
        if let Some(cap) = cfg.absolute_cap_secs {
            if s.data.abs_exp.is_none() { s.data.abs_exp = Some(now.timestamp() + cap); }
        }
        let expire_date = now + Duration::seconds(cfg.max_age_secs);
        let payload = encode(&s.data)?;
        let (key, swept) = self.store.write(|t| {
            let swept = t.purge_sessions(|r| is_stale(r, now));
            let mut key = gen_token()?;
            while t.has_session(&key) { key = gen_token()?; }
            t.put_session(SessionRecord { key: key.clone(), payload, expire_date });
            Ok((key, swept))
        })?;
        tprintln!("session.create app={} expires={} swept={}", s.app_type, expire_date, swept);
        debug!(target: "clockhub::session", app_type = %s.app_type, swept, "session created");
        s.key = Some(key);
        s.expire_date = Some(expire_date);
        s.dirty = false;
        Ok(())
    }
}

fn past_absolute_cap(data: &SessionData, now: DateTime<Utc>) -> bool {
    data.app_type == Some(AppType::Hub) && data.abs_exp.is_some_and(|abs| now.timestamp() > abs)
}

/// Expired by date, past the hub cap, or no longer decodable.
fn is_stale(record: &SessionRecord, now: DateTime<Utc>) -> bool {
    if record.expire_date <= now { return true; }
    match serde_json::from_str::<SessionData>(&record.payload) {
        Ok(data) => past_absolute_cap(&data, now),
        Err(_) => true,
    }
}

fn encode(data: &SessionData) -> AppResult<String> {
    serde_json::to_string(data).map_err(|e| AppError::from(anyhow::Error::new(e)))
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::time::ManualTimeSource;
    use chrono::TimeZone;

    fn abs_exp_datetime(data: &SessionData) -> Option<DateTime<Utc>> {
        data.abs_exp.and_then(|s| Utc.timestamp_opt(s, 0).single())
    }

    fn t0() -> DateTime<Utc> { Utc.with_ymd_and_hms(2025, 3, 3, 8, 0, 0).unwrap() }

    fn setup() -> (SessionStore, Arc<ManualTimeSource>) {
        let (ss, clock, _) = setup_with_store();
        (ss, clock)
    }

    fn setup_with_store() -> (SessionStore, Arc<ManualTimeSource>, SharedStore) {
        let clock = Arc::new(ManualTimeSource::new(t0()));
        let shared = SharedStore::in_memory();
        let store = SessionStore::new(shared.clone(), clock.clone(), &ServerConfig::default());
        (store, clock, shared)
    }

    #[test]
    fn clock_session_does_not_slide() {
        let (ss, clock) = setup();
        let mut s = ss.create(AppType::Clock).unwrap();
        s.set_user_id(1);
        ss.save(&mut s).unwrap();
        let key = s.key().unwrap().to_string();

        clock.set(t0() + Duration::seconds(119));
        let mut again = ss.load(&key, AppType::Clock);
        assert!(again.is_authenticated());
        ss.save(&mut again).unwrap();

        clock.set(t0() + Duration::seconds(121));
        assert!(!ss.load(&key, AppType::Clock).is_authenticated());
    }

    #[test]
    fn hub_session_slides_until_absolute_cap() {
        let (ss, clock) = setup();
        let mut s = ss.create(AppType::Hub).unwrap();
        s.set_user_id(1);
        ss.save(&mut s).unwrap();
        let key = s.key().unwrap().to_string();
        assert_eq!(abs_exp_datetime(s.data()), Some(t0() + Duration::hours(12)));

        // stay active every 30 minutes for 12 hours
        for _ in 0..24 {
            clock.advance(Duration::minutes(30));
            let mut live = ss.load(&key, AppType::Hub);
            assert!(live.is_authenticated());
            ss.save(&mut live).unwrap();
        }
        clock.set(t0() + Duration::hours(12) + Duration::seconds(1));
        assert!(!ss.load(&key, AppType::Hub).is_authenticated());
        assert!(!ss.exists(&key), "capped session is destroyed");
    }

    #[test]
    fn foreign_app_type_loads_anonymous_but_is_kept() {
        let (ss, _) = setup();
        let mut s = ss.create(AppType::Clock).unwrap();
        s.set_user_id(3);
        ss.save(&mut s).unwrap();
        let key = s.key().unwrap().to_string();
        let as_hub = ss.load(&key, AppType::Hub);
        assert!(!as_hub.is_authenticated());
        assert!(as_hub.key().is_none());
        assert!(ss.exists(&key));
    }

    #[test]
    fn unknown_key_is_anonymous() {
        let (ss, _) = setup();
        let s = ss.load("nope", AppType::Hub);
        assert!(s.key().is_none() && !s.is_authenticated());
    }

    #[test]
    fn empty_anonymous_session_is_not_stored() {
        let (ss, _) = setup();
        let mut s = Session::anonymous(AppType::Clock);
        ss.save(&mut s).unwrap();
        assert!(s.key().is_none());
    }

    #[test]
    fn flush_and_cycle_key_replace_records() {
        let (ss, _) = setup();
        let mut s = ss.create(AppType::Hub).unwrap();
        s.set_user_id(9);
        ss.save(&mut s).unwrap();
        let first = s.key().unwrap().to_string();

        ss.cycle_key(&mut s).unwrap();
        let second = s.key().unwrap().to_string();
        assert_ne!(first, second);
        assert!(!ss.exists(&first));
        assert_eq!(ss.load(&second, AppType::Hub).user_id(), Some(9));

        ss.flush(&mut s).unwrap();
        assert!(s.key().is_none() && !s.is_authenticated());
        assert!(!ss.exists(&second));
    }

    #[test]
    fn unchanged_clock_session_is_not_rewritten() {
        let (ss, clock, shared) = setup_with_store();
        let mut s = ss.create(AppType::Clock).unwrap();
        s.set_user_id(4);
        ss.save(&mut s).unwrap();
        let key = s.key().unwrap().to_string();
        let before = shared.revision();

        clock.advance(Duration::seconds(30));
        let mut again = ss.load(&key, AppType::Clock);
        ss.save(&mut again).unwrap();
        assert_eq!(shared.revision(), before);
        assert_eq!(again.expire_date(), Some(t0() + Duration::seconds(120)));

        // same identity again is still not a change
        again.set_user_id(4);
        ss.save(&mut again).unwrap();
        assert_eq!(shared.revision(), before);
    }

    #[test]
    fn hub_session_slides_on_every_save() {
        let (ss, clock, shared) = setup_with_store();
        let mut s = ss.create(AppType::Hub).unwrap();
        s.set_user_id(4);
        ss.save(&mut s).unwrap();
        let key = s.key().unwrap().to_string();
        let before = shared.revision();

        clock.advance(Duration::minutes(10));
        let mut again = ss.load(&key, AppType::Hub);
        ss.save(&mut again).unwrap();
        assert_eq!(shared.revision(), before + 1);
        assert_eq!(again.expire_date(), Some(t0() + Duration::minutes(10) + Duration::seconds(3600)));
    }

    #[test]
    fn abandoned_sessions_are_swept_on_create() {
        let (ss, clock, shared) = setup_with_store();
        for uid in 0..20 {
            let mut s = ss.create(AppType::Clock).unwrap();
            s.set_user_id(uid);
            ss.save(&mut s).unwrap();
        }
        let mut hub = ss.create(AppType::Hub).unwrap();
        hub.set_user_id(99);
        ss.save(&mut hub).unwrap();
        assert_eq!(shared.read(|t| t.session_count()), 21);

        clock.advance(Duration::days(30));
        ss.create(AppType::Clock).unwrap();
        assert_eq!(shared.read(|t| t.session_count()), 1);
    }

    #[test]
    fn sweep_honours_hub_absolute_cap() {
        let (ss, clock, shared) = setup_with_store();
        let mut hub = ss.create(AppType::Hub).unwrap();
        hub.set_user_id(1);
        ss.save(&mut hub).unwrap();
        let key = hub.key().unwrap().to_string();
        // push the idle expiry past the cap without reloading
        shared.write(|t| {
            let mut record = t.session(&key).cloned().unwrap();
            record.expire_date = t0() + Duration::hours(24);
            t.put_session(record);
            Ok(())
        }).unwrap();

        clock.set(t0() + Duration::hours(13));
        let fresh = ss.create(AppType::Clock).unwrap();
        assert!(!ss.exists(&key));
        assert!(ss.exists(fresh.key().unwrap()));
    }
}
