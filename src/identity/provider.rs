use std::sync::Arc;
use serde_json::json;
use tracing::{debug, info};
use crate::tprintln;

use crate::error::{AppError, AppResult};
use crate::storage::models::{Credential, Identity};
use crate::storage::tables::is_valid_access_code;
use crate::storage::SharedStore;
use super::session::{Session, SessionStore};
use super::time::TimeSource;

#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub identity: Identity,
    pub credential: Credential,
    /// True when the backing credential was created by this call.
    pub created: bool,
}

pub trait AuthBackend: Send + Sync {
    /// Resolve an access code. A miss is `Ok(None)`, never an error.
    fn authenticate(&self, access_code: &str) -> AppResult<Option<AuthOutcome>>;

    /// Identity behind a session's credential id, if it still exists.
    fn identity_for_credential(&self, credential_id: i64) -> Option<Identity>;
}

pub struct AccessCodeBackend {
    store: SharedStore,
    time: Arc<dyn TimeSource>,
}

impl AccessCodeBackend {
    pub fn new(store: SharedStore, time: Arc<dyn TimeSource>) -> Self { Self { store, time } }
}

impl AuthBackend for AccessCodeBackend {
    fn authenticate(&self, access_code: &str) -> AppResult<Option<AuthOutcome>> {
        let Some(identity) = self.store.read(|t| t.identity_by_code(access_code).cloned()) else {
            return Ok(None);
        };
        let now = self.time.now();
        let (credential, created) = self.store.write(|t| {
            Ok(t.get_or_create_credential(&identity.access_code, &identity.full_name, now))
        })?;
        if created {
            debug!(target: "clockhub::auth", identity = identity.id, "backing credential created");
        }
        Ok(Some(AuthOutcome { identity, credential, created }))
    }

    fn identity_for_credential(&self, credential_id: i64) -> Option<Identity> {
        self.store.read(|t| {
            let cred = t.credential(credential_id).filter(|c| c.is_active)?;
            t.identity_by_code(&cred.username).cloned()
        })
    }
}

/// Access-code login against a request's session.
pub struct AccessCodeAuthenticator {
    backend: Arc<dyn AuthBackend>,
}

impl AccessCodeAuthenticator {
    pub fn new(backend: Arc<dyn AuthBackend>) -> Self { Self { backend } }

    pub fn backend(&self) -> &Arc<dyn AuthBackend> { &self.backend }

    /// Log `session` in as the owner of `access_code`.
    ///
    /// The same code on an already authenticated session is returned as-is. A different
    /// code flushes the old session before the new identity is attached, so login is
    /// never additive across identities.
    pub fn login(&self, sessions: &SessionStore, session: &mut Session, access_code: &str) -> AppResult<Identity> {
        if !is_valid_access_code(access_code) {
            return Err(AppError::invalid("invalid_access_code", "Access code must be exactly 6 digits")
                .with_detail(json!({ "access_code": ["Access code must be exactly 6 digits"] })));
        }

        if let Some(cred_id) = session.user_id() {
            match self.backend.identity_for_credential(cred_id) {
                Some(current) if current.access_code == access_code => return Ok(current),
                _ => {
                    tprintln!("auth.login switching identity, flushing session");
                    sessions.flush(session)?;
                }
            }
        }

        let Some(outcome) = self.backend.authenticate(access_code)? else {
            info!(target: "clockhub::auth", app_type = %session.app_type(), "login rejected: unknown access code");
            return Err(AppError::auth("invalid_access_code", "Invalid access code")
                .with_detail(json!(format!("No user found with access code: {}", access_code))));
        };

        session.set_user_id(outcome.credential.id);
        sessions.cycle_key(session)?;
        info!(target: "clockhub::auth", identity = outcome.identity.id, app_type = %session.app_type(), "login");
        Ok(outcome.identity)
    }
}
