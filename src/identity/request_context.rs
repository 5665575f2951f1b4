use std::sync::Arc;
use parking_lot::Mutex;

use crate::error::{AppError, AppResult};
use super::app_type::AppType;
use super::authorizer::{Capability, Policy};
use super::session::Session;
use super::Principal;

/// Per-request state built by the session layer and handed to handlers as an extension.
/// The app type lives here and nowhere else.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub app_type: AppType,
    pub client_ip: Option<String>,
    pub session: Arc<Mutex<Session>>,
    pub principal: Option<Principal>,
}

impl RequestContext {
    pub fn new(app_type: AppType, client_ip: Option<String>, session: Session, principal: Option<Principal>) -> Self {
        Self { app_type, client_ip, session: Arc::new(Mutex::new(session)), principal }
    }

    /// 401 when nobody is logged in.
    pub fn authenticated(&self) -> AppResult<&Principal> {
        self.principal.as_ref().ok_or_else(|| AppError::auth("not_authenticated", "Authentication required"))
    }

    /// 401 when anonymous, 403 when the role lacks `cap`.
    pub fn require(&self, cap: Capability) -> AppResult<&Principal> {
        let p = self.authenticated()?;
        if !p.role.allows(cap) {
            return Err(AppError::denied("insufficient_permissions", "Insufficient permissions"));
        }
        Ok(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::Role;

    fn ctx(role: Option<Role>) -> RequestContext {
        let principal = role.map(|role| Principal {
            user_id: 1, credential_id: 1, access_code: "123456".into(), full_name: "Ada".into(), role, target_hours_per_week: 0,
        });
        RequestContext::new(AppType::Hub, None, Session::anonymous(AppType::Hub), principal)
    }

    #[test]
    fn require_distinguishes_anonymous_from_forbidden() {
        assert_eq!(ctx(None).require(Capability::TrackOwnTime).unwrap_err().http_status(), 401);
        assert_eq!(ctx(Some(Role::Member)).require(Capability::ViewTeam).unwrap_err().http_status(), 403);
        assert!(ctx(Some(Role::Chair)).require(Capability::ViewTeam).is_ok());
    }
}
