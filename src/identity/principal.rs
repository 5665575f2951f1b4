use serde::{Deserialize, Serialize};

use crate::storage::models::{Identity, Role};

/// The authenticated identity attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: i64,
    pub credential_id: i64,
    pub access_code: String,
    pub full_name: String,
    pub role: Role,
    #[serde(default)]
    pub target_hours_per_week: i32,
}

impl Principal {
    pub fn new(identity: &Identity, credential_id: i64) -> Self {
        Self {
            user_id: identity.id,
            credential_id,
            access_code: identity.access_code.clone(),
            full_name: identity.full_name.clone(),
            role: identity.role,
            target_hours_per_week: identity.target_hours_per_week,
        }
    }
}
