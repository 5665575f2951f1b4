//! Record types held by the store.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Chair,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Chair => "chair",
            Role::Member => "member",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "chair" => Some(Role::Chair),
            "member" => Some(Role::Member),
            _ => None,
        }
    }
}

impl Default for Role {
    fn default() -> Self { Role::Member }
}

/// A person known to the system, authenticated by a 6-digit access code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: i64,
    pub access_code: String,
    pub full_name: String,
    pub role: Role,
    pub target_hours_per_week: i32,
    pub created_at: DateTime<Utc>,
}

/// Backing login record keyed by access code; created lazily on first successful login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub key: String,
    /// JSON-encoded session payload.
    pub payload: String,
    pub expire_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowedIp {
    pub id: i64,
    pub ip_address: String,
    pub label: Option<String>,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeLog {
    pub id: i64,
    pub user_id: i64,
    pub clock_in: DateTime<Utc>,
    pub clock_out: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TimeLog {
    /// Undefined until the entry is closed.
    pub fn duration(&self) -> Option<Duration> {
        self.clock_out.map(|out| out - self.clock_in)
    }

    pub fn is_active(&self) -> bool { self.clock_out.is_none() }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Committee {
    pub id: i64,
    pub name: String,
    pub chair_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}
