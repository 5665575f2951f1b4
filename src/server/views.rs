//! JSON shapes returned by the API.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::storage::models::{AllowedIp, Committee, Identity, Role, TimeLog};
use crate::storage::Tables;
use crate::timesheet::round2;

#[derive(Debug, Serialize)]
pub struct UserView {
    pub id: i64,
    pub access_code: String,
    pub full_name: String,
    pub role: Role,
    pub target_hours_per_week: i32,
    pub created_at: DateTime<Utc>,
}

impl From<&Identity> for UserView {
    fn from(u: &Identity) -> Self {
        Self {
            id: u.id,
            access_code: u.access_code.clone(),
            full_name: u.full_name.clone(),
            role: u.role,
            target_hours_per_week: u.target_hours_per_week,
            created_at: u.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TimeLogView {
    pub id: i64,
    pub user: i64,
    pub user_name: Option<String>,
    pub clock_in: DateTime<Utc>,
    pub clock_out: Option<DateTime<Utc>>,
    /// Hours, two decimals; absent while the log is open.
    pub duration: Option<f64>,
    pub is_active: bool,
}

impl TimeLogView {
    pub fn new(t: &Tables, log: &TimeLog) -> Self {
        Self {
            id: log.id,
            user: log.user_id,
            user_name: t.identity(log.user_id).map(|u| u.full_name.clone()),
            clock_in: log.clock_in,
            clock_out: log.clock_out,
            duration: log.duration().map(|d| round2(d.num_seconds() as f64 / 3600.0)),
            is_active: log.is_active(),
        }
    }

    pub fn list(t: &Tables, logs: &[TimeLog]) -> Vec<Self> {
        logs.iter().map(|l| Self::new(t, l)).collect()
    }
}

#[derive(Debug, Serialize)]
pub struct AllowedIpView {
    pub id: i64,
    pub ip_address: String,
    pub label: Option<String>,
    pub created_by: Option<i64>,
    pub created_by_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AllowedIpView {
    pub fn new(t: &Tables, e: &AllowedIp) -> Self {
        Self {
            id: e.id,
            ip_address: e.ip_address.clone(),
            label: e.label.clone(),
            created_by: e.created_by,
            created_by_name: e.created_by.and_then(|id| t.identity(id)).map(|u| u.full_name.clone()),
            created_at: e.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MemberView {
    pub id: i64,
    pub full_name: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct CommitteeView {
    pub id: i64,
    pub name: String,
    pub chair: Option<i64>,
    pub chair_name: Option<String>,
    pub members: Vec<MemberView>,
    pub member_count: usize,
    pub created_at: DateTime<Utc>,
}

impl CommitteeView {
    pub fn new(t: &Tables, c: &Committee) -> Self {
        let members: Vec<MemberView> = t
            .members_of(c.id)
            .iter()
            .map(|u| MemberView { id: u.id, full_name: u.full_name.clone(), role: u.role })
            .collect();
        Self {
            id: c.id,
            name: c.name.clone(),
            chair: c.chair_id,
            chair_name: c.chair_id.and_then(|id| t.identity(id)).map(|u| u.full_name.clone()),
            member_count: members.len(),
            members,
            created_at: c.created_at,
        }
    }
}
