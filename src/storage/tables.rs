//! In-memory tables and the operations that keep their constraints.
//!
//! All mutating operations are meant to run inside `SharedStore::write`, which applies
//! them to a scratch copy and only commits when they succeed. Each operation checks
//! its uniqueness constraint before touching any table.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::committee::{self, ChairCandidate, ChairTransition};
use crate::error::{AppError, AppResult};
use super::models::{AllowedIp, Committee, Credential, Identity, Role, SessionRecord, TimeLog};

static ACCESS_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{6}$").expect("access code pattern"));

const MAX_FULL_NAME: usize = 150;
const MAX_COMMITTEE_NAME: usize = 100;
const MAX_IP_LABEL: usize = 100;
const ACCESS_CODE_ATTEMPTS: usize = 1_000;

pub fn is_valid_access_code(code: &str) -> bool {
    ACCESS_CODE_RE.is_match(code)
}

/// Parse-check an IPv4/IPv6 address; returns the trimmed text as stored.
pub fn validate_ip(raw: &str) -> AppResult<String> {
    let ip = raw.trim();
    if ip.parse::<IpAddr>().is_err() {
        return Err(AppError::invalid("invalid_ip", "Invalid IP address format")
            .with_detail(serde_json::json!({ "ip_address": raw })));
    }
    Ok(ip.to_string())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Sequences {
    identity: i64,
    credential: i64,
    allowed_ip: i64,
    time_log: i64,
    committee: i64,
}

fn next_id(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

#[derive(Debug, Clone, Default)]
pub struct NewIdentity {
    pub full_name: String,
    pub role: Role,
    pub target_hours_per_week: i32,
    /// Generated when absent.
    pub access_code: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct IdentityPatch {
    pub full_name: Option<String>,
    pub role: Option<Role>,
    pub target_hours_per_week: Option<i32>,
    pub access_code: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CommitteePatch {
    pub name: Option<String>,
    /// `Some(None)` clears the chair.
    pub chair_id: Option<Option<i64>>,
    /// Replaces every non-chair membership when present.
    pub members: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tables {
    seq: Sequences,
    identities: BTreeMap<i64, Identity>,
    credentials: BTreeMap<i64, Credential>,
    sessions: BTreeMap<String, SessionRecord>,
    allowed_ips: BTreeMap<i64, AllowedIp>,
    time_logs: BTreeMap<i64, TimeLog>,
    committees: BTreeMap<i64, Committee>,
    /// (identity id, committee id)
    memberships: BTreeSet<(i64, i64)>,
}

fn identity_missing(id: i64) -> AppError {
    AppError::not_found("user_not_found".to_string(), format!("User {} not found", id))
}

fn committee_missing(id: i64) -> AppError {
    AppError::not_found("committee_not_found".to_string(), format!("Committee {} not found", id))
}

impl Tables {
    // ---------------- identities ----------------

    pub fn identity(&self, id: i64) -> Option<&Identity> { self.identities.get(&id) }

    pub fn identity_by_code(&self, code: &str) -> Option<&Identity> {
        self.identities.values().find(|u| u.access_code == code)
    }

    /// All identities ordered by display name.
    pub fn identities_by_name(&self) -> Vec<Identity> {
        let mut v: Vec<Identity> = self.identities.values().cloned().collect();
        v.sort_by(|a, b| a.full_name.cmp(&b.full_name).then(a.id.cmp(&b.id)));
        v
    }

    pub fn identity_count(&self) -> usize { self.identities.len() }

    pub fn role_distribution(&self) -> BTreeMap<Role, usize> {
        let mut out = BTreeMap::new();
        for u in self.identities.values() { *out.entry(u.role).or_insert(0) += 1; }
        out
    }

    fn code_taken(&self, code: &str, except: Option<i64>) -> bool {
        self.identities.values().any(|u| u.access_code == code && Some(u.id) != except)
    }

    fn generate_access_code(&self) -> AppResult<String> {
        let mut rng = rand::thread_rng();
        for _ in 0..ACCESS_CODE_ATTEMPTS {
            let code = rng.gen_range(100_000..=999_999).to_string();
            if !self.code_taken(&code, None) { return Ok(code); }
        }
        Err(AppError::internal("access_code_exhausted", "could not allocate a unique access code"))
    }

    fn check_code(&self, code: &str, except: Option<i64>) -> AppResult<()> {
        if !is_valid_access_code(code) {
            return Err(AppError::invalid("invalid_access_code", "Access code must be exactly 6 digits"));
        }
        if self.code_taken(code, except) {
            return Err(AppError::conflict("access_code_taken", "Access code already in use"));
        }
        Ok(())
    }

    fn check_profile(full_name: &str, target_hours: i32) -> AppResult<()> {
        if full_name.chars().count() > MAX_FULL_NAME {
            return Err(AppError::invalid("invalid_full_name", "Full name is too long"));
        }
        if target_hours < 0 {
            return Err(AppError::invalid("invalid_target_hours", "Target hours per week cannot be negative"));
        }
        Ok(())
    }

    pub fn insert_identity(&mut self, new: NewIdentity, now: DateTime<Utc>) -> AppResult<Identity> {
        let full_name = new.full_name.trim().to_string();
        Self::check_profile(&full_name, new.target_hours_per_week)?;
        let access_code = match new.access_code {
            Some(code) => { self.check_code(&code, None)?; code }
            None => self.generate_access_code()?,
        };
        let id = next_id(&mut self.seq.identity);
        let identity = Identity {
            id,
            access_code,
            full_name,
            role: new.role,
            target_hours_per_week: new.target_hours_per_week,
            created_at: now,
        };
        self.identities.insert(id, identity.clone());
        Ok(identity)
    }

    pub fn update_identity(&mut self, id: i64, patch: IdentityPatch) -> AppResult<Identity> {
        let current = self.identities.get(&id).cloned().ok_or_else(|| identity_missing(id))?;
        let mut next = current.clone();
        if let Some(name) = patch.full_name { next.full_name = name.trim().to_string(); }
        if let Some(role) = patch.role { next.role = role; }
        if let Some(hours) = patch.target_hours_per_week { next.target_hours_per_week = hours; }
        Self::check_profile(&next.full_name, next.target_hours_per_week)?;
        if let Some(code) = patch.access_code {
            if code != current.access_code {
                self.check_code(&code, Some(id))?;
                // Sessions bound to the old code's credential stop resolving.
                self.credentials.retain(|_, c| c.username != current.access_code);
                next.access_code = code;
            }
        }
        self.identities.insert(id, next.clone());
        Ok(next)
    }

    pub fn set_role(&mut self, id: i64, role: Role) -> AppResult<Identity> {
        self.update_identity(id, IdentityPatch { role: Some(role), ..Default::default() })
    }

    /// Replace the access code with a fresh unique one; returns the old code.
    pub fn regenerate_access_code(&mut self, id: i64) -> AppResult<(String, Identity)> {
        let old = self.identities.get(&id).map(|u| u.access_code.clone()).ok_or_else(|| identity_missing(id))?;
        let code = self.generate_access_code()?;
        let updated = self.update_identity(id, IdentityPatch { access_code: Some(code), ..Default::default() })?;
        Ok((old, updated))
    }

    /// Delete an identity together with its time logs, memberships and credential.
    pub fn delete_identity(&mut self, id: i64) -> AppResult<Identity> {
        let removed = self.identities.remove(&id).ok_or_else(|| identity_missing(id))?;
        self.time_logs.retain(|_, log| log.user_id != id);
        self.memberships.retain(|(uid, _)| *uid != id);
        for c in self.committees.values_mut() {
            if c.chair_id == Some(id) { c.chair_id = None; }
        }
        for entry in self.allowed_ips.values_mut() {
            if entry.created_by == Some(id) { entry.created_by = None; }
        }
        self.credentials.retain(|_, cred| cred.username != removed.access_code);
        Ok(removed)
    }

    // ---------------- credentials ----------------

    pub fn credential(&self, id: i64) -> Option<&Credential> { self.credentials.get(&id) }

    /// Fetch the credential keyed by `username`, creating it on first use.
    pub fn get_or_create_credential(&mut self, username: &str, first_name: &str, now: DateTime<Utc>) -> (Credential, bool) {
        if let Some(existing) = self.credentials.values().find(|c| c.username == username) {
            return (existing.clone(), false);
        }
        let id = next_id(&mut self.seq.credential);
        let cred = Credential {
            id,
            username: username.to_string(),
            first_name: first_name.to_string(),
            is_active: true,
            created_at: now,
        };
        self.credentials.insert(id, cred.clone());
        (cred, true)
    }

    pub fn credential_count(&self) -> usize { self.credentials.len() }

    // ---------------- sessions ----------------

    pub fn session(&self, key: &str) -> Option<&SessionRecord> { self.sessions.get(key) }

    pub fn has_session(&self, key: &str) -> bool { self.sessions.contains_key(key) }

    pub fn put_session(&mut self, record: SessionRecord) {
        self.sessions.insert(record.key.clone(), record);
    }

    pub fn remove_session(&mut self, key: &str) -> bool { self.sessions.remove(key).is_some() }

    pub fn session_count(&self) -> usize { self.sessions.len() }

    /// Drop every session record matching `stale`; returns how many went.
    pub fn purge_sessions(&mut self, stale: impl Fn(&SessionRecord) -> bool) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, r| !stale(r));
        before - self.sessions.len()
    }

    // ---------------- allowed IPs ----------------

    pub fn allowed_ip(&self, id: i64) -> Option<&AllowedIp> { self.allowed_ips.get(&id) }

    /// Exact string match against the allowlist.
    pub fn is_ip_allowlisted(&self, ip: &str) -> bool {
        self.allowed_ips.values().any(|e| e.ip_address == ip)
    }

    /// Ordered by label (unlabelled last), then address.
    pub fn allowed_ips_sorted(&self) -> Vec<AllowedIp> {
        let mut v: Vec<AllowedIp> = self.allowed_ips.values().cloned().collect();
        v.sort_by(|a, b| {
            (a.label.is_none(), &a.label, &a.ip_address).cmp(&(b.label.is_none(), &b.label, &b.ip_address))
        });
        v
    }

    fn check_label(label: &Option<String>) -> AppResult<()> {
        if let Some(l) = label {
            if l.chars().count() > MAX_IP_LABEL {
                return Err(AppError::invalid("invalid_label", "Label is too long"));
            }
        }
        Ok(())
    }

    pub fn insert_allowed_ip(&mut self, raw_ip: &str, label: Option<String>, created_by: Option<i64>, now: DateTime<Utc>) -> AppResult<AllowedIp> {
        let ip = validate_ip(raw_ip)?;
        Self::check_label(&label)?;
        if self.is_ip_allowlisted(&ip) {
            return Err(AppError::conflict("ip_exists".to_string(), format!("IP address {} is already allowed", ip)));
        }
        let id = next_id(&mut self.seq.allowed_ip);
        let entry = AllowedIp { id, ip_address: ip, label, created_by, created_at: now };
        self.allowed_ips.insert(id, entry.clone());
        Ok(entry)
    }

    pub fn update_allowed_ip(&mut self, id: i64, raw_ip: Option<&str>, label: Option<Option<String>>) -> AppResult<AllowedIp> {
        let mut entry = self.allowed_ips.get(&id).cloned()
            .ok_or_else(|| AppError::not_found("allowed_ip_not_found".to_string(), format!("Allowed IP {} not found", id)))?;
        if let Some(raw) = raw_ip {
            let ip = validate_ip(raw)?;
            if self.allowed_ips.values().any(|e| e.ip_address == ip && e.id != id) {
                return Err(AppError::conflict("ip_exists".to_string(), format!("IP address {} is already allowed", ip)));
            }
            entry.ip_address = ip;
        }
        if let Some(l) = label {
            Self::check_label(&l)?;
            entry.label = l;
        }
        self.allowed_ips.insert(id, entry.clone());
        Ok(entry)
    }

    pub fn delete_allowed_ip(&mut self, id: i64) -> AppResult<AllowedIp> {
        self.allowed_ips.remove(&id)
            .ok_or_else(|| AppError::not_found("allowed_ip_not_found".to_string(), format!("Allowed IP {} not found", id)))
    }

    // ---------------- time logs ----------------

    pub fn open_log(&self, user_id: i64) -> Option<&TimeLog> {
        self.time_logs.values().find(|l| l.user_id == user_id && l.clock_out.is_none())
    }

    /// Open a time log; at most one open entry per identity.
    pub fn clock_in(&mut self, user_id: i64, now: DateTime<Utc>) -> AppResult<TimeLog> {
        if !self.identities.contains_key(&user_id) { return Err(identity_missing(user_id)); }
        if self.open_log(user_id).is_some() {
            return Err(AppError::conflict("already_clocked_in", "User is already clocked in"));
        }
        let id = next_id(&mut self.seq.time_log);
        let log = TimeLog { id, user_id, clock_in: now, clock_out: None, created_at: now };
        self.time_logs.insert(id, log.clone());
        Ok(log)
    }

    pub fn clock_out(&mut self, user_id: i64, now: DateTime<Utc>) -> AppResult<TimeLog> {
        let id = self.open_log(user_id).map(|l| l.id)
            .ok_or_else(|| AppError::invalid("not_clocked_in", "No active clock-in session found"))?;
        let log = self.time_logs.get_mut(&id).ok_or_else(|| AppError::internal("time_log_vanished", "internal server error"))?;
        log.clock_out = Some(now);
        Ok(log.clone())
    }

    /// Logs for one identity, newest clock-in first.
    pub fn logs_for(&self, user_id: i64) -> Vec<TimeLog> {
        let mut v: Vec<TimeLog> = self.time_logs.values().filter(|l| l.user_id == user_id).cloned().collect();
        v.sort_by(|a, b| b.clock_in.cmp(&a.clock_in).then(b.id.cmp(&a.id)));
        v
    }

    pub fn recent_logs(&self, limit: usize) -> Vec<TimeLog> {
        let mut v: Vec<TimeLog> = self.time_logs.values().cloned().collect();
        v.sort_by(|a, b| b.clock_in.cmp(&a.clock_in).then(b.id.cmp(&a.id)));
        v.truncate(limit);
        v
    }

    pub fn time_log_count(&self) -> usize { self.time_logs.len() }

    pub fn open_log_count(&self) -> usize { self.time_logs.values().filter(|l| l.is_active()).count() }

    // ---------------- committees ----------------

    pub fn committee(&self, id: i64) -> Option<&Committee> { self.committees.get(&id) }

    pub fn committees_by_name(&self) -> Vec<Committee> {
        let mut v: Vec<Committee> = self.committees.values().cloned().collect();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        v
    }

    pub fn committees_chaired_by(&self, user_id: i64) -> Vec<Committee> {
        let mut v: Vec<Committee> = self.committees.values().filter(|c| c.chair_id == Some(user_id)).cloned().collect();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        v
    }

    pub fn member_ids(&self, committee_id: i64) -> Vec<i64> {
        self.memberships.iter().filter(|(_, cid)| *cid == committee_id).map(|(uid, _)| *uid).collect()
    }

    /// Members of a committee ordered by display name.
    pub fn members_of(&self, committee_id: i64) -> Vec<Identity> {
        let mut v: Vec<Identity> = self.member_ids(committee_id).into_iter().filter_map(|id| self.identities.get(&id).cloned()).collect();
        v.sort_by(|a, b| a.full_name.cmp(&b.full_name).then(a.id.cmp(&b.id)));
        v
    }

    pub fn is_member(&self, user_id: i64, committee_id: i64) -> bool {
        self.memberships.contains(&(user_id, committee_id))
    }

    fn chair_candidate(&self, user_id: i64, committee_id: i64) -> AppResult<ChairCandidate> {
        let u = self.identities.get(&user_id).ok_or_else(|| {
            AppError::invalid("invalid_chair".to_string(), format!("Chair {} does not exist", user_id))
        })?;
        let chairs_other_committees = self.committees.values().any(|c| c.chair_id == Some(user_id) && c.id != committee_id);
        Ok(ChairCandidate { id: u.id, role: u.role, chairs_other_committees })
    }

    fn apply_transition(&mut self, t: &ChairTransition) {
        for change in &t.role_changes {
            if let Some(u) = self.identities.get_mut(&change.user_id) { u.role = change.to; }
        }
        for uid in &t.ensure_members {
            self.memberships.insert((*uid, t.committee_id));
        }
        if let Some(c) = self.committees.get_mut(&t.committee_id) { c.chair_id = t.chair_id; }
    }

    fn check_committee_name(&self, name: &str, except: Option<i64>) -> AppResult<()> {
        if name.is_empty() {
            return Err(AppError::invalid("invalid_committee_name", "Committee name is required"));
        }
        if name.chars().count() > MAX_COMMITTEE_NAME {
            return Err(AppError::invalid("invalid_committee_name", "Committee name is too long"));
        }
        if self.committees.values().any(|c| c.name == name && Some(c.id) != except) {
            return Err(AppError::conflict("committee_exists".to_string(), format!("Committee {} already exists", name)));
        }
        Ok(())
    }

    fn add_existing_members(&mut self, committee_id: i64, member_ids: &[i64]) {
        for uid in member_ids {
            if self.identities.contains_key(uid) {
                self.memberships.insert((*uid, committee_id));
            }
        }
    }

    pub fn insert_committee(&mut self, name: &str, chair_id: Option<i64>, member_ids: &[i64], now: DateTime<Utc>) -> AppResult<Committee> {
        let name = name.trim();
        self.check_committee_name(name, None)?;
        let id = next_id(&mut self.seq.committee);
        let new_chair = chair_id.map(|cid| self.chair_candidate(cid, id)).transpose()?;
        self.committees.insert(id, Committee { id, name: name.to_string(), chair_id: None, created_at: now });
        let t = committee::reassign_chair(id, None, new_chair);
        self.apply_transition(&t);
        self.add_existing_members(id, member_ids);
        self.committees.get(&id).cloned().ok_or_else(|| committee_missing(id))
    }

    pub fn update_committee(&mut self, id: i64, patch: CommitteePatch) -> AppResult<Committee> {
        let current = self.committees.get(&id).cloned().ok_or_else(|| committee_missing(id))?;
        if let Some(name) = patch.name {
            let name = name.trim().to_string();
            self.check_committee_name(&name, Some(id))?;
            if let Some(c) = self.committees.get_mut(&id) { c.name = name; }
        }
        if let Some(new_chair_id) = patch.chair_id {
            if new_chair_id != current.chair_id {
                let old = current.chair_id.map(|cid| self.chair_candidate(cid, id)).transpose()?;
                let new = new_chair_id.map(|cid| self.chair_candidate(cid, id)).transpose()?;
                let t = committee::reassign_chair(id, old, new);
                self.apply_transition(&t);
            }
        }
        if let Some(members) = patch.members {
            let chair = self.committees.get(&id).and_then(|c| c.chair_id);
            self.memberships.retain(|(uid, cid)| *cid != id || Some(*uid) == chair);
            self.add_existing_members(id, &members);
        }
        self.committees.get(&id).cloned().ok_or_else(|| committee_missing(id))
    }

    pub fn add_members(&mut self, id: i64, member_ids: &[i64]) -> AppResult<Committee> {
        let c = self.committees.get(&id).cloned().ok_or_else(|| committee_missing(id))?;
        self.add_existing_members(id, member_ids);
        Ok(c)
    }

    /// Remove members; the sitting chair is never removed.
    pub fn remove_members(&mut self, id: i64, member_ids: &[i64]) -> AppResult<Committee> {
        let c = self.committees.get(&id).cloned().ok_or_else(|| committee_missing(id))?;
        for uid in member_ids {
            if c.chair_id == Some(*uid) { continue; }
            self.memberships.remove(&(*uid, id));
        }
        Ok(c)
    }

    pub fn delete_committee(&mut self, id: i64) -> AppResult<Committee> {
        let c = self.committees.get(&id).cloned().ok_or_else(|| committee_missing(id))?;
        let chair = c.chair_id.map(|cid| self.chair_candidate(cid, id)).transpose()?;
        let t = committee::release_chair(id, chair);
        self.apply_transition(&t);
        self.memberships.retain(|(_, cid)| *cid != id);
        self.committees.remove(&id);
        Ok(c)
    }
}
