//! Committee chair transitions.
//!
//! Changing a committee's chair has side effects on roles: a plain member who becomes
//! chair is promoted to `chair`, and a displaced chair who no longer chairs anything is
//! demoted back to `member`. Admins are never demoted. The old and new chair both end
//! up as members of the committee, which keeps the chair-is-member invariant.
//!
//! `reassign_chair` only computes the transition; the store applies it.

use crate::storage::models::Role;

/// What the transition needs to know about a (current or prospective) chair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChairCandidate {
    pub id: i64,
    pub role: Role,
    /// Whether this identity chairs any committee other than the one being changed.
    pub chairs_other_committees: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleChange {
    pub user_id: i64,
    pub from: Role,
    pub to: Role,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChairTransition {
    pub committee_id: i64,
    pub chair_id: Option<i64>,
    pub role_changes: Vec<RoleChange>,
    /// Identities that must be members of the committee afterwards.
    pub ensure_members: Vec<i64>,
}

impl ChairTransition {
    pub fn is_noop(&self) -> bool { self.role_changes.is_empty() && self.ensure_members.is_empty() }
}

pub fn reassign_chair(committee_id: i64, old_chair: Option<ChairCandidate>, new_chair: Option<ChairCandidate>) -> ChairTransition {
    let mut out = ChairTransition {
        committee_id,
        chair_id: new_chair.map(|c| c.id),
        role_changes: Vec::new(),
        ensure_members: Vec::new(),
    };

    if let (Some(old), Some(new)) = (old_chair, new_chair) {
        if old.id == new.id {
            out.ensure_members.push(new.id);
            return out;
        }
    }

    if let Some(old) = old_chair {
        if !old.chairs_other_committees && old.role == Role::Chair {
            out.role_changes.push(RoleChange { user_id: old.id, from: Role::Chair, to: Role::Member });
        }
        out.ensure_members.push(old.id);
    }

    if let Some(new) = new_chair {
        if new.role == Role::Member {
            out.role_changes.push(RoleChange { user_id: new.id, from: Role::Member, to: Role::Chair });
        }
        out.ensure_members.push(new.id);
    }

    out
}

/// Transition for a committee being deleted: only the demotion rule applies.
pub fn release_chair(committee_id: i64, chair: Option<ChairCandidate>) -> ChairTransition {
    let mut t = reassign_chair(committee_id, chair, None);
    t.ensure_members.clear();
    t
}
