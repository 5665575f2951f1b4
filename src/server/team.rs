//! Chair and admin views over team members and their hours.

use std::collections::BTreeSet;

use axum::extract::{Extension, Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::identity::{Capability, Policy, Principal, RequestContext};
use crate::storage::models::{Identity, Role};
use crate::storage::Tables;
use crate::timesheet::{round2, weekly_hours};
use super::views::{CommitteeView, TimeLogView, UserView};
use super::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct TeamQuery {
    committee_id: Option<i64>,
}

/// Identities visible to `p`, excluding `p`. Admins see everyone, chairs see their committees.
fn visible_members(t: &Tables, p: &Principal, committee_id: Option<i64>) -> AppResult<Vec<Identity>> {
    let ids: BTreeSet<i64> = match (p.role, committee_id) {
        (Role::Admin, None) => t.identities_by_name().into_iter().map(|u| u.id).collect(),
        (Role::Admin, Some(cid)) => {
            t.committee(cid).ok_or_else(|| AppError::not_found("committee_not_found", "Committee not found"))?;
            t.member_ids(cid).into_iter().collect()
        }
        (_, Some(cid)) => {
            let c = t.committee(cid).ok_or_else(|| AppError::not_found("committee_not_found", "Committee not found"))?;
            if c.chair_id != Some(p.user_id) {
                return Err(AppError::denied("not_committee_chair", "You are not the chair of this committee"));
            }
            t.member_ids(cid).into_iter().collect()
        }
        (_, None) => t
            .committees_chaired_by(p.user_id)
            .iter()
            .flat_map(|c| t.member_ids(c.id))
            .collect(),
    };
    let mut members: Vec<Identity> = ids
        .into_iter()
        .filter(|id| *id != p.user_id)
        .filter_map(|id| t.identity(id).cloned())
        .collect();
    members.sort_by(|a, b| a.full_name.cmp(&b.full_name).then(a.id.cmp(&b.id)));
    Ok(members)
}

fn hours_this_week(t: &Tables, user_id: i64, now: DateTime<Utc>) -> f64 {
    weekly_hours(&t.logs_for(user_id), now)
}

pub async fn list(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(q): Query<TeamQuery>,
) -> AppResult<Json<Vec<Value>>> {
    let p = ctx.require(Capability::ViewTeam)?;
    let now = state.now();
    let rows = state.store.read(|t| -> AppResult<Vec<Value>> {
        let rows = visible_members(t, p, q.committee_id)?
            .iter()
            .map(|u| json!({
                "id": u.id.to_string(),
                "name": u.full_name,
                "role": u.role,
                "target_hours_per_week": u.target_hours_per_week,
                "access_code": u.access_code,
                "totalHoursThisWeek": hours_this_week(t, u.id, now),
            }))
            .collect();
        Ok(rows)
    })?;
    Ok(Json(rows))
}

/// Chairs may see members of committees they chair; anyone may see their own.
fn can_view_timesheet(t: &Tables, p: &Principal, member_id: i64) -> bool {
    if p.user_id == member_id || p.role == Role::Admin {
        return true;
    }
    p.role.allows(Capability::ViewMemberTimesheet)
        && t.committees_chaired_by(p.user_id).iter().any(|c| t.is_member(member_id, c.id))
}

pub async fn member_timesheet(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(member_id): Path<i64>,
) -> AppResult<Json<Value>> {
    let p = ctx.authenticated()?;
    let now = state.now();
    state.store.read(|t| {
        let member = t.identity(member_id).ok_or_else(|| AppError::not_found("user_not_found", "User not found"))?;
        if !can_view_timesheet(t, p, member_id) {
            return Err(AppError::denied("insufficient_permissions", "Insufficient permissions"));
        }
        let logs = t.logs_for(member_id);
        Ok(Json(json!({
            "member": UserView::from(member),
            "time_logs": TimeLogView::list(t, &logs),
            "weekly_hours": weekly_hours(&logs, now),
        })))
    })
}

pub async fn my_committees(State(state): State<AppState>, Extension(ctx): Extension<RequestContext>) -> AppResult<Json<Vec<CommitteeView>>> {
    let p = ctx.require(Capability::ViewTeam)?;
    let views = state.store.read(|t| {
        let committees = if p.role == Role::Admin { t.committees_by_name() } else { t.committees_chaired_by(p.user_id) };
        committees.iter().map(|c| CommitteeView::new(t, c)).collect()
    });
    Ok(Json(views))
}

/// Weekly totals and live status for everyone the caller oversees.
pub async fn team_summary(State(state): State<AppState>, Extension(ctx): Extension<RequestContext>) -> AppResult<Json<Value>> {
    let p = ctx.require(Capability::ViewTeam)?;
    let now = state.now();
    state.store.read(|t| {
        let mut total_hours = 0.0;
        let mut total_active = 0usize;
        let mut online = 0usize;
        let mut team = Vec::new();
        for u in visible_members(t, p, None)? {
            let weekly = hours_this_week(t, u.id, now);
            let active = usize::from(t.open_log(u.id).is_some());
            total_hours += weekly;
            total_active += active;
            if active > 0 { online += 1; }
            team.push(json!({
                "id": u.id,
                "name": u.full_name,
                "role": u.role,
                "target_hours_per_week": u.target_hours_per_week,
                "weeklyHours": weekly,
                "activeSessions": active,
                "isOnline": active > 0,
            }));
        }
        Ok(Json(json!({
            "team_members": team,
            "total_team_hours": round2(total_hours),
            "total_active_sessions": total_active,
            "online_members": online,
        })))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crate::storage::tables::NewIdentity;

    fn seed() -> (Tables, Identity, Identity, Identity, i64) {
        let now = Utc.with_ymd_and_hms(2025, 3, 5, 12, 0, 0).unwrap();
        let mut t = Tables::default();
        let mk = |t: &mut Tables, name: &str, role: Role| {
            t.insert_identity(NewIdentity { full_name: name.into(), role, target_hours_per_week: 10, access_code: None }, now).unwrap()
        };
        let chair = mk(&mut t, "Chair", Role::Member);
        let alice = mk(&mut t, "Alice", Role::Member);
        let bob = mk(&mut t, "Bob", Role::Member);
        let c = t.insert_committee("Outreach", Some(chair.id), &[alice.id], now).unwrap();
        let chair = t.identity(chair.id).cloned().unwrap();
        (t, chair, alice, bob, c.id)
    }

    #[test]
    fn chair_sees_only_their_committee() {
        let (t, chair, alice, bob, cid) = seed();
        let p = Principal::new(&chair, 1);
        let ids: Vec<i64> = visible_members(&t, &p, None).unwrap().iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![alice.id]);
        assert!(can_view_timesheet(&t, &p, alice.id));
        assert!(!can_view_timesheet(&t, &p, bob.id));
        assert_eq!(visible_members(&t, &p, Some(cid)).unwrap().len(), 1);
    }

    #[test]
    fn chair_filtering_foreign_committee_is_forbidden() {
        let (mut t, chair, _alice, bob, _) = seed();
        let now = Utc.with_ymd_and_hms(2025, 3, 5, 12, 0, 0).unwrap();
        let other = t.insert_committee("Finance", Some(bob.id), &[], now).unwrap();
        let err = visible_members(&t, &Principal::new(&chair, 1), Some(other.id)).unwrap_err();
        assert_eq!(err.http_status(), 403);
    }

    #[test]
    fn member_views_only_own_timesheet() {
        let (t, _chair, alice, bob, _) = seed();
        let p = Principal::new(&alice, 2);
        assert!(can_view_timesheet(&t, &p, alice.id));
        assert!(!can_view_timesheet(&t, &p, bob.id));
    }
}
