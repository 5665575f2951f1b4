use axum::body::Bytes;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::identity::{Capability, RequestContext};
use crate::storage::models::Role;
use crate::storage::tables::{IdentityPatch, NewIdentity};
use super::views::{TimeLogView, UserView};
use super::{parse_body, AppState};

const RECENT_ACTIVITY: usize = 10;

fn parse_role(raw: Option<&str>) -> AppResult<Option<Role>> {
    match raw {
        None => Ok(None),
        Some(r) => Role::parse(r).map(Some).ok_or_else(|| AppError::invalid("invalid_role", "Invalid role")),
    }
}

pub async fn stats(State(state): State<AppState>, Extension(ctx): Extension<RequestContext>) -> AppResult<Json<Value>> {
    ctx.require(Capability::ViewSystemStats)?;
    let body = state.store.read(|t| {
        let roles: Vec<Value> = t
            .role_distribution()
            .into_iter()
            .map(|(role, count)| json!({ "role": role, "count": count }))
            .collect();
        json!({
            "total_users": t.identity_count(),
            "total_logs": t.time_log_count(),
            "active_sessions": t.open_log_count(),
            "role_distribution": roles,
            "recent_activity": TimeLogView::list(t, &t.recent_logs(RECENT_ACTIVITY)),
        })
    });
    Ok(Json(body))
}

#[derive(Debug, Default, Deserialize)]
struct UserPayload {
    full_name: Option<String>,
    role: Option<String>,
    target_hours_per_week: Option<i32>,
    access_code: Option<String>,
}

pub async fn create_user(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> AppResult<Response> {
    let admin = ctx.require(Capability::ManageUsers)?;
    let payload: UserPayload = parse_body(&body)?;
    let full_name = payload
        .full_name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| AppError::invalid("invalid_full_name", "Full name is required"))?;
    let new = NewIdentity {
        full_name,
        role: parse_role(payload.role.as_deref())?.unwrap_or_default(),
        target_hours_per_week: payload.target_hours_per_week.unwrap_or(0),
        access_code: payload.access_code.map(|c| c.trim().to_string()),
    };
    let now = state.now();
    let user = state.store.write(|t| t.insert_identity(new, now))?;
    info!(target: "clockhub::admin", by = admin.user_id, identity = user.id, role = %user.role.as_str(), "user created");
    Ok((StatusCode::CREATED, Json(UserView::from(&user))).into_response())
}

pub async fn list_users(State(state): State<AppState>, Extension(ctx): Extension<RequestContext>) -> AppResult<Json<Vec<UserView>>> {
    ctx.require(Capability::ManageUsers)?;
    Ok(Json(state.store.read(|t| t.identities_by_name().iter().map(UserView::from).collect())))
}

pub async fn get_user(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
) -> AppResult<Json<UserView>> {
    ctx.require(Capability::ManageUsers)?;
    state
        .store
        .read(|t| t.identity(id).map(UserView::from))
        .map(Json)
        .ok_or_else(|| AppError::not_found("user_not_found", "User not found"))
}

pub async fn update_user(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
    body: Bytes,
) -> AppResult<Json<UserView>> {
    let admin = ctx.require(Capability::ManageUsers)?;
    let payload: UserPayload = parse_body(&body)?;
    let patch = IdentityPatch {
        full_name: payload.full_name,
        role: parse_role(payload.role.as_deref())?,
        target_hours_per_week: payload.target_hours_per_week,
        access_code: payload.access_code.map(|c| c.trim().to_string()),
    };
    let user = state.store.write(|t| t.update_identity(id, patch))?;
    info!(target: "clockhub::admin", by = admin.user_id, identity = id, "user updated");
    Ok(Json(UserView::from(&user)))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    let admin = ctx.require(Capability::ManageUsers)?;
    let removed = state.store.write(|t| t.delete_identity(id))?;
    info!(target: "clockhub::admin", by = admin.user_id, identity = removed.id, "user deleted");
    Ok(Json(json!({ "message": "User deleted successfully" })))
}

#[derive(Debug, Default, Deserialize)]
struct RolePayload {
    role: Option<String>,
}

pub async fn update_user_role(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
    body: Bytes,
) -> AppResult<Json<UserView>> {
    let admin = ctx.require(Capability::ManageUsers)?;
    let payload: RolePayload = parse_body(&body)?;
    if state.store.read(|t| t.identity(id).is_none()) {
        return Err(AppError::not_found("user_not_found", "User not found"));
    }
    let role = parse_role(payload.role.as_deref())?.ok_or_else(|| AppError::invalid("invalid_role", "Invalid role"))?;
    let user = state.store.write(|t| t.set_role(id, role))?;
    info!(target: "clockhub::admin", by = admin.user_id, identity = id, role = %role.as_str(), "role changed");
    Ok(Json(UserView::from(&user)))
}

pub async fn regenerate_access_code(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    let admin = ctx.require(Capability::ManageUsers)?;
    let (old, user) = state.store.write(|t| t.regenerate_access_code(id))?;
    info!(target: "clockhub::admin", by = admin.user_id, identity = id, "access code regenerated");
    Ok(Json(json!({
        "message": "Access code regenerated successfully",
        "new_access_code": user.access_code,
        "old_access_code": old,
        "user": UserView::from(&user),
    })))
}
