//! Admin management of committees and their membership.

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
use crate::storage::tables::CommitteePatch;
use super::views::CommitteeView;
use super::{nullable, parse_body, AppState};

#[derive(Debug, Default, Deserialize)]
struct CommitteePayload {
    name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    chair: Option<Option<i64>>,
    members: Option<Vec<i64>>,
}

#[derive(Debug, Default, Deserialize)]
struct MembersPayload {
    #[serde(default)]
    member_ids: Vec<i64>,
}

fn committee_view(state: &AppState, id: i64) -> AppResult<CommitteeView> {
    state
        .store
        .read(|t| t.committee(id).map(|c| CommitteeView::new(t, c)))
        .ok_or_else(|| AppError::not_found("committee_not_found", "Committee not found"))
}

pub async fn list(State(state): State<AppState>, Extension(ctx): Extension<RequestContext>) -> AppResult<Json<Vec<CommitteeView>>> {
    ctx.require(Capability::ManageCommittees)?;
    let views = state.store.read(|t| t.committees_by_name().iter().map(|c| CommitteeView::new(t, c)).collect());
    Ok(Json(views))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> AppResult<Response> {
    let admin = ctx.require(Capability::ManageCommittees)?;
    let payload: CommitteePayload = parse_body(&body)?;
    let name = payload.name.unwrap_or_default();
    let members = payload.members.unwrap_or_default();
    let now = state.now();
    let view = state.store.write(|t| {
        let c = t.insert_committee(&name, payload.chair.flatten(), &members, now)?;
        Ok(CommitteeView::new(t, &c))
    })?;
    info!(target: "clockhub::committees", by = admin.user_id, committee = view.id, chair = ?view.chair, "committee created");
    Ok((StatusCode::CREATED, Json(view)).into_response())
}

pub async fn get_one(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
) -> AppResult<Json<CommitteeView>> {
    ctx.require(Capability::ManageCommittees)?;
    committee_view(&state, id).map(Json)
}

pub async fn update(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
    body: Bytes,
) -> AppResult<Json<CommitteeView>> {
    let admin = ctx.require(Capability::ManageCommittees)?;
    let payload: CommitteePayload = parse_body(&body)?;
    let patch = CommitteePatch { name: payload.name, chair_id: payload.chair, members: payload.members };
    let view = state.store.write(|t| {
        let c = t.update_committee(id, patch)?;
        Ok(CommitteeView::new(t, &c))
    })?;
    info!(target: "clockhub::committees", by = admin.user_id, committee = id, chair = ?view.chair, "committee updated");
    Ok(Json(view))
}

pub async fn remove(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    let admin = ctx.require(Capability::ManageCommittees)?;
    let removed = state.store.write(|t| t.delete_committee(id))?;
    info!(target: "clockhub::committees", by = admin.user_id, committee = removed.id, "committee deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_members(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
    body: Bytes,
) -> AppResult<Json<Value>> {
    ctx.require(Capability::ManageCommittees)?;
    let payload: MembersPayload = parse_body(&body)?;
    state.store.write(|t| t.add_members(id, &payload.member_ids))?;
    let view = committee_view(&state, id)?;
    Ok(Json(json!({ "message": "Members added successfully", "committee": view })))
}

pub async fn remove_members(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
    body: Bytes,
) -> AppResult<Json<Value>> {
    ctx.require(Capability::ManageCommittees)?;
    let payload: MembersPayload = parse_body(&body)?;
    state.store.write(|t| t.remove_members(id, &payload.member_ids))?;
    let view = committee_view(&state, id)?;
    Ok(Json(json!({ "message": "Members removed successfully", "committee": view })))
}
