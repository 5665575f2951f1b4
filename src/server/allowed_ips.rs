//! Admin CRUD over the kiosk IP allowlist.

use axum::body::Bytes;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::identity::{Capability, RequestContext};
use super::views::AllowedIpView;
use super::{nullable, parse_body, AppState};

#[derive(Debug, Default, Deserialize)]
struct AllowedIpPayload {
    ip_address: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    label: Option<Option<String>>,
}

fn clean_label(label: Option<String>) -> Option<String> {
    label.map(|l| l.trim().to_string()).filter(|l| !l.is_empty())
}

pub async fn list(State(state): State<AppState>, Extension(ctx): Extension<RequestContext>) -> AppResult<Json<Vec<AllowedIpView>>> {
    ctx.require(Capability::ManageAllowlist)?;
    let views = state.store.read(|t| t.allowed_ips_sorted().iter().map(|e| AllowedIpView::new(t, e)).collect());
    Ok(Json(views))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> AppResult<Response> {
    let admin = ctx.require(Capability::ManageAllowlist)?;
    let payload: AllowedIpPayload = parse_body(&body)?;
    let ip = payload.ip_address.ok_or_else(|| AppError::invalid("invalid_ip", "ip_address is required"))?;
    let label = clean_label(payload.label.flatten());
    let now = state.now();
    let view = state.store.write(|t| {
        let entry = t.insert_allowed_ip(&ip, label, Some(admin.user_id), now)?;
        Ok(AllowedIpView::new(t, &entry))
    })?;
    info!(target: "clockhub::allowlist", by = admin.user_id, ip = %view.ip_address, "allowed ip added");
    Ok((StatusCode::CREATED, Json(view)).into_response())
}

pub async fn get_one(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
) -> AppResult<Json<AllowedIpView>> {
    ctx.require(Capability::ManageAllowlist)?;
    state
        .store
        .read(|t| t.allowed_ip(id).map(|e| AllowedIpView::new(t, e)))
        .map(Json)
        .ok_or_else(|| AppError::not_found("allowed_ip_not_found", "Allowed IP not found"))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
    body: Bytes,
) -> AppResult<Json<AllowedIpView>> {
    let admin = ctx.require(Capability::ManageAllowlist)?;
    let payload: AllowedIpPayload = parse_body(&body)?;
    let label = payload.label.map(clean_label);
    let view = state.store.write(|t| {
        let entry = t.update_allowed_ip(id, payload.ip_address.as_deref(), label)?;
        Ok(AllowedIpView::new(t, &entry))
    })?;
    info!(target: "clockhub::allowlist", by = admin.user_id, id, ip = %view.ip_address, "allowed ip updated");
    Ok(Json(view))
}

pub async fn remove(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    let admin = ctx.require(Capability::ManageAllowlist)?;
    let removed = state.store.write(|t| t.delete_allowed_ip(id))?;
    info!(target: "clockhub::allowlist", by = admin.user_id, ip = %removed.ip_address, "allowed ip removed");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_label_differs_from_missing() {
        let missing: AllowedIpPayload = serde_json::from_str(r#"{"ip_address":"10.0.0.1"}"#).unwrap();
        assert_eq!(missing.label, None);
        let cleared: AllowedIpPayload = serde_json::from_str(r#"{"label":null}"#).unwrap();
        assert_eq!(cleared.label, Some(None));
        assert_eq!(clean_label(Some("  ".into())), None);
    }
}
