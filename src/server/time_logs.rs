use axum::extract::{Extension, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::identity::{Capability, RequestContext};
use crate::timesheet::{self, ExportRange};
use super::views::TimeLogView;
use super::AppState;

pub async fn list(State(state): State<AppState>, Extension(ctx): Extension<RequestContext>) -> AppResult<Json<Vec<TimeLogView>>> {
    let p = ctx.require(Capability::TrackOwnTime)?;
    let views = state.store.read(|t| TimeLogView::list(t, &t.logs_for(p.user_id)));
    Ok(Json(views))
}

pub async fn clock_in(State(state): State<AppState>, Extension(ctx): Extension<RequestContext>) -> AppResult<Response> {
    let p = ctx.require(Capability::TrackOwnTime)?;
    let now = state.now();
    let view = state.store.write(|t| {
        let log = t.clock_in(p.user_id, now)?;
        Ok(TimeLogView::new(t, &log))
    })?;
    info!(target: "clockhub::time_logs", identity = p.user_id, log = view.id, app_type = %ctx.app_type, "clock in");
    Ok((StatusCode::CREATED, Json(view)).into_response())
}

pub async fn clock_out(State(state): State<AppState>, Extension(ctx): Extension<RequestContext>) -> AppResult<Json<TimeLogView>> {
    let p = ctx.require(Capability::TrackOwnTime)?;
    let now = state.now();
    let view = state.store.write(|t| {
        let log = t.clock_out(p.user_id, now)?;
        Ok(TimeLogView::new(t, &log))
    })?;
    info!(target: "clockhub::time_logs", identity = p.user_id, log = view.id, hours = ?view.duration, "clock out");
    Ok(Json(view))
}

pub async fn current_status(State(state): State<AppState>, Extension(ctx): Extension<RequestContext>) -> AppResult<Json<Value>> {
    let p = ctx.require(Capability::TrackOwnTime)?;
    let open = state.store.read(|t| t.open_log(p.user_id).map(|l| TimeLogView::new(t, l)));
    Ok(Json(json!({
        "is_clocked_in": open.is_some(),
        "current_session": open,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    start_date: Option<String>,
    end_date: Option<String>,
}

fn parse_date(field: &str, raw: Option<&str>) -> AppResult<Option<NaiveDate>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d").map(Some).map_err(|_| {
            AppError::invalid("invalid_date".to_string(), format!("{} must be YYYY-MM-DD", field))
        }),
    }
}

/// Own logs as a CSV attachment, optionally limited to a clock-in date range.
pub async fn export_csv(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(q): Query<ExportQuery>,
) -> AppResult<Response> {
    let p = ctx.require(Capability::TrackOwnTime)?;
    let range = ExportRange {
        start: parse_date("start_date", q.start_date.as_deref())?,
        end: parse_date("end_date", q.end_date.as_deref())?,
    };
    let logs = state.store.read(|t| t.logs_for(p.user_id));
    let body = timesheet::export_csv(&logs, range)?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/csv"));
    let disposition = format!("attachment; filename=\"{}\"", timesheet::export_filename(&p.access_code));
    if let Ok(v) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, v);
    }
    Ok((StatusCode::OK, headers, body).into_response())
}
