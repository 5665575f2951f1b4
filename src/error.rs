//! Unified application error model and mapping helpers.
//! Every failure that reaches a client goes through `AppError`, which maps to an HTTP
//! status and a structured JSON body (`kind`, `code`, `message`, optional `detail`).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AppError {
    AuthenticationFailed { code: String, message: String, #[serde(default, skip_serializing_if = "Option::is_none")] detail: Option<Value> },
    AccessDenied { code: String, message: String, #[serde(default, skip_serializing_if = "Option::is_none")] detail: Option<Value> },
    NotFound { code: String, message: String, #[serde(default, skip_serializing_if = "Option::is_none")] detail: Option<Value> },
    ValidationFailed { code: String, message: String, #[serde(default, skip_serializing_if = "Option::is_none")] detail: Option<Value> },
    Conflict { code: String, message: String, #[serde(default, skip_serializing_if = "Option::is_none")] detail: Option<Value> },
    InternalFailure { code: String, message: String, #[serde(default, skip_serializing_if = "Option::is_none")] detail: Option<Value> },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::AuthenticationFailed { code, .. }
            | AppError::AccessDenied { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::ValidationFailed { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::InternalFailure { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::AuthenticationFailed { message, .. }
            | AppError::AccessDenied { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::ValidationFailed { message, .. }
            | AppError::Conflict { message, .. }
            | AppError::InternalFailure { message, .. } => message.as_str(),
        }
    }

    pub fn detail(&self) -> Option<&Value> {
        match self {
            AppError::AuthenticationFailed { detail, .. }
            | AppError::AccessDenied { detail, .. }
            | AppError::NotFound { detail, .. }
            | AppError::ValidationFailed { detail, .. }
            | AppError::Conflict { detail, .. }
            | AppError::InternalFailure { detail, .. } => detail.as_ref(),
        }
    }

    /// Machine-readable kind, identical to the serde tag.
    pub fn kind_str(&self) -> &'static str {
        match self {
            AppError::AuthenticationFailed { .. } => "authentication_failed",
            AppError::AccessDenied { .. } => "access_denied",
            AppError::NotFound { .. } => "not_found",
            AppError::ValidationFailed { .. } => "validation_failed",
            AppError::Conflict { .. } => "conflict",
            AppError::InternalFailure { .. } => "internal_failure",
        }
    }

    pub fn auth<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::AuthenticationFailed { code: code.into(), message: msg.into(), detail: None } }
    pub fn denied<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::AccessDenied { code: code.into(), message: msg.into(), detail: None } }
    pub fn not_found<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::NotFound { code: code.into(), message: msg.into(), detail: None } }
    pub fn invalid<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::ValidationFailed { code: code.into(), message: msg.into(), detail: None } }
    pub fn conflict<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Conflict { code: code.into(), message: msg.into(), detail: None } }
    pub fn internal<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::InternalFailure { code: code.into(), message: msg.into(), detail: None } }

    /// Attach structured detail (offending IP, rejected origin, ...).
    pub fn with_detail(mut self, value: Value) -> Self {
        match &mut self {
            AppError::AuthenticationFailed { detail, .. }
            | AppError::AccessDenied { detail, .. }
            | AppError::NotFound { detail, .. }
            | AppError::ValidationFailed { detail, .. }
            | AppError::Conflict { detail, .. }
            | AppError::InternalFailure { detail, .. } => *detail = Some(value),
        }
        self
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::AuthenticationFailed { .. } => 401,
            AppError::AccessDenied { .. } => 403,
            AppError::NotFound { .. } => 404,
            AppError::ValidationFailed { .. } => 400,
            AppError::Conflict { .. } => 409,
            AppError::InternalFailure { .. } => 500,
        }
    }

    pub fn to_json(&self) -> Value {
        let mut body = serde_json::json!({
            "status": "error",
            "kind": self.kind_str(),
            "code": self.code_str(),
            "message": self.message(),
        });
        if let (Some(d), Some(map)) = (self.detail(), body.as_object_mut()) {
            map.insert("detail".into(), d.clone());
        }
        body
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // Internals go to the log, never to the client
        tracing::error!(error = %err, "internal failure");
        AppError::internal("internal_error", "internal server error")
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(AppError::auth("auth", "no").http_status(), 401);
        assert_eq!(AppError::denied("ip_not_allowed", "blocked").http_status(), 403);
        assert_eq!(AppError::not_found("not_found", "missing").http_status(), 404);
        assert_eq!(AppError::invalid("bad_input", "oops").http_status(), 400);
        assert_eq!(AppError::conflict("already_clocked_in", "dup").http_status(), 409);
        assert_eq!(AppError::internal("internal", "panic").http_status(), 500);
    }

    #[test]
    fn json_body_carries_kind_and_detail() {
        let err = AppError::denied("ip_not_allowed", "denied").with_detail(serde_json::json!({"ip_address": "10.0.0.9"}));
        let body = err.to_json();
        assert_eq!(body["status"], "error");
        assert_eq!(body["kind"], "access_denied");
        assert_eq!(body["code"], "ip_not_allowed");
        assert_eq!(body["detail"]["ip_address"], "10.0.0.9");

        let plain = AppError::not_found("nf", "gone").to_json();
        assert!(plain.get("detail").is_none());
    }

    #[test]
    fn anyhow_errors_do_not_leak_internals() {
        let err: AppError = anyhow::anyhow!("disk at /var/lib/secret is full").into();
        assert_eq!(err.http_status(), 500);
        assert!(!err.message().contains("/var/lib"));
    }
}
