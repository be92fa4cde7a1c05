//! Caller-visible failure kinds for the read and subscribe paths.
//!
//! Transient source failures (a provider timeout, a cache miss, a
//! backfill chunk error) never surface here; the orchestrator and
//! backfill manager absorb those and keep going. `PipelineError`
//! exists only for the handful of cases where the caller itself sent
//! something invalid and there is no sensible fallback.

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use md_schemas::Timeframe;
use serde_json::json;

/// Hand-written, matching this workspace's provider-error convention: no
/// `thiserror`, a `Display` impl per variant. `md-subscription` raises
/// `Validation` at subscribe time; `md-daemon`'s HTTP handlers rely on
/// the `IntoResponse` impl below, and its WS handler matches variants
/// directly to build an error frame.
#[derive(Debug)]
pub enum PipelineError {
    Validation(String),
    NotFound(String),
    Auth(String),
    FeatureNotSupported(String),
}

impl PipelineError {
    pub fn message(&self) -> String {
        self.to_string()
    }

    fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::Auth(_) => StatusCode::UNAUTHORIZED,
            PipelineError::FeatureNotSupported(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Validation(msg) => write!(f, "validation error: {msg}"),
            PipelineError::NotFound(msg) => write!(f, "not found: {msg}"),
            PipelineError::Auth(msg) => write!(f, "auth error: {msg}"),
            PipelineError::FeatureNotSupported(msg) => write!(f, "feature not supported: {msg}"),
        }
    }
}

impl std::error::Error for PipelineError {}

/// Legal despite `IntoResponse` being foreign: `PipelineError` is local
/// to this crate, so the impl lives here rather than in `md-daemon`,
/// giving every HTTP handler a plain `?`-able error type.
impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Parses a wire timeframe string (`"1m"`, `"5m"`, ...), wrapping the
/// parser's plain `String` error in a [`PipelineError::Validation`] so
/// callers at the HTTP/WS boundary have one error type to match on.
pub fn parse_timeframe(raw: &str) -> Result<Timeframe, PipelineError> {
    raw.parse().map_err(|msg| PipelineError::Validation(msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_timeframe_parses() {
        let tf = parse_timeframe("5m").unwrap();
        assert_eq!(tf.period_ms(), 5 * 60_000);
    }

    #[test]
    fn invalid_timeframe_is_a_validation_error() {
        let err = parse_timeframe("bogus").unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }
}
