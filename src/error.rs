//! HTTP-facing error mapping.
//!
//! Reporting endpoints answer JSON errors with an appropriate status;
//! error detail (the anyhow chain) is included in the body only in
//! development mode. The dispatch endpoint never surfaces these: its
//! failure mode is the emergency redirect, handled in the dispatch
//! handler itself.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use once_cell::sync::OnceCell;
use serde_json::{json, Value};

static DEVELOPMENT_MODE: OnceCell<bool> = OnceCell::new();

/// Set once at startup from `NODE_ENV`.
pub fn set_development_mode(enabled: bool) {
    let _ = DEVELOPMENT_MODE.set(enabled);
}

fn development_mode() -> bool {
    DEVELOPMENT_MODE.get().copied().unwrap_or(false)
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Bad request input on a reporting endpoint.
    #[error("{message}")]
    Validation {
        message: String,
        valid_fields: Option<&'static [&'static str]>,
    },

    /// Duplicate key on a persisted store.
    #[error("duplicate key: {0}")]
    Conflict(String),

    /// The service is running without its backing stores.
    #[error("{0}")]
    Unavailable(&'static str),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Classify a store error: Mongo duplicate-key (E11000) becomes a 409,
    /// anything else stays internal.
    pub fn from_store(err: anyhow::Error) -> Self {
        if err.chain().any(|cause| cause.to_string().contains("E11000")) {
            return ApiError::Conflict(err.to_string());
        }
        ApiError::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, mut body) = match &self {
            ApiError::Validation {
                message,
                valid_fields,
            } => {
                let mut body = json!({ "error": message });
                if let Some(fields) = valid_fields {
                    body["validFields"] = json!(fields);
                }
                (StatusCode::BAD_REQUEST, body)
            }
            ApiError::Conflict(detail) => (
                StatusCode::CONFLICT,
                json!({ "error": "Duplicate key", "detail": detail }),
            ),
            ApiError::Unavailable(reason) => {
                (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": reason }))
            }
            ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Internal server error" }),
            ),
        };

        if development_mode() {
            if let ApiError::Internal(e) = &self {
                body["stack"] = Value::String(format!("{:?}", e));
            }
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_key_maps_to_conflict() {
        let err = anyhow::anyhow!("E11000 duplicate key error collection: redron.redirects_clicks");
        assert!(matches!(ApiError::from_store(err), ApiError::Conflict(_)));

        let err = anyhow::anyhow!("connection reset");
        assert!(matches!(ApiError::from_store(err), ApiError::Internal(_)));
    }
}
