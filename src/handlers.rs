//! HTTP request handlers.
//!
//! The dispatch handler owns the favicon short-circuit and the emergency
//! fallback; reporting and health endpoints answer JSON. When the service
//! runs degraded (stores unconfigured) everything except the health
//! endpoints answers 503.

use crate::analytics::DISTINCT_FIELDS;
use crate::database;
use crate::dispatch::{client_ip, DispatchRequest, EMERGENCY_FALLBACK_URL};
use crate::error::ApiError;
use crate::server::AppState;
use crate::url_decorator::TrackingParams;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::{FromRequestParts, Path, RawQuery, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::warn;
use serde_json::json;
use std::net::SocketAddr;

/// Resolved visitor identity: first `X-Forwarded-For` token, then the
/// socket peer address, then `unknown`.
pub struct ClientIp(pub String);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok());
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);
        Ok(ClientIp(client_ip(forwarded, peer)))
    }
}

/// Parse the dispatch query string by hand: unknown parameters are
/// ignored and repeats keep the last value. Nothing here can fail: a
/// malformed query must still end in a redirect, never a 400.
fn parse_dispatch_request(raw_query: Option<&str>, ip: String) -> DispatchRequest {
    let mut language = None;
    let mut tracking = TrackingParams::default();

    if let Some(raw) = raw_query {
        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            let value = value.into_owned();
            match key.as_ref() {
                "language" => language = Some(value),
                "utm_source" => tracking.utm_source = Some(value),
                "utm_medium" => tracking.utm_medium = Some(value),
                "utm_campaign" => tracking.utm_campaign = Some(value),
                "utm_term" => tracking.utm_term = Some(value),
                "utm_content" => tracking.utm_content = Some(value),
                "fbclid" => tracking.fbclid = Some(value),
                "gclid" => tracking.gclid = Some(value),
                _ => {}
            }
        }
    }

    DispatchRequest {
        ip,
        language,
        tracking,
    }
}

fn redirect_found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// `GET /`: the dispatch hot path.
///
/// Always answers a redirect (or 204 for favicon noise); any engine error
/// is caught and turned into the emergency fallback redirect.
pub async fn dispatch(
    State(state): State<AppState>,
    uri: Uri,
    ClientIp(ip): ClientIp,
    RawQuery(raw_query): RawQuery,
) -> Response {
    // Step 1: favicon short-circuit, before any counter mutation
    if uri.to_string().contains("favicon") {
        return StatusCode::NO_CONTENT.into_response();
    }

    let Some(services) = state.services.as_ref() else {
        return ApiError::Unavailable("Dispatcher is not configured").into_response();
    };

    let request = parse_dispatch_request(raw_query.as_deref(), ip);

    match services.engine.dispatch(&request).await {
        Ok(dispatch) => redirect_found(&dispatch.final_url),
        Err(e) => {
            warn!("⚠️ Dispatch failed, emergency fallback engaged: {:#}", e);
            redirect_found(EMERGENCY_FALLBACK_URL)
        }
    }
}

/// `GET /api/process`: manual refresh trigger.
pub async fn process(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let services = require_services(&state)?;

    let published = services
        .refresher
        .refresh()
        .await
        .map_err(ApiError::from_store)?;

    let body = match published {
        Some(best) => json!({
            "success": true,
            "message": format!("Rankings refreshed for {} domains", best.len()),
            "data": best,
        }),
        None => json!({
            "success": true,
            "message": "No analytics rows for today; previous rankings kept",
            "data": null,
        }),
    };
    Ok(Json(body))
}

/// `GET /api/stats`: aggregated statistics. GAM totals, click counters
/// and the dispatch traffic split.
pub async fn stats(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let services = require_services(&state)?;

    let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let gam = services
        .analytics
        .daily_totals(&today)
        .await
        .map_err(ApiError::from_store)?;
    let counters = services
        .clicks
        .list_counters()
        .await
        .map_err(ApiError::from_store)?;

    let total: i64 = counters.iter().map(|c| c.count).sum();
    let class_total = |prefix: &str| -> i64 {
        counters
            .iter()
            .filter(|c| c.link_id.starts_with(prefix))
            .map(|c| c.count)
            .sum()
    };
    let top: Vec<_> = counters.iter().take(10).collect();

    Ok(Json(json!({
        "success": true,
        "data": {
            "gam": gam,
            "clicks": { "total": total, "top": top },
            "traffic": {
                "best": class_total("best_"),
                "fallback": class_total("fallback_"),
                "random": class_total("random_"),
            },
        },
    })))
}

/// `GET /api/distinct/{field}`: distinct values of a whitelisted
/// analytics field.
pub async fn distinct(
    State(state): State<AppState>,
    Path(field): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let services = require_services(&state)?;

    if !DISTINCT_FIELDS.contains(&field.as_str()) {
        return Err(ApiError::Validation {
            message: format!("Invalid field '{}'", field),
            valid_fields: Some(DISTINCT_FIELDS),
        });
    }

    let values = services
        .analytics
        .distinct_values(&field)
        .await
        .map_err(ApiError::from_store)?;

    Ok(Json(json!({ "success": true, "data": values })))
}

/// `GET /api/links`: persisted link records, newest first.
pub async fn links(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let services = require_services(&state)?;

    let records = services.links.list().await.map_err(ApiError::from_store)?;
    Ok(Json(json!({ "success": true, "data": records })))
}

/// `GET /health`: liveness.
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

/// `GET /health/ready`: readiness, 503 while degraded.
pub async fn health_ready(State(state): State<AppState>) -> Response {
    if state.services.is_some() {
        Json(json!({ "status": "ready" })).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded" })),
        )
            .into_response()
    }
}

/// `GET /health/detailed`: pings both stores; 503 if either is down.
pub async fn health_detailed(State(state): State<AppState>) -> Response {
    let (mongo_up, redis_up) = match state.services.as_ref() {
        Some(services) => {
            let mongo_up = match services.db.as_ref() {
                Some(db) => database::ping(db).await.is_ok(),
                None => false,
            };
            let redis_up = services.cache.ping().await.is_ok();
            (mongo_up, redis_up)
        }
        None => (false, false),
    };

    let healthy = mongo_up && redis_up;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if healthy { "ok" } else { "degraded" },
            "components": {
                "mongodb": if mongo_up { "up" } else { "down" },
                "redis": if redis_up { "up" } else { "down" },
            },
        })),
    )
        .into_response()
}

/// `GET /ping`
pub async fn ping() -> &'static str {
    "pong"
}

fn require_services(state: &AppState) -> Result<&std::sync::Arc<crate::server::Services>, ApiError> {
    state
        .services
        .as_ref()
        .ok_or(ApiError::Unavailable("Service is running in degraded mode"))
}
