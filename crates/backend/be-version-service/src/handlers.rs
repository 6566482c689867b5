use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{
        HeaderMap, Method, StatusCode, Uri,
        header::{CACHE_CONTROL, ETAG, IF_NONE_MATCH},
    },
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::{error::VersionServiceError, evaluator, service::AppState};

pub const TOOLS_MAX_AGE_SECS: u64 = 60;
pub const UPDATE_MAX_AGE_SECS: u64 = 300;

/// Serve `document` with a strong validator, or `304 Not Modified` when the
/// caller already holds the current version.
fn conditional_json<T: Serialize>(
    document: &T,
    headers: &HeaderMap,
    max_age: u64,
) -> Result<Response, VersionServiceError> {
    let fingerprint = evaluator::fingerprint(document)
        .map_err(|e| VersionServiceError::Serialization(e.to_string()))?;
    let etag = evaluator::etag(&fingerprint);
    let cache_control = format!("public, max-age={}", max_age);

    let not_modified = headers
        .get(IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| evaluator::etag_matches(value, &etag));

    if not_modified {
        debug!("Validator {} still current", etag);
        return Ok((
            StatusCode::NOT_MODIFIED,
            [(ETAG, etag), (CACHE_CONTROL, cache_control)],
        )
            .into_response());
    }

    Ok((
        StatusCode::OK,
        [(ETAG, etag), (CACHE_CONTROL, cache_control)],
        Json(document),
    )
        .into_response())
}

#[instrument(skip_all)]
pub async fn get_tools_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let result = match state.snapshot().await {
        Ok(snapshot) => {
            debug!(
                "Serving snapshot: tools={}, status={}",
                snapshot.tools.len(),
                snapshot.status
            );
            conditional_json(&snapshot, &headers, TOOLS_MAX_AGE_SECS)
        }
        Err(e) => Err(e),
    };

    result.unwrap_or_else(|e| {
        warn!("Snapshot request failed: {}", e);
        e.into_response()
    })
}

#[instrument(skip_all, fields(tool_id = %tool_id))]
pub async fn get_tool_handler(
    State(state): State<Arc<AppState>>,
    Path(tool_id): Path<String>,
) -> Response {
    match state.tool(&tool_id).await {
        Ok(record) => (
            StatusCode::OK,
            [(
                CACHE_CONTROL,
                format!("public, max-age={}", TOOLS_MAX_AGE_SECS),
            )],
            Json(record),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

#[instrument(skip_all)]
pub async fn get_update_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let result = match state.update_info().await {
        Ok(info) => {
            debug!("Serving update document: version={:?}", info.version);
            conditional_json(&info, &headers, UPDATE_MAX_AGE_SECS)
        }
        Err(e) => Err(e),
    };

    result.unwrap_or_else(|e| {
        warn!("Update document request failed: {}", e);
        e.into_response()
    })
}

#[instrument(skip_all)]
pub async fn get_health_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.health().await {
        Ok(health) => {
            debug!(
                "Health: status={}, tools={}, age_minutes={:?}",
                health.status, health.tools_count, health.age_minutes
            );
            (
                StatusCode::OK,
                [(CACHE_CONTROL, "no-store")],
                Json(health),
            )
                .into_response()
        }
        Err(e) => {
            warn!("Health request failed: {}", e);
            e.into_response()
        }
    }
}

pub async fn route_not_found_handler(uri: Uri) -> Response {
    VersionServiceError::RouteNotFound(uri.path().to_string()).into_response()
}

pub async fn method_not_allowed_handler(method: Method, uri: Uri) -> Response {
    VersionServiceError::MethodNotAllowed {
        method: method.to_string(),
        path: uri.path().to_string(),
    }
    .into_response()
}
