use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::{error, warn};

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum VersionServiceError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Method {method} not allowed on {path}")]
    MethodNotAllowed { method: String, path: String },

    #[error("Failed to serialize document: {0}")]
    Serialization(String),

    #[error("Snapshot store unavailable: {0}")]
    Persistence(String),
}

impl IntoResponse for VersionServiceError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match &self {
            VersionServiceError::ToolNotFound(id) => {
                warn!("Tool not found: {}", id);
                (
                    StatusCode::NOT_FOUND,
                    "tool_not_found",
                    "Tool not found",
                    Some(format!("No tool with id '{}' is tracked", id)),
                )
            }
            VersionServiceError::RouteNotFound(path) => {
                warn!("Route not found: {}", path);
                (
                    StatusCode::NOT_FOUND,
                    "route_not_found",
                    "Route not found",
                    Some(path.clone()),
                )
            }
            VersionServiceError::MethodNotAllowed { method, path } => {
                warn!("Method {} not allowed on {}", method, path);
                (
                    StatusCode::METHOD_NOT_ALLOWED,
                    "method_not_allowed",
                    "Method not allowed",
                    Some(format!("{} {}", method, path)),
                )
            }
            VersionServiceError::Serialization(e) => {
                error!("Failed to serialize document: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Failed to render document",
                    None,
                )
            }
            VersionServiceError::Persistence(e) => {
                error!("Snapshot store unavailable: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "service_unavailable",
                    "Version registry temporarily unavailable",
                    None,
                )
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: error_code.to_owned(),
                message: message.to_owned(),
                details,
            }),
        )
            .into_response()
    }
}
