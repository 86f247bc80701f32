use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::json;

use crate::error::GatewayError;
use crate::logging::time::to_beijing_string;
use crate::server::AppState;
use crate::server::util::require_admin;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "time": to_beijing_string(&Utc::now()),
    }))
}

/// 存储连通性检查，失败时返回 503
pub async fn storage_health(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    require_admin(&app_state, &headers)?;
    let backend = app_state.call_logs.backend_name();
    match app_state.call_logs.ping().await {
        Ok(()) => Ok(Json(json!({ "backend": backend, "status": "ok" })).into_response()),
        Err(e) => {
            tracing::warn!("Storage ping failed ({}): {}", backend, e);
            Ok((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "backend": backend, "status": "error", "error": e.to_string() })),
            )
                .into_response())
        }
    }
}
