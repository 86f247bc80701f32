use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;

use crate::error::GatewayError;
use crate::logging::types::{ApiConfig, ModelParams};
use crate::server::AppState;
use crate::server::util::{json_payload, require_admin};

// 与固定路由 /api/configs、/api/logs 冲突的名称
const RESERVED_NAMES: [&str; 2] = ["configs", "logs"];
const MAX_NAME_LEN: usize = 64;

#[derive(Debug, Deserialize)]
pub(super) struct ConfigPayload {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(flatten)]
    params: ModelParams,
    #[serde(default)]
    enabled: Option<bool>,
}

fn validate_name(name: &str) -> Result<(), GatewayError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(GatewayError::BadRequest(format!(
            "名称长度必须在 1 到 {} 之间",
            MAX_NAME_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(GatewayError::BadRequest(
            "名称只能包含字母、数字、下划线和连字符".into(),
        ));
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(GatewayError::BadRequest(format!("名称 {} 为保留字", name)));
    }
    Ok(())
}

fn validate_path(name: &str, path: &str) -> Result<(), GatewayError> {
    if !path.starts_with('/') || path == "/" {
        return Err(GatewayError::BadRequest("路径必须以 / 开头".into()));
    }
    if path
        .chars()
        .any(|c| c.is_whitespace() || c == '?' || c == '#' || c == '%')
    {
        return Err(GatewayError::BadRequest("路径包含非法字符".into()));
    }
    let reserved = path == "/health"
        || path == "/admin"
        || path.starts_with("/admin/")
        || path == "/api/configs"
        || path == "/api/logs"
        || path.starts_with("/api/logs/");
    if reserved {
        return Err(GatewayError::BadRequest(format!("路径 {} 为系统保留", path)));
    }
    // /api/<x> 由按名称分发的路由处理，只能指向同名配置
    if let Some(segment) = path.strip_prefix("/api/") {
        if !segment.contains('/') && segment != name {
            return Err(GatewayError::BadRequest(format!(
                "路径 /api/{} 只能用于名称为 {} 的配置",
                segment, segment
            )));
        }
    }
    Ok(())
}

fn validate_params(params: &ModelParams) -> Result<(), GatewayError> {
    if let Some(t) = params.temperature {
        if !(0.0..=2.0).contains(&t) {
            return Err(GatewayError::BadRequest("temperature 必须在 0 到 2 之间".into()));
        }
    }
    if params.max_tokens == Some(0) {
        return Err(GatewayError::BadRequest("max_tokens 必须大于 0".into()));
    }
    Ok(())
}

fn require_prompt(prompt: Option<String>) -> Result<String, GatewayError> {
    match prompt {
        Some(p) if !p.trim().is_empty() => Ok(p),
        _ => Err(GatewayError::BadRequest("system_prompt 不能为空".into())),
    }
}

/// `GET /api/configs`：以名称为键返回全部配置
pub async fn configs_by_name(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<BTreeMap<String, ApiConfig>>, GatewayError> {
    require_admin(&app_state, &headers)?;
    let configs = app_state.configs.list_configs().await?;
    Ok(Json(
        configs.into_iter().map(|c| (c.name.clone(), c)).collect(),
    ))
}

pub async fn list_configs(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ApiConfig>>, GatewayError> {
    require_admin(&app_state, &headers)?;
    Ok(Json(app_state.configs.list_configs().await?))
}

pub async fn get_config(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<ApiConfig>, GatewayError> {
    require_admin(&app_state, &headers)?;
    app_state
        .configs
        .get_config(&name)
        .await?
        .map(Json)
        .ok_or_else(|| GatewayError::NotFound(format!("配置 {} 不存在", name)))
}

pub async fn create_config(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<ConfigPayload>, JsonRejection>,
) -> Result<Response, GatewayError> {
    require_admin(&app_state, &headers)?;
    let payload = json_payload(payload)?;

    let name = payload.name.map(|n| n.trim().to_string()).unwrap_or_default();
    validate_name(&name)?;
    let path = payload
        .path
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| format!("/api/{}", name));
    validate_path(&name, &path)?;
    validate_params(&payload.params)?;
    let system_prompt = require_prompt(payload.system_prompt)?;

    let now = Utc::now();
    let config = ApiConfig {
        name,
        path,
        system_prompt,
        description: payload.description,
        params: payload.params,
        enabled: payload.enabled.unwrap_or(true),
        created_at: now,
        updated_at: now,
    };

    if !app_state.configs.insert_config(&config).await? {
        return Err(GatewayError::Conflict(format!(
            "名称 {} 或路径 {} 已存在",
            config.name, config.path
        )));
    }
    tracing::info!("Created api config {} -> {}", config.name, config.path);
    Ok((StatusCode::CREATED, Json(config)).into_response())
}

/// 整体替换可编辑字段；未提供的 path、enabled 保持原值
pub async fn update_config(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    payload: Result<Json<ConfigPayload>, JsonRejection>,
) -> Result<Json<ApiConfig>, GatewayError> {
    require_admin(&app_state, &headers)?;
    let payload = json_payload(payload)?;

    if payload.name.as_deref().is_some_and(|n| n.trim() != name) {
        return Err(GatewayError::BadRequest("不支持修改配置名称".into()));
    }
    let existing = app_state
        .configs
        .get_config(&name)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("配置 {} 不存在", name)))?;

    let path = payload
        .path
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or(existing.path);
    validate_path(&name, &path)?;
    validate_params(&payload.params)?;
    let system_prompt = require_prompt(payload.system_prompt)?;

    if let Some(other) = app_state.configs.get_config_by_path(&path).await? {
        if other.name != name {
            return Err(GatewayError::Conflict(format!(
                "路径 {} 已被配置 {} 使用",
                path, other.name
            )));
        }
    }

    let config = ApiConfig {
        name,
        path,
        system_prompt,
        description: payload.description,
        params: payload.params,
        enabled: payload.enabled.unwrap_or(existing.enabled),
        created_at: existing.created_at,
        updated_at: Utc::now(),
    };
    if !app_state.configs.update_config(&config).await? {
        return Err(GatewayError::NotFound(format!("配置 {} 不存在", config.name)));
    }
    tracing::info!("Updated api config {}", config.name);
    Ok(Json(config))
}

pub async fn delete_config(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<StatusCode, GatewayError> {
    require_admin(&app_state, &headers)?;
    if !app_state.configs.delete_config(&name).await? {
        return Err(GatewayError::NotFound(format!("配置 {} 不存在", name)));
    }
    tracing::info!("Deleted api config {}", name);
    Ok(StatusCode::NO_CONTENT)
}
