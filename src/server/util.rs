use std::net::SocketAddr;

use axum::Json;
use axum::extract::ConnectInfo;
use axum::extract::rejection::JsonRejection;
use axum::http::{Extensions, HeaderMap};

use crate::error::GatewayError;
use crate::server::AppState;

// HTTP helpers
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// 配置了 ADMIN_TOKEN 时校验 Bearer；未配置则放行
pub fn require_admin(app_state: &AppState, headers: &HeaderMap) -> Result<(), GatewayError> {
    let Some(expected) = app_state.config.server.admin_token.as_deref() else {
        return Ok(());
    };
    match bearer_token(headers) {
        Some(provided) if provided == expected => Ok(()),
        Some(_) => Err(GatewayError::Unauthorized("invalid admin token".into())),
        None => Err(GatewayError::Unauthorized("missing admin token".into())),
    }
}

/// JSON 请求体解析失败时同样返回 `{"error": ...}`
pub fn json_payload<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, GatewayError> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| GatewayError::BadRequest(format!("请求体解析失败: {}", e.body_text())))
}

pub fn mask_key(key: &str) -> String {
    if key.chars().count() <= 8 {
        return "****".to_string();
    }
    let chars: Vec<char> = key.chars().collect();
    let start: String = chars[..4].iter().collect();
    let end: String = chars[chars.len() - 4..].iter().collect();
    format!("{}****{}", start, end)
}

/// 客户端地址：优先反向代理头，其次 TCP 对端地址
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    if let Some(ip) = forwarded {
        return Some(ip.to_string());
    }
    if let Some(ip) = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return Some(ip.to_string());
    }
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

pub fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}
