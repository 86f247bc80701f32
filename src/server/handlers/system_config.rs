use std::sync::Arc;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::HeaderMap,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::logging::types::SystemSettings;
use crate::server::AppState;
use crate::server::util::{json_payload, mask_key, require_admin};

#[derive(Debug, Serialize)]
pub(super) struct SystemConfigView {
    api_url: String,
    api_key: String,
    model_name: String,
    temperature: f32,
    request_timeout_secs: u64,
    log_enabled: bool,
    updated_at: DateTime<Utc>,
}

impl From<&SystemSettings> for SystemConfigView {
    fn from(s: &SystemSettings) -> Self {
        Self {
            api_url: s.api_url.clone(),
            api_key: mask_key(&s.api_key),
            model_name: s.model_name.clone(),
            temperature: s.temperature,
            request_timeout_secs: s.request_timeout_secs,
            log_enabled: s.log_enabled,
            updated_at: s.updated_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct SystemConfigPatch {
    #[serde(default)]
    api_url: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    model_name: Option<String>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    request_timeout_secs: Option<u64>,
    #[serde(default)]
    log_enabled: Option<bool>,
}

impl SystemConfigPatch {
    fn apply(self, settings: &mut SystemSettings) -> Result<(), GatewayError> {
        if let Some(url) = self.api_url {
            let url = url.trim().trim_end_matches('/').to_string();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(GatewayError::BadRequest(
                    "api_url 必须以 http:// 或 https:// 开头".into(),
                ));
            }
            settings.api_url = url;
        }
        // 回传的掩码值视为未修改
        if let Some(key) = self.api_key {
            if !key.contains("****") {
                settings.api_key = key.trim().to_string();
            }
        }
        if let Some(model) = self.model_name {
            if model.trim().is_empty() {
                return Err(GatewayError::BadRequest("model_name 不能为空".into()));
            }
            settings.model_name = model.trim().to_string();
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(GatewayError::BadRequest("temperature 必须在 0 到 2 之间".into()));
            }
            settings.temperature = t;
        }
        if let Some(secs) = self.request_timeout_secs {
            if !(1..=600).contains(&secs) {
                return Err(GatewayError::BadRequest(
                    "request_timeout_secs 必须在 1 到 600 之间".into(),
                ));
            }
            settings.request_timeout_secs = secs;
        }
        if let Some(enabled) = self.log_enabled {
            settings.log_enabled = enabled;
        }
        Ok(())
    }
}

pub async fn get_system_config(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<SystemConfigView>, GatewayError> {
    require_admin(&app_state, &headers)?;
    let settings = app_state.system.read().await;
    Ok(Json(SystemConfigView::from(&*settings)))
}

pub async fn update_system_config(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    patch: Result<Json<SystemConfigPatch>, JsonRejection>,
) -> Result<Json<SystemConfigView>, GatewayError> {
    require_admin(&app_state, &headers)?;
    let patch = json_payload(patch)?;

    // 持有写锁直到落盘，保证内存与存储一致
    let mut current = app_state.system.write().await;
    let mut next = current.clone();
    patch.apply(&mut next)?;
    next.updated_at = Utc::now();
    app_state.settings_store.save_system_settings(&next).await?;
    *current = next;

    tracing::info!(
        "System settings updated (model={}, logging={})",
        current.model_name,
        if current.log_enabled { "on" } else { "off" }
    );
    Ok(Json(SystemConfigView::from(&*current)))
}
