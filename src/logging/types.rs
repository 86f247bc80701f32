use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::UpstreamConfig;

/// 单个接口的模型参数；未设置的项沿用系统设置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// 合并系统设置后的最终调用参数
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl ModelParams {
    pub fn resolve(&self, system: &SystemSettings) -> ResolvedParams {
        ResolvedParams {
            model: self
                .model
                .clone()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| system.model_name.clone()),
            temperature: self.temperature.unwrap_or(system.temperature),
            max_tokens: self.max_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    pub name: String,
    pub path: String,
    pub system_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub params: ModelParams,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallLog {
    pub id: Option<i64>,
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub config_name: String,
    pub path: String,
    pub request_data: Value,
    pub response_data: Value,
    pub success: bool,
    pub status_code: u16,
    pub error_message: Option<String>,
    pub execution_time_ms: i64,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// 日志查询条件，时间范围均为闭区间
#[derive(Debug, Clone)]
pub struct CallLogQuery {
    pub limit: usize,
    pub skip: usize,
    pub config_name: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl Default for CallLogQuery {
    fn default() -> Self {
        Self {
            limit: 100,
            skip: 0,
            config_name: None,
            start: None,
            end: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConfigCallStats {
    pub config_name: String,
    pub count: u64,
    pub success_count: u64,
    pub error_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CallLogStats {
    pub total_calls: u64,
    pub success_calls: u64,
    pub error_calls: u64,
    pub success_rate: f64,
    pub config_stats: Vec<ConfigCallStats>,
}

impl CallLogStats {
    pub fn new(total_calls: u64, success_calls: u64, config_stats: Vec<ConfigCallStats>) -> Self {
        let success_rate = if total_calls > 0 {
            ((success_calls as f64 / total_calls as f64) * 100.0 * 100.0).round() / 100.0
        } else {
            0.0
        };
        Self {
            total_calls,
            success_calls,
            error_calls: total_calls.saturating_sub(success_calls),
            success_rate,
            config_stats,
        }
    }
}

/// 运行期可修改的上游设置（持久化）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSettings {
    pub api_url: String,
    pub api_key: String,
    pub model_name: String,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    pub log_enabled: bool,
    pub updated_at: DateTime<Utc>,
}

impl SystemSettings {
    pub fn from_upstream(cfg: &UpstreamConfig) -> Self {
        Self {
            api_url: cfg.api_url.clone(),
            api_key: cfg.api_key.clone(),
            model_name: cfg.model_name.clone(),
            temperature: cfg.temperature,
            request_timeout_secs: cfg.request_timeout_secs,
            log_enabled: cfg.log_enabled,
            updated_at: Utc::now(),
        }
    }
}
