use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    // 未配置时管理接口不做鉴权
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            admin_token: None,
        }
    }
}

/// 上游 LLM 服务的初始配置。首次启动时写入存储，之后以存储中的系统设置为准。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub api_url: String,
    pub api_key: String,
    pub model_name: String,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    pub log_enabled: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model_name: "qwen-max".to_string(),
            temperature: 0.1,
            request_timeout_secs: 60,
            log_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: String,
    // 仅 Postgres 使用
    pub pg_schema: Option<String>,
    pub pg_pool_size: Option<usize>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "data/promptgate.db".to_string(),
            pg_schema: None,
            pg_pool_size: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Sqlite(String),
    Postgres(String),
}

impl StorageBackend {
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(GatewayError::Config("database url is empty".into()));
        }
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return Ok(Self::Postgres(url.to_string()));
        }
        if url.starts_with("mongodb://") || url.starts_with("mongodb+srv://") {
            return Err(GatewayError::Config(
                "MongoDB is not supported; use a SQLite path or a postgres:// url".into(),
            ));
        }
        let path = url.strip_prefix("sqlite://").unwrap_or(url);
        Ok(Self::Sqlite(path.to_string()))
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let mut settings = match Self::find_config_file() {
            Some(path) => {
                let content = std::fs::read_to_string(&path)?;
                tracing::info!("Loaded configuration from {}", path);
                Self::from_toml(&content)?
            }
            None => Settings::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| GatewayError::Config(e.to_string()))
    }

    /// 环境变量覆盖配置文件中的同名项
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("HOST") {
            self.server.host = v;
        }
        if let Some(v) = get("PORT") {
            match v.trim().parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!("Ignoring invalid PORT value: {}", v),
            }
        }
        if let Some(v) = get("ADMIN_TOKEN") {
            self.server.admin_token = Some(v);
        }

        if let Some(v) = get("OPENAI_API_URL") {
            self.upstream.api_url = v;
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.upstream.api_key = v;
        }
        if let Some(v) = get("MODEL_NAME") {
            self.upstream.model_name = v;
        }
        if let Some(v) = get("TEMPERATURE") {
            match v.trim().parse() {
                Ok(t) => self.upstream.temperature = t,
                Err(_) => tracing::warn!("Ignoring invalid TEMPERATURE value: {}", v),
            }
        }
        if let Some(v) = get("REQUEST_TIMEOUT_SECS") {
            match v.trim().parse() {
                Ok(t) => self.upstream.request_timeout_secs = t,
                Err(_) => tracing::warn!("Ignoring invalid REQUEST_TIMEOUT_SECS value: {}", v),
            }
        }
        if let Some(v) = get("LOG_ENABLED") {
            self.upstream.log_enabled = v.trim().eq_ignore_ascii_case("true");
        }

        // 兼容旧部署里的 MONGODB_URL，DATABASE_URL 优先
        if let Some(v) = get("DATABASE_URL").or_else(|| get("MONGODB_URL")) {
            self.storage.database_url = v;
        }
    }

    pub fn storage_backend(&self) -> Result<StorageBackend> {
        StorageBackend::parse(&self.storage.database_url)
    }

    fn find_config_file() -> Option<String> {
        let possible_names = ["custom-config.toml", "config.toml"];

        possible_names
            .iter()
            .find(|name| Path::new(name).exists())
            .map(|name| name.to_string())
    }
}
