pub mod handlers;
pub(crate) mod request_logging;
pub mod response_json;
pub mod storage_traits;
pub(crate) mod util;

#[cfg(test)]
pub(crate) mod test_support;

use crate::config::{Settings, StorageBackend, UpstreamConfig};
use crate::error::Result as AppResult;
use crate::logging::DatabaseLogger;
use crate::logging::postgres_store::PgStore;
use crate::logging::types::SystemSettings;
use crate::server::storage_traits::{CallLogStore, ConfigStore, SettingsStore};
use axum::Router;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct AppState {
    pub config: Settings,
    pub configs: Arc<dyn ConfigStore + Send + Sync>,
    pub call_logs: Arc<dyn CallLogStore + Send + Sync>,
    pub settings_store: Arc<dyn SettingsStore + Send + Sync>,
    // 每次调用读取，管理接口修改
    pub system: Arc<RwLock<SystemSettings>>,
}

pub async fn create_app(config: Settings) -> AppResult<Router> {
    let backend = config.storage_backend()?;

    let (config_store, log_store, settings_store): (
        Arc<dyn ConfigStore + Send + Sync>,
        Arc<dyn CallLogStore + Send + Sync>,
        Arc<dyn SettingsStore + Send + Sync>,
    ) = match &backend {
        StorageBackend::Postgres(pg_url) => {
            let pool_size = config.storage.pg_pool_size.unwrap_or(4);
            let pg = Arc::new(PgStore::connect(pg_url, &config.storage.pg_schema, pool_size).await?);
            tracing::info!("Using PostgreSQL for configs and call logs");
            (pg.clone(), pg.clone(), pg)
        }
        StorageBackend::Sqlite(path) => {
            let db = Arc::new(DatabaseLogger::new(path).await?);
            (db.clone(), db.clone(), db)
        }
    };

    let system = load_or_seed_system_settings(settings_store.as_ref(), &config.upstream).await?;
    tracing::info!(
        "Upstream: {} (model={}, logging={})",
        system.api_url,
        system.model_name,
        if system.log_enabled { "on" } else { "off" }
    );
    if config.server.admin_token.is_none() {
        tracing::warn!("ADMIN_TOKEN 未配置，管理接口无需鉴权即可访问");
    }

    let app_state = AppState {
        config,
        configs: config_store,
        call_logs: log_store,
        settings_store,
        system: Arc::new(RwLock::new(system)),
    };

    Ok(build_router(Arc::new(app_state)))
}

pub fn build_router(app_state: Arc<AppState>) -> Router {
    use axum::http::{Method, header};
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    // 动态接口供任意前端调用，允许所有来源
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_origin(Any);

    handlers::routes()
        .with_state(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// 存储中已有系统设置则沿用，否则用启动配置初始化并写入
async fn load_or_seed_system_settings(
    store: &(dyn SettingsStore + Send + Sync),
    upstream: &UpstreamConfig,
) -> AppResult<SystemSettings> {
    if let Some(existing) = store.load_system_settings().await? {
        tracing::info!("Loaded system settings from storage");
        return Ok(existing);
    }
    let seeded = SystemSettings::from_upstream(upstream);
    store.save_system_settings(&seeded).await?;
    tracing::info!("Seeded system settings from environment");
    Ok(seeded)
}
