use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

use crate::server::AppState;

mod configs;
mod dispatch;
mod health;
mod logs;
mod system_config;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health::health))
        .route("/admin/storage/health", get(health::storage_health))
        // 配置管理
        .route("/api/configs", get(configs::configs_by_name))
        .route(
            "/admin/configs",
            get(configs::list_configs).post(configs::create_config),
        )
        .route(
            "/admin/configs/{name}",
            get(configs::get_config)
                .put(configs::update_config)
                .delete(configs::delete_config),
        )
        .route(
            "/admin/system-config",
            get(system_config::get_system_config).put(system_config::update_system_config),
        )
        // 调用日志
        .route("/api/logs", get(logs::list_call_logs))
        .route("/api/logs/stats", get(logs::call_log_stats))
        // 动态接口
        .route("/api/{name}", post(dispatch::dispatch_by_name))
        .fallback(dispatch::dispatch_by_path)
}
