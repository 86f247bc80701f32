use async_trait::async_trait;

use crate::error::Result;
use crate::logging::DatabaseLogger;
use crate::logging::postgres_store::PgStore;
use crate::logging::types::{ApiConfig, CallLog, CallLogQuery, CallLogStats, SystemSettings};

// 接口配置存储抽象（SQLite、Postgres 各有实现）
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// 名称或路径已存在时返回 false
    async fn insert_config(&self, config: &ApiConfig) -> Result<bool>;
    /// 名称不存在时返回 false
    async fn update_config(&self, config: &ApiConfig) -> Result<bool>;
    async fn delete_config(&self, name: &str) -> Result<bool>;
    async fn get_config(&self, name: &str) -> Result<Option<ApiConfig>>;
    async fn get_config_by_path(&self, path: &str) -> Result<Option<ApiConfig>>;
    async fn list_configs(&self) -> Result<Vec<ApiConfig>>;
}

// 调用日志存储抽象（只追加）
#[async_trait]
pub trait CallLogStore: Send + Sync {
    async fn log_call(&self, log: &CallLog) -> Result<i64>;
    async fn query_call_logs(&self, query: &CallLogQuery) -> Result<Vec<CallLog>>;
    async fn call_log_stats(&self) -> Result<CallLogStats>;
    async fn ping(&self) -> Result<()>;
    fn backend_name(&self) -> &'static str;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load_system_settings(&self) -> Result<Option<SystemSettings>>;
    async fn save_system_settings(&self, settings: &SystemSettings) -> Result<()>;
}

// 为两种后端生成相同的委托实现
macro_rules! delegate_stores {
    ($ty:ty, $backend:literal) => {
        #[async_trait]
        impl ConfigStore for $ty {
            async fn insert_config(&self, config: &ApiConfig) -> Result<bool> {
                <$ty>::insert_config(self, config).await
            }
            async fn update_config(&self, config: &ApiConfig) -> Result<bool> {
                <$ty>::update_config(self, config).await
            }
            async fn delete_config(&self, name: &str) -> Result<bool> {
                <$ty>::delete_config(self, name).await
            }
            async fn get_config(&self, name: &str) -> Result<Option<ApiConfig>> {
                <$ty>::get_config(self, name).await
            }
            async fn get_config_by_path(&self, path: &str) -> Result<Option<ApiConfig>> {
                <$ty>::get_config_by_path(self, path).await
            }
            async fn list_configs(&self) -> Result<Vec<ApiConfig>> {
                <$ty>::list_configs(self).await
            }
        }

        #[async_trait]
        impl CallLogStore for $ty {
            async fn log_call(&self, log: &CallLog) -> Result<i64> {
                <$ty>::log_call(self, log).await
            }
            async fn query_call_logs(&self, query: &CallLogQuery) -> Result<Vec<CallLog>> {
                <$ty>::query_call_logs(self, query).await
            }
            async fn call_log_stats(&self) -> Result<CallLogStats> {
                <$ty>::call_log_stats(self).await
            }
            async fn ping(&self) -> Result<()> {
                <$ty>::ping(self).await
            }
            fn backend_name(&self) -> &'static str {
                $backend
            }
        }

        #[async_trait]
        impl SettingsStore for $ty {
            async fn load_system_settings(&self) -> Result<Option<SystemSettings>> {
                <$ty>::load_system_settings(self).await
            }
            async fn save_system_settings(&self, settings: &SystemSettings) -> Result<()> {
                <$ty>::save_system_settings(self, settings).await
            }
        }
    };
}

delegate_stores!(DatabaseLogger, "sqlite");
delegate_stores!(PgStore, "postgres");
