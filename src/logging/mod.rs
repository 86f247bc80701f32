pub mod database;
pub mod database_configs;
pub mod database_settings;
pub mod postgres_store;
pub mod time;
pub mod types;

pub use database::DatabaseLogger;
pub use types::{ApiConfig, CallLog, CallLogQuery, CallLogStats, ModelParams, SystemSettings};
