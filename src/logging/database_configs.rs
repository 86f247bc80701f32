use rusqlite::{OptionalExtension, Row};

use crate::error::{GatewayError, Result};
use crate::logging::time::to_storage_string;
use crate::logging::types::{ApiConfig, ModelParams};

use super::database::{DatabaseLogger, conversion_error, timestamp_column};

const CONFIG_COLUMNS: &str =
    "name, path, system_prompt, description, params, enabled, created_at, updated_at";

impl DatabaseLogger {
    pub async fn insert_config(&self, config: &ApiConfig) -> Result<bool> {
        let params = serde_json::to_string(&config.params)?;
        let conn = self.connection.lock().await;
        let res = conn.execute(
            "INSERT OR IGNORE INTO api_configs (name, path, system_prompt, description, params, enabled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                &config.name,
                &config.path,
                &config.system_prompt,
                &config.description,
                params,
                config.enabled,
                to_storage_string(&config.created_at),
                to_storage_string(&config.updated_at),
            ],
        )?;
        Ok(res > 0)
    }

    pub async fn update_config(&self, config: &ApiConfig) -> Result<bool> {
        let params = serde_json::to_string(&config.params)?;
        let conn = self.connection.lock().await;
        let res = conn.execute(
            "UPDATE api_configs
             SET path = ?2, system_prompt = ?3, description = ?4, params = ?5, enabled = ?6, updated_at = ?7
             WHERE name = ?1",
            rusqlite::params![
                &config.name,
                &config.path,
                &config.system_prompt,
                &config.description,
                params,
                config.enabled,
                to_storage_string(&config.updated_at),
            ],
        )?;
        Ok(res > 0)
    }

    pub async fn delete_config(&self, name: &str) -> Result<bool> {
        let conn = self.connection.lock().await;
        let res = conn.execute("DELETE FROM api_configs WHERE name = ?1", [name])?;
        Ok(res > 0)
    }

    pub async fn get_config(&self, name: &str) -> Result<Option<ApiConfig>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONFIG_COLUMNS} FROM api_configs WHERE name = ?1 LIMIT 1"
        ))?;
        Ok(stmt.query_row([name], config_from_row).optional()?)
    }

    pub async fn get_config_by_path(&self, path: &str) -> Result<Option<ApiConfig>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONFIG_COLUMNS} FROM api_configs WHERE path = ?1 LIMIT 1"
        ))?;
        Ok(stmt.query_row([path], config_from_row).optional()?)
    }

    pub async fn list_configs(&self) -> Result<Vec<ApiConfig>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONFIG_COLUMNS} FROM api_configs ORDER BY name"
        ))?;
        let rows = stmt.query_map([], config_from_row)?;
        let mut configs = Vec::new();
        for row in rows {
            configs.push(row?);
        }
        Ok(configs)
    }
}

fn config_from_row(row: &Row<'_>) -> rusqlite::Result<ApiConfig> {
    let params: String = row.get(4)?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    Ok(ApiConfig {
        name: row.get(0)?,
        path: row.get(1)?,
        system_prompt: row.get(2)?,
        description: row.get(3)?,
        params: serde_json::from_str::<ModelParams>(&params)
            .map_err(|e| conversion_error(4, GatewayError::Json(e)))?,
        enabled: row.get(5)?,
        created_at: timestamp_column(6, &created_at)?,
        updated_at: timestamp_column(7, &updated_at)?,
    })
}
