use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row};

use crate::error::{GatewayError, Result};
use crate::logging::time::{parse_datetime_string, to_storage_string};
use crate::logging::types::{
    ApiConfig, CallLog, CallLogQuery, CallLogStats, ConfigCallStats, ModelParams, SystemSettings,
};

const CONFIG_COLUMNS: &str =
    "name, path, system_prompt, description, params, enabled, created_at, updated_at";
const CALL_LOG_COLUMNS: &str = "id, request_id, timestamp, config_name, path, request_data, response_data, \
     success, status_code, error_message, execution_time_ms, ip_address, user_agent";

fn pg_datetime(row: &Row, idx: usize) -> Result<DateTime<Utc>> {
    let raw: String = row.try_get(idx)?;
    parse_datetime_string(&raw)
}

fn pg_json(row: &Row, idx: usize) -> Result<Value> {
    let raw: String = row.try_get(idx)?;
    Ok(serde_json::from_str(&raw)?)
}

fn config_from_row(row: &Row) -> Result<ApiConfig> {
    let params: String = row.try_get(4)?;
    Ok(ApiConfig {
        name: row.try_get(0)?,
        path: row.try_get(1)?,
        system_prompt: row.try_get(2)?,
        description: row.try_get(3)?,
        params: serde_json::from_str::<ModelParams>(&params)?,
        enabled: row.try_get(5)?,
        created_at: pg_datetime(row, 6)?,
        updated_at: pg_datetime(row, 7)?,
    })
}

fn call_log_from_row(row: &Row) -> Result<CallLog> {
    let status_code: i32 = row.try_get(8)?;
    Ok(CallLog {
        id: Some(row.try_get(0)?),
        request_id: row.try_get(1)?,
        timestamp: pg_datetime(row, 2)?,
        config_name: row.try_get(3)?,
        path: row.try_get(4)?,
        request_data: pg_json(row, 5)?,
        response_data: pg_json(row, 6)?,
        success: row.try_get(7)?,
        status_code: u16::try_from(status_code).unwrap_or(500),
        error_message: row.try_get(9)?,
        execution_time_ms: row.try_get(10)?,
        ip_address: row.try_get(11)?,
        user_agent: row.try_get(12)?,
    })
}

pub struct PgPool {
    clients: Vec<Arc<Client>>,
    next: AtomicUsize,
}

impl PgPool {
    async fn connect_many(pg_url: &str, schema: &Option<String>, size: usize) -> Result<Self> {
        let mut clients = Vec::with_capacity(size.max(1));
        for _ in 0..size.max(1) {
            let (client, connection) = tokio_postgres::connect(pg_url, NoTls)
                .await
                .map_err(|e| GatewayError::Config(format!("Failed to connect postgres: {}", e)))?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::error!("postgres connection error: {}", e);
                }
            });
            if let Some(s) = schema {
                client
                    .execute(&format!("SET search_path TO {}", s), &[])
                    .await
                    .map_err(|e| {
                        GatewayError::Config(format!("Failed to set search_path: {}", e))
                    })?;
            }
            let client = Arc::new(client);
            crate::db::postgres::spawn_keepalive(Arc::clone(&client), 240, 420);
            clients.push(client);
        }
        Ok(Self {
            clients,
            next: AtomicUsize::new(0),
        })
    }

    pub fn pick(&self) -> Arc<Client> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len().max(1);
        Arc::clone(&self.clients[idx])
    }
}

#[derive(Clone)]
pub struct PgStore {
    pub pool: Arc<PgPool>,
}

impl PgStore {
    pub async fn connect(pg_url: &str, schema: &Option<String>, pool_size: usize) -> Result<Self> {
        let pool = PgPool::connect_many(pg_url, schema, pool_size).await?;
        let store = Self {
            pool: Arc::new(pool),
        };
        let client = store.pool.pick();
        client
            .batch_execute(
                r#"CREATE TABLE IF NOT EXISTS api_configs (
                    name TEXT PRIMARY KEY,
                    path TEXT NOT NULL UNIQUE,
                    system_prompt TEXT NOT NULL,
                    description TEXT,
                    params TEXT NOT NULL DEFAULT '{}',
                    enabled BOOLEAN NOT NULL DEFAULT TRUE,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS call_logs (
                    id BIGSERIAL PRIMARY KEY,
                    request_id TEXT NOT NULL,
                    timestamp TEXT NOT NULL,
                    config_name TEXT NOT NULL,
                    path TEXT NOT NULL,
                    request_data TEXT NOT NULL,
                    response_data TEXT NOT NULL,
                    success BOOLEAN NOT NULL,
                    status_code INTEGER NOT NULL,
                    error_message TEXT,
                    execution_time_ms BIGINT NOT NULL,
                    ip_address TEXT,
                    user_agent TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_call_logs_timestamp ON call_logs(timestamp);
                CREATE INDEX IF NOT EXISTS idx_call_logs_config ON call_logs(config_name);
                CREATE TABLE IF NOT EXISTS system_settings (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    data TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );"#,
            )
            .await
            .map_err(|e| GatewayError::Config(format!("Failed to init tables: {}", e)))?;
        tracing::info!("PostgreSQL store initialized");
        Ok(store)
    }

    pub async fn ping(&self) -> Result<()> {
        let client = self.pool.pick();
        client.execute("SELECT 1", &[]).await?;
        Ok(())
    }

    pub async fn insert_config(&self, config: &ApiConfig) -> Result<bool> {
        let client = self.pool.pick();
        let params = serde_json::to_string(&config.params)?;
        let n = client
            .execute(
                "INSERT INTO api_configs (name, path, system_prompt, description, params, enabled, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT DO NOTHING",
                &[
                    &config.name,
                    &config.path,
                    &config.system_prompt,
                    &config.description,
                    &params,
                    &config.enabled,
                    &to_storage_string(&config.created_at),
                    &to_storage_string(&config.updated_at),
                ],
            )
            .await?;
        Ok(n > 0)
    }

    pub async fn update_config(&self, config: &ApiConfig) -> Result<bool> {
        let client = self.pool.pick();
        let params = serde_json::to_string(&config.params)?;
        let n = client
            .execute(
                "UPDATE api_configs
                 SET path = $2, system_prompt = $3, description = $4, params = $5, enabled = $6, updated_at = $7
                 WHERE name = $1",
                &[
                    &config.name,
                    &config.path,
                    &config.system_prompt,
                    &config.description,
                    &params,
                    &config.enabled,
                    &to_storage_string(&config.updated_at),
                ],
            )
            .await?;
        Ok(n > 0)
    }

    pub async fn delete_config(&self, name: &str) -> Result<bool> {
        let client = self.pool.pick();
        let n = client
            .execute("DELETE FROM api_configs WHERE name = $1", &[&name])
            .await?;
        Ok(n > 0)
    }

    pub async fn get_config(&self, name: &str) -> Result<Option<ApiConfig>> {
        let client = self.pool.pick();
        let row = client
            .query_opt(
                &format!("SELECT {CONFIG_COLUMNS} FROM api_configs WHERE name = $1 LIMIT 1"),
                &[&name],
            )
            .await?;
        row.as_ref().map(config_from_row).transpose()
    }

    pub async fn get_config_by_path(&self, path: &str) -> Result<Option<ApiConfig>> {
        let client = self.pool.pick();
        let row = client
            .query_opt(
                &format!("SELECT {CONFIG_COLUMNS} FROM api_configs WHERE path = $1 LIMIT 1"),
                &[&path],
            )
            .await?;
        row.as_ref().map(config_from_row).transpose()
    }

    pub async fn list_configs(&self) -> Result<Vec<ApiConfig>> {
        let client = self.pool.pick();
        let rows = client
            .query(
                &format!("SELECT {CONFIG_COLUMNS} FROM api_configs ORDER BY name"),
                &[],
            )
            .await?;
        rows.iter().map(config_from_row).collect()
    }

    pub async fn log_call(&self, log: &CallLog) -> Result<i64> {
        let client = self.pool.pick();
        let request_data = serde_json::to_string(&log.request_data)?;
        let response_data = serde_json::to_string(&log.response_data)?;
        let status_code = i32::from(log.status_code);
        let row = client
            .query_one(
                "INSERT INTO call_logs (
                    request_id, timestamp, config_name, path, request_data, response_data,
                    success, status_code, error_message, execution_time_ms, ip_address, user_agent
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                RETURNING id",
                &[
                    &log.request_id,
                    &to_storage_string(&log.timestamp),
                    &log.config_name,
                    &log.path,
                    &request_data,
                    &response_data,
                    &log.success,
                    &status_code,
                    &log.error_message,
                    &log.execution_time_ms,
                    &log.ip_address,
                    &log.user_agent,
                ],
            )
            .await?;
        Ok(row.try_get(0)?)
    }

    pub async fn query_call_logs(&self, query: &CallLogQuery) -> Result<Vec<CallLog>> {
        let client = self.pool.pick();

        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn ToSql + Sync + Send>> = Vec::new();
        if let Some(name) = &query.config_name {
            params.push(Box::new(name.clone()));
            clauses.push(format!("config_name = ${}", params.len()));
        }
        if let Some(start) = &query.start {
            params.push(Box::new(to_storage_string(start)));
            clauses.push(format!("timestamp >= ${}", params.len()));
        }
        if let Some(end) = &query.end {
            params.push(Box::new(to_storage_string(end)));
            clauses.push(format!("timestamp <= ${}", params.len()));
        }

        let mut sql = format!("SELECT {CALL_LOG_COLUMNS} FROM call_logs");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        params.push(Box::new(query.limit as i64));
        let limit_idx = params.len();
        params.push(Box::new(query.skip as i64));
        let offset_idx = params.len();
        sql.push_str(&format!(
            " ORDER BY timestamp DESC, id DESC LIMIT ${limit_idx} OFFSET ${offset_idx}"
        ));

        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        let rows = client.query(&sql, &refs).await?;
        rows.iter().map(call_log_from_row).collect()
    }

    pub async fn call_log_stats(&self) -> Result<CallLogStats> {
        let client = self.pool.pick();
        let totals = client
            .query_one(
                "SELECT COUNT(*), COALESCE(SUM(CASE WHEN success THEN 1 ELSE 0 END), 0)::BIGINT FROM call_logs",
                &[],
            )
            .await?;
        let total: i64 = totals.try_get(0)?;
        let success: i64 = totals.try_get(1)?;

        let rows = client
            .query(
                "SELECT config_name, COUNT(*), SUM(CASE WHEN success THEN 1 ELSE 0 END)::BIGINT
                 FROM call_logs
                 GROUP BY config_name
                 ORDER BY COUNT(*) DESC, config_name",
                &[],
            )
            .await?;
        let mut per_config = Vec::with_capacity(rows.len());
        for row in &rows {
            let count: i64 = row.try_get(1)?;
            let success_count: i64 = row.try_get(2)?;
            per_config.push(ConfigCallStats {
                config_name: row.try_get(0)?,
                count: count as u64,
                success_count: success_count as u64,
                error_count: (count - success_count).max(0) as u64,
            });
        }

        Ok(CallLogStats::new(total as u64, success as u64, per_config))
    }

    pub async fn load_system_settings(&self) -> Result<Option<SystemSettings>> {
        let client = self.pool.pick();
        let row = client
            .query_opt("SELECT data FROM system_settings WHERE id = 1", &[])
            .await?;
        match row {
            Some(row) => {
                let raw: String = row.try_get(0)?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    pub async fn save_system_settings(&self, settings: &SystemSettings) -> Result<()> {
        let client = self.pool.pick();
        let data = serde_json::to_string(settings)?;
        client
            .execute(
                "INSERT INTO system_settings (id, data, updated_at) VALUES (1, $1, $2)
                 ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data, updated_at = EXCLUDED.updated_at",
                &[&data, &to_storage_string(&settings.updated_at)],
            )
            .await?;
        Ok(())
    }
}
