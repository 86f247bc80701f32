use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{GatewayError, Result};
use crate::logging::time::{parse_datetime_string, to_storage_string};
use crate::logging::types::{CallLog, CallLogQuery, CallLogStats, ConfigCallStats};

#[derive(Clone)]
pub struct DatabaseLogger {
    pub(super) connection: Arc<Mutex<Connection>>,
}

impl DatabaseLogger {
    pub async fn new(database_path: &str) -> Result<Self> {
        // 确保数据库文件的目录存在
        if let Some(parent) = std::path::Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
                tracing::info!("Created database directory: {}", parent.display());
            }
        }

        let conn = Connection::open(database_path)?;
        tracing::info!("Database initialized at: {}", database_path);

        Self::init_schema(&conn)?;

        Ok(Self {
            connection: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS api_configs (
                name TEXT PRIMARY KEY,
                path TEXT NOT NULL UNIQUE,
                system_prompt TEXT NOT NULL,
                description TEXT,
                params TEXT NOT NULL DEFAULT '{}',
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS call_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                request_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                config_name TEXT NOT NULL,
                path TEXT NOT NULL,
                request_data TEXT NOT NULL,
                response_data TEXT NOT NULL,
                success INTEGER NOT NULL,
                status_code INTEGER NOT NULL,
                error_message TEXT,
                execution_time_ms INTEGER NOT NULL,
                ip_address TEXT,
                user_agent TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_call_logs_timestamp ON call_logs(timestamp);
            CREATE INDEX IF NOT EXISTS idx_call_logs_config ON call_logs(config_name);
            CREATE TABLE IF NOT EXISTS system_settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )
    }

    pub async fn ping(&self) -> Result<()> {
        let conn = self.connection.lock().await;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    pub async fn log_call(&self, log: &CallLog) -> Result<i64> {
        let request_data = serde_json::to_string(&log.request_data)?;
        let response_data = serde_json::to_string(&log.response_data)?;
        let conn = self.connection.lock().await;

        conn.execute(
            "INSERT INTO call_logs (
                request_id, timestamp, config_name, path, request_data, response_data,
                success, status_code, error_message, execution_time_ms, ip_address, user_agent
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                &log.request_id,
                to_storage_string(&log.timestamp),
                &log.config_name,
                &log.path,
                request_data,
                response_data,
                log.success,
                log.status_code,
                &log.error_message,
                log.execution_time_ms,
                &log.ip_address,
                &log.user_agent,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// 按时间倒序返回日志
    pub async fn query_call_logs(&self, query: &CallLogQuery) -> Result<Vec<CallLog>> {
        let conn = self.connection.lock().await;

        let mut sql = String::from(
            "SELECT id, request_id, timestamp, config_name, path, request_data, response_data,
                    success, status_code, error_message, execution_time_ms, ip_address, user_agent
             FROM call_logs",
        );
        let mut clauses: Vec<&str> = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(name) = &query.config_name {
            clauses.push("config_name = ?");
            params.push(Box::new(name.clone()));
        }
        if let Some(start) = &query.start {
            clauses.push("timestamp >= ?");
            params.push(Box::new(to_storage_string(start)));
        }
        if let Some(end) = &query.end {
            clauses.push("timestamp <= ?");
            params.push(Box::new(to_storage_string(end)));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?");
        params.push(Box::new(query.limit as i64));
        params.push(Box::new(query.skip as i64));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), call_log_from_row)?;

        let mut logs = Vec::new();
        for log in rows {
            logs.push(log?);
        }
        Ok(logs)
    }

    pub async fn call_log_stats(&self) -> Result<CallLogStats> {
        let conn = self.connection.lock().await;

        let (total, success): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN success THEN 1 ELSE 0 END), 0) FROM call_logs",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let mut stmt = conn.prepare(
            "SELECT config_name, COUNT(*), SUM(CASE WHEN success THEN 1 ELSE 0 END)
             FROM call_logs
             GROUP BY config_name
             ORDER BY COUNT(*) DESC, config_name",
        )?;
        let rows = stmt.query_map([], |row| {
            let count: i64 = row.get(1)?;
            let success_count: i64 = row.get(2)?;
            Ok(ConfigCallStats {
                config_name: row.get(0)?,
                count: count as u64,
                success_count: success_count as u64,
                error_count: (count - success_count).max(0) as u64,
            })
        })?;

        let mut per_config = Vec::new();
        for row in rows {
            per_config.push(row?);
        }

        Ok(CallLogStats::new(total as u64, success as u64, per_config))
    }
}

fn call_log_from_row(row: &Row<'_>) -> rusqlite::Result<CallLog> {
    let timestamp: String = row.get(2)?;
    let request_data: String = row.get(5)?;
    let response_data: String = row.get(6)?;
    Ok(CallLog {
        id: Some(row.get(0)?),
        request_id: row.get(1)?,
        timestamp: timestamp_column(2, &timestamp)?,
        config_name: row.get(3)?,
        path: row.get(4)?,
        request_data: json_column(5, &request_data)?,
        response_data: json_column(6, &response_data)?,
        success: row.get(7)?,
        status_code: row.get(8)?,
        error_message: row.get(9)?,
        execution_time_ms: row.get(10)?,
        ip_address: row.get(11)?,
        user_agent: row.get(12)?,
    })
}

pub(super) fn timestamp_column(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    parse_datetime_string(raw).map_err(|e| conversion_error(idx, e))
}

pub(super) fn json_column(idx: usize, raw: &str) -> rusqlite::Result<Value> {
    serde_json::from_str(raw).map_err(|e| conversion_error(idx, GatewayError::Json(e)))
}

pub(super) fn conversion_error(idx: usize, e: GatewayError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}
