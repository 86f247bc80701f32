use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::HeaderMap,
};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::logging::time::parse_datetime_string;
use crate::logging::types::{CallLog, CallLogQuery, CallLogStats};
use crate::server::AppState;
use crate::server::util::require_admin;

const MAX_LOG_LIMIT: usize = 1000;
const DEFAULT_LOG_LIMIT: usize = 100;

#[derive(Debug, Deserialize, Default)]
pub struct LogsQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub skip: Option<usize>,
    #[serde(default)]
    pub config_name: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub total: usize,
    pub data: Vec<CallLog>,
    // 还有更多数据时给出下一页的 skip
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_skip: Option<usize>,
}

impl LogsQuery {
    fn into_query(self) -> Result<CallLogQuery, GatewayError> {
        let parse = |raw: Option<String>| -> Result<_, GatewayError> {
            match raw.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
                Some(s) => Ok(Some(parse_datetime_string(s)?)),
                None => Ok(None),
            }
        };
        let start = parse(self.start_date)?;
        let end = parse(self.end_date)?;
        if let (Some(s), Some(e)) = (&start, &end) {
            if s > e {
                return Err(GatewayError::BadRequest(
                    "start_date 不能晚于 end_date".into(),
                ));
            }
        }
        Ok(CallLogQuery {
            limit: self
                .limit
                .unwrap_or(DEFAULT_LOG_LIMIT)
                .clamp(1, MAX_LOG_LIMIT),
            skip: self.skip.unwrap_or(0),
            config_name: self.config_name.filter(|s| !s.trim().is_empty()),
            start,
            end,
        })
    }
}

/// `GET /api/logs`：按时间倒序分页查询调用日志
pub async fn list_call_logs(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<LogsQuery>,
) -> Result<Json<LogsResponse>, GatewayError> {
    require_admin(&app_state, &headers)?;
    let query = params.into_query()?;
    let data = app_state.call_logs.query_call_logs(&query).await?;
    let next_skip = if data.len() == query.limit {
        Some(query.skip + data.len())
    } else {
        None
    };
    Ok(Json(LogsResponse {
        total: data.len(),
        data,
        next_skip,
    }))
}

pub async fn call_log_stats(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<CallLogStats>, GatewayError> {
    require_admin(&app_state, &headers)?;
    Ok(Json(app_state.call_logs.call_log_stats().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::test_support::{Harness, harness, send_json};
    use axum::http::{Method, StatusCode};
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::{Value, json};

    async fn seed(h: &Harness, config_name: &str, success: bool, minutes_ago: i64) {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() - Duration::minutes(minutes_ago);
        h.db.log_call(&CallLog {
            id: None,
            request_id: format!("req-{}-{}", config_name, minutes_ago),
            timestamp: ts,
            config_name: config_name.into(),
            path: format!("/api/{}", config_name),
            request_data: json!({ "text": "hi" }),
            response_data: if success {
                json!({ "response": "ok", "original_text": "hi" })
            } else {
                json!({ "error": "boom" })
            },
            success,
            status_code: if success { 200 } else { 500 },
            error_message: (!success).then(|| "boom".to_string()),
            execution_time_ms: 12,
            ip_address: Some("127.0.0.1".into()),
            user_agent: None,
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn logs_are_newest_first_and_paginated() {
        let h = harness("http://127.0.0.1:9/v1", None).await;
        for i in 0..5 {
            seed(&h, "classify", true, i).await;
        }

        let (status, body) =
            send_json(&h.app, Method::GET, "/api/logs?limit=2", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["next_skip"], 2);
        assert_eq!(body["data"][0]["request_id"], "req-classify-0");
        assert_eq!(body["data"][1]["request_id"], "req-classify-1");

        let (_, body) =
            send_json(&h.app, Method::GET, "/api/logs?limit=2&skip=4", None, None).await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["data"][0]["request_id"], "req-classify-4");
        assert!(body.get("next_skip").is_none());
    }

    #[tokio::test]
    async fn logs_filter_by_config_and_time_range() {
        let h = harness("http://127.0.0.1:9/v1", None).await;
        seed(&h, "classify", true, 0).await;
        seed(&h, "classify", true, 90).await;
        seed(&h, "summary", false, 30).await;

        let (_, body) = send_json(
            &h.app,
            Method::GET,
            "/api/logs?config_name=summary",
            None,
            None,
        )
        .await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["data"][0]["success"], false);

        // 2024-05-01 11:00:00Z 至 12:00:00Z，北京时间 19:00 至 20:00
        let (status, body) = send_json(
            &h.app,
            Method::GET,
            "/api/logs?start_date=2024-05-01T19:00:00&end_date=2024-05-01T12:00:00Z",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&str> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|l| l["request_id"].as_str())
            .collect();
        assert_eq!(ids, vec!["req-classify-0", "req-summary-30"]);
    }

    #[tokio::test]
    async fn bad_dates_are_rejected() {
        let h = harness("http://127.0.0.1:9/v1", None).await;
        let (status, body) =
            send_json(&h.app, Method::GET, "/api/logs?start_date=yesterday", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, _) = send_json(
            &h.app,
            Method::GET,
            "/api/logs?start_date=2024-05-02&end_date=2024-05-01",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stats_count_per_config() {
        let h = harness("http://127.0.0.1:9/v1", Some("tok")).await;
        seed(&h, "classify", true, 0).await;
        seed(&h, "classify", false, 1).await;
        seed(&h, "summary", true, 2).await;

        let (status, _) = send_json(&h.app, Method::GET, "/api/logs/stats", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) =
            send_json(&h.app, Method::GET, "/api/logs/stats", None, Some("tok")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_calls"], 3);
        assert_eq!(body["success_calls"], 2);
        assert_eq!(body["error_calls"], 1);
        assert_eq!(body["success_rate"], 66.67);
        assert_eq!(
            body["config_stats"][0],
            json!({ "config_name": "classify", "count": 2, "success_count": 1, "error_count": 1 })
        );
        assert_eq!(body["config_stats"][1]["config_name"], Value::from("summary"));
    }

    #[test]
    fn limit_is_clamped() {
        let q = LogsQuery {
            limit: Some(50_000),
            ..Default::default()
        }
        .into_query()
        .unwrap();
        assert_eq!(q.limit, MAX_LOG_LIMIT);
        assert_eq!(LogsQuery::default().into_query().unwrap().limit, DEFAULT_LOG_LIMIT);
    }
}
