use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    extract::{Path, Request, State},
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use percent_encoding::percent_decode_str;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::logging::types::{ApiConfig, CallLog};
use crate::providers::openai::OpenAIProvider;
use crate::server::AppState;
use crate::server::request_logging::log_call;
use crate::server::response_json::merge_model_output;
use crate::server::util::{client_ip, user_agent};

const MAX_BODY_BYTES: usize = 1024 * 1024;

fn not_found() -> GatewayError {
    GatewayError::NotFound("接口不存在或已禁用".into())
}

// 配置中保存的是解码后的路径（如 `/YiDiJiuYi/分类`），请求路径需先解码再查找
fn decoded_path(uri: &Uri) -> String {
    percent_decode_str(uri.path())
        .decode_utf8_lossy()
        .into_owned()
}

/// `POST /api/{name}`：按配置名称查找，找不到时再按请求路径查找
pub async fn dispatch_by_name(
    State(app_state): State<Arc<AppState>>,
    Path(name): Path<String>,
    request: Request,
) -> Result<Response, GatewayError> {
    let path = decoded_path(request.uri());
    let config = match app_state.configs.get_config(&name).await? {
        Some(config) => Some(config),
        None => app_state.configs.get_config_by_path(&path).await?,
    };
    let config = config.ok_or_else(not_found)?;
    dispatch(app_state, config, request).await
}

/// 路由兜底：按配置中的自定义路径查找（如 `/YiDiJiuYi/classify`）
pub async fn dispatch_by_path(
    State(app_state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, GatewayError> {
    let path = decoded_path(request.uri());
    let config = app_state
        .configs
        .get_config_by_path(&path)
        .await?
        .ok_or_else(not_found)?;
    // 已禁用的配置对任何方法都表现为不存在
    if !config.enabled {
        return Err(not_found());
    }
    if request.method() != Method::POST {
        return Err(GatewayError::MethodNotAllowed("仅支持 POST 请求".into()));
    }
    dispatch(app_state, config, request).await
}

async fn dispatch(
    app_state: Arc<AppState>,
    config: ApiConfig,
    request: Request,
) -> Result<Response, GatewayError> {
    if !config.enabled {
        return Err(not_found());
    }

    let start_time = Utc::now();
    let (parts, body) = request.into_parts();
    let ip_address = client_ip(&parts.headers, &parts.extensions);
    let user_agent = user_agent(&parts.headers);

    let (request_data, result) = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => forward(&app_state, &config, &bytes).await,
        Err(e) => (
            Value::Null,
            Err(GatewayError::BadRequest(format!("读取请求体失败: {}", e))),
        ),
    };

    let (status, response_data, error_message) = match &result {
        Ok(value) => (StatusCode::OK, value.clone(), None),
        Err(e) => (
            e.status_code(),
            json!({ "error": e.to_string() }),
            Some(e.to_string()),
        ),
    };

    log_call(
        &app_state,
        CallLog {
            id: None,
            request_id: Uuid::new_v4().to_string(),
            timestamp: start_time,
            config_name: config.name.clone(),
            path: decoded_path(&parts.uri),
            request_data,
            response_data,
            success: result.is_ok(),
            status_code: status.as_u16(),
            error_message,
            execution_time_ms: (Utc::now() - start_time).num_milliseconds(),
            ip_address,
            user_agent,
        },
    )
    .await;

    result.map(|value| Json(value).into_response())
}

// 返回 (用于日志的请求体, 调用结果)
async fn forward(
    app_state: &AppState,
    config: &ApiConfig,
    body: &[u8],
) -> (Value, Result<Value, GatewayError>) {
    let payload: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            return (
                Value::Null,
                Err(GatewayError::BadRequest(format!("请求体不是合法的 JSON: {}", e))),
            );
        }
    };
    if !payload.is_object() {
        return (
            payload,
            Err(GatewayError::BadRequest("请求体必须是 JSON 对象".into())),
        );
    }

    let text = match payload.get("text") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(Value::String(_)) | Some(Value::Null) | None => {
            return (
                payload,
                Err(GatewayError::BadRequest("输入文本不能为空".into())),
            );
        }
        Some(_) => {
            return (
                payload,
                Err(GatewayError::BadRequest("text 字段必须是字符串".into())),
            );
        }
    };

    // 取快照，避免在上游调用期间持有读锁
    let system = app_state.system.read().await.clone();
    let params = config.params.resolve(&system);
    let timeout = Duration::from_secs(system.request_timeout_secs.max(1));

    let result = OpenAIProvider::complete(
        &system.api_url,
        &system.api_key,
        timeout,
        &config.system_prompt,
        &text,
        &params,
    )
    .await
    .map(|content| merge_model_output(&content, &text));

    (payload, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::types::CallLogQuery;
    use crate::server::test_support::{
        CLASSIFY_PROMPT, harness, insert_config, send_json, spawn_mock_upstream,
    };

    const CLASSIFY_REPLY: &str =
        "```json\n{\"category\": \"科技\", \"confidence\": 0.95}\n```";

    #[tokio::test]
    async fn classify_example_returns_model_fields_and_original_text() {
        let upstream = spawn_mock_upstream(StatusCode::OK, CLASSIFY_REPLY).await;
        let h = harness(&upstream.base_url, None).await;
        insert_config(&h, "classify", "/api/classify", CLASSIFY_PROMPT, true).await;

        let (status, body) = send_json(
            &h.app,
            Method::POST,
            "/api/classify",
            Some(json!({ "text": "苹果发布了最新款iPhone" })),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["category"], "科技");
        assert_eq!(body["confidence"], 0.95);
        assert_eq!(body["original_text"], "苹果发布了最新款iPhone");

        let received = upstream.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["model"], "qwen-max");
        assert_eq!(received[0]["messages"][0]["role"], "system");
        assert_eq!(received[0]["messages"][0]["content"], CLASSIFY_PROMPT);
        assert_eq!(received[0]["messages"][1]["content"], "苹果发布了最新款iPhone");
    }

    #[tokio::test]
    async fn every_completed_call_appends_one_log() {
        let upstream = spawn_mock_upstream(StatusCode::OK, CLASSIFY_REPLY).await;
        let h = harness(&upstream.base_url, None).await;
        insert_config(&h, "classify", "/api/classify", CLASSIFY_PROMPT, true).await;

        for _ in 0..3 {
            let (status, _) = send_json(
                &h.app,
                Method::POST,
                "/api/classify",
                Some(json!({ "text": "今天天气不错" })),
                None,
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let logs = h.db.query_call_logs(&CallLogQuery::default()).await.unwrap();
        assert_eq!(logs.len(), 3);
        assert!(logs.iter().all(|l| l.success && l.status_code == 200));
        assert_eq!(logs[0].config_name, "classify");
        assert_eq!(logs[0].path, "/api/classify");
        assert_eq!(logs[0].request_data, json!({ "text": "今天天气不错" }));
        assert_eq!(logs[0].response_data["category"], "科技");
    }

    #[tokio::test]
    async fn unknown_path_is_not_found_and_not_logged() {
        let upstream = spawn_mock_upstream(StatusCode::OK, CLASSIFY_REPLY).await;
        let h = harness(&upstream.base_url, None).await;

        let (status, body) = send_json(
            &h.app,
            Method::POST,
            "/api/missing",
            Some(json!({ "text": "hello" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());

        let (status, _) = send_json(
            &h.app,
            Method::POST,
            "/somewhere/else",
            Some(json!({ "text": "hello" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        assert!(upstream.received().is_empty());
        let logs = h.db.query_call_logs(&CallLogQuery::default()).await.unwrap();
        assert!(logs.is_empty());
    }

    #[tokio::test]
    async fn custom_path_dispatches_through_fallback() {
        let upstream = spawn_mock_upstream(StatusCode::OK, CLASSIFY_REPLY).await;
        let h = harness(&upstream.base_url, None).await;
        insert_config(&h, "legacy", "/YiDiJiuYi/classify", CLASSIFY_PROMPT, true).await;

        let (status, body) = send_json(
            &h.app,
            Method::POST,
            "/YiDiJiuYi/classify",
            Some(json!({ "text": "股市大涨" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["original_text"], "股市大涨");

        // 名称访问同样可用
        let (status, _) = send_json(
            &h.app,
            Method::POST,
            "/api/legacy",
            Some(json!({ "text": "股市大涨" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send_json(&h.app, Method::GET, "/YiDiJiuYi/classify", None, None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn disabled_config_is_not_found() {
        let upstream = spawn_mock_upstream(StatusCode::OK, CLASSIFY_REPLY).await;
        let h = harness(&upstream.base_url, None).await;
        insert_config(&h, "classify", "/api/classify", CLASSIFY_PROMPT, false).await;

        let (status, _) = send_json(
            &h.app,
            Method::POST,
            "/api/classify",
            Some(json!({ "text": "hello" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(upstream.received().is_empty());
    }

    #[tokio::test]
    async fn encoded_non_ascii_path_reaches_its_config() {
        let upstream = spawn_mock_upstream(StatusCode::OK, CLASSIFY_REPLY).await;
        let h = harness(&upstream.base_url, None).await;

        let (status, _) = send_json(
            &h.app,
            Method::POST,
            "/admin/configs",
            Some(json!({
                "name": "cls",
                "path": "/YiDiJiuYi/分类",
                "system_prompt": CLASSIFY_PROMPT
            })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send_json(
            &h.app,
            Method::POST,
            "/YiDiJiuYi/%E5%88%86%E7%B1%BB",
            Some(json!({ "text": "hello" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["category"], "科技");

        let logs = h.db.query_call_logs(&CallLogQuery::default()).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].path, "/YiDiJiuYi/分类");
    }

    #[tokio::test]
    async fn disabled_custom_path_is_not_found_for_any_method() {
        let upstream = spawn_mock_upstream(StatusCode::OK, CLASSIFY_REPLY).await;
        let h = harness(&upstream.base_url, None).await;
        insert_config(&h, "legacy", "/YiDiJiuYi/classify", CLASSIFY_PROMPT, false).await;

        for method in [Method::GET, Method::POST] {
            let (status, body) =
                send_json(&h.app, method, "/YiDiJiuYi/classify", None, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert!(body["error"].is_string());
        }
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_and_logged_as_failure() {
        let upstream = spawn_mock_upstream(StatusCode::OK, CLASSIFY_REPLY).await;
        let h = harness(&upstream.base_url, None).await;
        insert_config(&h, "classify", "/api/classify", CLASSIFY_PROMPT, true).await;

        for payload in [json!({ "text": "   " }), json!({}), json!({ "text": 42 }), json!([1, 2])] {
            let (status, body) =
                send_json(&h.app, Method::POST, "/api/classify", Some(payload), None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(body["error"].is_string());
        }

        let (status, _) = crate::server::test_support::send_raw(
            &h.app,
            Method::POST,
            "/api/classify",
            "{not json",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert!(upstream.received().is_empty());
        let logs = h.db.query_call_logs(&CallLogQuery::default()).await.unwrap();
        assert_eq!(logs.len(), 5);
        assert!(logs.iter().all(|l| !l.success && l.status_code == 400));
        assert_eq!(logs[0].request_data, Value::Null);
    }

    #[tokio::test]
    async fn upstream_failure_surfaces_as_server_error() {
        let upstream = spawn_mock_upstream(StatusCode::BAD_GATEWAY, "").await;
        let h = harness(&upstream.base_url, None).await;
        insert_config(&h, "classify", "/api/classify", CLASSIFY_PROMPT, true).await;

        let (status, body) = send_json(
            &h.app,
            Method::POST,
            "/api/classify",
            Some(json!({ "text": "hello" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("502"));

        let logs = h.db.query_call_logs(&CallLogQuery::default()).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert!(!logs[0].success);
        assert_eq!(logs[0].status_code, 500);
        assert!(logs[0].error_message.is_some());
    }

    #[tokio::test]
    async fn non_json_model_output_is_wrapped() {
        let upstream = spawn_mock_upstream(StatusCode::OK, "这条新闻属于科技类。").await;
        let h = harness(&upstream.base_url, None).await;
        insert_config(&h, "classify", "/api/classify", CLASSIFY_PROMPT, true).await;

        let (status, body) = send_json(
            &h.app,
            Method::POST,
            "/api/classify",
            Some(json!({ "text": "hello" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({ "response": "这条新闻属于科技类。", "original_text": "hello" })
        );
    }

    #[tokio::test]
    async fn logging_can_be_disabled() {
        let upstream = spawn_mock_upstream(StatusCode::OK, CLASSIFY_REPLY).await;
        let h = harness(&upstream.base_url, None).await;
        insert_config(&h, "classify", "/api/classify", CLASSIFY_PROMPT, true).await;
        h.state.system.write().await.log_enabled = false;

        let (status, _) = send_json(
            &h.app,
            Method::POST,
            "/api/classify",
            Some(json!({ "text": "hello" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let logs = h.db.query_call_logs(&CallLogQuery::default()).await.unwrap();
        assert!(logs.is_empty());
    }
}
