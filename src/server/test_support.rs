use std::sync::{Arc, Mutex};

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{Method, Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use chrono::Utc;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::RwLock;
use tower::ServiceExt;

use crate::config::{Settings, UpstreamConfig};
use crate::logging::DatabaseLogger;
use crate::logging::types::{ApiConfig, ModelParams, SystemSettings};
use crate::server::{AppState, build_router};

pub const CLASSIFY_PROMPT: &str = "你是一个新闻分类助手。请将用户输入的文本分类到以下类别之一：科技、体育、财经、娱乐、其他。\
请只返回 JSON：{\"category\": \"类别\", \"confidence\": 0到1之间的置信度}";

pub struct Harness {
    pub _dir: TempDir,
    pub state: Arc<AppState>,
    pub app: Router,
    pub db: Arc<DatabaseLogger>,
}

pub async fn harness(upstream_url: &str, admin_token: Option<&str>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test.db");

    let mut settings = Settings::default();
    settings.storage.database_url = db_path.to_str().unwrap().to_string();
    settings.server.admin_token = admin_token.map(|t| t.to_string());
    settings.upstream = UpstreamConfig {
        api_url: upstream_url.to_string(),
        api_key: "sk-test-key-123456".to_string(),
        request_timeout_secs: 5,
        ..UpstreamConfig::default()
    };

    let db = Arc::new(
        DatabaseLogger::new(&settings.storage.database_url)
            .await
            .unwrap(),
    );
    let system = SystemSettings::from_upstream(&settings.upstream);
    db.save_system_settings(&system).await.unwrap();

    let state = Arc::new(AppState {
        config: settings,
        configs: db.clone(),
        call_logs: db.clone(),
        settings_store: db.clone(),
        system: Arc::new(RwLock::new(system)),
    });

    Harness {
        _dir: dir,
        app: build_router(state.clone()),
        state,
        db,
    }
}

pub async fn insert_config(h: &Harness, name: &str, path: &str, prompt: &str, enabled: bool) {
    let now = Utc::now();
    let inserted = h
        .db
        .insert_config(&ApiConfig {
            name: name.into(),
            path: path.into(),
            system_prompt: prompt.into(),
            description: None,
            params: ModelParams::default(),
            enabled,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
    assert!(inserted);
}

pub async fn send_json(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    token: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    read_response(app.clone().oneshot(request).await.unwrap()).await
}

pub async fn send_raw(app: &Router, method: Method, uri: &str, raw: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(raw.to_string()))
        .unwrap();
    read_response(app.clone().oneshot(request).await.unwrap()).await
}

async fn read_response(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, value)
}

// 本地模拟的 OpenAI 兼容上游
pub struct MockUpstream {
    pub base_url: String,
    received: Arc<Mutex<Vec<Value>>>,
}

impl MockUpstream {
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }
}

struct MockState {
    status: StatusCode,
    content: String,
    received: Arc<Mutex<Vec<Value>>>,
}

async fn mock_chat(State(mock): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    mock.received.lock().unwrap().push(body);
    if !mock.status.is_success() {
        return (mock.status, "upstream exploded").into_response();
    }
    Json(json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 1_700_000_000u32,
        "model": "qwen-max",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": mock.content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
    }))
    .into_response()
}

pub async fn spawn_mock_upstream(status: StatusCode, content: &str) -> MockUpstream {
    let received = Arc::new(Mutex::new(Vec::new()));
    let state = Arc::new(MockState {
        status,
        content: content.to_string(),
        received: received.clone(),
    });
    let app = Router::new()
        .route("/v1/chat/completions", post(mock_chat))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockUpstream {
        base_url: format!("http://{}/v1", addr),
        received,
    }
}
