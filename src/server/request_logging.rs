use crate::logging::CallLog;
use crate::server::AppState;

// 写入一次调用日志；写入失败只记录错误，不影响响应
pub async fn log_call(app_state: &AppState, log: CallLog) {
    let log_enabled = app_state.system.read().await.log_enabled;

    tracing::info!(
        config = %log.config_name,
        status = log.status_code,
        elapsed_ms = log.execution_time_ms,
        "dispatched {}",
        log.path
    );

    if !log_enabled {
        return;
    }
    if let Err(e) = app_state.call_logs.log_call(&log).await {
        tracing::error!("Failed to log call {}: {}", log.request_id, e);
    }
}
