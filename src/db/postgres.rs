use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_postgres::Client;

// 为每个 Postgres 连接启动保活任务；间隔带随机抖动，避免多个连接同时探测。
// 探测失败只记日志，连接断开由 connection 任务上报。
pub fn spawn_keepalive(client: Arc<Client>, min_secs: u64, max_secs: u64) {
    let max_secs = max_secs.max(min_secs + 1);
    tokio::spawn(async move {
        loop {
            let secs = rand::rng().random_range(min_secs..=max_secs);
            tokio::time::sleep(Duration::from_secs(secs)).await;
            if client.is_closed() {
                tracing::warn!("postgres client closed; keepalive stopped");
                break;
            }
            match tokio::time::timeout(Duration::from_secs(5), client.execute("SELECT 1", &[]))
                .await
            {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!("postgres keepalive failed: {}", e),
                Err(_) => tracing::warn!("postgres keepalive timed out"),
            }
        }
    });
}
