use std::time::Duration;

use crate::error::{GatewayError, Result};
use crate::http_client::client_for_url_with_timeout;
use crate::logging::types::ResolvedParams;

use super::types::{
    ChatCompletionRequest, ChatCompletionRequestArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionResponse,
};

// 上游错误体只保留前若干字符写入错误信息
const MAX_ERROR_BODY_CHARS: usize = 500;

pub struct OpenAIProvider;

// 发送、超时、响应解析失败统一归为上游错误
fn upstream_error(url: &str, e: reqwest::Error) -> GatewayError {
    tracing::warn!("upstream {} failed: {}", url, e);
    if e.is_timeout() {
        GatewayError::Upstream("请求超时".into())
    } else if e.is_decode() {
        GatewayError::Upstream(format!("响应解析失败: {}", e))
    } else {
        GatewayError::Upstream(e.to_string())
    }
}

impl OpenAIProvider {
    /// 系统提示词 + 用户输入 组成一次对话请求
    #[allow(deprecated)]
    pub fn build_request(
        system_prompt: &str,
        user_input: &str,
        params: &ResolvedParams,
    ) -> Result<ChatCompletionRequest> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt)
                .build()?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_input)
                .build()?
                .into(),
        ];

        let mut builder = ChatCompletionRequestArgs::default();
        builder
            .model(params.model.as_str())
            .messages(messages)
            .temperature(params.temperature);
        // 兼容型服务普遍只认 max_tokens
        if let Some(max_tokens) = params.max_tokens {
            builder.max_tokens(max_tokens);
        }
        Ok(builder.build()?)
    }

    pub async fn chat_completions(
        base_url: &str,
        api_key: &str,
        timeout: Duration,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse> {
        let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        let client = client_for_url_with_timeout(&url, timeout)?;

        let response = client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Accept", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| upstream_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            tracing::warn!("upstream {} returned {}: {}", url, status, body);
            return Err(GatewayError::Upstream(format!("{}: {}", status, body)));
        }

        response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|e| upstream_error(&url, e))
    }

    /// 调用上游并返回第一条回复的文本内容
    pub async fn complete(
        base_url: &str,
        api_key: &str,
        timeout: Duration,
        system_prompt: &str,
        user_input: &str,
        params: &ResolvedParams,
    ) -> Result<String> {
        let request = Self::build_request(system_prompt, user_input, params)?;
        let response = Self::chat_completions(base_url, api_key, timeout, &request).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| GatewayError::Upstream("上游未返回任何内容".into()))
    }
}
