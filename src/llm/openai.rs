//! OpenAI 兼容补全客户端
//!
//! 引擎的每个模型阶段（分类、规划、参数修复、汇总、闲聊）都是一次单轮补全：
//! prompt 作为唯一的 user 消息发送，取首个 choice 的文本。

use std::time::{Duration, Instant};

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs, FinishReason,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::LlmClient;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    request_timeout: Duration,
}

impl OpenAiClient {
    /// `base_url` 为 None 时使用官方端点
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(url) = base_url.filter(|u| !u.trim().is_empty()) {
            config = config.with_api_base(url);
        }

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout = Duration::from_secs(secs.max(1));
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    #[allow(deprecated)]
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, String> {
        let start = Instant::now();
        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt.to_string())
            .build()
            .map_err(|e| format!("building prompt message: {}", e))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![ChatCompletionRequestMessage::User(message)])
            .max_tokens(max_tokens)
            .temperature(temperature)
            .build()
            .map_err(|e| format!("building completion request: {}", e))?;

        let response = tokio::time::timeout(self.request_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| {
                format!(
                    "{} did not answer within {}s",
                    self.model,
                    self.request_timeout.as_secs()
                )
            })?
            .map_err(|e| format!("{} request failed: {}", self.model, e))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| format!("{} returned no choices", self.model))?;

        // 规划 / 修复的 JSON 被截断时后续解析会失败，这里先留下线索
        if matches!(choice.finish_reason, Some(FinishReason::Length)) {
            tracing::warn!(model = %self.model, max_tokens, "completion stopped at max_tokens");
        }

        let (prompt_tokens, completion_tokens) = response
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();
        tracing::debug!(
            model = %self.model,
            prompt_tokens,
            completion_tokens,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "completion finished"
        );

        Ok(choice.message.content.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_never_zero() {
        let client = OpenAiClient::new(None, "gpt-4o-mini", "sk-test").with_request_timeout(0);
        assert_eq!(client.request_timeout, Duration::from_secs(1));
        assert_eq!(client.model(), "gpt-4o-mini");
    }

    #[test]
    fn test_blank_base_url_ignored() {
        let client = OpenAiClient::new(Some("  "), "m", "sk-test");
        assert_eq!(client.request_timeout.as_secs(), DEFAULT_REQUEST_TIMEOUT_SECS);
    }
}
