//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT};
pub use mock::MockLlmClient;
pub use openai::OpenAiClient;
pub use traits::{extract_json_block, LlmClient};

use crate::config::AppConfig;

/// 根据 `[llm] provider` 与 API Key 选择后端；没有可用 Key 时返回 None，引擎全程走确定性路径
///
/// provider 为 openai 且有 OPENAI_API_KEY 时走 OpenAI 兼容端点，否则优先 DeepSeek；
/// 只有 OPENAI_API_KEY 时把它当作 DeepSeek 代理 Key 使用。
pub fn create_llm_from_config(cfg: &AppConfig) -> Option<Arc<dyn LlmClient>> {
    let deepseek_key = non_empty_env("DEEPSEEK_API_KEY");
    let openai_key = non_empty_env("OPENAI_API_KEY");
    let base_url = cfg.llm.base_url.as_deref();
    let wants_openai = cfg.llm.provider.eq_ignore_ascii_case("openai");

    let client = match (wants_openai, openai_key, deepseek_key) {
        (true, Some(key), _) => {
            let model = cfg
                .llm
                .openai
                .model
                .clone()
                .unwrap_or_else(|| cfg.llm.model.clone());
            tracing::info!(model = %model, "using OpenAI-compatible LLM");
            OpenAiClient::new(base_url, &model, &key)
        }
        (_, _, Some(key)) | (_, Some(key), None) => {
            let model = cfg
                .llm
                .deepseek
                .model
                .clone()
                .unwrap_or_else(|| cfg.llm.model.clone());
            tracing::info!(model = %model, "using DeepSeek LLM");
            create_deepseek_client(&key, Some(&model), base_url)
        }
        (_, None, None) => {
            tracing::warn!("no API key set, running without LLM (deterministic fallbacks only)");
            return None;
        }
    };
    Some(Arc::new(client.with_request_timeout(cfg.llm.timeouts.request)))
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
