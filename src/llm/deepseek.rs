//! DeepSeek 端点（OpenAI 兼容格式）

use crate::llm::OpenAiClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";

/// 规划需要稳定的 JSON 输出，推理模型的思考段会干扰解析，因此默认用对话模型
pub fn create_deepseek_client(api_key: &str, model: Option<&str>, base_url: Option<&str>) -> OpenAiClient {
    let model = model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or(DEEPSEEK_CHAT);
    let base_url = base_url
        .filter(|u| !u.trim().is_empty())
        .unwrap_or(DEEPSEEK_BASE_URL);
    OpenAiClient::new(Some(base_url), model, api_key)
}
