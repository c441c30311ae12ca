//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient：单轮 prompt 补全。
//! 引擎把它作为可选依赖持有；缺席时每个调用方退回确定性路径。

use async_trait::async_trait;

/// LLM 客户端 trait：给定 prompt、max_tokens、temperature，返回纯文本
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, String>;
}

/// 从模型回复中取出 JSON 文本：优先 ```json 代码块，其次最外层 `{...}`
pub fn extract_json_block(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        if let Some(end) = rest.find("```") {
            let inner = rest[..end].trim();
            if inner.starts_with('{') {
                return Some(inner);
            }
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_from_fence() {
        let text = "here you go\n```json\n{\"steps\": []}\n```\nbye";
        assert_eq!(extract_json_block(text), Some("{\"steps\": []}"));
    }

    #[test]
    fn test_extract_bare_object() {
        assert_eq!(extract_json_block("  {\"a\": 1} "), Some("{\"a\": 1}"));
    }

    #[test]
    fn test_extract_none_without_braces() {
        assert_eq!(extract_json_block("no json here"), None);
    }
}
