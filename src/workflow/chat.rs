//! 闲聊模式回复：有 LLM 时生成简短友好的回答，否则按规则选话术

use std::sync::Arc;

use crate::intent::{detect_conversational, Conversational};
use crate::llm::LlmClient;

const CHAT_PROMPT: &str = r#"You are a friendly, professional assistant. The user said: "{query}"

Reply naturally and briefly, like a friend would. Respond politely to greetings, modestly to thanks.
If asked what you can do, mention that you can search for information, process files and answer questions.
Reply in the user's language, plain text only."#;

/// 闲聊回复器
pub struct ChatResponder {
    llm: Option<Arc<dyn LlmClient>>,
    max_tokens: u32,
}

impl ChatResponder {
    pub fn new(llm: Option<Arc<dyn LlmClient>>, max_tokens: u32) -> Self {
        Self { llm, max_tokens }
    }

    pub async fn reply(&self, query: &str) -> String {
        if let Some(llm) = &self.llm {
            let prompt = CHAT_PROMPT.replace("{query}", query.trim());
            match llm.generate(&prompt, self.max_tokens, 0.7).await {
                Ok(text) if !text.trim().is_empty() => return text.trim().to_string(),
                Ok(_) => tracing::warn!("empty chat reply from LLM, using rule-based reply"),
                Err(e) => tracing::warn!(error = %e, "chat reply failed, using rule-based reply"),
            }
        }
        rule_based_reply(query)
    }
}

fn is_cjk(query: &str) -> bool {
    query
        .chars()
        .any(|c| ('\u{4e00}'..='\u{9fff}').contains(&c))
}

/// 不依赖模型的回复；同一输入总是得到同一句
pub fn rule_based_reply(query: &str) -> String {
    let zh = is_cjk(query);
    let options: &[&str] = match (detect_conversational(query), zh) {
        (Some(Conversational::Greeting), false) => &[
            "Hello! Nice to see you. How can I help?",
            "Hi there! What can I do for you today?",
            "Hello! Let me know what you need.",
        ],
        (Some(Conversational::Greeting), true) => &[
            "你好！很高兴见到您，有什么可以帮助您的吗？",
            "您好！我随时准备为您提供帮助。",
            "您好！有什么需要我协助的吗？",
        ],
        (Some(Conversational::Thanks), false) => &[
            "You're welcome! Glad I could help.",
            "No problem at all!",
            "Anytime! Anything else I can do?",
        ],
        (Some(Conversational::Thanks), true) => &[
            "不客气！很高兴能帮到您。",
            "不用谢！这是我应该做的。",
            "您太客气了！还有其他需要帮助的吗？",
        ],
        (Some(Conversational::Farewell), false) => &[
            "Goodbye! Come back any time.",
            "Bye! Have a great day.",
            "See you! Good luck with everything.",
        ],
        (Some(Conversational::Farewell), true) => &[
            "再见！希望下次还能为您提供帮助。",
            "拜拜！有需要随时找我。",
            "再见！祝您一切顺利！",
        ],
        (Some(Conversational::Status), false) => &[
            "I'm doing well, thanks for asking! Ready when you are.",
            "All good here. What can I help you with?",
        ],
        (Some(Conversational::Status), true) => &[
            "我很好，谢谢关心！随时准备为您提供帮助。",
            "我状态很好！有什么需要帮助的吗？",
        ],
        (Some(Conversational::Identity), false) => &[
            "I'm an assistant that can search for information, process files and answer questions. What do you need?",
        ],
        (Some(Conversational::Identity), true) => &[
            "我是一个助手，可以帮您搜索信息、处理文件、回答问题。有什么需要帮助的吗？",
        ],
        (Some(Conversational::Confirmation), false) => &["Great! Anything else I can help with?"],
        (Some(Conversational::Confirmation), true) => &["好的！还有什么需要帮助的吗？"],
        (Some(Conversational::Negation), false) => &["Understood. Is there anything else I can do?"],
        (Some(Conversational::Negation), true) => &["好的，我明白了。还有什么可以帮您的吗？"],
        (None, false) => &[
            "I see. I can search for information, process files and more. What would you like to do?",
        ],
        (None, true) => &["我明白了。我可以帮您搜索信息、处理文件等，有什么具体需要吗？"],
    };
    let index = query.chars().count() % options.len();
    options[index].to_string()
}
