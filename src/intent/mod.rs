//! 模式分类：判断输入走闲聊回复还是工具任务
//!
//! 由一串可插拔分类器组成的责任链，按顺序询问，第一个给出结论的生效：
//! 短输入 -> 社交对话规则 -> 任务指示规则 -> LLM（可选）-> 长度兜底。
//! 整个链是全函数：任何环节失败都只会落到下一环，最终总返回 chat 或 task。

pub mod rules;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ClassifierSection;
use crate::core::EngineError;
use crate::llm::LlmClient;
use crate::workflow::types::Mode;

pub use rules::{
    detect_conversational, Conversational, ConversationalRule, ShortInputRule, TaskIndicatorRule,
};

/// 单个分类器：无法判断时返回 None，交给链上的下一个
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, query: &str) -> Option<Mode>;
}

const CLASSIFY_PROMPT: &str = r#"Decide whether the user's message needs tools or is just conversation.

chat: greetings, thanks, farewells, small talk, confirmations, questions about the assistant itself.
task: anything that needs information to be looked up, processed, generated or acted on (even if phrased politely).

User message: "{query}"

Answer with exactly one word: chat or task."#;

/// 模型兜底分类：只接受明确的单一标签，其余情况视为无法判断
pub struct LlmModeClassifier {
    llm: Arc<dyn LlmClient>,
    max_tokens: u32,
}

impl LlmModeClassifier {
    pub fn new(llm: Arc<dyn LlmClient>, max_tokens: u32) -> Self {
        Self { llm, max_tokens }
    }
}

/// 解析模型回复中的标签（兼容中文"闲聊" / "任务"）
pub fn parse_mode_label(reply: &str) -> Option<Mode> {
    let text = reply.trim().to_lowercase();
    let chat = text.contains("chat") || text.contains("闲聊");
    let task = text.contains("task") || text.contains("任务");
    match (chat, task) {
        (true, false) => Some(Mode::Chat),
        (false, true) => Some(Mode::Task),
        _ => None,
    }
}

#[async_trait]
impl IntentClassifier for LlmModeClassifier {
    fn name(&self) -> &str {
        "llm"
    }

    async fn classify(&self, query: &str) -> Option<Mode> {
        let prompt = CLASSIFY_PROMPT.replace("{query}", query);
        match self.llm.generate(&prompt, self.max_tokens, 0.0).await {
            Ok(reply) => {
                let mode = parse_mode_label(&reply);
                if mode.is_none() {
                    let err = EngineError::Classification(format!("no usable label in {:?}", reply.trim()));
                    tracing::debug!(error = %err, "falling back to length rule");
                }
                mode
            }
            Err(e) => {
                let err = EngineError::Classification(e);
                tracing::warn!(error = %err, "falling back to length rule");
                None
            }
        }
    }
}

/// 分类器链
pub struct ClassifierChain {
    stages: Vec<Box<dyn IntentClassifier>>,
    /// 兜底：字符数超过此值判为任务
    task_length_threshold: usize,
}

impl ClassifierChain {
    pub fn new(stages: Vec<Box<dyn IntentClassifier>>, task_length_threshold: usize) -> Self {
        Self {
            stages,
            task_length_threshold,
        }
    }

    /// 标准链：规则三段 + 可选 LLM
    pub fn standard(
        cfg: &ClassifierSection,
        llm: Option<Arc<dyn LlmClient>>,
        classify_tokens: u32,
    ) -> Self {
        let mut stages: Vec<Box<dyn IntentClassifier>> = vec![
            Box::new(ShortInputRule::new(cfg.short_input_chars)),
            Box::new(ConversationalRule),
            Box::new(TaskIndicatorRule),
        ];
        if cfg.use_llm {
            if let Some(llm) = llm {
                stages.push(Box::new(LlmModeClassifier::new(llm, classify_tokens)));
            }
        }
        Self::new(stages, cfg.task_length_threshold)
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn classify(&self, query: &str) -> Mode {
        for stage in &self.stages {
            if let Some(mode) = stage.classify(query).await {
                tracing::debug!(classifier = stage.name(), mode = mode.as_str(), "mode decided");
                return mode;
            }
        }
        if query.trim().chars().count() > self.task_length_threshold {
            Mode::Task
        } else {
            Mode::Chat
        }
    }
}
