//! 规则分类器：短输入、社交对话、任务指示
//!
//! ASCII 关键词按单词边界匹配（避免 "hi" 命中 "this"），中文关键词按子串匹配。

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use super::IntentClassifier;
use crate::workflow::types::Mode;

/// 社交对话类别（闲聊回复也按此选择话术）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversational {
    Greeting,
    Thanks,
    Farewell,
    /// 关心近况 / 日常寒暄
    Status,
    /// 询问助手身份或能力
    Identity,
    Confirmation,
    Negation,
}

struct Patterns {
    greeting: Regex,
    thanks: Regex,
    farewell: Regex,
    status: Regex,
    identity: Regex,
    confirmation: Regex,
    negation: Regex,
    task_verb: Regex,
    question_word: Regex,
    knowledge: Vec<Regex>,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let re = |p: &str| Regex::new(p).expect("classifier pattern");
        Patterns {
            greeting: re(r"(?i)\b(hi|hello|hey|hiya|greetings|good (morning|afternoon|evening))\b"),
            thanks: re(r"(?i)\b(thanks|thank you|thx|appreciate it|cheers)\b"),
            farewell: re(r"(?i)\b(bye|goodbye|bye bye|see you|see ya|good night)\b"),
            status: re(r"(?i)\b(how are you|how's it going|how is it going|what's up|whats up|are you busy|how do you do)\b"),
            identity: re(r"(?i)\b(who are you|what are you|what can you do|are you a (robot|bot|human)|what do you do)\b"),
            confirmation: re(r"(?i)^(ok|okay|sure|yes|yep|yeah|got it|alright|fine|cool|great|nice)[.!~ ]*$"),
            negation: re(r"(?i)^(no|nope|nah|not really)[.!~ ]*$"),
            task_verb: re(r"(?i)\b(search|find|look up|lookup|query|fetch|get|download|upload|rotate|scale|resize|crop|convert|compress|extract|translate|analy[sz]e|summari[sz]e|generate|create|make|write|calculate|compute|process|list|show|send|save|open|read|check|compare|plot)\b"),
            question_word: re(r"(?i)\b(what|who|where|which|how|why|when|whose|whom)\b"),
            knowledge: vec![
                re(r"[\p{Han}]{2,4}是谁"),
                re(r"谁是[\p{Han}]{2,4}"),
                re(r"什么是[\p{Han}]+"),
                re(r"[\p{Han}]+是什么"),
                re(r"[\p{Han}]+在哪里"),
                re(r"哪里有[\p{Han}]+"),
            ],
        }
    })
}

const ZH_GREETING: &[&str] = &["你好", "您好", "早上好", "下午好", "晚上好", "嗨", "哈喽"];
const ZH_THANKS: &[&str] = &["谢谢", "感谢", "辛苦了", "多谢"];
const ZH_FAREWELL: &[&str] = &["再见", "拜拜", "晚安", "回头见"];
/// 对"你"的关怀询问才算闲聊（"北京天气怎么样"是任务）
const ZH_CARE: &[&str] = &["怎么样", "还好吗", "好吗", "忙不忙", "累不累", "最近如何"];
const ZH_DAILY: &[&str] = &["吃了吗", "吃了没", "睡了吗", "起床了", "下班了", "上班了", "回家了"];
const ZH_IDENTITY: &[&str] = &["你是谁", "你是什么", "机器人吗", "你会什么", "你能做什么"];
/// 仅当整句就是这些词时才算确认 / 否定（"行"也出现在"执行"中）
const ZH_CONFIRMATION: &[&str] = &["好的", "好", "是的", "对的", "对", "嗯", "嗯嗯", "行", "可以", "知道了", "哦", "明白"];
const ZH_NEGATION: &[&str] = &["不是", "不对", "不行", "不要", "算了"];
const ZH_TASK_VERBS: &[&str] = &[
    "搜索", "查找", "查询", "帮我", "请", "分析", "处理", "生成", "创建", "翻译", "计算", "下载", "上传",
    "旋转", "缩放", "转换", "压缩", "提取", "总结", "整理",
];
const ZH_QUESTION_WORDS: &[&str] = &["什么", "谁", "哪里", "哪个", "怎么", "如何", "为什么", "多少", "几"];

fn contains_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

/// 去掉首尾空白与标点后的文本（整句匹配用）
fn bare(text: &str) -> &str {
    text.trim_matches(|c: char| c.is_whitespace() || c.is_ascii_punctuation() || "。，！？～、".contains(c))
}

/// 识别社交对话类别
pub fn detect_conversational(query: &str) -> Option<Conversational> {
    let p = patterns();
    let q = query.trim();
    let whole = bare(q);

    if p.identity.is_match(q) || contains_any(q, ZH_IDENTITY) {
        return Some(Conversational::Identity);
    }
    if p.status.is_match(q)
        || contains_any(q, ZH_DAILY)
        || ((q.contains('你') || q.contains('您')) && contains_any(q, ZH_CARE))
    {
        return Some(Conversational::Status);
    }
    if p.thanks.is_match(q) || contains_any(q, ZH_THANKS) {
        return Some(Conversational::Thanks);
    }
    if p.farewell.is_match(q) || contains_any(q, ZH_FAREWELL) {
        return Some(Conversational::Farewell);
    }
    if p.greeting.is_match(q) || contains_any(q, ZH_GREETING) {
        return Some(Conversational::Greeting);
    }
    if p.confirmation.is_match(whole) || ZH_CONFIRMATION.contains(&whole) {
        return Some(Conversational::Confirmation);
    }
    if p.negation.is_match(whole) || ZH_NEGATION.contains(&whole) {
        return Some(Conversational::Negation);
    }
    None
}

pub fn has_task_verb(query: &str) -> bool {
    patterns().task_verb.is_match(query) || contains_any(query, ZH_TASK_VERBS)
}

pub fn has_question_word(query: &str) -> bool {
    patterns().question_word.is_match(query) || contains_any(query, ZH_QUESTION_WORDS)
}

/// 中文知识性问句："XX是谁" / "什么是XX" / "XX在哪里" 等
pub fn is_knowledge_question(query: &str) -> bool {
    patterns().knowledge.iter().any(|re| re.is_match(query))
}

/// 短的专有名词式查询（"Albert Einstein"、"Tesla Model 3"）
pub fn looks_like_named_entity(query: &str) -> bool {
    let words: Vec<&str> = query.split_whitespace().collect();
    if words.is_empty() || words.len() > 4 {
        return false;
    }
    let alphanumeric = words
        .iter()
        .all(|w| w.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '\''));
    let capitalized = words
        .iter()
        .filter(|w| w.chars().next().is_some_and(|c| c.is_ascii_uppercase()))
        .count();
    alphanumeric && capitalized * 2 >= words.len() + 1
}

/// (a) 极短输入直接判为闲聊
pub struct ShortInputRule {
    max_chars: usize,
}

impl ShortInputRule {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }
}

#[async_trait]
impl IntentClassifier for ShortInputRule {
    fn name(&self) -> &str {
        "short_input"
    }

    async fn classify(&self, query: &str) -> Option<Mode> {
        (bare(query).chars().count() <= self.max_chars).then_some(Mode::Chat)
    }
}

/// (b) 问候 / 感谢 / 告别 / 寒暄 / 身份询问 / 确认
///
/// 同时出现明确的任务动词时不下结论（"hello, search the weather"）。
pub struct ConversationalRule;

#[async_trait]
impl IntentClassifier for ConversationalRule {
    fn name(&self) -> &str {
        "conversational"
    }

    async fn classify(&self, query: &str) -> Option<Mode> {
        let kind = detect_conversational(query)?;
        if kind != Conversational::Identity && has_task_verb(query) {
            return None;
        }
        Some(Mode::Chat)
    }
}

/// (c) 任务动词、疑问词、问号、知识性问句、专有名词式短查询
pub struct TaskIndicatorRule;

#[async_trait]
impl IntentClassifier for TaskIndicatorRule {
    fn name(&self) -> &str {
        "task_indicator"
    }

    async fn classify(&self, query: &str) -> Option<Mode> {
        let q = query.trim();
        let indicated = is_knowledge_question(q)
            || has_task_verb(q)
            || has_question_word(q)
            || q.contains('?')
            || q.contains('？')
            || looks_like_named_entity(q);
        indicated.then_some(Mode::Task)
    }
}
