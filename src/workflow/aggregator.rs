//! 结果聚合：把各步骤的 Envelope 归纳为一段面向用户的文字
//!
//! 优先使用最后一个成功步骤的 data.primary；主输出是结构化记录列表且有 LLM 时，
//! 发起一次只基于这些记录的总结请求；否则按固定规则渲染。

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::llm::LlmClient;
use crate::workflow::types::{ExecutionStep, PlanStatus, StepStatus};

/// 渲染记录时单段文字的上限（字符）
const SNIPPET_LIMIT: usize = 600;
/// 渲染列表时展示的条目数
const DISPLAY_ITEMS: usize = 3;
/// 送入总结 prompt 的记录数
const SUMMARY_RECORDS: usize = 5;

const SUMMARY_PROMPT: &str = r#"Answer the user's request using ONLY the records below. Do not add facts that are not in the records.

User request: "{query}"

Records:
{records}
Write a clear, direct answer in the user's language. Do not mention "records" or "search results"."#;

/// 聚合结果
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub final_output: String,
    pub status: PlanStatus,
}

/// 结果聚合器
pub struct ResultAggregator {
    llm: Option<Arc<dyn LlmClient>>,
    max_tokens: u32,
}

impl ResultAggregator {
    pub fn new(llm: Option<Arc<dyn LlmClient>>, max_tokens: u32) -> Self {
        Self { llm, max_tokens }
    }

    pub async fn aggregate(&self, query: &str, steps: &[ExecutionStep]) -> Aggregation {
        let status = plan_status(steps);
        let failed: Vec<&ExecutionStep> = steps.iter().filter(|s| s.status.is_failure()).collect();

        let Some(last) = steps.iter().rev().find(|s| s.status == StepStatus::Success) else {
            return Aggregation {
                final_output: describe_failures(&failed),
                status,
            };
        };

        let mut output = match self.summarize(query, last).await {
            Some(summary) => summary,
            None => render_step(last),
        };

        if !failed.is_empty() {
            output.push_str("\n\n");
            output.push_str(&partial_note(&failed));
        }

        Aggregation {
            final_output: output,
            status,
        }
    }

    /// 仅当主输出是非空记录列表且有 LLM 时总结；任何失败返回 None
    async fn summarize(&self, query: &str, step: &ExecutionStep) -> Option<String> {
        let llm = self.llm.as_ref()?;
        let records = as_records(&step.output.data.primary)?;

        let mut block = String::new();
        for (i, record) in records.iter().take(SUMMARY_RECORDS).enumerate() {
            let (title, body) = record_text(record);
            block.push_str(&format!("{}. {}\n   {}\n\n", i + 1, title, body));
        }
        let prompt = SUMMARY_PROMPT
            .replace("{query}", query.trim())
            .replace("{records}", &block);

        match llm.generate(&prompt, self.max_tokens, 0.3).await {
            Ok(text) if text.trim().chars().count() > 10 => Some(text.trim().to_string()),
            Ok(_) => {
                tracing::warn!("summary too short, using deterministic rendering");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "summary failed, using deterministic rendering");
                None
            }
        }
    }
}

/// 计划整体状态：无失败为 success；有失败但仍有成功步骤为 partial；否则 error
pub fn plan_status(steps: &[ExecutionStep]) -> PlanStatus {
    if steps.is_empty() {
        return PlanStatus::Error;
    }
    let any_failed = steps.iter().any(|s| s.status.is_failure());
    let any_success = steps.iter().any(|s| s.status == StepStatus::Success);
    match (any_failed, any_success) {
        (false, _) => PlanStatus::Success,
        (true, true) => PlanStatus::Partial,
        (true, false) => PlanStatus::Error,
    }
}

fn as_records(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
            Some(items)
        }
        _ => None,
    }
}

fn truncate(text: &str, limit: usize) -> String {
    let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.chars().count() > limit {
        format!("{}...", cleaned.chars().take(limit).collect::<String>())
    } else {
        cleaned
    }
}

fn field<'a>(record: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| record.get(*k).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())
}

/// 记录的标题与正文（无 title 时用紧凑 JSON）
fn record_text(record: &Value) -> (String, String) {
    let Some(map) = record.as_object() else {
        return (truncate(&record.to_string(), SNIPPET_LIMIT), String::new());
    };
    match field(map, &["title", "name"]) {
        Some(title) => {
            let body = field(map, &["snippet", "description", "content", "summary"])
                .map(|b| truncate(b, SNIPPET_LIMIT))
                .unwrap_or_default();
            (truncate(title, SNIPPET_LIMIT), body)
        }
        None => (truncate(&record.to_string(), SNIPPET_LIMIT), String::new()),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 按固定规则渲染某步的主输出
pub fn render_step(step: &ExecutionStep) -> String {
    let primary = &step.output.data.primary;
    match primary {
        Value::Null => {
            if step.output.message.trim().is_empty() {
                format!("{} completed", step.tool_name)
            } else {
                step.output.message.clone()
            }
        }
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) => primary.to_string(),
        Value::Array(items) if items.is_empty() => "No results.".to_string(),
        Value::Array(items) => render_list(items),
        Value::Object(map) => render_object(map),
    }
}

fn render_list(items: &[Value]) -> String {
    let more = items.len().saturating_sub(DISPLAY_ITEMS);
    let mut lines: Vec<String> = Vec::new();

    if items.iter().all(Value::is_string) {
        if items.len() == 1 {
            return format!("Result: {}", scalar_text(&items[0]));
        }
        lines.push(format!("{} items:", items.len()));
        for (i, item) in items.iter().take(DISPLAY_ITEMS).enumerate() {
            lines.push(format!("{}. {}", i + 1, scalar_text(item)));
        }
    } else if items.iter().all(Value::is_object) {
        for (i, item) in items.iter().take(DISPLAY_ITEMS).enumerate() {
            let (title, body) = record_text(item);
            if body.is_empty() {
                lines.push(format!("{}. {}", i + 1, title));
            } else {
                lines.push(format!("{}. {}\n   {}", i + 1, title, body));
            }
        }
        lines.push(format!("({} results)", items.len()));
        return lines.join("\n");
    } else {
        lines.push(format!("{} items:", items.len()));
        for (i, item) in items.iter().take(DISPLAY_ITEMS).enumerate() {
            lines.push(format!("{}. {}", i + 1, truncate(&scalar_text(item), SNIPPET_LIMIT)));
        }
    }

    if more > 0 {
        lines.push(format!("... and {} more", more));
    }
    lines.join("\n")
}

fn render_object(map: &Map<String, Value>) -> String {
    if map.is_empty() {
        return "Completed with an empty result.".to_string();
    }
    map.iter()
        .map(|(k, v)| format!("{}: {}", k, truncate(&scalar_text(v), SNIPPET_LIMIT)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn failure_line(step: &ExecutionStep) -> String {
    let reason = step
        .error
        .clone()
        .or_else(|| step.output.error.clone())
        .unwrap_or_else(|| "unknown error".to_string());
    let label = match step.status {
        StepStatus::Skipped => "skipped",
        _ => "failed",
    };
    format!("- step {} ({}) {}: {}", step.step_index, step.tool_name, label, reason)
}

fn partial_note(failed: &[&ExecutionStep]) -> String {
    let mut note = format!("Note: {} step(s) did not complete:", failed.len());
    for step in failed {
        note.push('\n');
        note.push_str(&failure_line(step));
    }
    note
}

fn describe_failures(failed: &[&ExecutionStep]) -> String {
    if failed.is_empty() {
        return "The task produced no output.".to_string();
    }
    let mut text = "The task could not be completed:".to_string();
    for step in failed {
        text.push('\n');
        text.push_str(&failure_line(step));
    }
    text
}
