//! 依赖值注入
//!
//! 步骤执行前，从已完成依赖步骤的 Envelope 中按 outputPath 取值并注入参数：
//! - 显式占位符 `$step_N.output[.path]`：整值占位直接替换为取到的值，嵌入文本时按字符串替换
//! - 目标工具恰好缺一个必填参数：确定性地绑定到该参数
//! - 其余情况：原始值放入保留键 `__extracted_values`，交给 Aligner 处理
//!
//! 不做参数名的启发式匹配，避免把值悄悄绑到无关参数上。

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::tools::ToolDescriptor;
use crate::workflow::graph::extract_path;
use crate::workflow::types::{ExecutionStep, PlanStep, DEFAULT_OUTPUT_PATH};

/// 依赖提取值的保留键
pub const EXTRACTED_VALUES_KEY: &str = "__extracted_values";

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$step_(\d+)\.output(?:\.([A-Za-z0-9_.]+))?").expect("placeholder pattern")
    })
}

/// 从已完成步骤的 Envelope 中按路径取值；路径找不到时再到 `data` 下找一次
pub fn extract_from_step(step: &ExecutionStep, path: &str) -> Option<Value> {
    let envelope = step.output.to_value();
    extract_path(&envelope, path).or_else(|| {
        envelope
            .get("data")
            .and_then(|data| extract_path(data, path))
    })
}

/// 计算步骤的注入后参数（返回新 map，不修改 PlanStep）
///
/// `completed` 只包含状态为 success 的依赖才会被取值；`descriptor` 缺失时不做绑定，只暂存。
pub fn resolve_parameters(
    step: &PlanStep,
    completed: &[ExecutionStep],
    descriptor: Option<&ToolDescriptor>,
) -> Map<String, Value> {
    let lookup = move |index: usize| {
        completed
            .iter()
            .find(|r| r.step_index == index && !r.status.is_failure())
    };

    let mut params = Map::new();
    for (key, value) in &step.parameters {
        if let Some(resolved) = substitute_placeholders(value, &lookup) {
            params.insert(key.clone(), resolved);
        } else {
            tracing::debug!(param = %key, "placeholder refers to an unavailable step, dropped");
        }
    }

    let path = step.effective_output_path();
    let extracted: Vec<Value> = step
        .dependencies
        .iter()
        .filter_map(|&dep| lookup(dep))
        .filter_map(|dep| extract_from_step(dep, path))
        .collect();

    if extracted.is_empty() {
        return params;
    }

    let missing: Vec<String> = descriptor
        .map(|d| {
            d.required()
                .into_iter()
                .filter(|name| is_missing(params.get(name)))
                .collect()
        })
        .unwrap_or_default();

    // 多个依赖值只能绑定到 array 参数，否则交给对齐器处理
    let target = match missing.as_slice() {
        [only] if extracted.len() == 1 => Some(only),
        [only] if descriptor.and_then(|d| d.property_type(only)).as_deref() == Some("array") => {
            Some(only)
        }
        _ => None,
    };

    match target {
        Some(only) => {
            let value = if extracted.len() == 1 {
                extracted.into_iter().next().unwrap_or(Value::Null)
            } else {
                Value::Array(extracted)
            };
            tracing::debug!(tool = %step.tool, param = %only, "dependency output bound to missing required parameter");
            params.insert(only.clone(), value);
        }
        None => {
            params.insert(EXTRACTED_VALUES_KEY.to_string(), Value::Array(extracted));
        }
    }
    params
}

/// 参数值是否视为缺失（不存在、null 或空串）
pub fn is_missing(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        _ => false,
    }
}

/// 递归替换占位符；整值占位且引用的步骤不可用时返回 None
fn substitute_placeholders<'a, F>(value: &Value, lookup: &F) -> Option<Value>
where
    F: Fn(usize) -> Option<&'a ExecutionStep>,
{
    match value {
        Value::String(text) => substitute_in_text(text, lookup),
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .filter_map(|item| substitute_placeholders(item, lookup))
                .collect(),
        )),
        Value::Object(map) => Some(Value::Object(
            map.iter()
                .filter_map(|(k, v)| substitute_placeholders(v, lookup).map(|v| (k.clone(), v)))
                .collect(),
        )),
        other => Some(other.clone()),
    }
}

fn substitute_in_text<'a, F>(text: &str, lookup: &F) -> Option<Value>
where
    F: Fn(usize) -> Option<&'a ExecutionStep>,
{
    let re = placeholder_regex();
    let resolve = |caps: &Captures| -> Option<Value> {
        let index: usize = caps.get(1)?.as_str().parse().ok()?;
        let path = caps.get(2).map_or(DEFAULT_OUTPUT_PATH, |m| m.as_str());
        extract_from_step(lookup(index)?, path)
    };

    if let Some(caps) = re.captures(text.trim()) {
        if caps.get(0).map(|m| m.as_str()) == Some(text.trim()) {
            return resolve(&caps);
        }
    } else {
        return Some(Value::String(text.to_string()));
    }

    let replaced = re.replace_all(text, |caps: &Captures| match resolve(caps) {
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => caps[0].to_string(),
    });
    Some(Value::String(replaced.into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Envelope;
    use crate::workflow::types::StepStatus;
    use serde_json::json;

    fn completed(index: usize, tool: &str, primary: Value) -> ExecutionStep {
        ExecutionStep {
            step_index: index,
            tool_name: tool.to_string(),
            purpose: String::new(),
            parameters: Map::new(),
            output: Envelope::success(tool, &Map::new(), primary),
            execution_time_ms: 1,
            status: StepStatus::Success,
            error: None,
        }
    }

    fn scaler() -> ToolDescriptor {
        ToolDescriptor {
            name: "image_scaler".to_string(),
            description: "scale".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "image_path": {"type": "string"},
                    "scale": {"type": "number", "default": 0.5}
                },
                "required": ["image_path"]
            }),
            output_schema: None,
        }
    }

    #[test]
    fn test_single_missing_required_is_bound() {
        let step = PlanStep::new("image_scaler")
            .depends_on([0])
            .output_path("data.primary");
        let done = vec![completed(0, "image_rotator", json!("X"))];
        let params = resolve_parameters(&step, &done, Some(&scaler()));
        assert_eq!(params.get("image_path"), Some(&json!("X")));
        assert!(!params.contains_key(EXTRACTED_VALUES_KEY));
    }

    #[test]
    fn test_values_stashed_when_nothing_missing() {
        let step = PlanStep::new("image_scaler")
            .depends_on([0])
            .param("image_path", json!("/given.png"));
        let done = vec![completed(0, "image_rotator", json!("X"))];
        let params = resolve_parameters(&step, &done, Some(&scaler()));
        assert_eq!(params["image_path"], json!("/given.png"));
        assert_eq!(params[EXTRACTED_VALUES_KEY], json!(["X"]));
    }

    #[test]
    fn test_values_stashed_without_descriptor() {
        let step = PlanStep::new("unknown").depends_on([0]);
        let done = vec![completed(0, "a", json!("X"))];
        let params = resolve_parameters(&step, &done, None);
        assert_eq!(params[EXTRACTED_VALUES_KEY], json!(["X"]));
    }

    #[test]
    fn test_failed_dependency_not_extracted() {
        let mut failed = completed(0, "a", json!("X"));
        failed.status = StepStatus::Error;
        let step = PlanStep::new("image_scaler").depends_on([0]);
        let params = resolve_parameters(&step, &[failed], Some(&scaler()));
        assert!(params.is_empty());
    }

    #[test]
    fn test_whole_value_placeholder_keeps_type() {
        let step = PlanStep::new("downloader")
            .depends_on([0])
            .param("urls", json!("$step_0.output.data.primary"));
        let done = vec![completed(0, "search", json!(["u1", "u2"]))];
        let params = resolve_parameters(&step, &done, None);
        assert_eq!(params["urls"], json!(["u1", "u2"]));
    }

    #[test]
    fn test_embedded_placeholder_and_short_path() {
        let step = PlanStep::new("writer")
            .param("title", json!("Report for $step_0.output.primary.city"))
            .param("body", json!("$step_0.output"));
        let done = vec![completed(0, "weather", json!({"city": "Beijing"}))];
        let params = resolve_parameters(&step, &done, None);
        assert_eq!(params["title"], json!("Report for Beijing"));
        assert_eq!(params["body"], json!({"city": "Beijing"}));
    }

    #[test]
    fn test_unavailable_placeholder_dropped() {
        let step = PlanStep::new("writer").param("text", json!("$step_3.output"));
        let params = resolve_parameters(&step, &[], None);
        assert!(!params.contains_key("text"));
    }

    #[test]
    fn test_two_dependencies_not_bound_to_scalar() {
        let step = PlanStep::new("image_scaler").depends_on([0, 1]);
        let done = vec![
            completed(0, "image_rotator", json!("/a.png")),
            completed(1, "image_rotator", json!("/b.png")),
        ];
        let params = resolve_parameters(&step, &done, Some(&scaler()));
        assert!(!params.contains_key("image_path"));
        assert_eq!(params[EXTRACTED_VALUES_KEY], json!(["/a.png", "/b.png"]));
    }

    #[test]
    fn test_two_dependencies_bound_to_array() {
        let merger = ToolDescriptor {
            name: "image_merger".to_string(),
            description: "merge".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"images": {"type": "array"}},
                "required": ["images"]
            }),
            output_schema: None,
        };
        let step = PlanStep::new("image_merger").depends_on([0, 1]);
        let done = vec![
            completed(0, "image_rotator", json!("/a.png")),
            completed(1, "image_rotator", json!("/b.png")),
        ];
        let params = resolve_parameters(&step, &done, Some(&merger));
        assert_eq!(params["images"], json!(["/a.png", "/b.png"]));
    }
}
