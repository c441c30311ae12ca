//! 参数 Schema 对齐
//!
//! 把步骤的原始参数（含依赖注入值）对齐到目标工具的 inputSchema：
//! 1. 不在 properties 中的键被暂存（只出现在修复 prompt 里），不传给工具
//! 2. 按声明类型做类型转换（字符串 -> 数字 / 布尔 / 数组，数组支持 JSON 与逗号分隔）
//! 3. 填充 schema 中声明的 default，重新计算缺失的必填参数
//! 4. 仍不满足且有 LLM 时，最多发起一次修复请求，结果在本地重新校验
//!
//! 修复后仍缺必填参数则返回 ValidationError，工具不会被调用。

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Number, Value};

use crate::core::EngineError;
use crate::llm::{extract_json_block, LlmClient};
use crate::tools::ToolDescriptor;
use crate::workflow::resolver::{is_missing, EXTRACTED_VALUES_KEY};

const REPAIR_PROMPT: &str = r#"You repair tool-call parameters so they satisfy the tool's input JSON schema.

Tool: {tool}
Description: {description}

Input schema:
{schema}

Current parameters:
{current}

Missing required parameters: {missing}

Values produced by earlier steps and unrecognised parameters (use them if they fit):
{stashed}
{env}
Respond with ONE JSON object containing only keys defined in the schema's "properties". No explanation."#;

/// 参数对齐器
pub struct SchemaAligner {
    llm: Option<Arc<dyn LlmClient>>,
    env_hints: HashMap<String, String>,
    repair_tokens: u32,
}

impl SchemaAligner {
    pub fn new(
        llm: Option<Arc<dyn LlmClient>>,
        env_hints: HashMap<String, String>,
        repair_tokens: u32,
    ) -> Self {
        Self {
            llm,
            env_hints,
            repair_tokens,
        }
    }

    /// 对齐参数；返回的新 map 只含 schema 中声明的键并满足 required
    ///
    /// `descriptor` 为 None（工具不在注册表中）时只去掉保留键，交由执行器报告 ToolNotFound。
    pub async fn align(
        &self,
        descriptor: Option<&ToolDescriptor>,
        mut params: Map<String, Value>,
    ) -> Result<Map<String, Value>, EngineError> {
        let stashed = take_stashed(&mut params);

        let Some(descriptor) = descriptor else {
            return Ok(params);
        };

        let properties = descriptor.properties();
        let open_schema = descriptor
            .input_schema
            .get("additionalProperties")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut aligned = Map::new();
        let mut unknown = Map::new();
        for (key, value) in params {
            if properties.contains_key(&key) {
                let coerced = coerce_for(descriptor, &key, value);
                aligned.insert(key, coerced);
            } else if open_schema {
                aligned.insert(key, value);
            } else {
                unknown.insert(key, value);
            }
        }
        if !unknown.is_empty() {
            tracing::debug!(tool = %descriptor.name, keys = ?unknown.keys().collect::<Vec<_>>(), "parameters not in schema stashed");
        }

        fill_defaults(&properties, &mut aligned);

        let mut missing = missing_required(descriptor, &aligned);
        if let (Some(value), Some(only)) = (
            bindable(descriptor, &missing, &stashed),
            missing.first().cloned(),
        ) {
            let coerced = coerce_for(descriptor, &only, value);
            aligned.insert(only, coerced);
            missing = missing_required(descriptor, &aligned);
        }

        if missing.is_empty() {
            return Ok(aligned);
        }

        let Some(llm) = &self.llm else {
            return Err(EngineError::Validation {
                tool: descriptor.name.clone(),
                missing,
            });
        };

        tracing::info!(tool = %descriptor.name, missing = ?missing, "attempting one parameter repair");
        let prompt = self.repair_prompt(descriptor, &aligned, &missing, &stashed, &unknown);
        match llm.generate(&prompt, self.repair_tokens, 0.0).await {
            Ok(reply) => match parse_repair(&reply) {
                Some(repaired) => {
                    for (key, value) in repaired {
                        if properties.contains_key(&key) && !value.is_null() {
                            let coerced = coerce_for(descriptor, &key, value);
                            aligned.insert(key, coerced);
                        }
                    }
                }
                None => tracing::warn!(tool = %descriptor.name, "repair reply is not a JSON object"),
            },
            Err(e) => tracing::warn!(tool = %descriptor.name, error = %e, "repair request failed"),
        }

        let missing = missing_required(descriptor, &aligned);
        if missing.is_empty() {
            Ok(aligned)
        } else {
            Err(EngineError::Validation {
                tool: descriptor.name.clone(),
                missing,
            })
        }
    }

    fn repair_prompt(
        &self,
        descriptor: &ToolDescriptor,
        current: &Map<String, Value>,
        missing: &[String],
        stashed: &[Value],
        unknown: &Map<String, Value>,
    ) -> String {
        let mut extra = Map::new();
        if !stashed.is_empty() {
            extra.insert("fromDependencies".to_string(), Value::Array(stashed.to_vec()));
        }
        if !unknown.is_empty() {
            extra.insert("unrecognised".to_string(), Value::Object(unknown.clone()));
        }

        REPAIR_PROMPT
            .replace("{tool}", &descriptor.name)
            .replace("{description}", &descriptor.description)
            .replace("{schema}", &pretty(&descriptor.input_schema))
            .replace("{current}", &pretty(&Value::Object(current.clone())))
            .replace("{missing}", &missing.join(", "))
            .replace("{stashed}", &pretty(&Value::Object(extra)))
            .replace("{env}", &format_env_hints(&self.env_hints))
    }
}

/// 环境提示段落（无提示时为空串）
pub fn format_env_hints(hints: &HashMap<String, String>) -> String {
    if hints.is_empty() {
        return String::new();
    }
    let mut keys: Vec<&String> = hints.keys().collect();
    keys.sort();
    let lines: Vec<String> = keys
        .into_iter()
        .map(|k| format!("- {} = {}", k, hints[k]))
        .collect();
    format!("\nEnvironment defaults:\n{}\n", lines.join("\n"))
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn take_stashed(params: &mut Map<String, Value>) -> Vec<Value> {
    match params.remove(EXTRACTED_VALUES_KEY) {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other],
    }
}

fn parse_repair(reply: &str) -> Option<Map<String, Value>> {
    let block = extract_json_block(reply)?;
    match serde_json::from_str::<Value>(block).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// 未满足的必填参数：缺失，或类型与 schema 声明不符
fn missing_required(descriptor: &ToolDescriptor, params: &Map<String, Value>) -> Vec<String> {
    descriptor
        .required()
        .into_iter()
        .filter(|name| {
            let value = params.get(name);
            is_missing(value)
                || match (value, descriptor.property_type(name)) {
                    (Some(v), Some(ty)) => !matches_type(v, &ty),
                    _ => false,
                }
        })
        .collect()
}

/// 暂存值能否绑定到唯一缺失的参数：单个值直接绑定，多个值只绑定到 array 类型
fn bindable(descriptor: &ToolDescriptor, missing: &[String], stashed: &[Value]) -> Option<Value> {
    let [only] = missing else {
        return None;
    };
    match stashed {
        [] => None,
        [single] => Some(single.clone()),
        many if descriptor.property_type(only).as_deref() == Some("array") => {
            Some(Value::Array(many.to_vec()))
        }
        _ => None,
    }
}

/// 值是否符合 JSON Schema 基本类型；未知类型一律放行
pub fn matches_type(value: &Value, ty: &str) -> bool {
    match ty {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

/// 整数值的浮点数转 i64；超出范围时返回 None，不做饱和截断
fn whole_to_i64(f: f64) -> Option<i64> {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0; // 2^63
    (f.is_finite() && f.fract() == 0.0 && (-LIMIT..LIMIT).contains(&f)).then(|| f as i64)
}

fn fill_defaults(properties: &Map<String, Value>, params: &mut Map<String, Value>) {
    for (name, spec) in properties {
        if params.contains_key(name) {
            continue;
        }
        if let Some(default) = spec.get("default").filter(|d| !d.is_null()) {
            params.insert(name.clone(), default.clone());
        }
    }
}

fn coerce_for(descriptor: &ToolDescriptor, name: &str, value: Value) -> Value {
    match descriptor.property_type(name) {
        Some(ty) => coerce(value, &ty),
        None => value,
    }
}

/// 按 JSON Schema 类型转换；无法转换时原样返回
pub fn coerce(value: Value, ty: &str) -> Value {
    match (ty, value) {
        ("integer", Value::String(s)) => {
            let t = s.trim();
            if let Ok(i) = t.parse::<i64>() {
                Value::from(i)
            } else {
                match t.parse::<f64>().ok().and_then(whole_to_i64) {
                    Some(i) => Value::from(i),
                    None => Value::String(s),
                }
            }
        }
        ("integer", Value::Number(n)) if n.is_f64() => {
            match n.as_f64().and_then(whole_to_i64) {
                Some(i) => Value::from(i),
                None => Value::Number(n),
            }
        }
        ("number", Value::String(s)) => {
            let t = s.trim();
            if let Ok(i) = t.parse::<i64>() {
                Value::from(i)
            } else {
                t.parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::String(s))
            }
        }
        ("boolean", Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => Value::Bool(true),
            "false" | "0" | "no" | "n" | "off" => Value::Bool(false),
            _ => Value::String(s),
        },
        ("boolean", Value::Number(n)) => match n.as_i64() {
            Some(0) => Value::Bool(false),
            Some(1) => Value::Bool(true),
            _ => Value::Number(n),
        },
        ("array", Value::String(s)) => {
            let t = s.trim();
            if t.starts_with('[') {
                if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(t) {
                    return Value::Array(items);
                }
            }
            Value::Array(
                t.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(|p| Value::String(p.to_string()))
                    .collect(),
            )
        }
        ("array", Value::Array(items)) => Value::Array(items),
        ("array", other) if !other.is_null() => Value::Array(vec![other]),
        ("string", Value::Number(n)) => Value::String(n.to_string()),
        ("string", Value::Bool(b)) => Value::String(b.to_string()),
        ("string", Value::Array(mut items)) if items.len() == 1 && items[0].is_string() => {
            items.remove(0)
        }
        ("object", Value::String(s)) if s.trim().starts_with('{') => {
            match serde_json::from_str::<Value>(s.trim()) {
                Ok(Value::Object(map)) => Value::Object(map),
                _ => Value::String(s),
            }
        }
        (_, other) => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use serde_json::json;

    fn resize() -> ToolDescriptor {
        ToolDescriptor {
            name: "image_scaler".to_string(),
            description: "Scale an image".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "image_path": {"type": "string"},
                    "width": {"type": "integer"},
                    "keep_ratio": {"type": "boolean", "default": true},
                    "tags": {"type": "array"}
                },
                "required": ["image_path", "width"]
            }),
            output_schema: None,
        }
    }

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_coerce_by_declared_type() {
        assert_eq!(coerce(json!("42"), "integer"), json!(42));
        assert_eq!(coerce(json!("3.0"), "integer"), json!(3));
        assert_eq!(coerce(json!("0.5"), "number"), json!(0.5));
        assert_eq!(coerce(json!("yes"), "boolean"), json!(true));
        assert_eq!(coerce(json!("a, b,,c"), "array"), json!(["a", "b", "c"]));
        assert_eq!(coerce(json!("[1, 2]"), "array"), json!([1, 2]));
        assert_eq!(coerce(json!(7), "string"), json!("7"));
        assert_eq!(coerce(json!("abc"), "integer"), json!("abc"));
    }

    #[tokio::test]
    async fn test_unknown_keys_dropped_and_defaults_filled() {
        let aligner = SchemaAligner::new(None, HashMap::new(), 400);
        let out = aligner
            .align(
                Some(&resize()),
                map(json!({"image_path": "/a.png", "width": "640", "colour": "red"})),
            )
            .await
            .unwrap();
        assert_eq!(out["width"], json!(640));
        assert_eq!(out["keep_ratio"], json!(true));
        assert!(!out.contains_key("colour"));
    }

    #[tokio::test]
    async fn test_stashed_value_binds_single_missing() {
        let aligner = SchemaAligner::new(None, HashMap::new(), 400);
        let out = aligner
            .align(
                Some(&resize()),
                map(json!({"width": 10, "__extracted_values": ["/rotated.png"]})),
            )
            .await
            .unwrap();
        assert_eq!(out["image_path"], json!("/rotated.png"));
        assert!(!out.contains_key(EXTRACTED_VALUES_KEY));
    }

    #[tokio::test]
    async fn test_validation_error_without_llm() {
        let aligner = SchemaAligner::new(None, HashMap::new(), 400);
        let err = aligner
            .align(Some(&resize()), map(json!({"width": 10})))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::Validation {
                tool: "image_scaler".to_string(),
                missing: vec!["image_path".to_string()],
            }
        );
    }

    #[tokio::test]
    async fn test_single_repair_attempt_fills_missing() {
        let llm = Arc::new(MockLlmClient::with_replies([
            "```json\n{\"image_path\": \"/from/model.png\", \"width\": \"320\", \"bogus\": 1}\n```",
        ]));
        let mut hints = HashMap::new();
        hints.insert("DEFAULT_BUCKET_NAME".to_string(), "media".to_string());
        let aligner = SchemaAligner::new(Some(llm.clone()), hints, 400);

        let out = aligner
            .align(Some(&resize()), map(json!({"__extracted_values": ["a", "b"]})))
            .await
            .unwrap();
        assert_eq!(out["image_path"], json!("/from/model.png"));
        assert_eq!(out["width"], json!(320));
        assert!(!out.contains_key("bogus"));
        assert_eq!(llm.call_count(), 1);
        let prompt = &llm.prompts()[0];
        assert!(prompt.contains("image_path"));
        assert!(prompt.contains("DEFAULT_BUCKET_NAME = media"));
    }

    #[tokio::test]
    async fn test_failed_repair_is_not_retried() {
        let llm = Arc::new(MockLlmClient::with_replies([
            "{\"width\": 5}",
            "{\"image_path\": \"/never/used.png\"}",
        ]));
        let aligner = SchemaAligner::new(Some(llm.clone()), HashMap::new(), 400);
        let result = aligner.align(Some(&resize()), Map::new()).await;
        assert!(matches!(result, Err(EngineError::Validation { .. })));
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_passes_through() {
        let aligner = SchemaAligner::new(None, HashMap::new(), 400);
        let out = aligner
            .align(None, map(json!({"q": "x", "__extracted_values": [1]})))
            .await
            .unwrap();
        assert_eq!(out, map(json!({"q": "x"})));
    }

    #[test]
    fn test_out_of_range_integer_left_uncoerced() {
        assert_eq!(coerce(json!("1e30"), "integer"), json!("1e30"));
        assert_eq!(coerce(json!(1e30), "integer"), json!(1e30));
        assert_eq!(coerce(json!(-4.0), "integer"), json!(-4));
    }

    #[tokio::test]
    async fn test_many_stashed_values_not_bound_to_scalar() {
        let aligner = SchemaAligner::new(None, HashMap::new(), 400);
        let err = aligner
            .align(
                Some(&resize()),
                map(json!({"width": 10, "__extracted_values": ["/a.png", "/b.png"]})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation { ref missing, .. } if missing == &vec!["image_path".to_string()]));
    }

    #[tokio::test]
    async fn test_required_value_of_wrong_type_is_unsatisfied() {
        let aligner = SchemaAligner::new(None, HashMap::new(), 400);
        let err = aligner
            .align(
                Some(&resize()),
                map(json!({"image_path": ["/a.png", "/b.png"], "width": 10})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));

        // 单元素数组按 string 解包后满足 schema
        let out = aligner
            .align(
                Some(&resize()),
                map(json!({"image_path": ["/a.png"], "width": 10})),
            )
            .await
            .unwrap();
        assert_eq!(out["image_path"], json!("/a.png"));
    }
}
