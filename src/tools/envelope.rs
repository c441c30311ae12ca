//! 工具输出的统一信封（Envelope）
//!
//! 任何工具的原生返回（字符串、裸结构、或已成形的 envelope）都会被规范化为：
//! `{status, data: {primary, secondary?}, message, metadata: {toolName, parameters}, error?}`。
//! 规范化是幂等的：对已规范化的 envelope 再做一次，结果不变。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeData {
    /// 主要输出；规范化后必有此键（可以是 null）
    pub primary: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    pub tool_name: String,
    /// 调用时的参数回显
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub status: EnvelopeStatus,
    pub data: EnvelopeData,
    pub message: String,
    pub metadata: EnvelopeMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn success(tool_name: &str, params: &Map<String, Value>, primary: Value) -> Self {
        Self {
            status: EnvelopeStatus::Success,
            data: EnvelopeData {
                primary,
                secondary: None,
            },
            message: String::new(),
            metadata: EnvelopeMetadata {
                tool_name: tool_name.to_string(),
                parameters: Value::Object(params.clone()),
            },
            error: None,
        }
    }

    /// 由引擎错误构造错误 envelope（message 为错误码，error 为可读描述）
    pub fn from_error(tool_name: &str, params: &Map<String, Value>, err: &EngineError) -> Self {
        Self {
            status: EnvelopeStatus::Error,
            data: EnvelopeData {
                primary: Value::Null,
                secondary: None,
            },
            message: err.code().to_string(),
            metadata: EnvelopeMetadata {
                tool_name: tool_name.to_string(),
                parameters: Value::Object(params.clone()),
            },
            error: Some(err.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == EnvelopeStatus::Success
    }

    /// 以 JSON 形式查看（供 outputPath 提取）
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// 把任意原生返回规范化为 Envelope
    pub fn normalize(tool_name: &str, params: &Map<String, Value>, native: Value) -> Self {
        let obj = match native {
            Value::Object(obj) if is_pre_shaped(&obj) => obj,
            other => return Self::success(tool_name, params, other),
        };

        let error = obj.get("error").and_then(error_text);
        let status = match obj.get("status").and_then(Value::as_str) {
            Some("success") => EnvelopeStatus::Success,
            Some("error") => EnvelopeStatus::Error,
            _ if error.is_some() => EnvelopeStatus::Error,
            _ => EnvelopeStatus::Success,
        };

        let message = obj
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        // 信封字段之外的顶层键是工具的原生负载，不能丢
        let payload: Map<String, Value> = obj
            .iter()
            .filter(|(k, _)| !ENVELOPE_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let (primary, secondary) = match obj.get("data") {
            Some(Value::Object(data)) => {
                let secondary = data.get("secondary").filter(|v| !v.is_null()).cloned();
                let primary = if let Some(p) = data.get("primary") {
                    p.clone()
                } else if let Some(result) = obj.get("result") {
                    result.clone()
                } else {
                    let mut rest: Map<String, Value> = data
                        .iter()
                        .filter(|(k, _)| k.as_str() != "secondary")
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    for (k, v) in &payload {
                        rest.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                    object_or_null(rest)
                };
                (primary, secondary)
            }
            Some(other) if !other.is_null() => (other.clone(), payload_secondary(&payload)),
            _ => match obj.get("result") {
                Some(result) => (result.clone(), payload_secondary(&payload)),
                None => (object_or_null(payload.clone()), None),
            },
        };

        let meta = obj.get("metadata").and_then(Value::as_object);
        let meta_tool = meta
            .and_then(|m| m.get("toolName").or_else(|| m.get("tool_name")))
            .and_then(Value::as_str)
            .unwrap_or(tool_name)
            .to_string();
        let meta_params = meta
            .and_then(|m| m.get("parameters"))
            .cloned()
            .unwrap_or_else(|| Value::Object(params.clone()));

        let error = match (status, error) {
            (EnvelopeStatus::Error, None) => Some(if message.is_empty() {
                format!("{} reported an error", meta_tool)
            } else {
                message.clone()
            }),
            (_, e) => e,
        };

        Self {
            status,
            data: EnvelopeData { primary, secondary },
            message,
            metadata: EnvelopeMetadata {
                tool_name: meta_tool,
                parameters: meta_params,
            },
            error,
        }
    }
}

/// envelope 自身的字段；其余顶层键归入 primary / secondary
const ENVELOPE_KEYS: [&str; 6] = ["status", "data", "message", "metadata", "error", "result"];

fn object_or_null(map: Map<String, Value>) -> Value {
    if map.is_empty() {
        Value::Null
    } else {
        Value::Object(map)
    }
}

/// primary 已由 data / result 给出时，其余负载放进 secondary
fn payload_secondary(payload: &Map<String, Value>) -> Option<Value> {
    (!payload.is_empty()).then(|| Value::Object(payload.clone()))
}

/// 已成形：带 data 对象、显式 status，或旧式 result / error 字段
fn is_pre_shaped(obj: &Map<String, Value>) -> bool {
    matches!(obj.get("data"), Some(Value::Object(_)))
        || matches!(
            obj.get("status").and_then(Value::as_str),
            Some("success") | Some("error")
        )
        || obj.contains_key("result")
        || obj.contains_key("error")
}

fn error_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(false) => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
