//! Echo 工具（测试 / 命令行演示用）

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::tools::Tool;

/// Echo 工具：回显文本，输出已是标准 envelope 形状
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text back unchanged (for testing pipelines)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": {"type": "string", "description": "Text to echo"}
            },
            "required": ["text"]
        })
    }

    fn output_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "data": {
                    "type": "object",
                    "properties": {"primary": {"type": "string"}}
                }
            }
        }))
    }

    async fn invoke(&self, params: Map<String, Value>) -> Result<Value, String> {
        let text = params
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing 'text'".to_string())?;
        Ok(json!({
            "status": "success",
            "data": {"primary": text},
            "message": ""
        }))
    }
}
