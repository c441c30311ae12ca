//! 工具注册表
//!
//! 所有工具实现 Tool trait（名称 / 描述 / 入参与出参 schema / invoke），由 ToolRegistry 按名注册与查找。
//! 引擎只通过 ToolSource 读取：启动时填充一次，之后视为只读。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步调用
///
/// `invoke` 可以返回任意原生形状（字符串、裸结构、或已成形的 envelope），
/// 由执行器统一规范化。
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（计划中 "tool" 字段引用的键）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 入参 JSON Schema；默认无参数
    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 出参 JSON Schema（可选）
    fn output_schema(&self) -> Option<Value> {
        None
    }

    async fn invoke(&self, params: Map<String, Value>) -> Result<Value, String>;
}

/// 工具描述符：注册后不可变，核心只读
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

impl ToolDescriptor {
    pub fn from_tool(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            input_schema: tool.input_schema(),
            output_schema: tool.output_schema(),
        }
    }

    /// inputSchema.properties（缺失时为空）
    pub fn properties(&self) -> Map<String, Value> {
        self.input_schema
            .get("properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    /// inputSchema.required（保持声明顺序）
    pub fn required(&self) -> Vec<String> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 某个属性声明的 JSON 类型（"string" / "integer" / ...）
    pub fn property_type(&self, name: &str) -> Option<String> {
        self.input_schema
            .get("properties")
            .and_then(|p| p.get(name))
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str)
            .map(String::from)
    }
}

/// 工具来源：引擎消费的注册表接口
pub trait ToolSource: Send + Sync {
    fn list_tools(&self) -> Vec<ToolDescriptor>;

    fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>>;

    fn descriptor(&self, name: &str) -> Option<ToolDescriptor> {
        self.list_tools().into_iter().find(|d| d.name == name)
    }
}

/// 工具注册表：按名称存储 Arc<dyn Tool>，支持 register / get / list_tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同名工具后注册者覆盖先注册者
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), Arc::new(tool)).is_some() {
            tracing::warn!(tool = %name, "tool re-registered, previous entry replaced");
        }
    }
}

impl ToolSource for ToolRegistry {
    /// 按名称排序，保证 prompt 中的工具目录稳定
    fn list_tools(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> = self
            .tools
            .values()
            .map(|tool| ToolDescriptor::from_tool(tool.as_ref()))
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    fn descriptor(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools
            .get(name)
            .map(|tool| ToolDescriptor::from_tool(tool.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EchoTool;

    #[test]
    fn test_descriptor_reads_schema() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);

        let desc = registry.descriptor("echo").unwrap();
        assert_eq!(desc.required(), vec!["text".to_string()]);
        assert_eq!(desc.property_type("text").as_deref(), Some("string"));
        assert!(desc.properties().contains_key("text"));
        assert!(registry.descriptor("missing").is_none());
    }

    #[test]
    fn test_descriptor_serializes_camel_case() {
        let desc = ToolDescriptor::from_tool(&EchoTool);
        let json = serde_json::to_value(&desc).unwrap();
        assert!(json.get("inputSchema").is_some());
        assert!(json.get("input_schema").is_none());
    }
}
