//! 工作流类型定义
//!
//! 计划步骤、运行时步骤记录、执行计划与对外的执行结果

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tools::Envelope;

/// 未指定 outputPath 时从依赖输出中提取的默认路径
pub const DEFAULT_OUTPUT_PATH: &str = "data.primary";

/// 模式：直接对话或工具任务
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Chat,
    Task,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Chat => "chat",
            Mode::Task => "task",
        }
    }
}

/// 计划中的一个步骤（由 Plan Generator 创建，之后只读）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub tool: String,
    #[serde(default)]
    pub purpose: String,
    /// 依赖的更早步骤索引
    #[serde(default)]
    pub dependencies: Vec<usize>,
    /// 原始参数，可能含未解析的跨步引用
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default, alias = "output_path", skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
}

impl PlanStep {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            purpose: String::new(),
            dependencies: Vec::new(),
            parameters: Map::new(),
            output_path: None,
        }
    }

    pub fn purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = purpose.into();
        self
    }

    pub fn depends_on(mut self, deps: impl IntoIterator<Item = usize>) -> Self {
        self.dependencies = deps.into_iter().collect();
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn output_path(mut self, path: impl Into<String>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    /// 实际使用的提取路径
    pub fn effective_output_path(&self) -> &str {
        self.output_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(DEFAULT_OUTPUT_PATH)
    }
}

/// 单步运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Error,
    /// 依赖的步骤失败，工具未调用
    Skipped,
}

impl StepStatus {
    pub fn is_failure(&self) -> bool {
        !matches!(self, StepStatus::Success)
    }
}

/// 运行时步骤记录：派发时创建，完成后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStep {
    pub step_index: usize,
    pub tool_name: String,
    pub purpose: String,
    pub parameters: Map<String, Value>,
    pub output: Envelope,
    pub execution_time_ms: u64,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 计划整体状态（优劣：success > partial > error）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Pending,
    Success,
    Partial,
    Error,
}

/// 一次请求独占的执行计划
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub id: String,
    pub query: String,
    pub steps: Vec<PlanStep>,
    pub results: Vec<ExecutionStep>,
    pub status: PlanStatus,
}

impl ExecutionPlan {
    pub fn new(query: impl Into<String>, steps: Vec<PlanStep>) -> Self {
        Self {
            id: format!("plan_{}", uuid::Uuid::new_v4()),
            query: query.into(),
            steps,
            results: Vec::new(),
            status: PlanStatus::Pending,
        }
    }
}

/// `execute()` 的返回值
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub final_output: String,
    pub steps: Vec<ExecutionStep>,
    pub step_count: usize,
    pub error_count: usize,
    pub mode: Mode,
    pub status: PlanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl ExecutionResult {
    pub fn chat(reply: String, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            final_output: reply,
            steps: Vec::new(),
            step_count: 0,
            error_count: 0,
            mode: Mode::Chat,
            status: PlanStatus::Success,
            error: None,
            execution_time_ms,
        }
    }

    /// 任务在执行任何工具前失败（无法规划 / 依赖图非法）
    pub fn aborted(final_output: String, error: String, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            final_output,
            steps: Vec::new(),
            step_count: 0,
            error_count: 0,
            mode: Mode::Task,
            status: PlanStatus::Error,
            error: Some(error),
            execution_time_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plan_step_deserializes_both_path_spellings() {
        let camel: PlanStep = serde_json::from_value(json!({
            "tool": "image_scaler",
            "dependencies": [0],
            "outputPath": "data.primary"
        }))
        .unwrap();
        let snake: PlanStep = serde_json::from_value(json!({
            "tool": "image_scaler",
            "dependencies": [0],
            "output_path": "data.primary"
        }))
        .unwrap();
        assert_eq!(camel, snake);
        assert!(camel.parameters.is_empty());
    }

    #[test]
    fn test_effective_output_path_defaults() {
        assert_eq!(PlanStep::new("t").effective_output_path(), "data.primary");
        assert_eq!(
            PlanStep::new("t").output_path("message").effective_output_path(),
            "message"
        );
        assert_eq!(
            PlanStep::new("t").output_path("  ").effective_output_path(),
            "data.primary"
        );
    }
}
