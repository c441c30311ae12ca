//! 编排引擎错误类型
//!
//! 与执行流程各阶段一一对应：分类失败在本地恢复；规划 / 依赖解析失败在任何工具运行前终止任务；
//! 参数校验失败只影响当前步骤；工具未找到 / 执行失败 / 超时被捕获进错误 Envelope，不向调用方抛出。

use thiserror::Error;

/// 编排过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// 模式分类失败（总是本地恢复为兜底标签）
    #[error("Classification failed: {0}")]
    Classification(String),

    /// 无法生成执行计划（空计划或模型输出不合法）
    #[error("Could not plan: {0}")]
    PlanGeneration(String),

    /// 依赖图存在环、前向引用或越界索引
    #[error("Dependency resolution failed: {0}")]
    DependencyResolution(String),

    /// 一次修复之后仍无法满足 schema 的必填参数
    #[error("Parameter validation failed for {tool}: missing required {missing:?}")]
    Validation { tool: String, missing: Vec<String> },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// 工具调用超时（毫秒）
    #[error("Tool timeout: {tool} after {ms}ms")]
    Timeout { tool: String, ms: u64 },

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl EngineError {
    /// 错误码，随错误 Envelope 一起返回给调用方
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Classification(_) => "CLASSIFICATION_FAILURE",
            EngineError::PlanGeneration(_) => "PLAN_GENERATION_ERROR",
            EngineError::DependencyResolution(_) => "DEPENDENCY_RESOLUTION_ERROR",
            EngineError::Validation { .. } => "VALIDATION_ERROR",
            EngineError::ToolNotFound(_) => "TOOL_NOT_FOUND",
            EngineError::ToolExecution(_) => "TOOL_EXECUTION_ERROR",
            EngineError::Timeout { .. } => "TIMEOUT_ERROR",
            EngineError::Llm(_) => "LLM_ERROR",
            EngineError::Config(_) => "CONFIG_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_lists_missing() {
        let err = EngineError::Validation {
            tool: "image_scaler".to_string(),
            missing: vec!["image_path".to_string()],
        };
        let text = err.to_string();
        assert!(text.contains("image_scaler"));
        assert!(text.contains("image_path"));
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_tool_not_found_message() {
        let err = EngineError::ToolNotFound("ghost".to_string());
        assert_eq!(err.to_string(), "Tool not found: ghost");
    }
}
