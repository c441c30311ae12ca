//! 工具执行器
//!
//! 持有 ToolSource 与全局超时，execute(tool_name, params) 在超时内调用工具；
//! 未找到 / 失败 / 超时 / panic 都被捕获进错误 Envelope，不向调用方传播。
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::time::timeout;

use crate::core::EngineError;
use crate::tools::{Envelope, ToolSource};

/// 工具执行器：对每次调用施加超时，并把任意原生输出规范化为 Envelope
pub struct ToolExecutor {
    tools: Arc<dyn ToolSource>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(tools: Arc<dyn ToolSource>, timeout_secs: u64) -> Self {
        Self {
            tools,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 以毫秒级超时构造（测试用）
    pub fn with_timeout(tools: Arc<dyn ToolSource>, timeout: Duration) -> Self {
        Self { tools, timeout }
    }

    /// 执行指定工具，返回 Envelope 与耗时
    pub async fn execute(&self, tool_name: &str, params: Map<String, Value>) -> (Envelope, Duration) {
        let start = Instant::now();
        let args_preview = args_preview(&params);

        let Some(tool) = self.tools.get_tool(tool_name) else {
            let err = EngineError::ToolNotFound(tool_name.to_string());
            tracing::warn!(tool = %tool_name, "tool not found in registry");
            return (Envelope::from_error(tool_name, &params, &err), start.elapsed());
        };

        // 在独立任务中运行，工具 panic 时也只影响本步骤
        let call_params = params.clone();
        let mut handle = tokio::spawn(async move { tool.invoke(call_params).await });
        let outcome = match timeout(self.timeout, &mut handle).await {
            Ok(Ok(Ok(native))) => Ok(native),
            Ok(Ok(Err(e))) => Err(EngineError::ToolExecution(e)),
            Ok(Err(join_err)) => Err(EngineError::ToolExecution(format!(
                "tool task aborted: {}",
                join_err
            ))),
            Err(_) => {
                handle.abort();
                Err(EngineError::Timeout {
                    tool: tool_name.to_string(),
                    ms: self.timeout.as_millis() as u64,
                })
            }
        };

        let envelope = match &outcome {
            Ok(native) => Envelope::normalize(tool_name, &params, native.clone()),
            Err(err) => Envelope::from_error(tool_name, &params, err),
        };

        let outcome_label = match &outcome {
            Ok(_) if envelope.is_success() => "ok",
            Ok(_) => "tool_error",
            Err(EngineError::Timeout { .. }) => "timeout",
            Err(_) => "error",
        };
        let elapsed = start.elapsed();
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": envelope.is_success(),
            "outcome": outcome_label,
            "duration_ms": elapsed.as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        (envelope, elapsed)
    }
}

fn args_preview(args: &Map<String, Value>) -> String {
    let s = Value::Object(args.clone()).to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{EchoTool, EnvelopeStatus, Tool, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::json;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        async fn invoke(&self, _params: Map<String, Value>) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!("late"))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "failing"
        }

        fn description(&self) -> &str {
            "always fails"
        }

        async fn invoke(&self, _params: Map<String, Value>) -> Result<Value, String> {
            Err("boom".to_string())
        }
    }

    fn executor(timeout: Duration) -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(SlowTool);
        registry.register(FailingTool);
        ToolExecutor::with_timeout(Arc::new(registry), timeout)
    }

    fn text(s: &str) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("text".to_string(), json!(s));
        m
    }

    #[tokio::test]
    async fn test_success_is_normalized() {
        let (env, _) = executor(Duration::from_secs(1)).execute("echo", text("hi")).await;
        assert_eq!(env.status, EnvelopeStatus::Success);
        assert_eq!(env.data.primary, json!("hi"));
        assert_eq!(env.metadata.tool_name, "echo");
    }

    #[tokio::test]
    async fn test_unknown_tool_gives_error_envelope() {
        let (env, _) = executor(Duration::from_secs(1)).execute("ghost", Map::new()).await;
        assert_eq!(env.status, EnvelopeStatus::Error);
        assert!(env.error.unwrap().to_lowercase().contains("tool not found"));
    }

    #[tokio::test]
    async fn test_tool_error_is_captured() {
        let (env, _) = executor(Duration::from_secs(1)).execute("failing", Map::new()).await;
        assert_eq!(env.status, EnvelopeStatus::Error);
        assert!(env.error.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_timeout_is_captured() {
        let (env, elapsed) = executor(Duration::from_millis(50)).execute("slow", Map::new()).await;
        assert_eq!(env.status, EnvelopeStatus::Error);
        assert_eq!(env.message, "TIMEOUT_ERROR");
        assert!(env.error.unwrap().contains("after 50ms"));
        assert!(elapsed < Duration::from_secs(5));
    }
}
