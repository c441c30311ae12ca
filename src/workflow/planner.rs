//! 计划生成
//!
//! 一次结构化请求：把工具目录（含 inputSchema / outputSchema）、计划格式的 JSON Schema、
//! 调用方上下文与非敏感环境提示拼进 prompt，解析模型返回的 `{"steps": [...]}`。
//! 返回前做整体校验：工具必须在目录中、依赖只能指向更早的步骤；不合法的计划整体丢弃，不做部分接受。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::core::EngineError;
use crate::llm::{extract_json_block, LlmClient};
use crate::tools::ToolDescriptor;
use crate::workflow::aligner::format_env_hints;
use crate::workflow::types::PlanStep;

/// 计划格式（仅用于生成 Schema 注入 prompt）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct PlanFormat {
    /// 按执行顺序排列的步骤
    steps: Vec<StepFormat>,
}

#[allow(dead_code)]
#[derive(JsonSchema)]
#[serde(rename_all = "camelCase")]
struct StepFormat {
    /// 工具名，必须是目录中的某个 name
    tool: String,
    /// 这一步要做什么（给人看）
    purpose: String,
    /// 依赖的更早步骤的索引（从 0 开始）
    dependencies: Vec<usize>,
    /// 严格按工具 inputSchema 的参数名与类型填写
    parameters: Map<String, Value>,
    /// 从依赖步骤结果中取值的路径，通常为 "data.primary"
    output_path: Option<String>,
}

/// 计划格式的 JSON Schema 字符串
pub fn plan_schema_json() -> String {
    let schema = schema_for!(PlanFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

#[derive(Deserialize)]
struct PlanReply {
    #[serde(default)]
    steps: Vec<PlanStep>,
}

const PLAN_PROMPT: &str = r#"You are a task planner. Build an execution plan for the user's request using ONLY the tools listed below.

[Caller context]
{context}

[Available tools (JSON, with exact input and output schemas)]
{tools}
{env}
[User request]
{query}

Rules:
1. Every tool's output is normalised to {"status", "data": {"primary", "secondary"}, "message"}; the main result is always at data.primary.
2. A step that consumes an earlier step's result lists that step's index in "dependencies" and sets "outputPath" (normally "data.primary").
3. Dependencies may only point to earlier steps.
4. Use exactly the parameter names and types from each tool's inputSchema and fill every required parameter you can.
5. You may reference an earlier result inside a parameter value as "$step_N.output" or "$step_N.output.data.primary".
6. Keep the plan minimal; a single step is fine for simple requests.

Reply with ONE JSON object matching this schema, no explanation:
{schema}"#;

/// 计划生成器
pub struct PlanGenerator {
    llm: Option<Arc<dyn LlmClient>>,
    env_hints: HashMap<String, String>,
    max_tokens: u32,
}

impl PlanGenerator {
    pub fn new(
        llm: Option<Arc<dyn LlmClient>>,
        env_hints: HashMap<String, String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            llm,
            env_hints,
            max_tokens,
        }
    }

    /// 生成并校验计划；任何失败都返回空列表
    pub async fn generate(
        &self,
        query: &str,
        catalog: &[ToolDescriptor],
        context: &Map<String, Value>,
    ) -> Vec<PlanStep> {
        match self.plan(query, catalog, context).await {
            Ok(steps) => steps,
            Err(e) => {
                tracing::warn!(error = %e, "plan generation failed");
                Vec::new()
            }
        }
    }

    /// 同 generate，但保留失败原因
    pub async fn plan(
        &self,
        query: &str,
        catalog: &[ToolDescriptor],
        context: &Map<String, Value>,
    ) -> Result<Vec<PlanStep>, EngineError> {
        let llm = self
            .llm
            .as_ref()
            .ok_or_else(|| EngineError::PlanGeneration("no language model available".to_string()))?;
        if catalog.is_empty() {
            return Err(EngineError::PlanGeneration("tool catalog is empty".to_string()));
        }

        let prompt = self.build_prompt(query, catalog, context);
        let reply = llm
            .generate(&prompt, self.max_tokens, 0.2)
            .await
            .map_err(EngineError::Llm)?;

        let steps = parse_plan(&reply)?;
        validate_plan(&steps, catalog)?;
        tracing::info!(steps = steps.len(), "plan generated");
        Ok(steps)
    }

    pub fn build_prompt(
        &self,
        query: &str,
        catalog: &[ToolDescriptor],
        context: &Map<String, Value>,
    ) -> String {
        let tools = serde_json::to_string_pretty(catalog).unwrap_or_else(|_| "[]".to_string());
        let context = serde_json::to_string_pretty(&Value::Object(context.clone()))
            .unwrap_or_else(|_| "{}".to_string());

        PLAN_PROMPT
            .replace("{context}", &context)
            .replace("{tools}", &tools)
            .replace("{env}", &format_env_hints(&self.env_hints))
            .replace("{schema}", &plan_schema_json())
            .replace("{query}", query.trim())
    }
}

/// 解析模型回复：容忍 ```json 代码块与前后说明文字
pub fn parse_plan(reply: &str) -> Result<Vec<PlanStep>, EngineError> {
    let block = extract_json_block(reply)
        .ok_or_else(|| EngineError::PlanGeneration("reply contains no JSON object".to_string()))?;
    let parsed: PlanReply = serde_json::from_str(block)
        .map_err(|e| EngineError::PlanGeneration(format!("malformed plan JSON: {}", e)))?;
    Ok(parsed.steps)
}

/// 校验计划：非空、工具存在、依赖只指向更早步骤
pub fn validate_plan(steps: &[PlanStep], catalog: &[ToolDescriptor]) -> Result<(), EngineError> {
    if steps.is_empty() {
        return Err(EngineError::PlanGeneration("plan has no steps".to_string()));
    }
    let known: HashSet<&str> = catalog.iter().map(|d| d.name.as_str()).collect();
    for (index, step) in steps.iter().enumerate() {
        if !known.contains(step.tool.as_str()) {
            return Err(EngineError::PlanGeneration(format!(
                "step {} uses unknown tool '{}'",
                index, step.tool
            )));
        }
        if let Some(dep) = step.dependencies.iter().find(|&&d| d >= index) {
            return Err(EngineError::PlanGeneration(format!(
                "step {} has invalid dependency {}",
                index, dep
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use serde_json::json;

    fn catalog() -> Vec<ToolDescriptor> {
        ["image_rotator", "image_scaler"]
            .iter()
            .map(|name| ToolDescriptor {
                name: name.to_string(),
                description: format!("{} tool", name),
                input_schema: json!({
                    "type": "object",
                    "properties": {"image_path": {"type": "string"}},
                    "required": ["image_path"]
                }),
                output_schema: Some(json!({"type": "string"})),
            })
            .collect()
    }

    const TWO_STEP_PLAN: &str = r#"Sure, here is the plan:
```json
{"steps": [
  {"tool": "image_rotator", "purpose": "rotate", "dependencies": [], "parameters": {"image_path": "/in.png", "angle": 90}},
  {"tool": "image_scaler", "purpose": "scale", "dependencies": [0], "parameters": {}, "output_path": "data.primary"}
]}
```"#;

    #[test]
    fn test_parse_fenced_plan() {
        let steps = parse_plan(TWO_STEP_PLAN).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].dependencies, vec![0]);
        assert_eq!(steps[1].output_path.as_deref(), Some("data.primary"));
        assert!(validate_plan(&steps, &catalog()).is_ok());
    }

    #[test]
    fn test_unknown_tool_rejects_whole_plan() {
        let steps = vec![PlanStep::new("image_rotator"), PlanStep::new("teleporter")];
        let err = validate_plan(&steps, &catalog()).unwrap_err();
        assert!(err.to_string().contains("teleporter"));
    }

    #[test]
    fn test_forward_dependency_rejected() {
        let steps = vec![
            PlanStep::new("image_rotator").depends_on([1]),
            PlanStep::new("image_scaler"),
        ];
        assert!(validate_plan(&steps, &catalog()).is_err());
        assert!(validate_plan(&[], &catalog()).is_err());
    }

    #[test]
    fn test_plan_schema_mentions_fields() {
        let schema = plan_schema_json();
        assert!(schema.contains("steps"));
        assert!(schema.contains("outputPath"));
        assert!(schema.contains("dependencies"));
    }

    #[tokio::test]
    async fn test_generate_embeds_catalog_and_context() {
        let mock = Arc::new(MockLlmClient::with_replies([TWO_STEP_PLAN]));
        let mut hints = HashMap::new();
        hints.insert("MINIO_ENDPOINT".to_string(), "localhost:9000".to_string());
        let planner = PlanGenerator::new(Some(mock.clone()), hints, 2000);

        let mut context = Map::new();
        context.insert("user".to_string(), json!("alice"));
        let steps = planner
            .generate("rotate then scale an image", &catalog(), &context)
            .await;
        assert_eq!(steps.len(), 2);

        let prompt = &mock.prompts()[0];
        assert!(prompt.contains("inputSchema"));
        assert!(prompt.contains("image_scaler"));
        assert!(prompt.contains("alice"));
        assert!(prompt.contains("MINIO_ENDPOINT = localhost:9000"));
    }

    #[tokio::test]
    async fn test_generate_failures_yield_empty_plan() {
        let planner = PlanGenerator::new(None, HashMap::new(), 2000);
        assert!(planner.generate("anything", &catalog(), &Map::new()).await.is_empty());

        let mock = Arc::new(MockLlmClient::with_replies(["I cannot help with that."]));
        let planner = PlanGenerator::new(Some(mock), HashMap::new(), 2000);
        assert!(planner.generate("anything", &catalog(), &Map::new()).await.is_empty());
    }
}
