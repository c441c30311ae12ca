//! 引擎构建器：统一的 TaskEngine 初始化逻辑
//!
//! 配置、LLM 客户端与工具来源都作为显式依赖注入，没有进程级单例。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::intent::ClassifierChain;
use crate::llm::{create_llm_from_config, LlmClient};
use crate::tools::{ToolExecutor, ToolRegistry, ToolSource};
use crate::workflow::{
    ChatResponder, EventBus, PlanGenerator, ResultAggregator, SchemaAligner, TaskEngine,
};

/// 引擎构建器
pub struct EngineBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    llm_from_config: bool,
    tools: Option<Arc<dyn ToolSource>>,
    events: Option<EventBus>,
}

impl EngineBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            llm_from_config: true,
            tools: None,
            events: None,
        }
    }

    /// 显式指定 LLM（测试中传入 MockLlmClient）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self.llm_from_config = false;
        self
    }

    /// 不使用 LLM：所有阶段走确定性路径
    pub fn without_llm(mut self) -> Self {
        self.llm = None;
        self.llm_from_config = false;
        self
    }

    pub fn with_tools(mut self, tools: Arc<dyn ToolSource>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// 共享外部事件总线（多个引擎向同一通道发布）
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> TaskEngine {
        let engine_cfg = &self.config.engine;
        let tokens = &engine_cfg.tokens;

        let llm = if self.llm_from_config {
            create_llm_from_config(&self.config)
        } else {
            self.llm
        };
        let tools: Arc<dyn ToolSource> = self
            .tools
            .unwrap_or_else(|| Arc::new(ToolRegistry::new()));
        let env_hints = engine_cfg.collect_env_hints();
        let events = self
            .events
            .unwrap_or_else(|| EventBus::new(engine_cfg.event_capacity));

        tracing::info!(
            tools = tools.list_tools().len(),
            llm = llm.is_some(),
            tool_timeout_secs = engine_cfg.tool_timeout_secs,
            "task engine ready"
        );

        TaskEngine {
            classifier: ClassifierChain::standard(
                &engine_cfg.classifier,
                llm.clone(),
                tokens.classify,
            ),
            chat: ChatResponder::new(llm.clone(), tokens.chat),
            planner: PlanGenerator::new(llm.clone(), env_hints.clone(), tokens.plan),
            aligner: SchemaAligner::new(llm.clone(), env_hints, tokens.repair),
            aggregator: ResultAggregator::new(llm, tokens.summary),
            executor: ToolExecutor::new(tools.clone(), engine_cfg.tool_timeout_secs),
            tools,
            events,
        }
    }
}
