//! 编排引擎
//!
//! `execute(query, context)` 是唯一入口：分类 -> 闲聊回复，或 规划 -> 依赖校验 -> 逐步（注入 -> 对齐 -> 执行）-> 聚合。
//! 每个请求独占自己的 ExecutionPlan，步骤严格按已校验的升序索引串行执行；
//! 某步失败只跳过（直接或间接）依赖它的步骤，互不相关的后续步骤照常执行。

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value};

use crate::core::EngineError;
use crate::intent::ClassifierChain;
use crate::tools::{Envelope, ToolExecutor, ToolSource};
use crate::workflow::aggregator::ResultAggregator;
use crate::workflow::aligner::SchemaAligner;
use crate::workflow::chat::ChatResponder;
use crate::workflow::events::{EngineEvent, EventBus, EventKind};
use crate::workflow::graph::DependencyGraph;
use crate::workflow::planner::PlanGenerator;
use crate::workflow::resolver::{resolve_parameters, EXTRACTED_VALUES_KEY};
use crate::workflow::types::{
    ExecutionPlan, ExecutionResult, ExecutionStep, Mode, PlanStatus, PlanStep, StepStatus,
};

/// 编排引擎（由 EngineBuilder 组装）
pub struct TaskEngine {
    pub(crate) classifier: ClassifierChain,
    pub(crate) chat: ChatResponder,
    pub(crate) planner: PlanGenerator,
    pub(crate) aligner: SchemaAligner,
    pub(crate) aggregator: ResultAggregator,
    pub(crate) executor: ToolExecutor,
    pub(crate) tools: Arc<dyn ToolSource>,
    pub(crate) events: EventBus,
}

impl TaskEngine {
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// 处理一条请求；总是返回结果，不向调用方抛错
    pub async fn execute(&self, query: &str, context: &Map<String, Value>) -> ExecutionResult {
        let start = Instant::now();
        let request_id = new_request_id();

        let mode = self.classifier.classify(query).await;
        tracing::info!(request = %request_id, mode = mode.as_str(), "request classified");
        self.events.publish(&request_id, EventKind::ModeDetected { mode });

        if mode == Mode::Chat {
            let reply = self.chat.reply(query).await;
            self.events.publish(
                &request_id,
                EventKind::PlanCompleted {
                    status: PlanStatus::Success,
                    final_output: reply.clone(),
                },
            );
            return ExecutionResult::chat(reply, elapsed_ms(start));
        }

        self.events.publish(
            &request_id,
            EventKind::PlanningStarted {
                query: query.to_string(),
            },
        );
        let catalog = self.tools.list_tools();
        let steps = match self.planner.plan(query, &catalog, context).await {
            Ok(steps) => steps,
            Err(e) => {
                tracing::warn!(request = %request_id, error = %e, "could not plan");
                return self.abort(
                    &request_id,
                    "Sorry, I could not work out a plan for this request.",
                    e,
                    start,
                );
            }
        };

        self.run_plan(&request_id, query, steps, start).await
    }

    /// 执行外部给定的计划：做依赖图校验，但不校验工具目录（未知工具在对应步骤报 ToolNotFound）
    pub async fn execute_plan(&self, query: &str, steps: Vec<PlanStep>) -> ExecutionResult {
        let start = Instant::now();
        let request_id = new_request_id();
        if steps.is_empty() {
            let err = EngineError::PlanGeneration("plan has no steps".to_string());
            return self.abort(&request_id, "Nothing to execute.", err, start);
        }
        self.run_plan(&request_id, query, steps, start).await
    }

    async fn run_plan(
        &self,
        request_id: &str,
        query: &str,
        steps: Vec<PlanStep>,
        start: Instant,
    ) -> ExecutionResult {
        let graph = match DependencyGraph::build(&steps) {
            Ok(graph) => graph,
            Err(e) => {
                tracing::warn!(request = %request_id, error = %e, "plan rejected before execution");
                return self.abort(request_id, "The plan was rejected and nothing was run.", e, start);
            }
        };

        let mut plan = ExecutionPlan::new(query, steps);
        let total = plan.steps.len();
        let mut skipped: BTreeSet<usize> = BTreeSet::new();
        tracing::info!(request = %request_id, plan = %plan.id, steps = total, "executing plan");

        for index in 0..total {
            let step = &plan.steps[index];
            // 被跳过的步骤不派发，只发 step-completed(skipped)
            let record = if skipped.contains(&index) {
                skip_step(index, step, &plan.results)
            } else {
                self.events.publish(
                    request_id,
                    EventKind::StepStarted {
                        index,
                        tool: step.tool.clone(),
                        purpose: step.purpose.clone(),
                        total,
                    },
                );
                self.run_step(index, step, &plan.results).await
            };

            if record.status.is_failure() {
                tracing::warn!(step = index, tool = %record.tool_name, status = ?record.status, "step did not succeed");
                skipped.extend(graph.dependents_of(index));
            }
            self.events.publish(
                request_id,
                EventKind::StepCompleted {
                    index,
                    tool: record.tool_name.clone(),
                    status: record.status,
                    elapsed_ms: record.execution_time_ms,
                },
            );
            plan.results.push(record);
        }

        let aggregation = self.aggregator.aggregate(query, &plan.results).await;
        plan.status = aggregation.status;
        self.events.publish(
            request_id,
            EventKind::PlanCompleted {
                status: plan.status,
                final_output: aggregation.final_output.clone(),
            },
        );

        let error_count = plan.results.iter().filter(|r| r.status.is_failure()).count();
        let error = (plan.status == PlanStatus::Error)
            .then(|| plan.results.iter().find_map(|r| r.error.clone()))
            .flatten();
        tracing::info!(request = %request_id, plan = %plan.id, status = ?plan.status, errors = error_count, "plan finished");

        ExecutionResult {
            success: plan.status == PlanStatus::Success,
            final_output: aggregation.final_output,
            step_count: plan.results.len(),
            steps: plan.results,
            error_count,
            mode: Mode::Task,
            status: plan.status,
            error,
            execution_time_ms: elapsed_ms(start),
        }
    }

    /// 注入 -> 对齐 -> 执行；对齐失败时工具不会被调用
    async fn run_step(
        &self,
        index: usize,
        step: &PlanStep,
        completed: &[ExecutionStep],
    ) -> ExecutionStep {
        let descriptor = self.tools.descriptor(&step.tool);
        let injected = resolve_parameters(step, completed, descriptor.as_ref());

        match self.aligner.align(descriptor.as_ref(), injected.clone()).await {
            Ok(params) => {
                let (output, elapsed) = self.executor.execute(&step.tool, params.clone()).await;
                let status = if output.is_success() {
                    StepStatus::Success
                } else {
                    StepStatus::Error
                };
                ExecutionStep {
                    step_index: index,
                    tool_name: step.tool.clone(),
                    purpose: step.purpose.clone(),
                    parameters: params,
                    error: output.error.clone(),
                    output,
                    execution_time_ms: elapsed.as_millis() as u64,
                    status,
                }
            }
            Err(e) => {
                tracing::warn!(step = index, tool = %step.tool, error = %e, "parameters not satisfiable, tool not invoked");
                let mut params = injected;
                params.remove(EXTRACTED_VALUES_KEY);
                failed_step(index, step, params, &e, StepStatus::Error)
            }
        }
    }

    fn abort(
        &self,
        request_id: &str,
        message: &str,
        err: EngineError,
        start: Instant,
    ) -> ExecutionResult {
        self.events.publish(
            request_id,
            EventKind::Error {
                message: err.to_string(),
            },
        );
        self.events.publish(
            request_id,
            EventKind::PlanCompleted {
                status: PlanStatus::Error,
                final_output: message.to_string(),
            },
        );
        ExecutionResult::aborted(message.to_string(), err.to_string(), elapsed_ms(start))
    }
}

/// 依赖失败：记录跳过，工具不调用
fn skip_step(index: usize, step: &PlanStep, completed: &[ExecutionStep]) -> ExecutionStep {
    let blocker = step
        .dependencies
        .iter()
        .copied()
        .find(|dep| {
            completed
                .iter()
                .any(|r| r.step_index == *dep && r.status.is_failure())
        })
        .map(|dep| format!("step {} did not complete", dep))
        .unwrap_or_else(|| "an upstream step did not complete".to_string());
    let err = EngineError::DependencyResolution(format!("step {} skipped: {}", index, blocker));
    failed_step(index, step, step.parameters.clone(), &err, StepStatus::Skipped)
}

fn failed_step(
    index: usize,
    step: &PlanStep,
    params: Map<String, Value>,
    err: &EngineError,
    status: StepStatus,
) -> ExecutionStep {
    ExecutionStep {
        step_index: index,
        tool_name: step.tool.clone(),
        purpose: step.purpose.clone(),
        output: Envelope::from_error(&step.tool, &params, err),
        parameters: params,
        execution_time_ms: 0,
        status,
        error: Some(err.to_string()),
    }
}

fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4())
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
