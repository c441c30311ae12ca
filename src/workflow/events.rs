//! 引擎进度事件：传输层（SSE / WebSocket 适配器）订阅后自行转发
//!
//! 发布即忘：没有订阅者或订阅者落后时事件被丢弃，不影响执行。

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::workflow::types::{Mode, PlanStatus, StepStatus};

/// 事件内容（序列化为 `{"type": "step-started", ...}`）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EventKind {
    /// 分类结果
    ModeDetected { mode: Mode },
    PlanningStarted { query: String },
    /// 开始执行第 index 步（共 total 步）
    #[serde(rename_all = "camelCase")]
    StepStarted {
        index: usize,
        tool: String,
        purpose: String,
        total: usize,
    },
    #[serde(rename_all = "camelCase")]
    StepCompleted {
        index: usize,
        tool: String,
        status: StepStatus,
        elapsed_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    PlanCompleted {
        status: PlanStatus,
        final_output: String,
    },
    Error { message: String },
}

/// 带请求标识与时间戳的事件
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineEvent {
    /// 同一次 execute() 的事件共享此 id，并发请求据此区分
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl EngineEvent {
    pub fn new(request_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            request_id: request_id.into(),
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// 事件总线（tokio broadcast）
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// 发布事件；返回收到事件的订阅者数量
    pub fn publish(&self, request_id: &str, kind: EventKind) -> usize {
        self.sender
            .send(EngineEvent::new(request_id, kind))
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
