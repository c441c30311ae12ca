//! Hive - 自然语言任务编排引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与引擎构建器
//! - **intent**: 模式分类（闲聊 / 任务）责任链
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **observability**: tracing 初始化
//! - **tools**: 工具 trait、注册表、Envelope 规范化与执行器
//! - **workflow**: 计划生成、依赖解析、参数对齐、执行与聚合

pub mod config;
pub mod core;
pub mod intent;
pub mod llm;
pub mod observability;
pub mod tools;
pub mod workflow;

pub use crate::core::{EngineBuilder, EngineError};
pub use crate::workflow::{ExecutionResult, TaskEngine};
