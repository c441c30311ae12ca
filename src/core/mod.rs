//! 核心层：错误类型与引擎构建

pub mod builder;
pub mod error;

pub use builder::EngineBuilder;
pub use error::EngineError;
