pub mod aggregator;
pub mod aligner;
pub mod chat;
pub mod engine;
pub mod events;
pub mod graph;
pub mod planner;
pub mod resolver;
pub mod types;

pub use aggregator::{Aggregation, ResultAggregator};
pub use aligner::SchemaAligner;
pub use chat::ChatResponder;
pub use engine::TaskEngine;
pub use events::{EngineEvent, EventBus, EventKind};
pub use graph::{extract_path, DependencyGraph};
pub use planner::PlanGenerator;
pub use resolver::{resolve_parameters, EXTRACTED_VALUES_KEY};
pub use types::*;
