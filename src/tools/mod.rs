pub mod echo;
pub mod envelope;
pub mod executor;
pub mod registry;

pub use echo::EchoTool;
pub use envelope::{Envelope, EnvelopeData, EnvelopeMetadata, EnvelopeStatus};
pub use executor::ToolExecutor;
pub use registry::{Tool, ToolDescriptor, ToolRegistry, ToolSource};
