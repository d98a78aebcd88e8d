pub mod context;
pub mod decision;
pub mod history;
pub mod loop_;
pub mod reflection;
pub mod registry;

#[cfg(test)]
pub(crate) mod test_support;

pub use context::ContextBuilder;
pub use decision::{BatchItem, Decision, ToolCall};
pub use history::History;
pub use loop_::{AgentLoop, LoopState, TurnEnd, TurnOutcome};
pub use reflection::ReflectionGate;
pub use registry::ToolRegistry;
