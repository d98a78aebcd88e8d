pub mod provider;
pub mod tool;

pub use provider::{ChatMessage, ChatRequest, Provider, Role};
pub use tool::{ToolProvider, ToolSpec};
