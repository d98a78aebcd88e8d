pub mod agent;
pub mod config;
pub mod error;
pub mod mcp;
pub mod providers;
pub mod traits;

pub use agent::{AgentLoop, ContextBuilder, Decision, History, ReflectionGate, ToolRegistry};
pub use config::*;
pub use error::*;
pub use mcp::{McpClient, ServerLaunch};
pub use providers::*;
pub use traits::*;
