use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// An external process or service that advertises and runs tools.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolSpec>>;

    async fn call_tool(&self, name: &str, args: serde_json::Value) -> anyhow::Result<String>;

    /// Release the connection. Safe to call more than once.
    async fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
