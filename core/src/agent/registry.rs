use crate::error::ToolError;
use crate::traits::{ToolProvider, ToolSpec};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_OUTPUT_LIMIT: usize = 1000;
pub const TRUNCATION_MARKER: &str = "... (truncated)";

/// Tools discovered from a [`ToolProvider`], keyed by name. Read-only once built.
pub struct ToolRegistry {
    provider: Arc<dyn ToolProvider>,
    tools: HashMap<String, ToolSpec>,
    output_limit: usize,
}

impl ToolRegistry {
    pub async fn discover(provider: Arc<dyn ToolProvider>) -> anyhow::Result<Self> {
        let specs = provider.list_tools().await?;
        let mut tools = HashMap::with_capacity(specs.len());
        for spec in specs {
            tools.insert(spec.name.clone(), spec);
        }

        info!(count = tools.len(), "discovered tools");

        Ok(Self {
            provider,
            tools,
            output_limit: DEFAULT_OUTPUT_LIMIT,
        })
    }

    pub fn with_output_limit(mut self, limit: usize) -> Self {
        self.output_limit = limit;
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tool descriptors, sorted by name.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().cloned().collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub async fn dispatch(
        &self,
        name: &str,
        args: serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, ToolError> {
        if !self.contains(name) {
            return Err(ToolError::Unknown(name.to_string()));
        }

        debug!(tool = %name, "dispatching tool");

        match self
            .provider
            .call_tool(name, serde_json::Value::Object(args))
            .await
        {
            Ok(output) => Ok(truncate_output(&output, self.output_limit)),
            Err(e) => {
                warn!(tool = %name, error = %e, "tool execution failed");
                Err(ToolError::Execution {
                    tool: name.to_string(),
                    message: format!("{:#}", e),
                })
            }
        }
    }
}

pub fn truncate_output(output: &str, limit: usize) -> String {
    if output.chars().count() <= limit {
        return output.to_string();
    }
    let kept: String = output.chars().take(limit).collect();
    format!("{}{}", kept, TRUNCATION_MARKER)
}
