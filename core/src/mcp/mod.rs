pub mod client;
pub mod transport;

pub use client::{McpClient, McpToolInfo, ServerInfo};
pub use transport::{JsonRpcRequest, JsonRpcResponse, StdioTransport};

use anyhow::{Result, bail};

/// Command line used to start a tool server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerLaunch {
    pub command: String,
    pub args: Vec<String>,
}

impl ServerLaunch {
    /// Resolve a user-facing target: `*.py` runs under `python`, `*.js` under
    /// `node`, anything else is split on whitespace and run as-is.
    pub fn from_target(target: &str, python: &str) -> Result<Self> {
        let target = target.trim();
        if target.is_empty() {
            bail!("Tool server target is empty");
        }

        if target.ends_with(".py") {
            return Ok(Self {
                command: python.to_string(),
                args: vec![target.to_string()],
            });
        }
        if target.ends_with(".js") {
            return Ok(Self {
                command: "node".to_string(),
                args: vec![target.to_string()],
            });
        }

        let mut parts = target.split_whitespace().map(str::to_string);
        match parts.next() {
            Some(command) => Ok(Self {
                command,
                args: parts.collect(),
            }),
            None => bail!("Tool server target is empty"),
        }
    }
}

impl std::fmt::Display for ServerLaunch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.command)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}
