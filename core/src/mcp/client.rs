use super::ServerLaunch;
use super::transport::{JsonRpcRequest, StdioTransport};
use crate::traits::{ToolProvider, ToolSpec};
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub server_info: ServerInfo,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

impl From<McpToolInfo> for ToolSpec {
    fn from(info: McpToolInfo) -> Self {
        ToolSpec {
            name: info.name,
            description: info.description.unwrap_or_default(),
            parameters_schema: info.input_schema,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListToolsResult {
    tools: Vec<McpToolInfo>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ToolResultContent>,
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Text of the first text item, or the whole result as JSON.
    pub fn into_text(self) -> String {
        if let Some(text) = self.content.iter().find_map(|c| c.text.clone()) {
            return text;
        }
        serde_json::to_string(&self).unwrap_or_default()
    }
}

/// Client for a tool server speaking the Model Context Protocol over stdio.
pub struct McpClient {
    transport: StdioTransport,
    request_id: AtomicU64,
    timeout: Duration,
    server_info: Option<ServerInfo>,
}

impl McpClient {
    pub fn new(transport: StdioTransport, timeout: Duration) -> Self {
        Self {
            transport,
            request_id: AtomicU64::new(1),
            timeout,
            server_info: None,
        }
    }

    /// Launch the server process and complete the initialize handshake.
    pub async fn connect(launch: &ServerLaunch, timeout: Duration) -> Result<Self> {
        let transport = StdioTransport::spawn(&launch.command, &launch.args)?;
        let mut client = Self::new(transport, timeout);

        if let Err(e) = client.initialize().await {
            let _ = client.transport.close().await;
            return Err(e);
        }

        Ok(client)
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn request<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T> {
        let request = JsonRpcRequest::new(self.next_id(), method, params);

        let response = tokio::time::timeout(self.timeout, self.transport.send_request(request))
            .await
            .map_err(|_| anyhow!("'{}' timed out after {:?}", method, self.timeout))??;

        if let Some(error) = response.error {
            bail!("{}", error);
        }

        let result = response.result.context("response missing result")?;
        serde_json::from_value(result).with_context(|| format!("Failed to parse '{}' result", method))
    }

    pub async fn initialize(&mut self) -> Result<InitializeResult> {
        let params = serde_json::json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "tinker",
                "version": env!("CARGO_PKG_VERSION"),
            }
        });

        let result: InitializeResult = self
            .request("initialize", Some(params))
            .await
            .context("Failed to initialize tool server")?;

        self.transport
            .send_notification("notifications/initialized", None)
            .await?;

        info!(
            server = %result.server_info.name,
            protocol = %result.protocol_version,
            "tool server initialized"
        );
        self.server_info = Some(result.server_info.clone());

        Ok(result)
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }
}

#[async_trait]
impl ToolProvider for McpClient {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor
                .as_ref()
                .map(|c| serde_json::json!({ "cursor": c }));

            let result: ListToolsResult = self
                .request("tools/list", params)
                .await
                .context("Failed to list tools")?;

            tools.extend(result.tools.into_iter().map(ToolSpec::from));

            match result.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(tools)
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<String> {
        debug!(tool = %name, "calling tool server");
        let params = serde_json::json!({
            "name": name,
            "arguments": args,
        });

        let result: CallToolResult = self.request("tools/call", Some(params)).await?;

        if result.is_error {
            bail!("{}", result.into_text());
        }
        Ok(result.into_text())
    }

    async fn shutdown(&self) -> Result<()> {
        self.transport.close().await
    }
}
