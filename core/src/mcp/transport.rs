//! Newline-delimited JSON-RPC 2.0 over a child process's stdio.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// Server output plus the bytes of a line not yet terminated. The buffer
/// outlives a cancelled read so a timed-out request does not split a line.
struct LineReader {
    inner: BufReader<ChildStdout>,
    pending: Vec<u8>,
}

pub struct StdioTransport {
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<LineReader>,
    child: Mutex<Child>,
    connected: AtomicBool,
}

impl StdioTransport {
    pub fn new(mut child: Child) -> Result<Self> {
        let stdin = child
            .stdin
            .take()
            .context("Failed to capture stdin of tool server")?;
        let stdout = child
            .stdout
            .take()
            .context("Failed to capture stdout of tool server")?;

        Ok(Self {
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(LineReader {
                inner: BufReader::new(stdout),
                pending: Vec::new(),
            }),
            child: Mutex::new(child),
            connected: AtomicBool::new(true),
        })
    }

    /// Spawn `command args...` with piped stdio. The child is killed if the
    /// transport is dropped without [`StdioTransport::close`].
    pub fn spawn(command: &str, args: &[String]) -> Result<Self> {
        let child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn tool server: {} {}", command, args.join(" ")))?;

        Self::new(child)
    }

    async fn read_message(&self, reader: &mut LineReader) -> Result<Value> {
        loop {
            // `read_until` keeps partial input in `pending` if this future is dropped.
            let read = reader
                .inner
                .read_until(b'\n', &mut reader.pending)
                .await
                .context("Failed to read from tool server")?;

            if read == 0 {
                self.connected.store(false, Ordering::SeqCst);
                bail!("Tool server closed connection");
            }

            let line = std::mem::take(&mut reader.pending);
            if line.trim_ascii().is_empty() {
                continue;
            }

            return serde_json::from_slice(&line).context("Failed to parse JSON from tool server");
        }
    }

    async fn write_message(&self, value: &Value) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        let json = serde_json::to_string(value)?;

        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;

        Ok(())
    }

    pub async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        if !self.is_connected() {
            bail!("Tool server is not connected");
        }

        let request_id = request.id;
        // Hold the reader for the whole exchange so replies pair with requests.
        let mut stdout = self.stdout.lock().await;
        self.write_message(&serde_json::to_value(&request)?).await?;

        loop {
            let value = self.read_message(&mut stdout).await?;

            if value.get("id").is_none() {
                debug!(method = ?value.get("method"), "skipping server notification");
                continue;
            }

            let response: JsonRpcResponse =
                serde_json::from_value(value).context("Failed to parse JSON-RPC response")?;

            if response.id == Some(request_id) {
                return Ok(response);
            }
            // Errors the server could not tie to a request carry a null id.
            if response.id.is_none() && response.error.is_some() {
                return Ok(response);
            }
            debug!(expected = request_id, got = ?response.id, "discarding stale response");
        }
    }

    pub async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        let mut notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
        });
        if let Some(params) = params {
            notification["params"] = params;
        }

        self.write_message(&notification).await
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);

        let mut child = self.child.lock().await;
        if child.try_wait()?.is_none() {
            let _ = child.kill().await;
        }

        Ok(())
    }
}
