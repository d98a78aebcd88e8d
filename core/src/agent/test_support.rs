//! Scripted collaborators for loop tests.

use crate::agent::ToolRegistry;
use crate::error::TransportError;
use crate::traits::{ChatMessage, ChatRequest, Provider, ToolProvider, ToolSpec};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub json_mode: bool,
}

/// Returns queued replies in order; once the queue is empty it repeats
/// `fallback`, or panics if there is none.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String, TransportError>>>,
    fallback: Option<String>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Result<String, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn texts(replies: &[&str]) -> Arc<Self> {
        Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn repeating(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: Some(reply.to_string()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, request: ChatRequest<'_>) -> Result<String, TransportError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(RecordedRequest {
                messages: request.messages.to_vec(),
                model: request.model.to_string(),
                json_mode: request.json_mode,
            });
            requests.len()
        };

        let next = self.replies.lock().unwrap().pop_front();
        match (next, &self.fallback) {
            (Some(reply), _) => reply,
            (None, Some(fallback)) => Ok(fallback.clone()),
            (None, None) => panic!("ScriptedProvider: no reply for call #{}", call),
        }
    }
}

/// Tool provider with fixed outputs. Tools named in `failing` return an error.
pub struct StubTools {
    specs: Vec<ToolSpec>,
    outputs: HashMap<String, String>,
    failing: Vec<String>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl StubTools {
    pub fn new(outputs: &[(&str, &str)]) -> Self {
        Self {
            specs: outputs
                .iter()
                .map(|(name, _)| ToolSpec {
                    name: name.to_string(),
                    description: format!("The {} tool", name),
                    parameters_schema: json!({"type": "object"}),
                })
                .collect(),
            outputs: outputs
                .iter()
                .map(|(name, out)| (name.to_string(), out.to_string()))
                .collect(),
            failing: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(mut self, name: &str) -> Self {
        self.failing.push(name.to_string());
        self
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_names(&self) -> Vec<String> {
        self.calls().into_iter().map(|(name, _)| name).collect()
    }
}

#[async_trait]
impl ToolProvider for StubTools {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolSpec>> {
        Ok(self.specs.clone())
    }

    async fn call_tool(&self, name: &str, args: Value) -> anyhow::Result<String> {
        self.calls.lock().unwrap().push((name.to_string(), args));
        if self.failing.iter().any(|f| f == name) {
            anyhow::bail!("{} is out of order", name);
        }
        self.outputs
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no output scripted for {}", name))
    }
}

pub async fn registry_for(tools: &Arc<StubTools>) -> Arc<ToolRegistry> {
    Arc::new(ToolRegistry::discover(tools.clone()).await.unwrap())
}
