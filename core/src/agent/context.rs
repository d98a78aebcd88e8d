use crate::agent::decision::{ToolCall, final_answer_wire};
use crate::agent::history::History;
use crate::traits::{ChatMessage, ToolSpec};
use std::fmt::Write;

pub const DEFAULT_PERSONA: &str = "You are a cheerful weekend helper. You can call tools.";

/// Builds the system prompt and the per-request message list.
pub struct ContextBuilder {
    pub persona: String,
    pub tool_specs: Vec<ToolSpec>,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self {
            persona: DEFAULT_PERSONA.to_string(),
            tool_specs: vec![],
        }
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    pub fn with_tool_specs(mut self, tool_specs: Vec<ToolSpec>) -> Self {
        self.tool_specs = tool_specs;
        self
    }

    pub fn build_system_prompt(&self) -> String {
        let parts = [
            self.persona.trim().to_string(),
            self.get_protocol_instructions(),
            self.get_tool_list(),
            self.get_runtime_context(),
        ];

        parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n---\n\n")
    }

    fn get_protocol_instructions(&self) -> String {
        let mut params = serde_json::Map::new();
        params.insert("param".into(), "value".into());
        let call = ToolCall::new("tool_name", params);
        let tool_a = ToolCall::new("tool_a", serde_json::Map::new());
        let tool_b = ToolCall::new("tool_b", serde_json::Map::new());

        let mut instructions = String::new();
        instructions.push_str("## Response Protocol\n\n");
        instructions.push_str("Decide step-by-step. Output ONLY JSON, no prose and no markdown.\n\n");
        let _ = writeln!(instructions, "To call a tool:\n{}\n", call.to_wire());
        let _ = writeln!(
            instructions,
            "To call several tools at once, output a JSON array of tool calls:\n[{}, {}]\n",
            tool_a.to_wire(),
            tool_b.to_wire()
        );
        let _ = writeln!(
            instructions,
            "To answer the user:\n{}\n",
            final_answer_wire("your answer")
        );
        instructions.push_str("Tool results appear as messages starting with [tool:name]. ");
        instructions.push_str("Use them to give a final answer.");
        instructions
    }

    fn get_tool_list(&self) -> String {
        if self.tool_specs.is_empty() {
            return "## Available Tools\n\nNo tools are available. Answer directly.".to_string();
        }

        let mut list = String::from("## Available Tools\n\n");
        for tool in &self.tool_specs {
            let _ = writeln!(
                list,
                "**{}**: {}\nParameters: `{}`\n",
                tool.name, tool.description, tool.parameters_schema
            );
        }
        list.trim_end().to_string()
    }

    fn get_runtime_context(&self) -> String {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M (%A)");
        format!("## Runtime Context\n\nCurrent time: {}", timestamp)
    }

    /// System prompt, then the full history, then an optional transient
    /// directive that is sent once and never stored.
    pub fn build_messages(
        &self,
        system_prompt: &str,
        history: &History,
        directive: Option<&str>,
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend(history.iter().cloned());
        if let Some(directive) = directive {
            messages.push(ChatMessage::system(directive));
        }
        messages
    }
}
