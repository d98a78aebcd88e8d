use crate::traits::{ChatMessage, ChatRequest, Provider};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const CRITIQUE_PROMPT: &str = "Check if the following response is correct, complete, and has no obvious mistakes. \
If it's fine, reply with exactly 'looks good'. \
If there are issues, provide the corrected answer.";

const APPROVAL: &str = "looks good";

/// One-shot self-critique of a draft answer. Fails open: any problem with the
/// critique request leaves the draft untouched.
pub struct ReflectionGate {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f64,
    max_tokens: Option<u32>,
    timeout: Duration,
}

impl ReflectionGate {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.0,
            max_tokens: Some(256),
            timeout: Duration::from_secs(20),
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn critique(&self, answer: &str) -> String {
        let messages = [ChatMessage::system(CRITIQUE_PROMPT), ChatMessage::user(answer)];
        let request = ChatRequest {
            messages: &messages,
            model: &self.model,
            temperature: self.temperature,
            json_mode: false,
            max_tokens: self.max_tokens,
        };

        let verdict = match tokio::time::timeout(self.timeout, self.provider.chat(request)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(error = %e, "reflection failed, keeping draft answer");
                return answer.to_string();
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "reflection timed out, keeping draft answer");
                return answer.to_string();
            }
        };

        let verdict = verdict.trim();
        if verdict.is_empty() {
            warn!("reflection returned nothing, keeping draft answer");
            return answer.to_string();
        }
        if verdict.eq_ignore_ascii_case(APPROVAL) {
            debug!("reflection approved draft answer");
            answer.to_string()
        } else {
            debug!("reflection revised draft answer");
            verdict.to_string()
        }
    }
}
