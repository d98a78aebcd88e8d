use crate::agent::decision::{self, BatchItem, Decision, ToolCall};
use crate::agent::{ContextBuilder, History, ReflectionGate, ToolRegistry};
use crate::error::{ToolError, TransportError};
use crate::traits::{ChatMessage, ChatRequest, Provider};
use std::sync::Arc;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

pub const DEFAULT_MAX_STEPS: usize = 6;

const ANSWER_NOW: &str = "Answer now using the tool observation(s) above. \
Respond with {\"action\": \"final\", \"answer\": \"...\"}.";
const JSON_ONLY: &str = "Respond using JSON ONLY.";
const MISSING_ACTION: &str = "Your last reply did not name an action. \
Respond with {\"action\": \"tool_name\", \"args\": {...}} or {\"action\": \"final\", \"answer\": \"...\"}.";
const FALLBACK_SUMMARY: &str =
    "I ran the requested tools but couldn't summarise the results. Please check the tool output above.";

/// Per-turn bookkeeping, dropped when the turn ends.
#[derive(Debug, Clone)]
pub struct LoopState {
    pub turn_query: String,
    pub step_count: usize,
    pub max_steps: usize,
}

impl LoopState {
    pub fn new(turn_query: impl Into<String>, max_steps: usize) -> Self {
        Self {
            turn_query: turn_query.into(),
            step_count: 0,
            max_steps,
        }
    }

    pub fn advance(&mut self) {
        self.step_count += 1;
    }

    pub fn budget_exhausted(&self) -> bool {
        self.step_count >= self.max_steps
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEnd {
    /// The model produced a final answer (possibly revised by reflection).
    Final,
    /// Tools ran but the follow-up request did not yield a final answer.
    Fallback,
    BudgetExhausted,
    /// The chat backend failed; the answer carries the error text.
    Degraded,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub answer: String,
    pub steps: usize,
    pub end: TurnEnd,
}

pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    context_builder: ContextBuilder,
    tool_registry: Arc<ToolRegistry>,
    reflection: Option<ReflectionGate>,
    history: History,
    model: String,
    temperature: f64,
    max_tokens: Option<u32>,
    max_steps: usize,
    json_mode_fallback: bool,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        context_builder: ContextBuilder,
        tool_registry: Arc<ToolRegistry>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            context_builder,
            tool_registry,
            reflection: None,
            history: History::new(),
            model: model.into(),
            temperature: 0.2,
            max_tokens: None,
            max_steps: DEFAULT_MAX_STEPS,
            json_mode_fallback: true,
        }
    }

    pub fn with_reflection(mut self, gate: ReflectionGate) -> Self {
        self.reflection = Some(gate);
        self
    }

    pub fn with_max_steps(mut self, max: usize) -> Self {
        self.max_steps = max;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_json_mode_fallback(mut self, enabled: bool) -> Self {
        self.json_mode_fallback = enabled;
        self
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Run one user turn and return the answer shown to the user.
    pub async fn process(&mut self, message: &str) -> String {
        self.process_turn(message).await.answer
    }

    pub async fn process_turn(&mut self, message: &str) -> TurnOutcome {
        let span = info_span!("turn", turn_id = %Uuid::new_v4());
        self.run_turn(message).instrument(span).await
    }

    async fn run_turn(&mut self, message: &str) -> TurnOutcome {
        self.history.push(ChatMessage::user(message));
        let system_prompt = self.context_builder.build_system_prompt();
        let mut state = LoopState::new(message, self.max_steps);

        loop {
            if state.budget_exhausted() {
                return self.finish_exhausted(&state);
            }

            let decision = match self.decide(&system_prompt, None).await {
                Ok(decision) => decision,
                Err(e) => return self.finish_degraded(e, &state),
            };
            debug!(kind = decision.kind(), step = state.step_count, "received decision");

            match decision {
                Decision::FinalAnswer { answer } => return self.finish(answer, &state).await,
                Decision::ToolCall(call) if !call.has_name() => {
                    self.history.push(ChatMessage::system(MISSING_ACTION));
                    state.advance();
                }
                Decision::ToolCall(call) => {
                    let known = self.tool_registry.contains(&call.name);
                    self.observe(&call).await;
                    state.advance();
                    if known {
                        return self.follow_up(&system_prompt, &state).await;
                    }
                }
                Decision::Batch(items) => {
                    let mut calls = Vec::new();
                    let mut finals = Vec::new();
                    for item in items {
                        match item {
                            BatchItem::ToolCall(call) => calls.push(call),
                            BatchItem::FinalAnswer { answer } => finals.push(answer),
                        }
                    }

                    if calls.is_empty() {
                        let answer = finals.into_iter().next().unwrap_or_default();
                        return self.finish(answer, &state).await;
                    }
                    if !finals.is_empty() {
                        debug!(
                            finals = finals.len(),
                            "batch carried final answers, deferring to follow-up"
                        );
                    }

                    for call in &calls {
                        self.observe(call).await;
                    }
                    state.advance();
                    return self.follow_up(&system_prompt, &state).await;
                }
                Decision::Malformed { raw_text, reason } => {
                    warn!(%reason, raw = %preview(&raw_text), "malformed decision");
                    self.history.push(ChatMessage::system(format!(
                        "Your last reply could not be used ({}). Respond with ONLY one JSON value: \
                         {{\"action\": \"tool_name\", \"args\": {{...}}}} to call a tool, or \
                         {{\"action\": \"final\", \"answer\": \"...\"}} to answer.",
                        reason
                    )));
                    state.advance();
                }
            }
        }
    }

    async fn decide(
        &self,
        system_prompt: &str,
        directive: Option<&str>,
    ) -> Result<Decision, TransportError> {
        let mut messages = self
            .context_builder
            .build_messages(system_prompt, &self.history, directive);

        let first = self.provider.chat(self.request(&messages, true)).await;
        let raw = match first {
            Ok(raw) => raw,
            Err(e) if self.json_mode_fallback && e.is_rejection() => {
                warn!(error = %e, "JSON-mode request rejected, retrying without it");
                messages.push(ChatMessage::system(JSON_ONLY));
                self.provider.chat(self.request(&messages, false)).await?
            }
            Err(e) => return Err(e),
        };

        Ok(decision::parse(&raw))
    }

    fn request<'a>(&'a self, messages: &'a [ChatMessage], json_mode: bool) -> ChatRequest<'a> {
        ChatRequest {
            messages,
            model: &self.model,
            temperature: self.temperature,
            json_mode,
            max_tokens: self.max_tokens,
        }
    }

    /// Dispatch one call and record exactly one observation for it.
    async fn observe(&mut self, call: &ToolCall) {
        let name = call.name.trim();
        let content = if name.is_empty() {
            "[tool error] No action specified for this item.".to_string()
        } else {
            match self.tool_registry.dispatch(name, call.args.clone()).await {
                Ok(output) => {
                    info!(tool = %name, "tool call succeeded");
                    format!("[tool:{}] {}", name, output)
                }
                Err(e @ ToolError::Unknown(_)) => {
                    warn!(tool = %name, "model asked for unknown tool");
                    format!(
                        "[unknown tool:{}] {}. Available: {}",
                        name,
                        e,
                        self.tool_registry.names().join(", ")
                    )
                }
                Err(e) => format!("[tool error:{}] {}", name, e),
            }
        };
        self.history.push(ChatMessage::observation(name, content));
    }

    async fn follow_up(&mut self, system_prompt: &str, state: &LoopState) -> TurnOutcome {
        if state.budget_exhausted() {
            return self.finish_exhausted(state);
        }

        match self.decide(system_prompt, Some(ANSWER_NOW)).await {
            Ok(Decision::FinalAnswer { answer }) => self.finish(answer, state).await,
            Ok(other) => {
                debug!(kind = other.kind(), "follow-up did not produce a final answer");
                self.conclude(FALLBACK_SUMMARY.to_string(), state, TurnEnd::Fallback)
            }
            Err(e) => self.finish_degraded(e, state),
        }
    }

    async fn finish(&mut self, answer: String, state: &LoopState) -> TurnOutcome {
        let answer = match &self.reflection {
            Some(gate) => gate.critique(&answer).await,
            None => answer,
        };
        self.conclude(answer, state, TurnEnd::Final)
    }

    fn finish_exhausted(&mut self, state: &LoopState) -> TurnOutcome {
        warn!(max_steps = state.max_steps, "step budget exhausted");
        let answer = format!(
            "I couldn't reach a final answer within {} steps. Please check the tool results above.",
            state.max_steps
        );
        self.conclude(answer, state, TurnEnd::BudgetExhausted)
    }

    fn finish_degraded(&mut self, error: TransportError, state: &LoopState) -> TurnOutcome {
        warn!(error = %error, "chat request failed, degrading turn");
        self.conclude(format!("API error: {}", error), state, TurnEnd::Degraded)
    }

    fn conclude(&mut self, answer: String, state: &LoopState, end: TurnEnd) -> TurnOutcome {
        self.history.push(ChatMessage::assistant(answer.clone()));
        info!(steps = state.step_count, end = ?end, "turn finished");
        TurnOutcome {
            answer,
            steps: state.step_count,
            end,
        }
    }
}

fn preview(text: &str) -> String {
    const MAX: usize = 120;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(MAX).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::test_support::{ScriptedProvider, StubTools, registry_for};
    use crate::traits::Role;
    use serde_json::json;

    const FINAL_4: &str = r#"{"action":"final","answer":"4"}"#;

    async fn agent(
        provider: &Arc<ScriptedProvider>,
        tools: &Arc<StubTools>,
    ) -> AgentLoop {
        let registry = registry_for(tools).await;
        let context = ContextBuilder::new().with_tool_specs(registry.specs());
        AgentLoop::new(provider.clone(), context, registry, "decider")
    }

    fn roles(history: &History) -> Vec<Role> {
        history.iter().map(|m| m.role).collect()
    }

    fn calc_and_joke() -> Arc<StubTools> {
        Arc::new(StubTools::new(&[("calc", "4"), ("joke", "Why did the crab cross?")]))
    }

    #[tokio::test]
    async fn final_answer_ends_turn() {
        let provider = ScriptedProvider::texts(&[FINAL_4]);
        let mut agent = agent(&provider, &calc_and_joke()).await;

        let outcome = agent.process_turn("2+2?").await;
        assert_eq!(outcome.answer, "4");
        assert_eq!(outcome.end, TurnEnd::Final);
        assert_eq!(outcome.steps, 0);
        assert_eq!(roles(agent.history()), vec![Role::User, Role::Assistant]);
        assert_eq!(provider.call_count(), 1);
        assert!(provider.requests()[0].json_mode);
    }

    #[tokio::test]
    async fn reflection_revises_final_answer_once() {
        let provider = ScriptedProvider::texts(&[FINAL_4]);
        let critic = ScriptedProvider::texts(&["Actually, it's 5."]);
        let mut agent = agent(&provider, &calc_and_joke())
            .await
            .with_reflection(ReflectionGate::new(critic.clone(), "critic"));

        assert_eq!(agent.process("2+2?").await, "Actually, it's 5.");
        assert_eq!(critic.call_count(), 1);
        assert_eq!(critic.requests()[0].model, "critic");
        let last = agent.history().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, "Actually, it's 5.");
        assert_eq!(agent.history().len(), 2);
    }

    #[tokio::test]
    async fn batch_dispatches_in_order_then_follows_up() {
        let provider = ScriptedProvider::texts(&[
            r#"[{"action":"calc","args":{"expr":"2+2"}},{"action":"joke","args":{}}]"#,
            r#"{"action":"final","answer":"4, and: Why did the crab cross?"}"#,
        ]);
        let tools = calc_and_joke();
        let mut agent = agent(&provider, &tools).await;

        let outcome = agent.process_turn("What's 2+2 and tell a joke").await;
        assert_eq!(outcome.end, TurnEnd::Final);
        assert_eq!(outcome.steps, 1);
        assert_eq!(tools.call_names(), vec!["calc", "joke"]);
        assert_eq!(tools.calls()[0].1, json!({"expr": "2+2"}));

        let history = agent.history();
        assert_eq!(
            roles(history),
            vec![Role::User, Role::Observation, Role::Observation, Role::Assistant]
        );
        let tags: Vec<_> = history.observations().filter_map(|m| m.tool_name.clone()).collect();
        assert_eq!(tags, vec!["calc", "joke"]);
        assert_eq!(history.messages()[1].content, "[tool:calc] 4");

        let follow_up = &provider.requests()[1];
        assert_eq!(provider.call_count(), 2);
        assert_eq!(follow_up.messages.last().unwrap().content, ANSWER_NOW);
        assert_eq!(follow_up.messages.last().unwrap().role, Role::System);
    }

    #[tokio::test]
    async fn unknown_tool_adds_one_observation_and_one_step() {
        let provider = ScriptedProvider::texts(&[r#"{"action":"missingTool","args":{}}"#]);
        let tools = calc_and_joke();
        let mut agent = agent(&provider, &tools).await.with_max_steps(1);

        let outcome = agent.process_turn("do something").await;
        assert_eq!(outcome.steps, 1);
        assert_eq!(outcome.end, TurnEnd::BudgetExhausted);
        assert_eq!(provider.call_count(), 1);
        assert!(tools.calls().is_empty());

        let observations: Vec<_> = agent.history().observations().collect();
        assert_eq!(observations.len(), 1);
        assert!(observations[0].content.starts_with("[unknown tool:missingTool]"));
        assert!(observations[0].content.contains("Available: calc, joke"));
    }

    #[tokio::test]
    async fn unknown_tool_lets_model_retry() {
        let provider =
            ScriptedProvider::texts(&[r#"{"action":"missingTool"}"#, r#"{"action":"final","answer":"sorry"}"#]);
        let mut agent = agent(&provider, &calc_and_joke()).await;

        let outcome = agent.process_turn("do something").await;
        assert_eq!(outcome.answer, "sorry");
        assert_eq!(outcome.steps, 1);
        assert_eq!(
            roles(agent.history()),
            vec![Role::User, Role::Observation, Role::Assistant]
        );
    }

    #[tokio::test]
    async fn always_malformed_terminates_within_budget() {
        let provider = ScriptedProvider::repeating("I'd rather chat in prose.");
        let mut agent = agent(&provider, &calc_and_joke()).await.with_max_steps(3);

        let outcome = agent.process_turn("hello").await;
        assert_eq!(outcome.end, TurnEnd::BudgetExhausted);
        assert_eq!(outcome.steps, 3);
        assert_eq!(provider.call_count(), 3);
        assert!(outcome.answer.contains("within 3 steps"));
        assert_eq!(
            roles(agent.history()),
            vec![Role::User, Role::System, Role::System, Role::System, Role::Assistant]
        );
    }

    #[tokio::test]
    async fn missing_action_name_gets_correction() {
        let provider = ScriptedProvider::texts(&[r#"{"action":"  ","args":{}}"#, FINAL_4]);
        let tools = calc_and_joke();
        let mut agent = agent(&provider, &tools).await;

        let outcome = agent.process_turn("2+2").await;
        assert_eq!(outcome.answer, "4");
        assert_eq!(outcome.steps, 1);
        assert!(tools.calls().is_empty());
        assert_eq!(agent.history().messages()[1].content, MISSING_ACTION);
    }

    #[tokio::test]
    async fn tool_failure_is_observed_and_followed_up() {
        let provider = ScriptedProvider::texts(&[
            r#"{"action":"calc","args":{"expr":"1/0"}}"#,
            r#"{"action":"final","answer":"calc is broken"}"#,
        ]);
        let tools = Arc::new(StubTools::new(&[("calc", "")]).failing("calc"));
        let mut agent = agent(&provider, &tools).await;

        let outcome = agent.process_turn("1/0").await;
        assert_eq!(outcome.answer, "calc is broken");
        let observation = &agent.history().messages()[1];
        assert_eq!(observation.tool_name.as_deref(), Some("calc"));
        assert!(observation.content.starts_with("[tool error:calc]"));
        assert!(observation.content.contains("out of order"));
    }

    #[tokio::test]
    async fn follow_up_without_final_uses_fallback() {
        let provider = ScriptedProvider::texts(&[
            r#"{"action":"calc","args":{}}"#,
            r#"{"action":"joke","args":{}}"#,
        ]);
        let tools = calc_and_joke();
        let mut agent = agent(&provider, &tools).await;

        let outcome = agent.process_turn("2+2").await;
        assert_eq!(outcome.end, TurnEnd::Fallback);
        assert_eq!(outcome.answer, FALLBACK_SUMMARY);
        assert_eq!(tools.call_names(), vec!["calc"]);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_budget_skips_follow_up() {
        let provider = ScriptedProvider::texts(&[r#"{"action":"calc","args":{}}"#]);
        let tools = calc_and_joke();
        let mut agent = agent(&provider, &tools).await.with_max_steps(1);

        let outcome = agent.process_turn("2+2").await;
        assert_eq!(outcome.end, TurnEnd::BudgetExhausted);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(tools.call_names(), vec!["calc"]);
    }

    #[tokio::test]
    async fn transport_error_degrades_without_reflection() {
        let provider = ScriptedProvider::new(vec![Err(TransportError::Timeout(
            "deadline of 30s elapsed".into(),
        ))]);
        let critic = ScriptedProvider::texts(&[]);
        let mut agent = agent(&provider, &calc_and_joke())
            .await
            .with_reflection(ReflectionGate::new(critic.clone(), "critic"));

        let outcome = agent.process_turn("hi").await;
        assert_eq!(outcome.end, TurnEnd::Degraded);
        assert!(outcome.answer.starts_with("API error:"));
        assert!(outcome.answer.contains("deadline of 30s elapsed"));
        assert_eq!(critic.call_count(), 0);
        assert_eq!(roles(agent.history()), vec![Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn rejected_json_mode_is_retried_once_without_it() {
        let provider = ScriptedProvider::new(vec![
            Err(TransportError::Status {
                status: 400,
                body: "json_validate_failed".into(),
            }),
            Ok(FINAL_4.to_string()),
        ]);
        let mut agent = agent(&provider, &calc_and_joke()).await;

        let outcome = agent.process_turn("2+2").await;
        assert_eq!(outcome.answer, "4");
        assert_eq!(outcome.steps, 0);

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].json_mode);
        assert!(!requests[1].json_mode);
        assert_eq!(requests[1].messages.last().unwrap().content, JSON_ONLY);
        assert_eq!(agent.history().len(), 2);
    }

    #[tokio::test]
    async fn json_mode_retry_can_be_disabled() {
        let provider = ScriptedProvider::new(vec![Err(TransportError::Status {
            status: 400,
            body: "bad".into(),
        })]);
        let mut agent = agent(&provider, &calc_and_joke())
            .await
            .with_json_mode_fallback(false);

        let outcome = agent.process_turn("2+2").await;
        assert_eq!(outcome.end, TurnEnd::Degraded);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn batch_of_only_finals_answers_directly() {
        let provider = ScriptedProvider::texts(&[
            r#"[{"action":"final","answer":"first"},{"action":"final","answer":"second"}]"#,
        ]);
        let mut agent = agent(&provider, &calc_and_joke()).await;

        assert_eq!(agent.process("hi").await, "first");
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn batch_errors_are_per_item() {
        let provider = ScriptedProvider::texts(&[
            r#"[{"action":"nope"},{"action":"final","answer":"early"},{"action":"calc"},{"action":""}]"#,
            r#"{"action":"final","answer":"done"}"#,
        ]);
        let tools = calc_and_joke();
        let mut agent = agent(&provider, &tools).await;

        let outcome = agent.process_turn("mixed").await;
        assert_eq!(outcome.answer, "done");
        assert_eq!(tools.call_names(), vec!["calc"]);

        let observations: Vec<_> = agent.history().observations().collect();
        assert_eq!(observations.len(), 3);
        assert!(observations[0].content.starts_with("[unknown tool:nope]"));
        assert_eq!(observations[1].content, "[tool:calc] 4");
        assert!(observations[2].content.starts_with("[tool error]"));
    }

    #[tokio::test]
    async fn history_carries_across_turns() {
        let provider = ScriptedProvider::texts(&[FINAL_4, r#"{"action":"final","answer":"8"}"#]);
        let mut agent = agent(&provider, &calc_and_joke()).await;

        agent.process("2+2?").await;
        agent.process("double it").await;

        let second = &provider.requests()[1];
        // system prompt + user + assistant + user
        assert_eq!(second.messages.len(), 4);
        assert_eq!(second.messages[0].role, Role::System);
        assert_eq!(second.messages[2].content, "4");
        assert_eq!(agent.history().len(), 4);
    }

    #[test]
    fn loop_state_budget() {
        let mut state = LoopState::new("q", 2);
        assert!(!state.budget_exhausted());
        state.advance();
        state.advance();
        assert!(state.budget_exhausted());
        assert_eq!(state.turn_query, "q");
    }
}
