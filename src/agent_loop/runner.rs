//! Runner for the agent loop.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{ConversationState, ToolRouter};
use crate::error::RelayError;
use crate::provider::ModelAdapter;
use crate::types::{Message, ToolCallResult};

use super::events::{TurnEvent, TurnEventPayload};
use super::types::{AgentLoopOptions, TurnId, TurnState};

/// Callback used for observing turn events.
pub type TurnEventSink = Arc<dyn Fn(TurnEvent) + Send + Sync>;

/// Drives a conversation: calls the model, executes the tool calls it
/// requests, feeds the results back, and repeats until the model answers
/// without tool calls.
pub struct AgentLoop {
    model: Arc<dyn ModelAdapter>,
    router: ToolRouter,
    options: AgentLoopOptions,
    conversation: ConversationState,
    state: TurnState,
    event_sink: Option<TurnEventSink>,
}

impl std::fmt::Debug for AgentLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentLoop")
            .field("model", &self.model.model_id())
            .field("router", &self.router)
            .field("options", &self.options)
            .field("messages", &self.conversation.len())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl AgentLoop {
    pub fn new(model: Arc<dyn ModelAdapter>, router: ToolRouter) -> Self {
        Self::with_options(model, router, AgentLoopOptions::default())
    }

    /// Create a loop; the system prompt and context in `options` seed the
    /// conversation as system messages, in that order.
    pub fn with_options(
        model: Arc<dyn ModelAdapter>,
        router: ToolRouter,
        options: AgentLoopOptions,
    ) -> Self {
        let mut conversation = ConversationState::new();
        if let Some(prompt) = &options.system_prompt {
            conversation.push_system(prompt.clone());
        }
        if let Some(context) = &options.context {
            conversation.push_system(context.clone());
        }
        Self {
            model,
            router,
            options,
            conversation,
            state: TurnState::Idle,
            event_sink: None,
        }
    }

    pub fn with_event_sink(mut self, sink: TurnEventSink) -> Self {
        self.event_sink = Some(sink);
        self
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.conversation
    }

    pub fn router(&self) -> &ToolRouter {
        &self.router
    }

    pub fn options(&self) -> &AgentLoopOptions {
        &self.options
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Run one turn for a text prompt and return the model's final answer.
    pub async fn invoke(&mut self, prompt: impl Into<String>) -> Result<String, RelayError> {
        self.invoke_message(Message::user(prompt)).await
    }

    /// Run one turn for an arbitrary user message (e.g. multimodal parts).
    ///
    /// Dropping the returned future mid-turn leaves the loop usable: tool
    /// calls still waiting for a result are answered with
    /// [`CANCELLED_TOOL_RESULT`] and the state returns to idle.
    pub async fn invoke_message(&mut self, message: Message) -> Result<String, RelayError> {
        self.conversation.push_user_message(message);
        let mut emitter = EventEmitter::new(Uuid::new_v4(), self.event_sink.clone());
        emitter.emit(TurnEventPayload::Started);

        let outcome = {
            let mut turn = TurnGuard {
                agent: self,
                turn_id: emitter.turn_id,
            };
            turn.agent.run_turn(&mut emitter).await
        };
        match &outcome {
            Ok(content) => emitter.emit(TurnEventPayload::Completed {
                content: content.clone(),
            }),
            Err(error) => {
                warn!(turn_id = %emitter.turn_id, error = %error, "turn failed");
                emitter.emit(TurnEventPayload::Failed {
                    error: error.to_string(),
                });
            }
        }
        outcome
    }

    async fn run_turn(&mut self, emitter: &mut EventEmitter) -> Result<String, RelayError> {
        let catalog = self.router.catalog();

        for iteration in 0..self.options.max_iterations {
            self.state = TurnState::AwaitingModel;
            emitter.emit(TurnEventPayload::ModelRequested { iteration });
            debug!(
                turn_id = %emitter.turn_id,
                iteration,
                messages = self.conversation.len(),
                tools = catalog.len(),
                "requesting model response"
            );

            let response = self
                .model
                .chat(self.conversation.messages(), &catalog)
                .await?;

            if response.tool_calls.is_empty() {
                let content = response.content.unwrap_or_default();
                self.conversation
                    .push_assistant(Some(content.clone()), Vec::new());
                info!(turn_id = %emitter.turn_id, iterations = iteration + 1, "turn completed");
                return Ok(content);
            }

            self.state = TurnState::ExecutingTools;
            let calls = response.tool_calls;
            self.conversation
                .push_assistant(response.content, calls.clone());

            let mut results: Vec<ToolCallResult> = Vec::with_capacity(calls.len());
            for call in &calls {
                emitter.emit(TurnEventPayload::ToolCallStarted {
                    call: call.clone(),
                    provider: self
                        .router
                        .route(&call.name)
                        .map(|provider| provider.name().to_string()),
                });
                let result = self.router.dispatch(call, self.options.tool_timeout).await;
                emitter.emit(TurnEventPayload::ToolResult {
                    result: result.clone(),
                });
                results.push(result);
            }
            for result in results {
                self.conversation.push_tool_result(result);
            }
        }

        Err(RelayError::InvalidState(format!(
            "turn exceeded {} model iterations",
            self.options.max_iterations
        )))
    }
}

/// Result text recorded for tool calls whose turn was dropped before they
/// were answered.
pub const CANCELLED_TOOL_RESULT: &str = "Error: turn cancelled";

/// Restores the loop to a consistent idle state however the turn ends.
struct TurnGuard<'a> {
    agent: &'a mut AgentLoop,
    turn_id: TurnId,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        let repaired = self
            .agent
            .conversation
            .fail_unanswered_tool_calls(CANCELLED_TOOL_RESULT);
        if repaired > 0 {
            warn!(turn_id = %self.turn_id, tool_calls = repaired, "turn dropped while tools were running");
        }
        self.agent.state = TurnState::Idle;
    }
}

struct EventEmitter {
    turn_id: TurnId,
    seq: u64,
    sink: Option<TurnEventSink>,
}

impl EventEmitter {
    fn new(turn_id: TurnId, sink: Option<TurnEventSink>) -> Self {
        Self {
            turn_id,
            seq: 0,
            sink,
        }
    }

    fn emit(&mut self, payload: TurnEventPayload) {
        let Some(sink) = &self.sink else {
            return;
        };
        self.seq += 1;
        sink(TurnEvent {
            turn_id: self.turn_id,
            seq: self.seq,
            timestamp: Utc::now(),
            payload,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ModelResponse;
    use crate::tools::ToolDescriptor;
    use crate::types::{Role, ToolCallRequest};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<VecDeque<Result<ModelResponse, RelayError>>>,
        seen: Mutex<Vec<usize>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<ModelResponse, RelayError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ModelAdapter for Scripted {
        fn model_id(&self) -> &str {
            "scripted"
        }

        async fn chat(
            &self,
            history: &[Message],
            _tools: &[ToolDescriptor],
        ) -> Result<ModelResponse, RelayError> {
            self.seen.lock().expect("lock").push(history.len());
            self.replies
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or_else(|| Ok(ModelResponse::with_tool_calls(vec![
                    ToolCallRequest::new("loop", "missing", "{}"),
                ])))
        }
    }

    #[tokio::test]
    async fn plain_answer_ends_turn() {
        let model = Scripted::new(vec![Ok(ModelResponse::text("hello"))]);
        let mut agent = AgentLoop::new(model.clone(), ToolRouter::default());

        let answer = agent.invoke("hi").await.expect("turn should succeed");

        assert_eq!(answer, "hello");
        assert_eq!(agent.state(), TurnState::Idle);
        assert_eq!(agent.conversation().len(), 2);
        assert_eq!(*model.seen.lock().expect("lock"), vec![1]);
    }

    #[tokio::test]
    async fn system_prompt_and_context_seed_history() {
        let model = Scripted::new(vec![Ok(ModelResponse::text("ok"))]);
        let options = AgentLoopOptions::builder()
            .system_prompt("be brief".to_string())
            .context("user is in 北京".to_string())
            .build();
        let mut agent = AgentLoop::with_options(model, ToolRouter::default(), options);
        agent.invoke("weather?").await.expect("turn");

        let messages = agent.conversation().messages();
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].text(), "be brief");
        assert_eq!(messages[1].text(), "user is in 北京");
        assert_eq!(messages[2].role, Role::User);
    }

    #[tokio::test]
    async fn unknown_tool_result_is_fed_back() {
        let model = Scripted::new(vec![
            Ok(ModelResponse::with_tool_calls(vec![ToolCallRequest::new(
                "t1", "send_email", "{}",
            )])),
            Ok(ModelResponse::text("could not send")),
        ]);
        let mut agent = AgentLoop::new(model.clone(), ToolRouter::default());

        let answer = agent.invoke("email bob").await.expect("turn");

        assert_eq!(answer, "could not send");
        let messages = agent.conversation().messages();
        assert_eq!(messages[2].role, Role::Tool);
        assert_eq!(messages[2].text(), "Tool not found: send_email");
        assert_eq!(*model.seen.lock().expect("lock"), vec![1, 3]);
    }

    #[tokio::test]
    async fn model_failure_is_fatal() {
        let model = Scripted::new(vec![Err(RelayError::Model("HTTP 500: down".into()))]);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = events.clone();
        let mut agent = AgentLoop::new(model, ToolRouter::default()).with_event_sink(Arc::new(
            move |event: TurnEvent| sink_events.lock().expect("lock").push(event.payload),
        ));

        let err = agent.invoke("hi").await.expect_err("model failed");
        assert!(matches!(err, RelayError::Model(_)));
        assert_eq!(agent.state(), TurnState::Idle);
        let events = events.lock().expect("lock");
        assert!(matches!(events.last(), Some(TurnEventPayload::Failed { .. })));
    }

    #[tokio::test]
    async fn iteration_cap_fails_turn() {
        let model = Scripted::new(Vec::new());
        let options = AgentLoopOptions::builder().max_iterations(3).build();
        let mut agent = AgentLoop::with_options(model.clone(), ToolRouter::default(), options);

        let err = agent.invoke("loop forever").await.expect_err("cap reached");
        assert!(matches!(err, RelayError::InvalidState(msg) if msg.contains("3")));
        assert_eq!(model.seen.lock().expect("lock").len(), 3);
        assert!(agent.conversation().unanswered_tool_calls().is_empty());
    }

    #[tokio::test]
    async fn events_are_sequenced() {
        let model = Scripted::new(vec![
            Ok(ModelResponse::with_tool_calls(vec![ToolCallRequest::new(
                "t1", "missing", "{}",
            )])),
            Ok(ModelResponse::text("done")),
        ]);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = events.clone();
        let mut agent = AgentLoop::new(model, ToolRouter::default()).with_event_sink(Arc::new(
            move |event: TurnEvent| sink_events.lock().expect("lock").push(event),
        ));
        agent.invoke("go").await.expect("turn");

        let events = events.lock().expect("lock");
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, (1..=events.len() as u64).collect::<Vec<_>>());
        let kinds: Vec<&TurnEventPayload> = events.iter().map(|e| &e.payload).collect();
        assert_eq!(kinds[0], &TurnEventPayload::Started);
        assert!(matches!(
            kinds[2],
            TurnEventPayload::ToolCallStarted { provider: None, .. }
        ));
        assert_eq!(
            kinds.last().copied(),
            Some(&TurnEventPayload::Completed {
                content: "done".into()
            })
        );
    }
}
