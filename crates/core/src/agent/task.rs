use dockhand_model::{
    AssistantMessage, ErrorKind, ModelMessage, ModelRequest, ToolCallResult,
};
use tracing::Instrument;

use super::{Agent, AgentError, TranscriptSource, prompt};
use crate::message::{
    Context, MalformedMessage, ParsedMessage, RawOutput, ResponseParser,
};

/// The state of a task loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoopState {
    /// The pending input is about to be sent to the model.
    AwaitingModel,
    /// The model output is about to be parsed and dispatched.
    Dispatching,
    /// The model output carried no message. The fallback policy and the
    /// responders are consulted next.
    AwaitingUserFallback,
    /// The task is finished. See [`Agent::stop_reason`].
    Done,
}

/// Content waiting to be sent to the model with the next request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PendingInput {
    /// Plain text, sent as a user message.
    Text(String),
    /// The result of a native tool call.
    ToolResult {
        /// The id of the call being answered.
        call_id: String,
        /// The result content.
        content: String,
    },
}

impl PendingInput {
    /// Returns the content regardless of the channel.
    #[inline]
    pub fn content(&self) -> &str {
        match self {
            PendingInput::Text(content) => content,
            PendingInput::ToolResult { content, .. } => content,
        }
    }
}

/// Why a task stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StopReason {
    /// The done token was emitted, or nothing could answer the model.
    Finished,
    /// A handler had nothing more to say.
    NoFurtherContent,
    /// The step budget ran out.
    StepLimitExceeded,
}

/// The result of a finished task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskOutcome {
    /// Why the task stopped.
    pub stop_reason: StopReason,
    /// The final answer, if any.
    pub output: Option<String>,
    /// The number of dispatch turns.
    pub dispatches: usize,
}

pub(crate) struct TaskState {
    pub(crate) loop_state: LoopState,
    pub(crate) pending: Option<PendingInput>,
    pub(crate) stop_reason: Option<StopReason>,
    pub(crate) dispatches: usize,
    pending_source: TranscriptSource,
    model_text: String,
    parsed: Option<Result<Option<ParsedMessage>, MalformedMessage>>,
    open_call: Option<String>,
    output: Option<String>,
    // Set while the recorded input has no model reply yet.
    awaiting_reply: bool,
}

impl TaskState {
    pub(crate) fn idle() -> Self {
        Self {
            loop_state: LoopState::Done,
            pending: None,
            stop_reason: None,
            dispatches: 0,
            pending_source: TranscriptSource::User,
            model_text: String::new(),
            parsed: None,
            open_call: None,
            output: None,
            awaiting_reply: false,
        }
    }
}

impl<S: Send + Sync + 'static> Agent<S> {
    /// Starts a new task with user input, abandoning any unfinished one.
    ///
    /// The conversation is kept, so later tasks can refer to earlier turns.
    pub fn start_task<T: Into<String>>(&mut self, input: T) {
        let open_call = self.task.open_call.take();
        if let Some(call_id) = open_call {
            // The model expects a result for every native call.
            let content = "The task has ended.".to_owned();
            self.conversation.push(
                ModelMessage::Tool(ToolCallResult {
                    id: call_id,
                    content: content.clone(),
                }),
                content,
                TranscriptSource::Agent,
            );
        }

        let input = input.into();
        self.emit_transcript(&input, TranscriptSource::User);
        self.task = TaskState::idle();
        self.task.loop_state = LoopState::AwaitingModel;
        self.task.pending = Some(PendingInput::Text(input));
    }

    /// Advances the task loop by one transition and returns the new state.
    ///
    /// Errors leave the loop in the state it was in. The pending input stays
    /// recorded in the conversation, and stepping again resends the same
    /// request.
    pub async fn step(&mut self) -> Result<LoopState, AgentError> {
        match self.task.loop_state {
            LoopState::AwaitingModel => self.await_model().await?,
            LoopState::Dispatching => self.dispatch().await,
            LoopState::AwaitingUserFallback => self.fall_back().await?,
            LoopState::Done => {}
        }
        Ok(self.task.loop_state)
    }

    /// Steps until the task is done.
    pub async fn run(&mut self) -> Result<TaskOutcome, AgentError> {
        let span = debug_span!("task", agent = %self.config.name);
        async {
            while self.task.loop_state != LoopState::Done {
                let state = self.step().await?;
                trace!("loop state: {state:?}");
            }
            Ok(self.outcome())
        }
        .instrument(span)
        .await
    }

    /// Starts a task and runs it to the end.
    pub async fn run_task<T: Into<String>>(
        &mut self,
        input: T,
    ) -> Result<TaskOutcome, AgentError> {
        self.start_task(input);
        self.run().await
    }

    fn outcome(&self) -> TaskOutcome {
        TaskOutcome {
            stop_reason: self
                .task
                .stop_reason
                .unwrap_or(StopReason::NoFurtherContent),
            output: self.task.output.clone(),
            dispatches: self.task.dispatches,
        }
    }

    async fn await_model(&mut self) -> Result<(), AgentError> {
        if let Some(input) = self.task.pending.take() {
            self.record_input(input);
            self.task.awaiting_reply = true;
        } else if !self.task.awaiting_reply {
            self.finish(StopReason::NoFurtherContent, None);
            return Ok(());
        }

        let output = self.request_model().await?;
        self.task.awaiting_reply = false;
        self.record_output(&output);

        if output.native_calls.is_empty() {
            if let Some(rest) = self.strip_done_token(&output.text) {
                let rest = rest.to_owned();
                self.finish(StopReason::Finished, Some(rest));
                return Ok(());
            }
        }

        self.task.parsed = Some(ResponseParser::parse(&output, &self.registry));
        self.task.model_text = output.text;
        self.task.loop_state = LoopState::Dispatching;
        Ok(())
    }

    fn record_input(&mut self, input: PendingInput) {
        let source = self.task.pending_source;
        match input {
            PendingInput::Text(text) => {
                self.conversation.push(
                    ModelMessage::user(text.clone()),
                    text,
                    source,
                );
            }
            PendingInput::ToolResult { call_id, content } => {
                self.conversation.push(
                    ModelMessage::Tool(ToolCallResult {
                        id: call_id,
                        content: content.clone(),
                    }),
                    content,
                    source,
                );
            }
        }
    }

    async fn request_model(&mut self) -> Result<RawOutput, AgentError> {
        let mut messages = Vec::with_capacity(self.conversation.len() + 1);
        messages.push(ModelMessage::system(prompt::system_prompt(
            &self.config,
            &self.registry,
        )));
        messages.extend(self.conversation.messages().cloned());
        let tools = if self.config.use_tools_api {
            self.registry.definitions()
        } else {
            vec![]
        };
        let req = ModelRequest { messages, tools };

        let on_transcript = self.on_transcript.clone();
        let result = self
            .model_client
            .send_request(req, move |delta| {
                if let Some(on_transcript) = &on_transcript {
                    on_transcript(&delta, TranscriptSource::Assistant);
                }
            })
            .await;
        match result {
            Ok(output) => Ok(output),
            Err(err) if err.kind() == ErrorKind::Moderated => {
                warn!("the model output was moderated: {err}");
                Ok(RawOutput::default())
            }
            Err(err) => Err(AgentError::collaborator_unavailable(format!(
                "model request failed: {err}"
            ))),
        }
    }

    fn record_output(&mut self, output: &RawOutput) {
        // Only the handled call is kept, so that every call in the history
        // gets exactly one result.
        let tool_calls = output
            .native_calls
            .last()
            .cloned()
            .into_iter()
            .collect::<Vec<_>>();
        self.task.open_call = tool_calls.first().map(|call| call.id.clone());
        self.conversation.push(
            ModelMessage::Assistant(AssistantMessage {
                content: output.text.clone(),
                tool_calls,
            }),
            output.text.clone(),
            TranscriptSource::Assistant,
        );
    }

    async fn dispatch(&mut self) {
        self.task.dispatches += 1;
        let parsed = self.task.parsed.take().unwrap_or(Ok(None));
        let message = match parsed {
            Ok(Some(message)) => message,
            Ok(None) => {
                self.task.loop_state = LoopState::AwaitingUserFallback;
                return;
            }
            Err(malformed) => {
                debug!("malformed message: {malformed}");
                let schema = self.registry.schema(&malformed.request);
                let content = prompt::malformed_message(&malformed, schema);
                self.continue_with(content, TranscriptSource::Agent);
                return;
            }
        };

        let Some(handler) = self.registry.resolve(&message.request).cloned()
        else {
            // Disabled after parsing.
            self.task.loop_state = LoopState::AwaitingUserFallback;
            return;
        };
        let result = {
            let cx = Context::new(&self.state, self.on_approval.as_deref());
            handler.dispatch(message.arguments, &cx).await
        };

        match result {
            Ok(reply) => {
                if let Some(state) = reply.state {
                    trace!("state replaced by `{}`", message.request);
                    self.state = state;
                }
                match reply.content {
                    Some(content) => {
                        self.continue_with(content, TranscriptSource::Agent)
                    }
                    None => self.finish(StopReason::NoFurtherContent, None),
                }
            }
            Err(err) => {
                warn!("failed to handle `{}`: {err}", message.request);
                let content = prompt::handler_error(&message.request, &err);
                self.continue_with(content, TranscriptSource::Agent);
            }
        }
    }

    async fn fall_back(&mut self) -> Result<(), AgentError> {
        let model_text = std::mem::take(&mut self.task.model_text);
        if let Some(content) = self.fallback.fallback(&self.state, &model_text)
        {
            self.continue_with(content, TranscriptSource::Agent);
            return Ok(());
        }

        let mut answer = None;
        for responder in &self.responders {
            if let Some(content) =
                responder.respond(&self.state, &model_text).await?
            {
                answer = Some((content, responder.source()));
                break;
            }
        }
        match answer {
            Some((content, source)) => self.continue_with(content, source),
            None => {
                // Nobody can answer, so the model text is the final answer.
                let output =
                    (!model_text.trim().is_empty()).then_some(model_text);
                self.finish(StopReason::Finished, output);
            }
        }
        Ok(())
    }

    fn continue_with(&mut self, content: String, source: TranscriptSource) {
        if let Some(rest) = self.strip_done_token(&content) {
            let rest = rest.to_owned();
            self.finish(StopReason::Finished, Some(rest));
            return;
        }
        if source != TranscriptSource::User {
            self.emit_transcript(&content, source);
        }

        if self
            .config
            .max_steps
            .is_some_and(|max_steps| self.task.dispatches >= max_steps)
        {
            info!(
                "`{}` reached its step budget of {} dispatches",
                self.config.name, self.task.dispatches
            );
            self.finish(StopReason::StepLimitExceeded, Some(content));
            return;
        }

        let input = match self.task.open_call.take() {
            Some(call_id) => PendingInput::ToolResult { call_id, content },
            None => PendingInput::Text(content),
        };
        self.task.pending = Some(input);
        self.task.pending_source = source;
        self.task.loop_state = LoopState::AwaitingModel;
    }

    fn strip_done_token<'a>(&self, text: &'a str) -> Option<&'a str> {
        let token = self.config.done_token.as_str();
        if token.is_empty() {
            return None;
        }
        text.trim_start().strip_prefix(token).map(str::trim)
    }

    fn finish(&mut self, reason: StopReason, output: Option<String>) {
        debug!("task finished: {reason:?}");
        self.task.loop_state = LoopState::Done;
        self.task.stop_reason = Some(reason);
        self.task.output = output.filter(|output| !output.is_empty());
    }
}
