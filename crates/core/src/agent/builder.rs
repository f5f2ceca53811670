use std::sync::Arc;

use dockhand_model::ModelProvider;

use super::fallback::{FallbackPolicy, NoFallback, Responder};
use super::task::TaskState;
use super::{Agent, AgentError, TranscriptFn, TranscriptSource};
use crate::approval::Approval;
use crate::conversation::Conversation;
use crate::message::{ApprovalFn, Handler, MessageRegistry, SchemaError};
use crate::model_client::{ModelClient, RetryConfig};

/// Static configuration of an agent.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// A name used in logs.
    pub name: String,
    /// The system prompt. Instructions for the enabled messages are
    /// appended to it when native tool calls are not used.
    pub system_prompt: String,
    /// Sends enabled messages as native tool definitions instead of
    /// describing them in the system prompt.
    pub use_tools_api: bool,
    /// The maximum number of dispatch turns per task. `None` means
    /// unbounded.
    pub max_steps: Option<usize>,
    /// A prefix marking the task as finished when it starts the model text
    /// or handler content. An empty token disables the check.
    pub done_token: String,
    /// How transient model errors are retried.
    pub retry: RetryConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "agent".to_owned(),
            system_prompt: "You are a helpful assistant.".to_owned(),
            use_tools_api: false,
            max_steps: None,
            done_token: "DONE".to_owned(),
            retry: RetryConfig::default(),
        }
    }
}

/// [`Agent`] builder.
pub struct AgentBuilder<S> {
    model_client: ModelClient,
    config: AgentConfig,
    state: S,
    registry: MessageRegistry<S>,
    schema_error: Option<SchemaError>,
    fallback: Box<dyn FallbackPolicy<S>>,
    responders: Vec<Box<dyn Responder<S>>>,
    on_transcript: Option<Arc<TranscriptFn>>,
    on_approval: Option<Box<ApprovalFn>>,
}

impl<S: Send + Sync + 'static> AgentBuilder<S> {
    /// Creates a new builder with the specified model provider and initial
    /// state.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
        state: S,
    ) -> Self {
        Self::with_model_client(ModelClient::new(provider), state)
    }

    /// Creates a new builder sharing an existing model client.
    pub fn with_model_client(model_client: ModelClient, state: S) -> Self {
        Self {
            model_client,
            config: AgentConfig::default(),
            state,
            registry: MessageRegistry::new(),
            schema_error: None,
            fallback: Box::new(NoFallback),
            responders: vec![],
            on_transcript: None,
            on_approval: None,
        }
    }

    /// Replaces the whole configuration.
    #[inline]
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the agent name used in logs.
    #[inline]
    pub fn with_name<N: Into<String>>(mut self, name: N) -> Self {
        self.config.name = name.into();
        self
    }

    /// Sets the system prompt.
    #[inline]
    pub fn with_system_prompt<P: Into<String>>(mut self, prompt: P) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    /// Limits the number of dispatch turns per task.
    #[inline]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.config.max_steps = Some(max_steps);
        self
    }

    /// Sets the prefix marking a task as finished. An empty token disables
    /// the check.
    #[inline]
    pub fn with_done_token<T: Into<String>>(mut self, token: T) -> Self {
        self.config.done_token = token.into();
        self
    }

    /// Chooses between native tool calls and prompt instructions.
    #[inline]
    pub fn use_tools_api(mut self, enabled: bool) -> Self {
        self.config.use_tools_api = enabled;
        self
    }

    /// Enables the message type of `handler`.
    ///
    /// An invalid message type is reported by [`AgentBuilder::build`].
    pub fn with_handler<H: Handler<S>>(mut self, handler: H) -> Self {
        if self.schema_error.is_some() {
            return self;
        }
        if let Err(err) = self.registry.enable(handler) {
            self.schema_error = Some(err);
        }
        self
    }

    /// Sets the policy consulted when the model output carries no message.
    #[inline]
    pub fn with_fallback<F: FallbackPolicy<S> + 'static>(
        mut self,
        fallback: F,
    ) -> Self {
        self.fallback = Box::new(fallback);
        self
    }

    /// Appends a responder, asked in registration order after the fallback
    /// policy declines.
    #[inline]
    pub fn with_responder<R: Responder<S> + 'static>(
        mut self,
        responder: R,
    ) -> Self {
        self.responders.push(Box::new(responder));
        self
    }

    /// Attaches a callback receiving transcripts as they are produced.
    ///
    /// Model text arrives in deltas.
    #[inline]
    pub fn on_transcript(
        mut self,
        on_transcript: impl Fn(&str, TranscriptSource) + Send + Sync + 'static,
    ) -> Self {
        self.on_transcript = Some(Arc::new(on_transcript));
        self
    }

    /// Attaches a callback to be invoked when a handler requests approval.
    #[inline]
    pub fn on_approval_request(
        mut self,
        on_approval: impl Fn(Approval) + Send + Sync + 'static,
    ) -> Self {
        self.on_approval = Some(Box::new(on_approval));
        self
    }

    /// Builds the agent.
    pub fn build(self) -> Result<Agent<S>, AgentError> {
        if let Some(err) = self.schema_error {
            return Err(err.into());
        }
        debug!(
            "built agent `{}` with {} message type(s)",
            self.config.name,
            self.registry.len()
        );
        Ok(Agent {
            model_client: self.model_client.with_retry(self.config.retry),
            config: self.config,
            registry: self.registry,
            fallback: self.fallback,
            responders: self.responders,
            conversation: Conversation::default(),
            state: self.state,
            task: TaskState::idle(),
            on_transcript: self.on_transcript,
            on_approval: self.on_approval,
        })
    }
}
