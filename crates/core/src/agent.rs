//! Agents and their task loop.
//!
//! An [`Agent`] owns a model client, a [`MessageRegistry`], its conversation
//! and a state value of type `S`. A task runs as a state machine driven by
//! [`Agent::step`]:
//!
//! ```text
//!                  parsed
//! AwaitingModel ----------> Dispatching --(no message)--> AwaitingUserFallback
//!      ^                        |                                |
//!      +------(content)---------+                                |
//!      +------(fallback or responder content)--------------------+
//!
//! Any state --(done token, no content, step budget)--> Done
//! ```

mod builder;
mod fallback;
mod prompt;
mod resolve;
mod task;
#[cfg(test)]
mod tests;

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::sync::Arc;

pub use builder::{AgentBuilder, AgentConfig};
pub use fallback::{FallbackPolicy, NoFallback, Responder};
pub use resolve::{ResolutionChain, Resolver};
pub use task::{LoopState, PendingInput, StopReason, TaskOutcome};

use crate::conversation::Conversation;
use crate::message::{ApprovalFn, MessageRegistry, SchemaError};
use crate::model_client::ModelClient;
use task::TaskState;

pub(crate) type TranscriptFn = dyn Fn(&str, TranscriptSource) + Send + Sync;

/// The source of a transcript.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TranscriptSource {
    /// Input from the user.
    User,
    /// Text generated by the model.
    Assistant,
    /// Content produced by the agent itself: handler results, fallback
    /// messages and answers from sub-agents.
    Agent,
}

/// Errors that stop a task.
///
/// Everything else that can go wrong during a task, such as malformed
/// messages or failing handlers, is turned into content for the next turn.
#[derive(Debug)]
pub enum AgentError {
    /// A message type cannot be enabled.
    Schema(SchemaError),
    /// A collaborator such as the model provider cannot be reached.
    CollaboratorUnavailable(String),
}

impl AgentError {
    /// Creates a `CollaboratorUnavailable` error.
    #[inline]
    pub fn collaborator_unavailable<S: Into<String>>(reason: S) -> Self {
        Self::CollaboratorUnavailable(reason.into())
    }
}

impl Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::Schema(err) => write!(f, "{err}"),
            AgentError::CollaboratorUnavailable(reason) => {
                write!(f, "Collaborator unavailable: {reason}")
            }
        }
    }
}

impl StdError for AgentError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            AgentError::Schema(err) => Some(err),
            AgentError::CollaboratorUnavailable(_) => None,
        }
    }
}

impl From<SchemaError> for AgentError {
    #[inline]
    fn from(err: SchemaError) -> Self {
        Self::Schema(err)
    }
}

/// An agent instance, which maintains a conversation, a model client, the
/// enabled messages and its own state.
///
/// Agents never share mutable state. An agent delegating to another one owns
/// the delegate, and each of them runs its own task loop.
pub struct Agent<S> {
    model_client: ModelClient,
    config: AgentConfig,
    registry: MessageRegistry<S>,
    fallback: Box<dyn FallbackPolicy<S>>,
    responders: Vec<Box<dyn Responder<S>>>,
    conversation: Conversation,
    state: S,
    task: TaskState,
    on_transcript: Option<Arc<TranscriptFn>>,
    on_approval: Option<Box<ApprovalFn>>,
}

impl<S> Agent<S> {
    /// Returns the configuration.
    #[inline]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Returns the current state.
    #[inline]
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Returns the enabled messages.
    #[inline]
    pub fn registry(&self) -> &MessageRegistry<S> {
        &self.registry
    }

    /// Returns the enabled messages for modification.
    ///
    /// Changes take effect from the next model request.
    #[inline]
    pub fn registry_mut(&mut self) -> &mut MessageRegistry<S> {
        &mut self.registry
    }

    /// Returns the conversation so far.
    #[inline]
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Forgets the conversation and abandons the current task, so that the
    /// next task starts from the system prompt alone.
    pub fn clear_conversation(&mut self) {
        self.conversation = Conversation::default();
        self.task = TaskState::idle();
    }

    /// Returns the state of the current task loop.
    ///
    /// [`LoopState::Done`] before the first task is started.
    #[inline]
    pub fn loop_state(&self) -> LoopState {
        self.task.loop_state
    }

    /// Returns the input awaiting the next model request.
    #[inline]
    pub fn pending_input(&self) -> Option<&PendingInput> {
        self.task.pending.as_ref()
    }

    /// Returns why the current task stopped, if it has.
    #[inline]
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.task.stop_reason
    }

    /// Returns the number of dispatch turns of the current task.
    #[inline]
    pub fn dispatches(&self) -> usize {
        self.task.dispatches
    }

    fn emit_transcript(&self, transcript: &str, source: TranscriptSource) {
        if let Some(on_transcript) = &self.on_transcript {
            on_transcript(transcript, source);
        }
    }
}
