use async_trait::async_trait;

use super::{AgentError, TranscriptSource};

/// Decides what to do when the model output carries no message.
///
/// Returning `None` passes the turn on to the agent's responders.
pub trait FallbackPolicy<S>: Send + Sync {
    /// Produces content for the next turn from the unrecognized model text.
    fn fallback(&self, state: &S, input: &str) -> Option<String>;
}

impl<S, F> FallbackPolicy<S> for F
where
    F: Fn(&S, &str) -> Option<String> + Send + Sync,
{
    #[inline]
    fn fallback(&self, state: &S, input: &str) -> Option<String> {
        self(state, input)
    }
}

/// A policy that always declines.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoFallback;

impl<S> FallbackPolicy<S> for NoFallback {
    #[inline]
    fn fallback(&self, _state: &S, _input: &str) -> Option<String> {
        None
    }
}

/// Answers model text that carries no message, such as a question for the
/// user or for a delegate agent.
#[async_trait]
pub trait Responder<S>: Send + Sync
where
    S: Send + Sync + 'static,
{
    /// Returns an answer, or `None` to let the next responder try.
    async fn respond(
        &self,
        state: &S,
        message: &str,
    ) -> Result<Option<String>, AgentError>;

    /// Who the answers are attributed to in the conversation.
    fn source(&self) -> TranscriptSource {
        TranscriptSource::Agent
    }
}

#[async_trait]
impl<S, F> Responder<S> for F
where
    S: Send + Sync + 'static,
    F: Fn(&S, &str) -> Option<String> + Send + Sync,
{
    async fn respond(
        &self,
        state: &S,
        message: &str,
    ) -> Result<Option<String>, AgentError> {
        Ok(self(state, message))
    }
}
