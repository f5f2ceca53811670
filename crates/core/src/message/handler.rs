use std::fmt::{self, Debug};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::Instrument;

use super::ToolMessage;
use super::error::{HandlerError, SchemaError};
use super::schema::MessageSchema;
use crate::approval::Approval;

/// The outcome of handling one message.
pub type HandlerResult<S> = Result<Reply<S>, HandlerError>;

pub(crate) type ApprovalFn = dyn Fn(Approval) + Send + Sync;

/// A successful handler result.
pub struct Reply<S> {
    /// Content for the next turn. `None` means there is nothing more to say
    /// and the task is finished.
    pub content: Option<String>,
    /// A replacement for the agent state, applied before the next turn.
    pub state: Option<S>,
}

impl<S> Reply<S> {
    /// Creates a reply that continues the task with `content`.
    #[inline]
    pub fn content<C: Into<String>>(content: C) -> Self {
        Self {
            content: Some(content.into()),
            state: None,
        }
    }

    /// Creates a reply that finishes the task.
    #[inline]
    pub fn done() -> Self {
        Self {
            content: None,
            state: None,
        }
    }

    /// Replaces the agent state once this reply is applied.
    #[inline]
    pub fn with_state(mut self, state: S) -> Self {
        self.state = Some(state);
        self
    }
}

impl<S> Debug for Reply<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("content", &self.content)
            .field("replaces_state", &self.state.is_some())
            .finish()
    }
}

/// What a handler can see and do while handling a message.
pub struct Context<'a, S> {
    state: &'a S,
    on_approval: Option<&'a ApprovalFn>,
}

impl<'a, S> Context<'a, S> {
    #[inline]
    pub(crate) fn new(
        state: &'a S,
        on_approval: Option<&'a ApprovalFn>,
    ) -> Self {
        Self { state, on_approval }
    }

    /// Returns a snapshot of the agent state for this turn.
    #[inline]
    pub fn state(&self) -> &'a S {
        self.state
    }

    /// Asks the user for permission and waits for the answer.
    ///
    /// Without an approval handler on the agent, every request is approved.
    pub async fn request_approval<W, J>(
        &self,
        what: W,
        justification: J,
    ) -> Result<(), HandlerError>
    where
        W: Into<String>,
        J: Into<String>,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let mut approval = Approval::new(what, justification);
        approval.on_result = Some(Box::new(move |result| {
            result_tx.send(result).ok();
        }));

        if let Some(on_approval) = self.on_approval {
            on_approval(approval);
        } else {
            approval.approve();
        }

        let Ok(result) = result_rx.await else {
            return Err(HandlerError::rejected());
        };
        trace!("approval result: {result:?}");
        if result.approved {
            return Ok(());
        }
        let mut err = HandlerError::rejected();
        if let Some(why) = result.why {
            err = err.with_reason(why);
        }
        Err(err)
    }
}

/// Handles one message type for agents with state `S`.
///
/// Handlers never mutate the agent directly. They read the state snapshot
/// from the [`Context`] and may return a replacement with
/// [`Reply::with_state`].
#[async_trait]
pub trait Handler<S>: Send + Sync + 'static
where
    S: Send + Sync + 'static,
{
    /// The message type this handler accepts.
    type Message: ToolMessage;

    /// Handles a validated message.
    async fn handle(
        &self,
        message: Self::Message,
        cx: &Context<'_, S>,
    ) -> HandlerResult<S>;
}

#[async_trait]
trait HandlerObject<S>: Send + Sync {
    async fn dispatch(
        &self,
        arguments: Value,
        cx: &Context<'_, S>,
    ) -> HandlerResult<S>;
}

struct HandlerObjectImpl<H>(H);

#[async_trait]
impl<S, H> HandlerObject<S> for HandlerObjectImpl<H>
where
    S: Send + Sync + 'static,
    H: Handler<S>,
{
    async fn dispatch(
        &self,
        arguments: Value,
        cx: &Context<'_, S>,
    ) -> HandlerResult<S> {
        let message: H::Message =
            serde_json::from_value(arguments).map_err(|err| {
                HandlerError::invalid_input().with_reason(format!("{err}"))
            })?;
        self.0.handle(message, cx).await
    }
}

/// A handler bound to the schema of its message type.
pub struct BoundHandler<S> {
    schema: Arc<MessageSchema>,
    object: Arc<dyn HandlerObject<S>>,
}

impl<S> Clone for BoundHandler<S> {
    fn clone(&self) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            object: Arc::clone(&self.object),
        }
    }
}

impl<S> Debug for BoundHandler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundHandler")
            .field("request", &self.schema.request())
            .finish_non_exhaustive()
    }
}

impl<S> BoundHandler<S> {
    /// Returns the request name this handler is bound to.
    #[inline]
    pub fn request(&self) -> &str {
        self.schema.request()
    }

    /// Returns the schema of the handled message type.
    #[inline]
    pub fn schema(&self) -> &MessageSchema {
        &self.schema
    }

    /// Returns `true` if both values refer to the same registered handler.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.object, &other.object)
    }
}

impl<S: Send + Sync + 'static> BoundHandler<S> {
    pub(crate) fn new<H: Handler<S>>(handler: H) -> Result<Self, SchemaError> {
        let schema = MessageSchema::of::<H::Message>()?;
        Ok(Self {
            schema: Arc::new(schema),
            object: Arc::new(HandlerObjectImpl(handler)),
        })
    }

    pub(crate) async fn dispatch(
        &self,
        arguments: Map<String, Value>,
        cx: &Context<'_, S>,
    ) -> HandlerResult<S> {
        trace!("dispatching with args: {arguments:?}");
        self.object
            .dispatch(Value::Object(arguments), cx)
            .instrument(debug_span!("handler", request = self.request()))
            .await
    }
}
