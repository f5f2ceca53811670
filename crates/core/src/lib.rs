//! Core logic of message-driven agents: message schemas, the handler
//! registry, response parsing and the agent task loop.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

pub mod agent;
mod approval;
pub mod conversation;
pub mod message;
mod model_client;

pub use agent::{
    Agent, AgentBuilder, AgentConfig, AgentError, FallbackPolicy, LoopState,
    NoFallback, PendingInput, ResolutionChain, Resolver, Responder, StopReason,
    TaskOutcome, TranscriptSource,
};
pub use approval::Approval;
pub use message::{
    Context, Handler, HandlerError, HandlerResult, MessageRegistry,
    MessageSchema, Reply, ResponseParser, SchemaError, ToolMessage,
};
pub use model_client::{ModelClient, RetryConfig};
