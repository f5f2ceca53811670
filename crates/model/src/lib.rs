//! Provider-neutral protocol between agents and language models.
//!
//! Agents build a [`ModelRequest`] from their conversation and the tool
//! definitions they have enabled, and read back a stream of
//! [`ModelResponseEvent`]s. A model may answer with free text, with native
//! tool calls, or both; interpreting the answer is up to the agent.
//!
//! Nothing in this crate performs I/O. Provider crates implement
//! [`ModelProvider`] and [`ModelResponse`] on top of their own transport.

#![deny(missing_docs)]

mod error;
mod provider;
mod request;
mod response;

pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
