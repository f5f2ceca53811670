//! A docker-chat agent that writes and validates a Dockerfile for a code
//! repository, built on `dockhand-core`.
//!
//! The crate includes a CLI tool for using in the terminal. The collaborators
//! it talks to, namely the container engine, the repository loader and the
//! console, are traits so that hosts and tests can substitute their own.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

pub mod code_chat;
pub mod console;
pub mod container;
mod handlers;
pub mod inspect;
pub mod messages;
pub mod repo;
mod session;

pub use handlers::{
    DEFAULT_URL, DockerState, PROPOSED_DOCKERFILE, Repository, VALIDATION_TAG,
};
pub use session::{DEFAULT_SYSTEM_PROMPT, DockerChat, DockerChatBuilder};

/// Re-exports of [`dockhand_core`] crate.
pub mod core {
    pub use dockhand_core::*;
}
