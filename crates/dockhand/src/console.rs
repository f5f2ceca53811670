//! Asking the user for input.

use std::io::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use dockhand_core::{AgentError, Responder, TranscriptSource};
use tokio::io::{self, AsyncBufReadExt};

use crate::handlers::DockerState;

/// A line-oriented prompt for the user.
#[async_trait]
pub trait Console: Send + Sync {
    /// Shows `prompt` and waits for one line, without the line break.
    ///
    /// Returns `None` once the input is closed.
    async fn ask(&self, prompt: &str) -> Option<String>;
}

/// A [`Console`] on the process's standard input and output.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdioConsole;

#[async_trait]
impl Console for StdioConsole {
    async fn ask(&self, prompt: &str) -> Option<String> {
        print!("{prompt}");
        std::io::stdout().flush().ok();
        read_line().await
    }
}

/// Reads one line from standard input, without the line break.
pub async fn read_line() -> Option<String> {
    let mut stdin = io::BufReader::new(io::stdin());
    let mut line = String::new();

    match stdin.read_line(&mut line).await {
        Ok(0) => None,
        Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_owned()),
        Err(err) => {
            error!("error reading input: {err}");
            None
        }
    }
}

/// Lets the user answer model text that carries no message.
///
/// An empty answer ends the task.
pub struct ConsoleResponder {
    console: Arc<dyn Console>,
}

impl ConsoleResponder {
    /// Creates a responder asking on `console`.
    #[inline]
    pub fn new(console: Arc<dyn Console>) -> Self {
        Self { console }
    }
}

#[async_trait]
impl Responder<DockerState> for ConsoleResponder {
    async fn respond(
        &self,
        _state: &DockerState,
        _message: &str,
    ) -> Result<Option<String>, AgentError> {
        let answer = self.console.ask("> ").await;
        Ok(answer
            .map(|answer| answer.trim().to_owned())
            .filter(|answer| !answer.is_empty()))
    }

    fn source(&self) -> TranscriptSource {
        TranscriptSource::User
    }
}
