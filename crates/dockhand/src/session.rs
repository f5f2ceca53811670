use std::ffi::OsString;
use std::sync::Arc;

use dockhand_core::{
    Agent, AgentBuilder, AgentError, Approval, ModelClient, TaskOutcome,
    TranscriptSource,
};
use dockhand_model::ModelProvider;

use crate::code_chat::CodeChatResponder;
use crate::console::{Console, ConsoleResponder, StdioConsole};
use crate::container::{ContainerBackend, DockerCli};
use crate::handlers::*;
use crate::repo::{GitRepoLoader, RepoLoader};

/// The system prompt used unless another one is set.
pub const DEFAULT_SYSTEM_PROMPT: &str = include_str!("./system_prompt.md");

/// A docker-chat builder.
///
/// See [`DockerChat`].
pub struct DockerChatBuilder {
    agent_builder: AgentBuilder<DockerState>,
    container: Box<dyn ContainerBackend>,
    repo_loader: Box<dyn RepoLoader>,
    console: Arc<dyn Console>,
    code_chat_client: Option<ModelClient>,
    python: OsString,
}

impl DockerChatBuilder {
    /// Creates a builder with a specified model provider, which also backs
    /// the code chat.
    pub fn with_model_provider<M: ModelProvider + 'static>(
        provider: M,
    ) -> Self {
        Self::with_model_client(ModelClient::new(provider))
    }

    /// Creates a builder sharing an existing model client.
    pub fn with_model_client(model_client: ModelClient) -> Self {
        let agent_builder = AgentBuilder::with_model_client(
            model_client.clone(),
            DockerState::default(),
        )
        .with_name("docker-chat")
        .with_system_prompt(DEFAULT_SYSTEM_PROMPT);
        Self {
            agent_builder,
            container: Box::new(DockerCli::new()),
            repo_loader: Box::new(GitRepoLoader::new()),
            console: Arc::new(StdioConsole),
            code_chat_client: Some(model_client),
            python: "python3".into(),
        }
    }

    /// Sets the system prompt for the agent.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.agent_builder = self.agent_builder.with_system_prompt(prompt);
        self
    }

    /// Limits the number of messages handled per task.
    #[inline]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.agent_builder = self.agent_builder.with_max_steps(max_steps);
        self
    }

    /// Sends messages as native tool definitions instead of prompt
    /// instructions.
    #[inline]
    pub fn use_tools_api(mut self, enabled: bool) -> Self {
        self.agent_builder = self.agent_builder.use_tools_api(enabled);
        self
    }

    /// Replaces the container backend.
    #[inline]
    pub fn with_container_backend<C: ContainerBackend + 'static>(
        mut self,
        container: C,
    ) -> Self {
        self.container = Box::new(container);
        self
    }

    /// Replaces the repository loader.
    #[inline]
    pub fn with_repo_loader<L: RepoLoader + 'static>(
        mut self,
        repo_loader: L,
    ) -> Self {
        self.repo_loader = Box::new(repo_loader);
        self
    }

    /// Replaces the console used to ask the user for input.
    #[inline]
    pub fn with_console(mut self, console: Arc<dyn Console>) -> Self {
        self.console = console;
        self
    }

    /// Uses another model client for the code chat.
    #[inline]
    pub fn with_code_chat_client(mut self, model_client: ModelClient) -> Self {
        self.code_chat_client = Some(model_client);
        self
    }

    /// Answers repository questions with local heuristics only.
    #[inline]
    pub fn without_code_chat(mut self) -> Self {
        self.code_chat_client = None;
        self
    }

    /// Sets the Python interpreter running `run_python` code.
    #[inline]
    pub fn with_python<S: Into<OsString>>(mut self, python: S) -> Self {
        self.python = python.into();
        self
    }

    /// Attaches a callback to be invoked when a transcript is generated.
    #[inline]
    pub fn on_transcript(
        mut self,
        on_transcript: impl Fn(&str, TranscriptSource) + Send + Sync + 'static,
    ) -> Self {
        self.agent_builder = self.agent_builder.on_transcript(on_transcript);
        self
    }

    /// Attaches a callback to be invoked when a handler needs permission,
    /// such as before building an image or running code.
    #[inline]
    pub fn on_approval_request(
        mut self,
        on_approval: impl Fn(Approval) + Send + Sync + 'static,
    ) -> Self {
        self.agent_builder =
            self.agent_builder.on_approval_request(on_approval);
        self
    }

    /// Builds a new docker chat.
    pub fn build(self) -> Result<DockerChat, AgentError> {
        let console = Arc::clone(&self.console);
        let services = Arc::new(Services {
            container: self.container,
            repo_loader: self.repo_loader,
            console: self.console,
            code_chat_client: self.code_chat_client,
            python: self.python,
        });
        let agent = self
            .agent_builder
            .with_handler(AskUrlHandler(Arc::clone(&services)))
            .with_handler(FileExistsHandler)
            .with_handler(PythonVersionHandler)
            .with_handler(PythonDependencyHandler)
            .with_handler(ValidateDockerfileHandler(Arc::clone(&services)))
            .with_handler(FindEntrypointHandler)
            .with_handler(RunPythonHandler(services))
            .with_fallback(missing_url_fallback)
            .with_responder(CodeChatResponder)
            .with_responder(ConsoleResponder::new(console))
            .build()?;

        Ok(DockerChat { agent })
    }
}

/// An interactive session writing a Dockerfile for a repository.
///
/// The chat holds a fully configured agent, and it is basically a wrapper
/// around [`Agent`].
pub struct DockerChat {
    agent: Agent<DockerState>,
}

impl DockerChat {
    /// Runs a task with the user's message until the agent is done.
    #[inline]
    pub async fn send_message(
        &mut self,
        message: &str,
    ) -> Result<TaskOutcome, AgentError> {
        self.agent.run_task(message).await
    }

    /// Returns the current state.
    #[inline]
    pub fn state(&self) -> &DockerState {
        self.agent.state()
    }

    /// Returns the underlying agent.
    #[inline]
    pub fn agent(&self) -> &Agent<DockerState> {
        &self.agent
    }

    /// Returns the underlying agent for customization, such as disabling
    /// messages.
    #[inline]
    pub fn agent_mut(&mut self) -> &mut Agent<DockerState> {
        &mut self.agent
    }
}
