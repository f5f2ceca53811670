use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dockhand_model::{ModelMessage, ModelRequest};
use dockhand_test_model::{PresetEvent, PresetResponse, TestModelProvider};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::*;
use crate::RetryConfig;
use crate::message::{
    Context, Handler, HandlerError, HandlerResult, Reply, ToolMessage,
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Repo {
    files: Vec<String>,
}

#[derive(Serialize, Deserialize, JsonSchema)]
struct FileExists {
    /// Name of the file.
    filename: String,
}

impl ToolMessage for FileExists {
    const REQUEST: &'static str = "file_exists";

    fn purpose() -> &'static str {
        "To check if a file <filename> exists in the repo."
    }

    fn examples() -> Vec<Self> {
        vec![FileExists {
            filename: "blah.md".to_owned(),
        }]
    }
}

struct FileExistsHandler;

#[async_trait]
impl Handler<Repo> for FileExistsHandler {
    type Message = FileExists;

    async fn handle(
        &self,
        message: FileExists,
        cx: &Context<'_, Repo>,
    ) -> HandlerResult<Repo> {
        let filename = message.filename.trim();
        if cx.state().files.iter().any(|file| file == filename) {
            Ok(Reply::content(format!(
                "Yes, there is a file named {filename} in the repo."
            )))
        } else {
            Ok(Reply::content(format!(
                "No, there is no file named {filename} in the repo."
            )))
        }
    }
}

#[derive(Serialize, Deserialize, JsonSchema)]
struct PythonVersion {}

impl ToolMessage for PythonVersion {
    const REQUEST: &'static str = "python_version";

    fn purpose() -> &'static str {
        "To check which version of Python is needed."
    }

    fn examples() -> Vec<Self> {
        vec![PythonVersion {}]
    }
}

struct PythonVersionHandler;

#[async_trait]
impl Handler<Repo> for PythonVersionHandler {
    type Message = PythonVersion;

    async fn handle(
        &self,
        _message: PythonVersion,
        _cx: &Context<'_, Repo>,
    ) -> HandlerResult<Repo> {
        Ok(Reply::content("3.9"))
    }
}

#[derive(Serialize, Deserialize, JsonSchema)]
struct LoadRepo {
    files: Vec<String>,
}

impl ToolMessage for LoadRepo {
    const REQUEST: &'static str = "load_repo";

    fn purpose() -> &'static str {
        "To load the <files> of a repo."
    }

    fn examples() -> Vec<Self> {
        vec![LoadRepo {
            files: vec!["setup.py".to_owned()],
        }]
    }
}

struct LoadRepoHandler;

#[async_trait]
impl Handler<Repo> for LoadRepoHandler {
    type Message = LoadRepo;

    async fn handle(
        &self,
        message: LoadRepo,
        _cx: &Context<'_, Repo>,
    ) -> HandlerResult<Repo> {
        let content = format!("Loaded {} file(s).", message.files.len());
        Ok(Reply::content(content).with_state(Repo {
            files: message.files,
        }))
    }
}

#[derive(Serialize, Deserialize, JsonSchema)]
struct Finish {}

impl ToolMessage for Finish {
    const REQUEST: &'static str = "finish";

    fn purpose() -> &'static str {
        "To end the task."
    }

    fn examples() -> Vec<Self> {
        vec![Finish {}]
    }
}

struct FinishHandler;

#[async_trait]
impl Handler<Repo> for FinishHandler {
    type Message = Finish;

    async fn handle(
        &self,
        _message: Finish,
        _cx: &Context<'_, Repo>,
    ) -> HandlerResult<Repo> {
        Ok(Reply::done())
    }
}

#[derive(Serialize, Deserialize, JsonSchema)]
struct BuildImage {}

impl ToolMessage for BuildImage {
    const REQUEST: &'static str = "build_image";

    fn purpose() -> &'static str {
        "To build the proposed image."
    }

    fn examples() -> Vec<Self> {
        vec![BuildImage {}]
    }
}

/// Asks for approval before failing to reach the docker daemon.
struct BuildImageHandler;

#[async_trait]
impl Handler<Repo> for BuildImageHandler {
    type Message = BuildImage;

    async fn handle(
        &self,
        _message: BuildImage,
        cx: &Context<'_, Repo>,
    ) -> HandlerResult<Repo> {
        cx.request_approval("Build an image", "To validate the Dockerfile")
            .await?;
        Err(HandlerError::execution_error()
            .with_reason("docker daemon is not running"))
    }
}

fn script(
    turns: impl IntoIterator<Item = PresetResponse>,
) -> TestModelProvider {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_system_step();
    for turn in turns {
        model_provider.add_turn(turn);
    }
    model_provider
}

fn builder(model_provider: TestModelProvider) -> AgentBuilder<Repo> {
    AgentBuilder::with_model_provider(model_provider, Repo::default())
        .with_handler(FileExistsHandler)
        .with_handler(PythonVersionHandler)
        .with_handler(LoadRepoHandler)
        .with_handler(FinishHandler)
        .with_handler(BuildImageHandler)
}

fn last_user_text(req: &ModelRequest) -> Option<&str> {
    match req.messages.last()? {
        ModelMessage::User { content } => Some(content),
        _ => None,
    }
}

#[tokio::test]
async fn test_handler_without_content_finishes() {
    let model_provider =
        script([PresetResponse::with_text(r#"{"request": "finish"}"#)]);
    let mut agent = builder(model_provider).build().unwrap();
    assert_eq!(agent.loop_state(), LoopState::Done);
    assert_eq!(agent.stop_reason(), None);

    agent.start_task("Wrap up");
    assert_eq!(agent.loop_state(), LoopState::AwaitingModel);
    assert_eq!(agent.step().await.unwrap(), LoopState::Dispatching);
    assert_eq!(agent.step().await.unwrap(), LoopState::Done);
    assert_eq!(agent.stop_reason(), Some(StopReason::NoFurtherContent));
    assert_eq!(agent.dispatches(), 1);
    assert_eq!(agent.pending_input(), None);
}

#[tokio::test]
async fn test_handler_content_continues() {
    let model_provider = script([PresetResponse::with_text(
        r#"{"request": "python_version"}"#,
    )]);
    let mut agent = builder(model_provider).build().unwrap();

    agent.start_task("Which Python?");
    agent.step().await.unwrap();
    assert_eq!(agent.step().await.unwrap(), LoopState::AwaitingModel);
    assert_eq!(
        agent.pending_input(),
        Some(&PendingInput::Text("3.9".to_owned()))
    );
}

#[tokio::test]
async fn test_file_exists_conversation() {
    let model_provider = script([
        PresetResponse::with_text(
            r#"{"request": "load_repo", "files": ["README.md", "setup.py"]}"#,
        ),
        PresetResponse::with_text(
            r#"Let me check. {"request":"file_exists","filename":"README.md"}"#,
        ),
        PresetResponse::with_text("DONE The repo has a README."),
    ]);
    let mut agent = builder(model_provider.clone()).build().unwrap();

    let outcome = agent.run_task("Does the repo have a README?").await;
    let outcome = outcome.unwrap();
    assert_eq!(outcome.stop_reason, StopReason::Finished);
    assert_eq!(outcome.output.as_deref(), Some("The repo has a README."));
    assert_eq!(outcome.dispatches, 2);
    assert_eq!(agent.state().files, ["README.md", "setup.py"]);

    let requests = model_provider.received_requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(last_user_text(&requests[1]), Some("Loaded 2 file(s)."));
    assert_eq!(
        last_user_text(&requests[2]),
        Some("Yes, there is a file named README.md in the repo.")
    );
    // Every request starts with the system prompt describing the tools.
    let ModelMessage::System {
        content: system_prompt,
    } = &requests[0].messages[0]
    else {
        panic!("expected a system prompt");
    };
    assert!(system_prompt.contains("TOOL: file_exists"));
    assert!(requests[0].tools.is_empty());
}

#[tokio::test]
async fn test_handler_error_becomes_content() {
    let model_provider =
        script([PresetResponse::with_text(r#"{"request": "build_image"}"#)]);
    let mut agent = builder(model_provider).build().unwrap();

    agent.start_task("Validate the Dockerfile");
    agent.step().await.unwrap();
    assert_eq!(agent.step().await.unwrap(), LoopState::AwaitingModel);
    let pending = agent.pending_input().unwrap().content();
    assert_eq!(
        pending,
        "Error while handling `build_image`: Execution error: docker daemon \
         is not running"
    );
}

#[tokio::test]
async fn test_rejected_approval() {
    let model_provider =
        script([PresetResponse::with_text(r#"{"request": "build_image"}"#)]);
    let approvals = Arc::new(Mutex::new(vec![]));
    let mut agent = builder(model_provider)
        .on_approval_request({
            let approvals = Arc::clone(&approvals);
            move |approval| {
                approvals.lock().unwrap().push(approval.what().to_owned());
                approval.reject(Some("not now".to_owned()));
            }
        })
        .build()
        .unwrap();

    agent.start_task("Validate the Dockerfile");
    agent.step().await.unwrap();
    agent.step().await.unwrap();
    let pending = agent.pending_input().unwrap().content();
    assert!(pending.contains("not now"), "{pending}");
    assert_eq!(*approvals.lock().unwrap(), ["Build an image"]);
}

#[tokio::test]
async fn test_malformed_message_is_corrected() {
    let model_provider =
        script([PresetResponse::with_text(r#"{"request": "file_exists"}"#)]);
    let mut agent = builder(model_provider).build().unwrap();

    agent.start_task("Is there a setup.py?");
    agent.step().await.unwrap();
    assert_eq!(agent.step().await.unwrap(), LoopState::AwaitingModel);
    let pending = agent.pending_input().unwrap().content();
    assert!(pending.contains("wrong type: filename."), "{pending}");
    assert!(pending.contains(r#""filename":"blah.md""#), "{pending}");
}

#[tokio::test]
async fn test_fallback_policy() {
    let model_provider = script([
        PresetResponse::with_text("What is the URL of the repo?"),
        PresetResponse::with_text("DONE"),
    ]);
    let mut agent = builder(model_provider.clone())
        .with_fallback(|repo: &Repo, input: &str| {
            (repo.files.is_empty() && !input.contains("URL"))
                .then(|| "Ask me for the URL first.".to_owned())
        })
        .build()
        .unwrap();

    agent.start_task("Help me dockerize my repo");
    agent.step().await.unwrap();
    assert_eq!(agent.step().await.unwrap(), LoopState::AwaitingUserFallback);
    // The text mentions the URL, so the policy declines and nobody answers.
    assert_eq!(agent.step().await.unwrap(), LoopState::Done);
    assert_eq!(agent.stop_reason(), Some(StopReason::Finished));

    let model_provider = script([
        PresetResponse::with_text("Sure, let me help."),
        PresetResponse::with_text("DONE"),
    ]);
    let mut agent = builder(model_provider.clone())
        .with_fallback(|repo: &Repo, input: &str| {
            (repo.files.is_empty() && !input.contains("URL"))
                .then(|| "Ask me for the URL first.".to_owned())
        })
        .build()
        .unwrap();
    let outcome = agent.run_task("Help me dockerize my repo").await.unwrap();
    assert_eq!(outcome.stop_reason, StopReason::Finished);
    assert_eq!(outcome.output, None);
    let requests = model_provider.received_requests();
    assert_eq!(last_user_text(&requests[1]), Some("Ask me for the URL first."));
}

struct Console {
    answers: Mutex<Vec<&'static str>>,
}

#[async_trait]
impl Responder<Repo> for Console {
    async fn respond(
        &self,
        _state: &Repo,
        _message: &str,
    ) -> Result<Option<String>, AgentError> {
        Ok(self.answers.lock().unwrap().pop().map(str::to_owned))
    }

    fn source(&self) -> TranscriptSource {
        TranscriptSource::User
    }
}

struct Unavailable;

#[async_trait]
impl Responder<Repo> for Unavailable {
    async fn respond(
        &self,
        _state: &Repo,
        _message: &str,
    ) -> Result<Option<String>, AgentError> {
        Err(AgentError::collaborator_unavailable("console closed"))
    }
}

#[tokio::test]
async fn test_responders() {
    let model_provider = script([
        PresetResponse::with_text("What is the URL of the repo?"),
        PresetResponse::with_text("Thanks! Anything else?"),
    ]);
    let mut agent = builder(model_provider.clone())
        .with_responder(|_: &Repo, _: &str| -> Option<String> { None })
        .with_responder(Console {
            answers: Mutex::new(vec!["https://github.com/example/repo"]),
        })
        .build()
        .unwrap();

    let outcome = agent.run_task("Help me dockerize my repo").await.unwrap();
    assert_eq!(outcome.stop_reason, StopReason::Finished);
    // Once the console has nothing more to say, the model text is the
    // final answer.
    assert_eq!(outcome.output.as_deref(), Some("Thanks! Anything else?"));

    let requests = model_provider.received_requests();
    assert_eq!(
        last_user_text(&requests[1]),
        Some("https://github.com/example/repo")
    );
    let sources = agent
        .conversation()
        .items()
        .iter()
        .map(|item| item.source())
        .collect::<Vec<_>>();
    assert_eq!(
        sources,
        [
            TranscriptSource::User,
            TranscriptSource::Assistant,
            TranscriptSource::User,
            TranscriptSource::Assistant,
        ]
    );

    let model_provider = script([PresetResponse::with_text("Anyone there?")]);
    let mut agent = builder(model_provider)
        .with_responder(Unavailable)
        .build()
        .unwrap();
    let err = agent.run_task("Hello").await.unwrap_err();
    assert!(matches!(err, AgentError::CollaboratorUnavailable(_)));
}

#[tokio::test]
async fn test_step_budget() {
    let model_provider = script([
        PresetResponse::with_text(r#"{"request": "python_version"}"#),
        PresetResponse::with_text(r#"{"request": "python_version"}"#),
        PresetResponse::with_text(r#"{"request": "python_version"}"#),
        PresetResponse::with_text(r#"{"request": "python_version"}"#),
    ]);
    let mut agent = builder(model_provider.clone())
        .with_max_steps(3)
        .build()
        .unwrap();

    let outcome = agent.run_task("Which Python?").await.unwrap();
    assert_eq!(outcome.stop_reason, StopReason::StepLimitExceeded);
    assert_eq!(outcome.dispatches, 3);
    assert_eq!(outcome.output.as_deref(), Some("3.9"));
    assert_eq!(model_provider.received_requests().len(), 3);
}

#[tokio::test]
async fn test_default_echo() {
    let model_provider =
        script([PresetResponse::with_text("The repo uses Python 3.9.")]);
    let mut agent = builder(model_provider).build().unwrap();
    let outcome = agent.run_task("Which Python?").await.unwrap();
    assert_eq!(
        outcome,
        TaskOutcome {
            stop_reason: StopReason::Finished,
            output: Some("The repo uses Python 3.9.".to_owned()),
            dispatches: 1,
        }
    );
}

#[tokio::test]
async fn test_disabled_message_is_not_dispatched() {
    let model_provider = script([PresetResponse::with_text(
        r#"{"request": "python_version"}"#,
    )]);
    let mut agent = builder(model_provider).build().unwrap();
    assert!(agent.registry_mut().disable("python_version"));

    let outcome = agent.run_task("Which Python?").await.unwrap();
    assert_eq!(outcome.stop_reason, StopReason::Finished);
    assert_eq!(
        outcome.output.as_deref(),
        Some(r#"{"request": "python_version"}"#)
    );
}

#[tokio::test(start_paused = true)]
async fn test_transient_model_errors() {
    let model_provider = script([
        PresetResponse::with_text("DONE 3.9").with_failures(2)
    ]);
    let mut agent = builder(model_provider.clone()).build().unwrap();
    let outcome = agent.run_task("Which Python?").await.unwrap();
    assert_eq!(outcome.output.as_deref(), Some("3.9"));
    assert_eq!(model_provider.received_requests().len(), 3);
}

#[tokio::test]
async fn test_unavailable_model() {
    let model_provider = script([]);
    let mut agent = builder(model_provider).build().unwrap();
    let err = agent.run_task("Hello").await.unwrap_err();
    assert!(matches!(err, AgentError::CollaboratorUnavailable(_)));
    // The loop stays where it failed.
    assert_eq!(agent.loop_state(), LoopState::AwaitingModel);
}

#[tokio::test]
async fn test_step_again_after_model_error() {
    let model_provider = script([
        PresetResponse::with_text("DONE Hi there.").with_failures(1)
    ]);
    let model_client = ModelClient::new(model_provider.clone()).with_retry(
        RetryConfig {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(1),
            max_attempts: 1,
        },
    );
    let mut agent =
        AgentBuilder::with_model_client(model_client, Repo::default())
            .build()
            .unwrap();

    agent.start_task("Hello");
    let err = agent.step().await.unwrap_err();
    assert!(matches!(err, AgentError::CollaboratorUnavailable(_)));
    assert_eq!(agent.loop_state(), LoopState::AwaitingModel);
    assert_eq!(agent.conversation().len(), 1);

    // The same request is sent again, without recording the input twice.
    assert_eq!(agent.step().await.unwrap(), LoopState::Done);
    assert_eq!(agent.stop_reason(), Some(StopReason::Finished));
    let requests = model_provider.received_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].messages, requests[1].messages);
    assert_eq!(last_user_text(&requests[1]), Some("Hello"));
}

#[tokio::test]
async fn test_native_tool_calls() {
    let model_provider = script([
        PresetResponse::with_events([
            PresetEvent::text("Checking."),
            PresetEvent::tool_call(
                "call_1",
                "file_exists",
                json!({ "filename": "setup.py" }),
            ),
        ]),
        PresetResponse::with_text("DONE No setup.py."),
    ]);
    let mut agent = builder(model_provider.clone())
        .use_tools_api(true)
        .build()
        .unwrap();

    agent.start_task("Is there a setup.py?");
    agent.step().await.unwrap();
    agent.step().await.unwrap();
    assert_eq!(
        agent.pending_input(),
        Some(&PendingInput::ToolResult {
            call_id: "call_1".to_owned(),
            content: "No, there is no file named setup.py in the repo."
                .to_owned(),
        })
    );
    let outcome = agent.run().await.unwrap();
    assert_eq!(outcome.output.as_deref(), Some("No setup.py."));

    let requests = model_provider.received_requests();
    assert_eq!(requests[0].tools.len(), 5);
    let ModelMessage::System {
        content: system_prompt,
    } = &requests[0].messages[0]
    else {
        panic!("expected a system prompt");
    };
    assert!(!system_prompt.contains("TOOL: file_exists"));
    let ModelMessage::Assistant(assistant) = &requests[1].messages[2] else {
        panic!("expected the assistant message");
    };
    assert_eq!(assistant.tool_calls[0].id, "call_1");
    assert!(matches!(
        &requests[1].messages[3],
        ModelMessage::Tool(result) if result.id == "call_1"
    ));
}

#[tokio::test]
async fn test_transcripts() {
    let model_provider = script([
        PresetResponse::with_events([
            PresetEvent::text("{\"request\": "),
            PresetEvent::text("\"python_version\"}"),
        ]),
        PresetResponse::with_text("DONE"),
    ]);
    let transcripts = Arc::new(Mutex::new(vec![]));
    let mut agent = builder(model_provider)
        .on_transcript({
            let transcripts = Arc::clone(&transcripts);
            move |transcript, source| {
                transcripts
                    .lock()
                    .unwrap()
                    .push((source, transcript.to_owned()));
            }
        })
        .build()
        .unwrap();

    let outcome = agent.run_task("Which Python?").await.unwrap();
    assert_eq!(outcome.stop_reason, StopReason::Finished);
    assert_eq!(outcome.output, None);
    assert_eq!(
        *transcripts.lock().unwrap(),
        [
            (TranscriptSource::User, "Which Python?".to_owned()),
            (TranscriptSource::Assistant, "{\"request\": ".to_owned()),
            (TranscriptSource::Assistant, "\"python_version\"}".to_owned()),
            (TranscriptSource::Agent, "3.9".to_owned()),
            (TranscriptSource::Assistant, "DONE".to_owned()),
        ]
    );
}

#[test]
fn test_invalid_message_type() {
    #[derive(Serialize, Deserialize, JsonSchema)]
    struct Shadowing {
        request: String,
    }

    impl ToolMessage for Shadowing {
        const REQUEST: &'static str = "shadowing";

        fn purpose() -> &'static str {
            "Never valid."
        }

        fn examples() -> Vec<Self> {
            vec![]
        }
    }

    struct Noop;

    #[async_trait]
    impl Handler<Repo> for Noop {
        type Message = Shadowing;

        async fn handle(
            &self,
            _message: Shadowing,
            _cx: &Context<'_, Repo>,
        ) -> HandlerResult<Repo> {
            Ok(Reply::done())
        }
    }

    let result = builder(TestModelProvider::default())
        .with_handler(Noop)
        .build();
    assert!(matches!(result, Err(AgentError::Schema(_))));
}
