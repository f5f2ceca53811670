//! A terminal chat that writes and validates a Dockerfile for a repository.

#[macro_use]
extern crate tracing;

use std::env;
use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dockhand::DockerChatBuilder;
use dockhand::console::{Console, read_line};
use dockhand::container::DockerCli;
use dockhand::core::{
    AgentError, Approval, StopReason, TaskOutcome, TranscriptSource,
};
use dockhand_openai_model::{
    AzureConfigBuilder, OpenAIConfig, OpenAIConfigBuilder, OpenAIProvider,
};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;

enum UiEvent {
    Idle(Result<TaskOutcome, AgentError>),
    Transcript(String, TranscriptSource),
    Approval(Approval),
    Ask(String, oneshot::Sender<Option<String>>),
}

/// Forwards questions to the UI loop, which owns the terminal.
struct UiConsole {
    event_tx: mpsc::UnboundedSender<UiEvent>,
}

#[async_trait]
impl Console for UiConsole {
    async fn ask(&self, prompt: &str) -> Option<String> {
        let (answer_tx, answer_rx) = oneshot::channel();
        self.event_tx
            .send(UiEvent::Ask(prompt.to_owned(), answer_tx))
            .ok()?;
        answer_rx.await.ok().flatten()
    }
}

const BAR_CHAR: &str = "▎";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match model_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return;
        }
    };
    info!("using model {}", config.model());
    let model_provider = OpenAIProvider::new(config);

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let console = Arc::new(UiConsole {
        event_tx: event_tx.clone(),
    });

    let mut builder = DockerChatBuilder::with_model_provider(model_provider)
        .with_container_backend(DockerCli::new())
        .with_console(console.clone())
        .use_tools_api(env_flag("DOCKHAND_USE_TOOLS_API"))
        .on_transcript({
            let event_tx = event_tx.clone();
            move |transcript, source| {
                event_tx
                    .send(UiEvent::Transcript(transcript.to_owned(), source))
                    .ok();
            }
        })
        .on_approval_request({
            let event_tx = event_tx.clone();
            move |approval| {
                event_tx.send(UiEvent::Approval(approval)).ok();
            }
        });
    if let Ok(max_steps) = env::var("DOCKHAND_MAX_STEPS") {
        match max_steps.trim().parse() {
            Ok(max_steps) => builder = builder.with_max_steps(max_steps),
            Err(err) => {
                warn!("ignoring DOCKHAND_MAX_STEPS={max_steps}: {err}")
            }
        }
    }
    let mut chat = match builder.build() {
        Ok(chat) => chat,
        Err(err) => {
            eprintln!("failed to set up the agent: {err}");
            return;
        }
    };

    println!(
        "{}",
        "Tell me what you want to containerize, e.g. \"Write a Dockerfile \
         for my repo\". Press Ctrl-D to quit."
            .bright_black()
    );

    let driver = async {
        loop {
            let Some(line) = console.ask("> ").await else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let result = chat.send_message(line).await;
            if event_tx.send(UiEvent::Idle(result)).is_err() {
                break;
            }
        }
    };

    select! {
        _ = driver => {}
        _ = run_ui(event_rx) => {}
    }
}

async fn run_ui(mut event_rx: mpsc::UnboundedReceiver<UiEvent>) {
    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .map(|style| style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"))
        .unwrap_or_else(|_| ProgressStyle::default_spinner());

    let mut progress_bar: Option<ProgressBar> = None;
    let mut streaming = false;

    loop {
        if !streaming {
            // Create a new progress bar if it has been finished.
            progress_bar
                .get_or_insert_with(|| {
                    let progress_bar = ProgressBar::new_spinner();
                    progress_bar.set_style(progress_style.clone());
                    progress_bar.set_message("🤔 Thinking...");
                    progress_bar
                })
                .inc(1);
        }

        let sleep = sleep(Duration::from_millis(100));
        let event = select! {
            event = event_rx.recv() => {
                let Some(event) = event else {
                    break;
                };
                event
            },
            _ = sleep => {
                continue;
            }
        };

        // Finish the progress bar before printing anything else.
        if let Some(progress_bar) = progress_bar.take() {
            progress_bar.finish_and_clear();
        }
        let is_delta = matches!(
            event,
            UiEvent::Transcript(_, TranscriptSource::Assistant)
        );
        if streaming && !is_delta {
            println!();
            streaming = false;
        }

        match event {
            UiEvent::Transcript(delta, TranscriptSource::Assistant) => {
                if !streaming {
                    print!("{}🤖 ", BAR_CHAR.bright_cyan());
                    streaming = true;
                }
                print!("{}", delta.bright_white());
                std::io::stdout().flush().ok();
            }
            UiEvent::Transcript(transcript, TranscriptSource::Agent) => {
                let bar = BAR_CHAR.bright_black();
                for line in transcript.lines() {
                    println!("{bar}{}", line.bright_black());
                }
            }
            UiEvent::Transcript(_, TranscriptSource::User) => {}
            UiEvent::Approval(approval) => {
                let bar = BAR_CHAR.bright_yellow();
                println!("\n{bar}⚠️  {}", approval.justification());
                for line in approval.what().lines() {
                    println!("{bar}{}", line.bright_white().bold());
                }
                print!("Proceed? [Y/n]: ");
                std::io::stdout().flush().ok();

                let Some(line) = read_line().await else {
                    approval.reject(None);
                    break;
                };
                let line = line.trim();
                if line.is_empty() || line.eq_ignore_ascii_case("y") {
                    approval.approve();
                } else {
                    approval.reject(Some("The user declined.".to_owned()));
                }
                println!();
            }
            UiEvent::Ask(prompt, answer_tx) => {
                print!("{}", prompt.bright_blue());
                std::io::stdout().flush().ok();
                let line = read_line().await;
                let closed = line.is_none();
                answer_tx.send(line).ok();
                if closed {
                    break;
                }
            }
            UiEvent::Idle(result) => print_outcome(result),
        }
    }
}

fn print_outcome(result: Result<TaskOutcome, AgentError>) {
    match result {
        Ok(outcome) => {
            if let Some(output) = outcome.output {
                println!("{}✅ {}", BAR_CHAR.bright_green(), output.bold());
            }
            if outcome.stop_reason == StopReason::StepLimitExceeded {
                println!(
                    "{}",
                    format!(
                        "Stopped after {} steps. Send a message to continue.",
                        outcome.dispatches
                    )
                    .yellow()
                );
            }
        }
        Err(err) => {
            error!("task failed: {err}");
            println!("{}", format!("❌ {err}").red());
        }
    }
}

fn model_config() -> Result<OpenAIConfig, String> {
    if let Ok(api_key) = env::var("AZURE_OPENAI_API_KEY") {
        let var = |name| env::var(name).unwrap_or_default();
        let mut builder = AzureConfigBuilder::with_api_key(api_key)
            .with_api_base(var("AZURE_OPENAI_API_BASE"))
            .with_deployment_name(var("AZURE_OPENAI_DEPLOYMENT_NAME"))
            .with_model_name(var("AZURE_OPENAI_MODEL_NAME"));
        if let Ok(version) = env::var("AZURE_OPENAI_API_VERSION") {
            builder = builder.with_api_version(version);
        }
        return builder
            .build()
            .map_err(|err| format!("{err} (Azure OpenAI configuration)"));
    }

    let var = |name: &str| {
        env::var(name)
            .map_err(|_| format!("{name} environment variable is not set"))
    };
    Ok(OpenAIConfigBuilder::with_api_key(var("OPENAI_API_KEY")?)
        .with_base_url(var("OPENAI_BASE_URL")?)
        .with_model(var("OPENAI_MODEL")?)
        .build())
}

fn env_flag(name: &str) -> bool {
    env::var(name).is_ok_and(|value| {
        matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true")
    })
}
