//! Handlers of the docker-chat messages and the state they share.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dockhand_core::message::HandlerErrorKind;
use dockhand_core::{
    Context, Handler, HandlerError, HandlerResult, ModelClient, Reply,
    ResolutionChain,
};
use tokio::fs;
use tokio::process::Command;
use url::Url;

use crate::code_chat::{AskCodeChat, CodeChat};
use crate::console::Console;
use crate::container::ContainerBackend;
use crate::inspect;
use crate::messages::*;
use crate::repo::{RepoLoader, RepoTree};

/// The repository used when the user enters nothing.
pub const DEFAULT_URL: &str = "https://github.com/eugeneyan/testing-ml";

/// The file the proposed Dockerfile is written to, inside the repository.
pub const PROPOSED_DOCKERFILE: &str = "Dockerfile_proposed";

/// The tag of images built for validation.
pub const VALIDATION_TAG: &str = "validate_img";

const MISSING_URL: &str = "You have not sent me the URL for the repo yet. \
    Please ask me for the URL, and once you receive it, send it to me for \
    confirmation. Once I confirm the URL, you can proceed.";

const INVALID_DOCKERFILE: &str = "The `proposed_dockerfile` parameter is \
    invalid. Note this parameter should contain the CONTENTS of the proposed \
    dockerfile, NOT the NAME of the Dockerfile.";

const NOT_READY: &str = "Not ready for dockerfile validation, please continue \
    with your next question or request for information.";

const ENTRYPOINT_QUESTION: &str = "What's the name of the main script in this \
    repo and can you SPECIFY the command line and necessary arguments to run \
    it? If there is more than one main script, SPECIFY the commands and \
    necessary arguments for each one.";

/// A repository the user asked about.
#[derive(Clone)]
pub struct Repository {
    /// Where the repository was fetched from.
    pub url: Url,
    /// The local checkout.
    pub path: PathBuf,
    /// The root listing. Empty if it could not be read.
    pub tree: RepoTree,
    /// The agent answering questions about the contents, if available.
    pub code_chat: Option<Arc<CodeChat>>,
}

/// The state of a docker-chat agent.
#[derive(Clone, Default)]
pub struct DockerState {
    /// The repository, once the user has given its URL.
    pub repo: Option<Repository>,
}

/// Collaborators shared by the handlers.
pub(crate) struct Services {
    pub container: Box<dyn ContainerBackend>,
    pub repo_loader: Box<dyn RepoLoader>,
    pub console: Arc<dyn Console>,
    pub code_chat_client: Option<ModelClient>,
    pub python: OsString,
}

/// Reminds the model to ask for the URL first, unless it is already
/// talking about one.
pub(crate) fn missing_url_fallback(
    state: &DockerState,
    input: &str,
) -> Option<String> {
    if state.repo.is_none() && !input.contains("URL") {
        Some(MISSING_URL.to_owned())
    } else {
        None
    }
}

#[inline]
fn missing_repo() -> HandlerResult<DockerState> {
    Ok(Reply::content(MISSING_URL))
}

fn parse_repo_url(input: &str) -> Result<Url, String> {
    let url = Url::parse(input).map_err(|err| err.to_string())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme `{}`", url.scheme()));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err("missing host".to_owned());
    }
    Ok(url)
}

pub(crate) struct AskUrlHandler(pub Arc<Services>);

#[async_trait]
impl Handler<DockerState> for AskUrlHandler {
    type Message = AskUrl;

    async fn handle(
        &self,
        _message: AskUrl,
        _cx: &Context<'_, DockerState>,
    ) -> HandlerResult<DockerState> {
        let services = &self.0;
        let mut prompt =
            "Please enter the URL of the repo, or hit enter to use the \
             default: "
                .to_owned();
        let url = loop {
            let Some(answer) = services.console.ask(&prompt).await else {
                return Err(
                    HandlerError::rejected().with_reason("no URL was entered")
                );
            };
            let answer = answer.trim();
            let answer = if answer.is_empty() { DEFAULT_URL } else { answer };
            match parse_repo_url(answer) {
                Ok(url) => break url,
                Err(reason) => {
                    prompt = format!(
                        "A valid URL was not seen ({reason}). Please try \
                         again: "
                    );
                }
            }
        };

        info!("using repository {url}");
        let Some(path) = services.repo_loader.clone_repo(&url).await else {
            return Err(HandlerError::execution_error()
                .with_reason(format!("failed to fetch {url}")));
        };
        let tree = services.repo_loader.listing(&path, 1, 20).await;
        let code_chat = services.code_chat_client.as_ref().and_then(|client| {
            CodeChat::new(client.clone(), &tree)
                .inspect_err(|err| warn!("no code chat for {url}: {err}"))
                .ok()
                .map(Arc::new)
        });

        let content = if tree.is_empty() {
            "The repo was fetched, but its files could not be listed. Ask \
             questions to find out what it contains."
                .to_owned()
        } else {
            format!(
                "Based on the URL, here is some information about the repo \
                 that you can use.\n\n\
                 First, here is a list of ALL the files and directories at \
                 the ROOT of the repo. Any files of interest to you MUST be in \
                 this list, therefore you do NOT need to ask in future about \
                 whether any file exists.\n{}\n\n\
                 In later parts of the conversation, only ask questions that \
                 CANNOT be answered by the information above. Do not ask for \
                 any info that is already provided above!",
                tree.ls(1).join("\n")
            )
        };
        let state = DockerState {
            repo: Some(Repository {
                url,
                path,
                tree,
                code_chat,
            }),
        };
        Ok(Reply::content(content).with_state(state))
    }
}

pub(crate) struct FileExistsHandler;

#[async_trait]
impl Handler<DockerState> for FileExistsHandler {
    type Message = FileExists;

    async fn handle(
        &self,
        message: FileExists,
        cx: &Context<'_, DockerState>,
    ) -> HandlerResult<DockerState> {
        let Some(repo) = &cx.state().repo else {
            return missing_repo();
        };
        let filename = message.filename.trim();
        let answer = ResolutionChain::new()
            .then(AskCodeChat::new(format!(
                "Does this project contain a file named {filename}?"
            )))
            .then(|repo: &Repository| {
                if repo.tree.is_empty() {
                    return Some(format!(
                        "Unknown: the repo listing is unavailable, so I \
                         cannot tell whether there is a file named \
                         {filename}."
                    ));
                }
                let answer = if repo.tree.contains_file(filename) {
                    "Yes, there is a"
                } else {
                    "No, there is no"
                };
                Some(format!("{answer} file named {filename} in the repo."))
            })
            .resolve(repo)
            .await;
        Ok(Reply::content(answer.unwrap_or_default()))
    }
}

pub(crate) struct PythonVersionHandler;

#[async_trait]
impl Handler<DockerState> for PythonVersionHandler {
    type Message = PythonVersion;

    async fn handle(
        &self,
        _message: PythonVersion,
        cx: &Context<'_, DockerState>,
    ) -> HandlerResult<DockerState> {
        let Some(repo) = &cx.state().repo else {
            return missing_repo();
        };
        let answer = ResolutionChain::new()
            .then(AskCodeChat::new("What is the Python version of this repo?"))
            .then(|repo: &Repository| {
                inspect::python_version(&repo.path).map(|v| v.to_string())
            })
            .resolve(repo)
            .await;
        Ok(Reply::content(answer.unwrap_or_else(|| {
            "Couldn't identify the python version".to_owned()
        })))
    }
}

pub(crate) struct PythonDependencyHandler;

#[async_trait]
impl Handler<DockerState> for PythonDependencyHandler {
    type Message = PythonDependency;

    async fn handle(
        &self,
        _message: PythonDependency,
        cx: &Context<'_, DockerState>,
    ) -> HandlerResult<DockerState> {
        let Some(repo) = &cx.state().repo else {
            return missing_repo();
        };
        let answer = ResolutionChain::new()
            .then(AskCodeChat::new(
                "Which file is used to manage dependencies in this project?",
            ))
            .then(|repo: &Repository| {
                let managers = inspect::dependency_managers(&repo.path);
                if managers.is_empty() {
                    return None;
                }
                let managers = managers
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>();
                Some(format!(
                    "Dependencies in this repo are managed using: {}",
                    managers.join(", ")
                ))
            })
            .resolve(repo)
            .await;
        Ok(Reply::content(answer.unwrap_or_else(|| {
            "Dependencies are not defined in this repo".to_owned()
        })))
    }
}

pub(crate) struct FindEntrypointHandler;

#[async_trait]
impl Handler<DockerState> for FindEntrypointHandler {
    type Message = FindEntrypoint;

    async fn handle(
        &self,
        _message: FindEntrypoint,
        cx: &Context<'_, DockerState>,
    ) -> HandlerResult<DockerState> {
        let Some(repo) = &cx.state().repo else {
            return missing_repo();
        };
        let answer = ResolutionChain::new()
            .then(AskCodeChat::new(ENTRYPOINT_QUESTION))
            .then(|repo: &Repository| {
                let entrypoints = inspect::entrypoints(&repo.path);
                if entrypoints.is_empty() {
                    return None;
                }
                let mut answer =
                    "Potential main scripts for the ENTRYPOINT:".to_owned();
                for entrypoint in entrypoints {
                    answer.push_str(&format!(
                        "\n- `{}`, run with `{}`",
                        entrypoint.script, entrypoint.command
                    ));
                }
                Some(answer)
            })
            .resolve(repo)
            .await;
        Ok(Reply::content(answer.unwrap_or_else(|| {
            "I couldn't identify potential main scripts for the ENTRYPOINT"
                .to_owned()
        })))
    }
}

pub(crate) struct ValidateDockerfileHandler(pub Arc<Services>);

#[async_trait]
impl Handler<DockerState> for ValidateDockerfileHandler {
    type Message = ValidateDockerfile;

    async fn handle(
        &self,
        message: ValidateDockerfile,
        cx: &Context<'_, DockerState>,
    ) -> HandlerResult<DockerState> {
        let Some(repo) = &cx.state().repo else {
            return missing_repo();
        };
        let dockerfile = message.proposed_dockerfile.to_text();
        if dockerfile.trim().len() < 20 {
            return Ok(Reply::content(INVALID_DOCKERFILE));
        }

        let approval = cx
            .request_approval(
                format!("Build this Dockerfile:\n{dockerfile}"),
                "To verify that the proposed Dockerfile builds",
            )
            .await;
        if let Err(err) = approval {
            if err.kind() == HandlerErrorKind::Rejected {
                return Ok(Reply::content(NOT_READY));
            }
            return Err(err);
        }

        let dockerfile_path = repo.path.join(PROPOSED_DOCKERFILE);
        fs::write(&dockerfile_path, &dockerfile).await.map_err(|err| {
            HandlerError::execution_error()
                .with_reason(format!("failed to save the Dockerfile: {err}"))
        })?;

        let container = &self.0.container;
        let report = container
            .build(&repo.path, PROPOSED_DOCKERFILE, VALIDATION_TAG)
            .await;

        if let Err(err) = fs::remove_file(&dockerfile_path).await {
            warn!("failed to remove {}: {err}", dockerfile_path.display());
        }
        if let Some(image) = &report.image {
            if let Err(err) = container.remove(image).await {
                warn!("failed to remove image {}: {err}", image.tag);
            }
            if container.exists(image).await {
                warn!("image {} is still present", image.tag);
            }
        }

        let content = match (&report.image, report.duration) {
            (Some(_), duration) => format!(
                "Docker image built successfully and build time took: {:.2} \
                 seconds",
                duration.unwrap_or_default().as_secs_f64()
            ),
            (None, _) => format!(
                "Docker build failed with error message: {}",
                report.log
            ),
        };
        Ok(Reply::content(content))
    }
}

pub(crate) struct RunPythonHandler(pub Arc<Services>);

#[async_trait]
impl Handler<DockerState> for RunPythonHandler {
    type Message = RunPython;

    async fn handle(
        &self,
        message: RunPython,
        cx: &Context<'_, DockerState>,
    ) -> HandlerResult<DockerState> {
        let Some(repo) = &cx.state().repo else {
            return missing_repo();
        };
        cx.request_approval(
            format!("Run this Python code in the repo:\n{}", message.code),
            "To find information about the repo",
        )
        .await?;

        let output = Command::new(&self.0.python)
            .arg("-c")
            .arg(&message.code)
            .current_dir(&repo.path)
            .output()
            .await
            .map_err(|err| {
                HandlerError::execution_error().with_reason(format!(
                    "failed to run {}: {err}",
                    self.0.python.to_string_lossy()
                ))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut content = String::new();
        if !stdout.trim().is_empty() {
            content.push_str("==> STDOUT <==\n");
            content.push_str(stdout.trim_end());
            content.push('\n');
        }
        if !stderr.trim().is_empty() {
            content.push_str("==> STDERR <==\n");
            content.push_str(stderr.trim_end());
            content.push('\n');
        }
        if !output.status.success() {
            match output.status.code() {
                Some(code) => {
                    content.push_str(&format!("The code exited with {code}."))
                }
                None => content.push_str("The code was terminated."),
            }
        } else if content.is_empty() {
            content.push_str("The code ran successfully without output.");
        }
        Ok(Reply::content(content.trim_end()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repo_url() {
        assert!(parse_repo_url(DEFAULT_URL).is_ok());
        assert!(parse_repo_url("http://git.example.com/a/b.git").is_ok());
        assert!(parse_repo_url("not a url").is_err());
        assert_eq!(
            parse_repo_url("ftp://example.com/repo").unwrap_err(),
            "unsupported scheme `ftp`"
        );
        assert!(parse_repo_url("file:///tmp/repo").is_err());
    }

    #[test]
    fn test_missing_url_fallback() {
        let state = DockerState::default();
        assert_eq!(
            missing_url_fallback(&state, "Let me look at the code.").as_deref(),
            Some(MISSING_URL)
        );
        assert_eq!(
            missing_url_fallback(&state, "What is the URL of the repo?"),
            None
        );

        let state = DockerState {
            repo: Some(Repository {
                url: DEFAULT_URL.parse().unwrap(),
                path: PathBuf::from("."),
                tree: RepoTree::default(),
                code_chat: None,
            }),
        };
        assert_eq!(missing_url_fallback(&state, "Anything"), None);
    }
}
