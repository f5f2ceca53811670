//! A sub-agent answering questions about the repository contents.

use std::sync::Arc;

use async_trait::async_trait;
use dockhand_core::{
    Agent, AgentBuilder, AgentError, ModelClient, Resolver, Responder,
    TranscriptSource,
};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::handlers::{DockerState, Repository};
use crate::repo::RepoTree;

/// The answer the code chat gives when it cannot help.
pub const NO_ANSWER: &str = "I don't know";

const INCLUDED_EXTENSIONS: &[&str] = &["txt", "md", "yml", "yaml", "sh"];
const INCLUDED_NAMES: &[&str] = &["Makefile"];
const EXCLUDED_NAMES: &[&str] = &["Dockerfile"];

/// An agent primed with extracts of a repository.
///
/// Every question is answered from the system prompt alone, so the requests
/// stay the same size however long the docker chat runs.
pub struct CodeChat {
    agent: Mutex<Agent<()>>,
}

impl CodeChat {
    /// Creates a code chat for the repository listed in `tree`.
    pub fn new(
        model_client: ModelClient,
        tree: &RepoTree,
    ) -> Result<Self, AgentError> {
        let agent = AgentBuilder::with_model_client(model_client, ())
            .with_name("code-chat")
            .with_system_prompt(system_prompt(tree))
            .with_done_token("")
            .build()?;
        Ok(Self {
            agent: Mutex::new(agent),
        })
    }

    /// Asks a question. Returns `None` if the agent has no answer.
    pub async fn ask(
        &self,
        question: &str,
    ) -> Result<Option<String>, AgentError> {
        let mut agent = self.agent.lock().await;
        agent.clear_conversation();
        let outcome = agent.run_task(question).await?;
        let answer = outcome.output.filter(|answer| {
            !answer.trim().is_empty() && !answer.contains(NO_ANSWER)
        });
        debug!("code chat answered {question:?} with {answer:?}");
        Ok(answer)
    }
}

fn system_prompt(tree: &RepoTree) -> String {
    let extracts = tree
        .files()
        .filter(|entry| is_included(entry.name()))
        .filter_map(|entry| {
            let head = entry.head.as_ref()?;
            Some((entry.path.clone(), Value::String(head.clone())))
        })
        .collect::<Map<_, _>>();
    let extracts = serde_json::to_string_pretty(&extracts)
        .unwrap_or_else(|_| "{}".to_owned());

    format!(
        "You are an expert software engineer helping to containerize a \
         code repository. Answer questions about the repository using only \
         the extracts below, which map file paths to the first lines of \
         each file. Keep answers short and factual. If the extracts do not \
         contain the answer, reply with exactly \"{NO_ANSWER}\".\n\n\
         REPOSITORY EXTRACTS:\n{extracts}"
    )
}

fn is_included(name: &str) -> bool {
    if EXCLUDED_NAMES.contains(&name) {
        return false;
    }
    if INCLUDED_NAMES.contains(&name) {
        return true;
    }
    name.rsplit_once('.')
        .is_some_and(|(_, ext)| INCLUDED_EXTENSIONS.contains(&ext))
}

/// Resolves a question by asking the repository's code chat.
///
/// Fails closed: a missing or failing code chat yields no answer.
pub struct AskCodeChat {
    question: String,
}

impl AskCodeChat {
    /// Creates a resolver asking `question`.
    pub fn new<Q: Into<String>>(question: Q) -> Self {
        Self {
            question: question.into(),
        }
    }
}

#[async_trait]
impl Resolver<Repository> for AskCodeChat {
    async fn resolve(&self, repo: &Repository) -> Option<String> {
        let code_chat = repo.code_chat.as_ref()?;
        match code_chat.ask(&self.question).await {
            Ok(answer) => answer,
            Err(err) => {
                warn!("code chat failed: {err}");
                None
            }
        }
    }
}

/// Lets the code chat answer model text that carries no message, such as a
/// question about the repository.
pub struct CodeChatResponder;

#[async_trait]
impl Responder<DockerState> for CodeChatResponder {
    async fn respond(
        &self,
        state: &DockerState,
        message: &str,
    ) -> Result<Option<String>, AgentError> {
        let Some(code_chat) = state.repo.as_ref().and_then(|repo| {
            repo.code_chat.as_ref().map(Arc::clone)
        }) else {
            return Ok(None);
        };
        match code_chat.ask(message).await {
            Ok(answer) => Ok(answer),
            Err(err) => {
                warn!("code chat failed: {err}");
                Ok(None)
            }
        }
    }

    fn source(&self) -> TranscriptSource {
        TranscriptSource::Agent
    }
}

#[cfg(test)]
mod tests {
    use dockhand_model::ModelMessage;
    use dockhand_test_model::{PresetResponse, TestModelProvider};

    use super::*;
    use crate::repo::{EntryKind, RepoEntry};

    fn tree() -> RepoTree {
        let file = |path: &str, head: &str| RepoEntry {
            path: path.to_owned(),
            kind: EntryKind::File,
            head: Some(head.to_owned()),
        };
        RepoTree::new(vec![
            file("README.md", "# Demo\n"),
            file("requirements.txt", "flask\n"),
            file("Makefile", "test:\n\tpytest\n"),
            file("Dockerfile", "FROM scratch\n"),
            file("app.py", "import flask\n"),
            RepoEntry {
                path: "src".to_owned(),
                kind: EntryKind::Dir,
                head: None,
            },
        ])
    }

    #[test]
    fn test_system_prompt() {
        let prompt = system_prompt(&tree());
        assert!(prompt.contains("\"README.md\": \"# Demo\\n\""));
        assert!(prompt.contains("\"requirements.txt\""));
        assert!(prompt.contains("\"Makefile\""));
        assert!(!prompt.contains("FROM scratch"));
        assert!(!prompt.contains("import flask"));
        assert!(prompt.contains(NO_ANSWER));
    }

    #[tokio::test]
    async fn test_ask() {
        let mut model_provider = TestModelProvider::default();
        model_provider.add_system_step();
        model_provider.add_turn(PresetResponse::with_text("Python 3.11"));
        let code_chat =
            CodeChat::new(ModelClient::new(model_provider.clone()), &tree())
                .unwrap();

        let answer = code_chat.ask("What is the Python version?").await;
        assert_eq!(answer.unwrap().as_deref(), Some("Python 3.11"));

        let requests = model_provider.received_requests();
        assert_eq!(requests.len(), 1);
        let ModelMessage::System { content } = &requests[0].messages[0] else {
            panic!("expected a system prompt");
        };
        // No message types are described and no done token is asked for.
        assert!(!content.contains("TOOL:"));
        assert!(!content.contains("DONE"));
        assert!(requests[0].tools.is_empty());
    }

    #[tokio::test]
    async fn test_questions_do_not_accumulate() {
        let mut model_provider = TestModelProvider::default();
        model_provider.add_system_step();
        model_provider.add_turn(PresetResponse::with_text("I don't know."));
        let code_chat =
            CodeChat::new(ModelClient::new(model_provider.clone()), &tree())
                .unwrap();

        for question in ["Which port?", "Which database?", "Which cache?"] {
            assert_eq!(code_chat.ask(question).await.unwrap(), None);
        }

        let requests = model_provider.received_requests();
        assert_eq!(requests.len(), 3);
        for (req, question) in requests
            .iter()
            .zip(["Which port?", "Which database?", "Which cache?"])
        {
            assert_eq!(req.messages.len(), 2);
            assert_eq!(req.messages[1], ModelMessage::user(question));
        }
    }

    #[tokio::test]
    async fn test_failing_code_chat() {
        let model_provider = TestModelProvider::default();
        let code_chat = Arc::new(
            CodeChat::new(ModelClient::new(model_provider), &tree()).unwrap(),
        );
        assert!(code_chat.ask("Anything?").await.is_err());

        let repo = Repository {
            url: "https://example.com/demo".parse().unwrap(),
            path: std::env::temp_dir(),
            tree: tree(),
            code_chat: Some(code_chat),
        };
        assert_eq!(AskCodeChat::new("Anything?").resolve(&repo).await, None);

        let state = DockerState { repo: Some(repo) };
        let answer = CodeChatResponder.respond(&state, "Anything?").await;
        assert_eq!(answer.unwrap(), None);
    }
}
