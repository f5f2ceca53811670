//! The messages the docker-chat model can send.

use dockhand_core::ToolMessage;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Asks the user for the repository URL.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
pub struct AskUrl {}

impl ToolMessage for AskUrl {
    const REQUEST: &'static str = "ask_url";

    fn purpose() -> &'static str {
        "To get the github repo url from the user."
    }

    fn examples() -> Vec<Self> {
        vec![AskUrl {}]
    }
}

/// Checks whether a file exists in the repository.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FileExists {
    /// Name of the file, or a glob pattern, to look for.
    pub filename: String,
}

impl ToolMessage for FileExists {
    const REQUEST: &'static str = "file_exists";

    fn purpose() -> &'static str {
        "To check if a file <filename> exists in the repo."
    }

    fn examples() -> Vec<Self> {
        vec![
            FileExists {
                filename: "blah.md".to_owned(),
            },
            FileExists {
                filename: "requirements.txt".to_owned(),
            },
        ]
    }
}

/// Finds the Python version the repository needs.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
pub struct PythonVersion {}

impl ToolMessage for PythonVersion {
    const REQUEST: &'static str = "python_version";

    fn purpose() -> &'static str {
        "To check which version of Python is needed."
    }

    fn examples() -> Vec<Self> {
        vec![PythonVersion {}]
    }
}

/// Finds how the repository declares its dependencies.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
pub struct PythonDependency {}

impl ToolMessage for PythonDependency {
    const REQUEST: &'static str = "python_dependency";

    fn purpose() -> &'static str {
        "To find out the python dependencies."
    }

    fn examples() -> Vec<Self> {
        vec![PythonDependency {}]
    }
}

/// Dockerfile contents, as one string or one string per line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum DockerfileContent {
    /// The whole file.
    Text(String),
    /// The file split into lines.
    Lines(Vec<String>),
}

impl DockerfileContent {
    /// Returns the file contents, joining lines with `\n`.
    pub fn to_text(&self) -> String {
        match self {
            DockerfileContent::Text(text) => text.clone(),
            DockerfileContent::Lines(lines) => lines.join("\n"),
        }
    }
}

/// Shows a Dockerfile to the user and verifies that it builds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ValidateDockerfile {
    /// The CONTENTS of the proposed Dockerfile, not its name.
    pub proposed_dockerfile: DockerfileContent,
}

impl ToolMessage for ValidateDockerfile {
    const REQUEST: &'static str = "validate_dockerfile";

    fn purpose() -> &'static str {
        "To show a <proposed_dockerfile> to the user. Use this tool whenever \
         you want to SHOW or VALIDATE a <proposed_dockerfile>. NEVER list out \
         a dockerfile without using this tool."
    }

    fn examples() -> Vec<Self> {
        vec![
            ValidateDockerfile {
                proposed_dockerfile: DockerfileContent::Text(
                    "FROM ubuntu:latest\nLABEL maintainer=blah\n".to_owned(),
                ),
            },
            ValidateDockerfile {
                proposed_dockerfile: DockerfileContent::Lines(vec![
                    "# Use an official Python runtime as a parent image"
                        .to_owned(),
                    "FROM python:3.7-slim".to_owned(),
                    "# Set the working directory in the container".to_owned(),
                    "WORKDIR /app".to_owned(),
                ]),
            },
        ]
    }
}

/// Finds scripts suitable for `ENTRYPOINT` or `CMD`.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
pub struct FindEntrypoint {}

impl ToolMessage for FindEntrypoint {
    const REQUEST: &'static str = "find_entrypoint";

    fn purpose() -> &'static str {
        "To identify main scripts and their arguments that can be used for \
         ENTRYPOINT, CMD, both, or none."
    }

    fn examples() -> Vec<Self> {
        vec![FindEntrypoint {}]
    }
}

/// Runs Python code inside the repository.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RunPython {
    /// Python source to run, including any imports.
    pub code: String,
}

impl ToolMessage for RunPython {
    const REQUEST: &'static str = "run_python";

    fn purpose() -> &'static str {
        "To run a python <code> on the repository, to find desired info. \
         The code runs with the repository as its working directory and can \
         be as detailed as needed, including import statements. Use it to \
         find any info not available from the other tools."
    }

    fn examples() -> Vec<Self> {
        vec![
            RunPython {
                code: "print('hello world')".to_owned(),
            },
            RunPython {
                code: "import os\nprint(os.listdir('.'))".to_owned(),
            },
        ]
    }
}
