//! Local heuristics answering questions about a Python repository.
//!
//! These run when the code-chat agent cannot answer. They only read files,
//! never execute anything from the repository.

use std::fmt::{self, Display};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

/// A Python version requirement and where it was found.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PythonVersion {
    /// The version or version specifier, e.g. `3.9` or `>=3.8`.
    pub version: String,
    /// The file declaring it.
    pub source: &'static str,
}

impl Display for PythonVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "The repo requires Python {} (declared in {}).",
            self.version, self.source
        )
    }
}

static PYPROJECT_PYTHON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*(?:requires-python|python)\s*=\s*["']([^"']+)["']"#)
        .expect("valid regex")
});
static SETUP_PY_PYTHON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"python_requires\s*=\s*["']([^"']+)["']"#)
        .expect("valid regex")
});
static PIPFILE_PYTHON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*python_(?:full_)?version\s*=\s*["']([^"']+)["']"#)
        .expect("valid regex")
});
static SETUP_CFG_PYTHON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*python_requires\s*=\s*(\S+)").expect("valid regex")
});
static CONDA_PYTHON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*-\s*python\s*([=<>!~]=?\s*[0-9][0-9.*]*)")
        .expect("valid regex")
});
static MAIN_GUARD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^if\s+__name__\s*==\s*["']__main__["']\s*:"#)
        .expect("valid regex")
});

fn read(root: &Path, name: &str) -> Option<String> {
    fs::read_to_string(root.join(name)).ok()
}

fn capture(regex: &Regex, text: &str) -> Option<String> {
    let captures = regex.captures(text)?;
    let value = captures.get(1)?.as_str().trim();
    (!value.is_empty()).then(|| value.to_owned())
}

/// Finds the Python version the repository declares.
///
/// Files are checked from the most to the least specific one.
pub fn python_version(root: &Path) -> Option<PythonVersion> {
    let found = |version: String, source| {
        Some(PythonVersion { version, source })
    };

    if let Some(text) = read(root, ".python-version") {
        if let Some(line) = text.lines().map(str::trim).find(|l| !l.is_empty())
        {
            return found(line.to_owned(), ".python-version");
        }
    }
    if let Some(text) = read(root, "runtime.txt") {
        let text = text.trim();
        if let Some(version) = text.strip_prefix("python-") {
            return found(version.to_owned(), "runtime.txt");
        }
    }
    let candidates: [(&'static str, &Regex); 5] = [
        ("pyproject.toml", &*PYPROJECT_PYTHON),
        ("setup.py", &*SETUP_PY_PYTHON),
        ("Pipfile", &*PIPFILE_PYTHON),
        ("setup.cfg", &*SETUP_CFG_PYTHON),
        ("environment.yml", &*CONDA_PYTHON),
    ];
    for (source, regex) in candidates {
        if let Some(version) = read(root, source).and_then(|t| capture(regex, &t))
        {
            return found(version, source);
        }
    }
    None
}

/// A way of declaring Python dependencies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DependencyManager {
    /// pip requirement files.
    Requirements(Vec<String>),
    /// Poetry, configured in `pyproject.toml`.
    Poetry,
    /// Pipenv, configured in `Pipfile`.
    Pipenv,
    /// Conda environment files.
    Conda(String),
    /// `install_requires` in `setup.py`.
    SetupPy,
    /// PEP 621 dependencies in `pyproject.toml`.
    Pyproject,
}

impl Display for DependencyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyManager::Requirements(files) => {
                write!(f, "pip ({})", files.join(", "))
            }
            DependencyManager::Poetry => write!(f, "poetry (pyproject.toml)"),
            DependencyManager::Pipenv => write!(f, "pipenv (Pipfile)"),
            DependencyManager::Conda(file) => write!(f, "conda ({file})"),
            DependencyManager::SetupPy => write!(f, "setuptools (setup.py)"),
            DependencyManager::Pyproject => {
                write!(f, "PEP 621 dependencies (pyproject.toml)")
            }
        }
    }
}

/// Finds every dependency manager the repository uses.
pub fn dependency_managers(root: &Path) -> Vec<DependencyManager> {
    let mut managers = vec![];

    let mut requirements = fs::read_dir(root)
        .into_iter()
        .flatten()
        .flatten()
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| {
            name.starts_with("requirements") && name.ends_with(".txt")
        })
        .collect::<Vec<_>>();
    if root.join("requirements").is_dir() {
        requirements.push("requirements/".to_owned());
    }
    if !requirements.is_empty() {
        requirements.sort();
        managers.push(DependencyManager::Requirements(requirements));
    }

    let pyproject = read(root, "pyproject.toml");
    if let Some(pyproject) = &pyproject {
        if pyproject.contains("[tool.poetry") {
            managers.push(DependencyManager::Poetry);
        }
    }
    if root.join("Pipfile").is_file() {
        managers.push(DependencyManager::Pipenv);
    }
    for conda in ["environment.yml", "environment.yaml", "conda.yml"] {
        if root.join(conda).is_file() {
            managers.push(DependencyManager::Conda(conda.to_owned()));
            break;
        }
    }
    if read(root, "setup.py").is_some_and(|t| t.contains("install_requires")) {
        managers.push(DependencyManager::SetupPy);
    }
    if let Some(pyproject) = &pyproject {
        if pyproject.contains("[project]") && pyproject.contains("dependencies")
        {
            managers.push(DependencyManager::Pyproject);
        }
    }
    managers
}

/// A script that looks like the main program of the repository.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entrypoint {
    /// Path relative to the root, with `/` separators.
    pub script: String,
    /// The command running it from the repository root.
    pub command: String,
}

const CONVENTIONAL_MAINS: [&str; 7] = [
    "main.py",
    "app.py",
    "run.py",
    "manage.py",
    "server.py",
    "cli.py",
    "__main__.py",
];

/// Scans the root and its direct subdirectories for main scripts.
///
/// Conventionally named scripts come first, then any other script with a
/// `__main__` guard.
pub fn entrypoints(root: &Path) -> Vec<Entrypoint> {
    let mut scripts = python_files(root, "");
    if let Ok(dirs) = fs::read_dir(root) {
        let mut dirs = dirs
            .flatten()
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| {
                !name.starts_with('.')
                    && !matches!(
                        name.as_str(),
                        "tests" | "test" | "docs" | "venv" | "node_modules"
                    )
            })
            .collect::<Vec<_>>();
        dirs.sort();
        for dir in dirs {
            scripts.extend(python_files(&root.join(&dir), &format!("{dir}/")));
        }
    }

    let mut conventional = vec![];
    let mut guarded = vec![];
    for script in scripts {
        let name = script.rsplit('/').next().unwrap_or(&script);
        if CONVENTIONAL_MAINS.contains(&name) {
            conventional.push(script);
        } else if read(root, &script).is_some_and(|t| MAIN_GUARD.is_match(&t))
        {
            guarded.push(script);
        }
    }

    conventional
        .into_iter()
        .chain(guarded)
        .map(|script| Entrypoint {
            command: command_for(&script),
            script,
        })
        .collect()
}

fn python_files(dir: &Path, prefix: &str) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return vec![];
    };
    let mut files = entries
        .flatten()
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.ends_with(".py"))
        .map(|name| format!("{prefix}{name}"))
        .collect::<Vec<_>>();
    files.sort();
    files
}

fn command_for(script: &str) -> String {
    match script.strip_suffix("/__main__.py") {
        // A package run with `-m`.
        Some(package) => format!("python -m {}", package.replace('/', ".")),
        None => format!("python {script}"),
    }
}
