//! Fetching repositories and listing their contents.

use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use glob::{MatchOptions, Pattern};
use serde::Serialize;
use tempfile::TempDir;
use tokio::process::Command;
use tokio::task::spawn_blocking;
use url::Url;

/// Whether an entry is a file or a directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// A regular file.
    File,
    /// A directory.
    Dir,
}

/// One entry of a [`RepoTree`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RepoEntry {
    /// Path relative to the repository root, with `/` separators.
    pub path: String,
    /// Whether the entry is a file or a directory.
    pub kind: EntryKind,
    /// The first lines of a text file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
}

impl RepoEntry {
    /// Returns the last path component.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Returns how deep the entry is, root entries being at level 1.
    pub fn level(&self) -> usize {
        self.path.split('/').count()
    }
}

/// A listing of a repository, sorted by path.
///
/// An empty tree means the contents are unknown, not that the repository is
/// empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RepoTree {
    entries: Vec<RepoEntry>,
}

impl RepoTree {
    /// Creates a tree from entries in any order.
    pub fn new(mut entries: Vec<RepoEntry>) -> Self {
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries.dedup_by(|a, b| a.path == b.path);
        Self { entries }
    }

    /// Returns all entries.
    #[inline]
    pub fn entries(&self) -> &[RepoEntry] {
        &self.entries
    }

    /// Returns the file entries.
    pub fn files(&self) -> impl Iterator<Item = &RepoEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.kind == EntryKind::File)
    }

    /// Returns `true` if nothing is known about the repository.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lists the entries up to `depth` levels, directories with a trailing
    /// `/`.
    pub fn ls(&self, depth: usize) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| entry.level() <= depth)
            .map(|entry| match entry.kind {
                EntryKind::File => entry.path.clone(),
                EntryKind::Dir => format!("{}/", entry.path),
            })
            .collect()
    }

    /// Returns the entries matching any of the glob `patterns`.
    ///
    /// A pattern without `/` is matched against entry names at any depth,
    /// other patterns against the whole relative path. Invalid patterns
    /// match nothing.
    pub fn select<S: AsRef<str>>(&self, patterns: &[S]) -> RepoTree {
        let patterns = patterns
            .iter()
            .filter_map(|pattern| {
                let pattern = pattern.as_ref().trim().trim_start_matches("./");
                match Pattern::new(pattern) {
                    Ok(compiled) => Some((compiled, pattern.contains('/'))),
                    Err(err) => {
                        debug!("invalid pattern `{pattern}`: {err}");
                        None
                    }
                }
            })
            .collect::<Vec<_>>();
        let entries = self
            .entries
            .iter()
            .filter(|entry| {
                patterns.iter().any(|(pattern, by_path)| {
                    if *by_path {
                        pattern.matches(&entry.path)
                    } else {
                        pattern.matches(entry.name())
                    }
                })
            })
            .cloned()
            .collect();
        RepoTree { entries }
    }

    /// Returns `true` if a file matches `name`.
    pub fn contains_file(&self, name: &str) -> bool {
        self.select(&[name]).files().next().is_some()
    }
}

/// Fetches repositories and lists their contents.
///
/// Every operation fails closed: errors are logged and reported as `None`
/// or an empty tree.
#[async_trait]
pub trait RepoLoader: Send + Sync {
    /// Fetches the repository at `url` into a local directory.
    async fn clone_repo(&self, url: &Url) -> Option<PathBuf>;

    /// Lists the repository at `path` up to `depth` levels, keeping the
    /// first `lines` lines of each text file.
    async fn listing(
        &self,
        path: &Path,
        depth: usize,
        lines: usize,
    ) -> RepoTree;
}

/// A [`RepoLoader`] running `git clone --depth 1` into temporary
/// directories, which are removed when the loader is dropped.
#[derive(Default)]
pub struct GitRepoLoader {
    clones: Mutex<Vec<TempDir>>,
}

impl GitRepoLoader {
    /// Creates a loader.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RepoLoader for GitRepoLoader {
    async fn clone_repo(&self, url: &Url) -> Option<PathBuf> {
        let dir = match tempfile::Builder::new().prefix("dockhand-").tempdir()
        {
            Ok(dir) => dir,
            Err(err) => {
                error!("failed to create a temporary directory: {err}");
                return None;
            }
        };
        let path = dir.path().join("repo");

        debug!("cloning {url} into {}", path.display());
        let output = Command::new("git")
            .args(["clone", "--depth", "1", "--quiet", url.as_str()])
            .arg(&path)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .await;
        match output {
            Ok(output) if output.status.success() => {}
            Ok(output) => {
                warn!(
                    "git clone {url} failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                return None;
            }
            Err(err) => {
                warn!("failed to run git: {err}");
                return None;
            }
        }

        self.clones
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .push(dir);
        Some(path)
    }

    async fn listing(
        &self,
        path: &Path,
        depth: usize,
        lines: usize,
    ) -> RepoTree {
        list_dir(path, depth, lines).await
    }
}

/// Lists a local directory, skipping the `.git` directory.
pub async fn list_dir(path: &Path, depth: usize, lines: usize) -> RepoTree {
    let root = path.to_owned();
    let result = spawn_blocking(move || walk(&root, depth, lines)).await;
    match result {
        Ok(Ok(tree)) => tree,
        Ok(Err(err)) => {
            warn!("failed to list {}: {err}", path.display());
            RepoTree::default()
        }
        Err(err) => {
            error!("listing task failed: {err}");
            RepoTree::default()
        }
    }
}

fn walk(root: &Path, depth: usize, lines: usize) -> io::Result<RepoTree> {
    if !root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            "not a directory",
        ));
    }
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };
    let base = Pattern::escape(&root.to_string_lossy());

    let mut entries = vec![];
    for level in 1..=depth {
        let pattern = format!("{base}/{}", vec!["*"; level].join("/"));
        let paths = glob::glob_with(&pattern, options)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        for path in paths.flatten() {
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            if relative.components().any(|c| c.as_os_str() == ".git") {
                continue;
            }
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let entry = if path.is_dir() {
                RepoEntry {
                    path: relative,
                    kind: EntryKind::Dir,
                    head: None,
                }
            } else {
                RepoEntry {
                    path: relative,
                    kind: EntryKind::File,
                    head: read_head(&path, lines),
                }
            };
            entries.push(entry);
        }
    }
    Ok(RepoTree::new(entries))
}

fn read_head(path: &Path, lines: usize) -> Option<String> {
    if lines == 0 {
        return None;
    }
    let file = fs::File::open(path).ok()?;
    let mut head = String::new();
    for line in BufReader::new(file).lines().take(lines) {
        // Binary files are not worth showing.
        let line = line.ok()?;
        head.push_str(&line);
        head.push('\n');
    }
    Some(head)
}
