//! Building and removing container images.

use std::ffi::OsString;
use std::path::Path;
use std::process::Output;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::process::Command;

pub(crate) const SPINNER_TEMPLATE: &str = "{spinner} {wide_msg}";
pub(crate) const SPINNER_TICKS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// A built image.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ImageHandle {
    /// The tag given at build time.
    pub tag: String,
}

/// The result of a build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildReport {
    /// The image, if the build succeeded.
    pub image: Option<ImageHandle>,
    /// The build output. On failure it explains what went wrong.
    pub log: String,
    /// How long a successful build took.
    pub duration: Option<Duration>,
}

impl BuildReport {
    /// Creates a report for a build that failed with `log`.
    pub fn failed<S: Into<String>>(log: S) -> Self {
        Self {
            image: None,
            log: log.into(),
            duration: None,
        }
    }
}

/// Builds and removes images. Errors are reported as text.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Builds `dockerfile`, a file name relative to `context`, as `tag`.
    async fn build(
        &self,
        context: &Path,
        dockerfile: &str,
        tag: &str,
    ) -> BuildReport;

    /// Removes an image.
    async fn remove(&self, image: &ImageHandle) -> Result<(), String>;

    /// Returns `true` if the image is still present.
    async fn exists(&self, image: &ImageHandle) -> bool;
}

/// A [`ContainerBackend`] running the `docker` command line.
pub struct DockerCli {
    program: OsString,
    show_progress: bool,
}

impl Default for DockerCli {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl DockerCli {
    /// Creates a backend running `docker` from `PATH`.
    #[inline]
    pub fn new() -> Self {
        Self::with_program("docker")
    }

    /// Creates a backend running another docker-compatible executable,
    /// such as `podman`.
    pub fn with_program<S: Into<OsString>>(program: S) -> Self {
        Self {
            program: program.into(),
            show_progress: false,
        }
    }

    /// Shows a spinner on the terminal while building.
    #[inline]
    pub fn show_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    async fn run<I, S>(&self, args: I) -> Result<Output, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|err| {
                format!(
                    "failed to run `{}`: {err}",
                    self.program.to_string_lossy()
                )
            })
    }

    fn spinner(&self) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }
        let progress_bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template(SPINNER_TEMPLATE) {
            progress_bar.set_style(style.tick_chars(SPINNER_TICKS));
        }
        progress_bar.set_message("🐳 Verifying the proposed Dockerfile...");
        progress_bar.enable_steady_tick(Duration::from_millis(100));
        Some(progress_bar)
    }
}

#[async_trait]
impl ContainerBackend for DockerCli {
    async fn build(
        &self,
        context: &Path,
        dockerfile: &str,
        tag: &str,
    ) -> BuildReport {
        let dockerfile = context.join(dockerfile);
        let args: [&std::ffi::OsStr; 7] = [
            "build".as_ref(),
            "--rm".as_ref(),
            "-f".as_ref(),
            dockerfile.as_os_str(),
            "-t".as_ref(),
            tag.as_ref(),
            context.as_os_str(),
        ];

        debug!("building {tag} from {}", dockerfile.display());
        let progress_bar = self.spinner();
        let start = Instant::now();
        let result = self.run(args).await;
        let elapsed = start.elapsed();
        if let Some(progress_bar) = progress_bar {
            progress_bar.finish_and_clear();
        }

        let output = match result {
            Ok(output) => output,
            Err(err) => return BuildReport::failed(err),
        };
        let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
        log.push_str(&String::from_utf8_lossy(&output.stderr));
        if !output.status.success() {
            warn!("building {tag} failed with {}", output.status);
            return BuildReport::failed(log.trim().to_owned());
        }
        BuildReport {
            image: Some(ImageHandle {
                tag: tag.to_owned(),
            }),
            log,
            duration: Some(elapsed),
        }
    }

    async fn remove(&self, image: &ImageHandle) -> Result<(), String> {
        let output = self.run(["image", "rm", "--force", &image.tag]).await?;
        if output.status.success() {
            debug!("removed image {}", image.tag);
            Ok(())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).trim().to_owned())
        }
    }

    async fn exists(&self, image: &ImageHandle) -> bool {
        self.run(["image", "inspect", &image.tag])
            .await
            .is_ok_and(|output| output.status.success())
    }
}
