use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::types::{is_url, qobuz_id, FetchOutcome, Quality};

/// Longest locator accepted from a chat message.
const MAX_LOCATOR_LEN: usize = 512;

/// Stderr is cut to this many characters before it ends up in errors or logs.
const STDERR_LIMIT: usize = 1000;

/// Everything the fetch tool needs for one run.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub locator: String,
    pub quality: Quality,
    pub output_dir: PathBuf,
    pub embed_art: bool,
}

/// Boundary around the external downloader.
///
/// Implementations must drain all output before returning and must stop the
/// underlying process when the returned future is dropped.
#[async_trait]
pub trait FetchInvoker: Send + Sync {
    async fn run(&self, request: &FetchRequest) -> Result<FetchOutcome>;
}

/// Runs [qobuz-dl](https://github.com/vitiko98/qobuz-dl) as a child process.
///
/// Qobuz links are rebuilt from their id and go through `qobuz-dl dl`, so the
/// tool fetches exactly what the cache key names. Other URLs also use `dl`;
/// anything else goes through `qobuz-dl lucky` (first track result only).
#[derive(Debug, Clone)]
pub struct QobuzDl {
    program: PathBuf,
}

impl QobuzDl {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn args(request: &FetchRequest) -> Vec<OsString> {
        let locator = request.locator.trim();
        let mut args: Vec<OsString> = if let Some((kind, id)) = qobuz_id(locator) {
            vec!["dl".into(), format!("https://open.qobuz.com/{kind}/{id}").into()]
        } else if is_url(locator) {
            vec!["dl".into(), locator.into()]
        } else {
            vec![
                "lucky".into(),
                locator.into(),
                "-t".into(),
                "track".into(),
                "-n".into(),
                "1".into(),
            ]
        };
        args.extend([
            "-q".into(),
            request.quality.fetch_flag().into(),
            "-d".into(),
            request.output_dir.as_os_str().to_os_string(),
        ]);
        if request.embed_art {
            args.push("--embed-art".into());
        }
        // qobuz-dl's own download database would skip tracks it has seen
        // before, leaving the workspace empty.
        args.push("--no-db".into());
        args
    }
}

impl Default for QobuzDl {
    fn default() -> Self {
        Self::new("qobuz-dl")
    }
}

#[async_trait]
impl FetchInvoker for QobuzDl {
    /// # Security
    /// - Arguments are passed via `.args()` (no shell expansion)
    /// - Locators starting with `-` are rejected so they cannot act as flags
    async fn run(&self, request: &FetchRequest) -> Result<FetchOutcome> {
        validate_locator(&request.locator)?;

        info!(
            locator = %request.locator,
            quality = %request.quality,
            dir = %request.output_dir.display(),
            "starting fetch"
        );

        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(Self::args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so helpers the tool forks can be killed with it.
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FetchToolNotFound(self.program.display().to_string())
            } else {
                Error::Io(e)
            }
        })?;
        let _group = ProcessGroup::of(&child);

        // Reads stdout and stderr concurrently until EOF, then reaps the child.
        let output = child.wait_with_output().await?;

        let outcome = FetchOutcome {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: truncate(&String::from_utf8_lossy(&output.stderr), STDERR_LIMIT),
        };

        if outcome.success() {
            debug!(stdout_len = outcome.stdout.len(), "fetch tool exited cleanly");
        } else {
            warn!(
                exit_code = ?outcome.exit_code,
                stderr = %outcome.stderr,
                "fetch tool exited with failure status"
            );
        }
        Ok(outcome)
    }
}

/// Reject locators that could be mistaken for tool options or that cannot
/// be a track reference.
fn validate_locator(locator: &str) -> Result<()> {
    let trimmed = locator.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidLocator("empty".into()));
    }
    if trimmed.starts_with('-') {
        return Err(Error::InvalidLocator(format!(
            "must not start with '-': {trimmed}"
        )));
    }
    if trimmed.len() > MAX_LOCATOR_LEN {
        return Err(Error::InvalidLocator(format!(
            "longer than {MAX_LOCATOR_LEN} bytes"
        )));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(Error::InvalidLocator("contains control characters".into()));
    }
    Ok(())
}

/// Kills the fetch tool's whole process group when dropped, whether the fetch
/// finished or its future was cancelled. Nothing the tool started may keep
/// writing into the workspace after the fetch returns.
struct ProcessGroup(Option<i32>);

impl ProcessGroup {
    fn of(child: &tokio::process::Child) -> Self {
        Self(child.id().and_then(|id| i32::try_from(id).ok()))
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if let Some(pgid) = self.0 {
            kill_group(pgid);
        }
    }
}

#[cfg(unix)]
fn kill_group(pgid: i32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        // Group already gone: the tool and all its helpers exited.
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid, error = %e, "failed to kill fetch process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: i32) {}

fn truncate(s: &str, limit: usize) -> String {
    s.trim().chars().take(limit).collect()
}
