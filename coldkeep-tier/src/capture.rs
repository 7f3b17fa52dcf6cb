//! Command transport and capture specifications.
//!
//! A [`CommandRunner`] executes a shell script either on this machine or on
//! a remote host, and either collects its output or hands back the live
//! child process. Capture commands (archive producers) are spawned so their
//! stdout can be streamed; probes (`df`, `du`, `find`) are run to
//! completion.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::error::{TierError, TierResult};

/// Diagnostics that downgrade a non-zero capture exit to a warning.
///
/// GNU tar exits 1 when a file is modified while being archived; the
/// archive is still complete.
pub const BENIGN_CAPTURE_DIAGNOSTICS: &[&str] = &["file changed as we read it"];

/// Exit code GNU tar uses for "some files differ".
const BENIGN_EXIT_CODE: i32 = 1;

/// Summary tar appends after any diagnostic; carries no information itself.
const FAILURE_SUMMARY: &str = "Exiting with failure status due to previous errors";

/// Collected result of a completed command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output, lossily decoded.
    pub stdout: String,
    /// Standard error, lossily decoded.
    pub stderr: String,
    /// Set when the command could not run or exited unsuccessfully.
    pub error: Option<String>,
}

impl CommandOutput {
    /// Returns true if the command ran and exited successfully.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Converts into a result, folding stderr into the error message.
    ///
    /// # Errors
    ///
    /// Returns [`TierError::Capture`] if the command failed.
    pub fn into_result(self, target: &str) -> TierResult<String> {
        match self.error {
            None => Ok(self.stdout),
            Some(error) => Err(TierError::Capture {
                target: target.to_string(),
                message: format!("{error}: {}", self.stderr.trim()),
            }),
        }
    }
}

// -----------------------------------------------------------------------------
// CommandRunner Trait
// -----------------------------------------------------------------------------

/// Executes shell scripts locally or on a remote host.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Where commands run, for logs and errors (`local` or a host name).
    fn target(&self) -> &str;

    /// Builds the process that runs `script`.
    fn command(&self, script: &str) -> Command;

    /// Spawns `script` with piped stdout and stderr and a null stdin.
    ///
    /// The child is killed if its handle is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`TierError::Capture`] if the process cannot be started.
    fn spawn(&self, script: &str) -> TierResult<Child> {
        let mut cmd = self.command(script);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(target_host = %self.target(), script, "Spawning command");
        cmd.spawn().map_err(|e| TierError::Capture {
            target: self.target().to_string(),
            message: format!("failed to spawn: {e}"),
        })
    }

    /// Runs `script` to completion and collects its output.
    async fn run(&self, script: &str) -> CommandOutput {
        let child = match self.spawn(script) {
            Ok(child) => child,
            Err(e) => {
                return CommandOutput {
                    error: Some(e.to_string()),
                    ..CommandOutput::default()
                }
            }
        };

        match child.wait_with_output().await {
            Ok(output) => CommandOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                error: (!output.status.success()).then(|| format!("command exited with {}", output.status)),
            },
            Err(e) => CommandOutput {
                error: Some(format!("failed to wait for command: {e}")),
                ..CommandOutput::default()
            },
        }
    }
}

#[async_trait]
impl<T: CommandRunner + ?Sized> CommandRunner for Arc<T> {
    fn target(&self) -> &str {
        (**self).target()
    }

    fn command(&self, script: &str) -> Command {
        (**self).command(script)
    }

    fn spawn(&self, script: &str) -> TierResult<Child> {
        (**self).spawn(script)
    }

    async fn run(&self, script: &str) -> CommandOutput {
        (**self).run(script).await
    }
}

/// Runs scripts with the local `sh`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalRunner;

impl CommandRunner for LocalRunner {
    fn target(&self) -> &str {
        "local"
    }

    fn command(&self, script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }
}

/// Runs scripts on a remote host through the `ssh` client binary.
///
/// `BatchMode` is always on: a missing key fails the command instead of
/// prompting.
#[derive(Debug, Clone)]
pub struct SshRunner {
    host: String,
    user: Option<String>,
    port: Option<u16>,
    identity_file: Option<PathBuf>,
    connect_timeout_secs: u64,
}

impl SshRunner {
    /// Creates a runner for `host`.
    ///
    /// # Panics
    ///
    /// Panics if `host` is empty.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        let host = host.into();
        assert!(!host.is_empty(), "ssh host must not be empty");
        Self {
            host,
            user: None,
            port: None,
            identity_file: None,
            connect_timeout_secs: 10,
        }
    }

    /// Sets the remote user.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Sets the remote port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the private key file.
    #[must_use]
    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    fn args(&self, script: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
        ];
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args.push("--".to_string());
        args.push(match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        });
        args.push(script.to_string());
        args
    }
}

impl CommandRunner for SshRunner {
    fn target(&self) -> &str {
        &self.host
    }

    fn command(&self, script: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(self.args(script));
        cmd
    }
}

// -----------------------------------------------------------------------------
// Capture
// -----------------------------------------------------------------------------

/// An archive-producing shell pipeline whose stdout is the backup stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSpec {
    /// Script passed to the runner.
    pub script: String,
}

impl CaptureSpec {
    /// Wraps an arbitrary capture script.
    #[must_use]
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
        }
    }

    /// Archives the contents of `path` with tar, gzip-compressed when
    /// `compress` is set.
    #[must_use]
    pub fn tar_directory(path: &str, compress: bool) -> Self {
        let flags = if compress { "-czf" } else { "-cf" };
        Self::new(format!("tar {flags} - -C {} .", shell_quote(path)))
    }
}

/// Quotes `value` for a POSIX shell.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// How a finished capture process exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureExit {
    /// Exit status zero.
    Clean,
    /// Non-zero exit with a benign diagnostic; the archive is usable.
    Benign(String),
    /// Any other failure.
    Failed(String),
}

/// Classifies a capture exit from its exit code and stderr.
///
/// `code` is `None` when the process was killed by a signal. A non-zero
/// exit is benign only when the code is 1 and every stderr line is a
/// benign diagnostic or tar's closing summary.
#[must_use]
pub fn classify_exit(code: Option<i32>, stderr: &str) -> CaptureExit {
    if code == Some(0) {
        return CaptureExit::Clean;
    }

    let diagnostics: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.ends_with(FAILURE_SUMMARY))
        .collect();
    let is_benign = |line: &&str| {
        BENIGN_CAPTURE_DIAGNOSTICS
            .iter()
            .any(|diagnostic| line.contains(diagnostic))
    };

    if code == Some(BENIGN_EXIT_CODE)
        && !diagnostics.is_empty()
        && diagnostics.iter().all(is_benign)
    {
        return CaptureExit::Benign(diagnostics.join("; "));
    }

    let status = code.map_or_else(|| "a signal".to_string(), |code| format!("code {code}"));
    let detail = stderr.trim();
    if detail.is_empty() {
        CaptureExit::Failed(format!("capture exited with {status}"))
    } else {
        CaptureExit::Failed(format!("capture exited with {status}: {detail}"))
    }
}
