//! Subprocess execution for host tools.
//!
//! Every external program the orchestrator touches goes through
//! [`CommandRunner`], which captures output, logs the command line, and maps
//! failures onto [`ExternalToolError`].

use crate::error::ExternalToolError;
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Captured result of a finished command.
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutput {
    /// Rendered command line.
    pub command: String,
    /// Whether the process exited with status 0.
    pub ok: bool,
    /// Exit code, `None` when killed by a signal.
    pub code: Option<i32>,
    /// Captured stdout, trimmed.
    pub stdout: String,
    /// Captured stderr, trimmed.
    pub stderr: String,
}

/// A command to run, built fluently.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    stdin: Option<String>,
}

impl CommandSpec {
    /// Creates a spec for `program`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            stdin: None,
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Feeds `input` to the process on stdin.
    #[must_use]
    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Command line for logs and errors. Stdin is never included.
    #[must_use]
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                line.push('\'');
                line.push_str(arg);
                line.push('\'');
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

/// Runs commands on the local host.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner;

impl CommandRunner {
    /// Creates a new runner.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Runs a command and captures its output regardless of exit status.
    ///
    /// # Errors
    ///
    /// Returns an error only if the process cannot be spawned or awaited.
    pub async fn capture(&self, spec: &CommandSpec) -> Result<CommandOutput, ExternalToolError> {
        let rendered = spec.display();
        debug!("Running: {rendered}");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| ExternalToolError::spawn_failed(&rendered, &e))?;

        if let Some(input) = &spec.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(input.as_bytes())
                    .await
                    .map_err(|e| ExternalToolError::spawn_failed(&rendered, &e))?;
                // Dropping closes the pipe so the child sees EOF.
                drop(stdin);
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ExternalToolError::spawn_failed(&rendered, &e))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            debug!("Command exited with {:?}: {rendered}", output.status.code());
        }

        Ok(CommandOutput {
            command: rendered,
            ok: output.status.success(),
            code: output.status.code(),
            stdout,
            stderr,
        })
    }

    /// Runs a command and fails unless it exits with status 0.
    ///
    /// # Errors
    ///
    /// Returns an [`ExternalToolError`] carrying the exit status and stderr tail.
    pub async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExternalToolError> {
        let output = self.capture(spec).await?;
        if output.ok {
            Ok(output)
        } else {
            Err(output.into_error())
        }
    }
}

impl CommandOutput {
    /// Converts a failed output into a tool error.
    #[must_use]
    pub fn into_error(self) -> ExternalToolError {
        let stderr = if self.stderr.is_empty() {
            self.stdout
        } else {
            self.stderr
        };
        ExternalToolError::from_parts(self.command, self.code, &stderr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_quotes_whitespace() {
        let spec = CommandSpec::new("psql")
            .args(["-v", "ON_ERROR_STOP=1"])
            .arg("select 1")
            .arg("");
        assert_eq!(spec.display(), "psql -v ON_ERROR_STOP=1 'select 1' ''");
    }

    #[tokio::test]
    async fn test_capture_success() {
        let output = CommandRunner::new()
            .capture(&CommandSpec::new("sh").args(["-c", "echo hello"]))
            .await
            .unwrap();
        assert!(output.ok);
        assert_eq!(output.stdout, "hello");
        assert_eq!(output.code, Some(0));
    }

    #[tokio::test]
    async fn test_run_failure_maps_error() {
        let err = CommandRunner::new()
            .run(&CommandSpec::new("sh").args(["-c", "echo boom >&2; exit 3"]))
            .await
            .unwrap_err();
        assert_eq!(err.code, Some(3));
        assert_eq!(err.stderr, "boom");
        assert!(err.to_string().contains("status 3"));
    }

    #[tokio::test]
    async fn test_stdin_is_fed() {
        let output = CommandRunner::new()
            .run(&CommandSpec::new("cat").with_stdin("from stdin"))
            .await
            .unwrap();
        assert_eq!(output.stdout, "from stdin");
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let err = CommandRunner::new()
            .run(&CommandSpec::new("definitely-not-a-real-binary-xyz"))
            .await
            .unwrap_err();
        assert_eq!(err.code, None);
        assert_eq!(err.status_text, "spawn failure");
    }
}
