//! Builder for executing external tool commands with timeout and
//! cancellation support.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use reelforge_core::{Error, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Lines of stderr kept in error messages.
const STDERR_TAIL_LINES: usize = 12;

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output, raw.
    pub stdout: Vec<u8>,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

impl ToolOutput {
    /// Standard output decoded as lossy UTF-8.
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Result of [`ToolCommand::execute_streaming`]. Stdout has already been
/// handed to the line callback.
#[derive(Debug, Clone)]
pub struct StreamOutput {
    pub status: ExitStatus,
    pub stderr: String,
}

enum StreamEnd {
    Eof,
    Cancelled,
    TimedOut,
    ReadError(std::io::Error),
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use reelforge_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> reelforge_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffprobe"))
///     .arg("-v").arg("quiet")
///     .arg("-print_format").arg("json")
///     .arg("-show_format")
///     .arg("-show_streams")
///     .arg("/path/to/video.mkv")
///     .execute()
///     .await?;
/// println!("{}", output.stdout_str());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = Some(d);
        self
    }

    /// Let the process run for as long as it needs.
    pub fn no_timeout(&mut self) -> &mut Self {
        self.timeout = None;
        self
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn(&self, name: &str) -> Result<Child> {
        tracing::debug!(tool = name, args = ?self.args, "spawning");
        self.command()
            .spawn()
            .map_err(|e| Error::tool(name, format!("failed to spawn: {e}")))
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// - [`Error::Tool`] if spawning fails, the process times out, or it
    ///   exits with a non-zero status (message includes the stderr tail).
    pub async fn execute(&self) -> Result<ToolOutput> {
        let name = self.program_name();
        let child = self.spawn(&name)?;

        // kill_on_drop reaps the child if the timeout drops the future.
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| Error::tool(&name, format!("timed out after {limit:?}")))?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| Error::tool(&name, format!("I/O error waiting for process: {e}")))?;

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            return Err(Error::tool(
                name,
                format!("exited with status {}: {}", output.status, stderr_tail(&stderr)),
            ));
        }

        Ok(ToolOutput {
            status: output.status,
            stdout: output.stdout,
            stderr,
        })
    }

    /// Execute the command, handing each stdout line to `on_line` as it
    /// arrives.
    ///
    /// Lines are decoded as lossy UTF-8 with the line terminator removed; a
    /// final line without a terminator is still delivered. Stderr is drained
    /// concurrently so a chatty child never blocks on a full pipe.
    ///
    /// # Errors
    ///
    /// - [`Error::Cancelled`] if `cancel` fires; the child is killed first.
    /// - [`Error::Tool`] on spawn failure, timeout, or non-zero exit.
    pub async fn execute_streaming<F>(
        &self,
        mut on_line: F,
        cancel: &CancellationToken,
    ) -> Result<StreamOutput>
    where
        F: FnMut(&str),
    {
        let name = self.program_name();
        let mut child = self.spawn(&name)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::tool(&name, "stdout was not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::tool(&name, "stderr was not captured"))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        });

        let limit = self.timeout;
        let deadline = async move {
            match limit {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let mut reader = BufReader::new(stdout);
        let mut line = Vec::with_capacity(256);

        let end = loop {
            line.clear();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break StreamEnd::Cancelled,
                _ = &mut deadline => break StreamEnd::TimedOut,
                read = reader.read_until(b'\n', &mut line) => match read {
                    Ok(0) => break StreamEnd::Eof,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&line);
                        on_line(text.trim_end_matches(['\r', '\n']));
                    }
                    Err(e) => break StreamEnd::ReadError(e),
                },
            }
        };

        let status = match end {
            StreamEnd::Eof => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled),
                _ = &mut deadline => Err(timed_out(&name, limit)),
                status = child.wait() => status
                    .map_err(|e| Error::tool(&name, format!("I/O error waiting for process: {e}"))),
            },
            StreamEnd::Cancelled => Err(Error::Cancelled),
            StreamEnd::TimedOut => Err(timed_out(&name, limit)),
            StreamEnd::ReadError(e) => Err(Error::tool(&name, format!("failed to read stdout: {e}"))),
        };

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                kill(&mut child, &name).await;
                stderr_task.abort();
                return Err(e);
            }
        };

        let stderr = stderr_task.await.unwrap_or_default();
        let stderr = String::from_utf8_lossy(&stderr).into_owned();

        if !status.success() {
            return Err(Error::tool(
                name,
                format!("exited with status {status}: {}", stderr_tail(&stderr)),
            ));
        }

        Ok(StreamOutput { status, stderr })
    }
}

fn timed_out(name: &str, limit: Option<Duration>) -> Error {
    Error::tool(name, format!("timed out after {limit:?}"))
}

async fn kill(child: &mut Child, name: &str) {
    if let Err(e) = child.kill().await {
        tracing::warn!(tool = name, "failed to kill child process: {e}");
    }
}

/// Last few non-empty lines of stderr, which is where ffmpeg puts the cause.
fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_echo() {
        let output = ToolCommand::new(PathBuf::from("echo"))
            .arg("hello")
            .execute()
            .await;

        match output {
            Ok(out) => {
                assert!(out.status.success());
                assert!(out.stdout_str().trim().contains("hello"));
            }
            Err(_) => {
                // On some minimal environments echo may not exist; skip.
            }
        }
    }

    #[tokio::test]
    async fn execute_nonexistent_tool() {
        let result = ToolCommand::new(PathBuf::from("nonexistent_tool_xyz_12345"))
            .execute()
            .await;
        assert!(matches!(result, Err(Error::Tool { .. })));
    }

    #[tokio::test]
    async fn timeout_fires() {
        let result = ToolCommand::new(PathBuf::from("sleep"))
            .arg("10")
            .timeout(Duration::from_millis(100))
            .execute()
            .await;
        let err = result.unwrap_err().to_string();
        assert!(err.contains("timed out"), "unexpected error: {err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streaming_delivers_lines_including_partial_last() {
        let mut lines = Vec::new();
        let out = ToolCommand::new(PathBuf::from("sh"))
            .arg("-c")
            .arg("printf 'a=1\\nb=2\\r\\ntail'")
            .execute_streaming(|l| lines.push(l.to_string()), &CancellationToken::new())
            .await
            .unwrap();
        assert!(out.status.success());
        assert_eq!(lines, vec!["a=1", "b=2", "tail"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streaming_non_zero_exit_carries_stderr() {
        let err = ToolCommand::new(PathBuf::from("sh"))
            .arg("-c")
            .arg("echo 'Invalid data found when processing input' >&2; exit 1")
            .execute_streaming(|_| {}, &CancellationToken::new())
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Invalid data found"), "unexpected error: {msg}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streaming_cancel_kills_child() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = ToolCommand::new(PathBuf::from("sleep"))
            .arg("10")
            .execute_streaming(|_| {}, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let text: String = (0..30).map(|i| format!("line {i}\n\n")).collect();
        let tail = stderr_tail(&text);
        assert_eq!(tail.lines().count(), STDERR_TAIL_LINES);
        assert!(tail.ends_with("line 29"));
    }
}
