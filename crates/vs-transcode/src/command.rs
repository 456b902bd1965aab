//! Builder for running short-lived external tool invocations with a timeout.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Command;

/// Default command timeout: 2 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

/// A builder for one-shot tool runs such as `ffprobe`.
///
/// Long-running transcodes do not go through here; they are supervised by
/// [`crate::process::FfmpegTranscoder`].
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// The command line as it would be typed, for logs.
    pub fn display(&self) -> String {
        display_command(&self.program, &self.args)
    }

    /// Run the command to completion, capturing stdout and stderr.
    ///
    /// Spawn failures, non-zero exits, and timeouts all surface as
    /// [`vs_core::Error::Tool`]. The child is killed if the timeout fires.
    pub async fn execute(&self) -> vs_core::Result<ToolOutput> {
        let program_name = self
            .program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string());

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            tracing::error!(command = %self.display(), error = %e, "Failed to spawn tool");
            vs_core::Error::tool(&program_name, format!("failed to spawn: {e}"))
        })?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let tool_output = ToolOutput {
                    status: output.status,
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                };

                if !output.status.success() {
                    tracing::warn!(
                        command = %self.display(),
                        status = %output.status,
                        "Tool exited with failure"
                    );
                    return Err(vs_core::Error::tool(
                        program_name,
                        format!(
                            "exited with status {}: {}",
                            output.status,
                            tool_output.stderr.trim()
                        ),
                    ));
                }

                Ok(tool_output)
            }
            Ok(Err(e)) => Err(vs_core::Error::tool(
                program_name,
                format!("I/O error waiting for process: {e}"),
            )),
            // The dropped future owns the child; kill_on_drop reaps it.
            Err(_elapsed) => Err(vs_core::Error::tool(
                program_name,
                format!("timed out after {:?}", self.timeout),
            )),
        }
    }
}

/// Render a program and its arguments as a shell-like string.
pub fn display_command(program: &std::path::Path, args: &[String]) -> String {
    let mut out = program.display().to_string();
    for a in args {
        out.push(' ');
        if a.is_empty() || a.contains(|c: char| c.is_whitespace() || c == '\'' || c == '"') {
            out.push('\'');
            out.push_str(&a.replace('\'', r"'\''"));
            out.push('\'');
        } else {
            out.push_str(a);
        }
    }
    out
}
