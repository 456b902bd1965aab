//! Transcoder process spawning.
//!
//! The session layer only needs two things from a transcoder: start a job
//! that writes into an output directory, and a handle that can be waited
//! on, paused, and terminated. [`FfmpegTranscoder`] is the production implementation;
//! tests substitute their own.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use vs_core::StreamKind;
use vs_media::Timeline;

use crate::command::display_command;
use crate::ffmpeg::build_args;
use crate::presets::Representation;
use crate::tools::ToolRegistry;

/// How long a terminated process gets to exit before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Everything needed to start producing one representation of one stream.
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    /// Path or URL the transcoder reads.
    pub input: String,
    pub stream_index: u32,
    pub kind: StreamKind,
    pub representation: Representation,
    /// Number of the first segment the job writes.
    pub start_segment: u32,
    /// Source position of the start of `start_segment`.
    pub start_time: Duration,
    /// Target segment length handed to the segmenter.
    pub segment_duration: Duration,
    /// Segmentation the output must follow; stream copies are cut exactly
    /// at its boundaries.
    pub timeline: Arc<Timeline>,
    pub output_dir: PathBuf,
}

/// Starts transcode jobs.
pub trait Transcoder: Send + Sync {
    fn spawn(&self, job: &TranscodeJob) -> vs_core::Result<Box<dyn TranscodeProcess>>;
}

/// A running transcode job.
#[async_trait]
pub trait TranscodeProcess: Send {
    /// Wait for the job to finish; `true` if it exited successfully.
    ///
    /// Must be cancel-safe: dropping the future leaves the job running.
    async fn wait(&mut self) -> vs_core::Result<bool>;

    /// Pause the job without losing its progress.
    async fn suspend(&mut self) -> vs_core::Result<()>;

    /// Continue a paused job. Tolerates a job that is not paused.
    async fn resume(&mut self) -> vs_core::Result<()>;

    /// Stop the job and wait for it to be gone. Tolerates a job that has
    /// already exited.
    async fn terminate(&mut self);
}

/// Runs jobs with the ffmpeg binary from the tool registry.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    tools: Arc<ToolRegistry>,
}

impl FfmpegTranscoder {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }
}

impl Transcoder for FfmpegTranscoder {
    fn spawn(&self, job: &TranscodeJob) -> vs_core::Result<Box<dyn TranscodeProcess>> {
        let ffmpeg = self.tools.require("ffmpeg")?;
        let args = build_args(job);
        let command_line = display_command(ffmpeg, &args);

        let mut cmd = Command::new(ffmpeg);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so termination reaches any helpers ffmpeg forks.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            tracing::error!(command = %command_line, error = %e, "Failed to spawn ffmpeg");
            vs_core::Error::tool("ffmpeg", format!("failed to spawn: {e}"))
        })?;
        tracing::info!(pid = ?child.id(), command = %command_line, "Spawned ffmpeg");

        if let Some(stderr) = child.stderr.take() {
            let dir = job.output_dir.display().to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::warn!(output_dir = %dir, "ffmpeg: {line}");
                }
            });
        }

        Ok(Box::new(FfmpegProcess { child }))
    }
}

#[derive(Debug)]
struct FfmpegProcess {
    child: Child,
}

impl FfmpegProcess {
    /// Stop (`pause`) or continue the process group. A group that is
    /// already gone is not an error.
    #[cfg(unix)]
    fn signal_group(&self, pause: bool) -> vs_core::Result<()> {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        let signal = if pause { Signal::SIGSTOP } else { Signal::SIGCONT };
        match killpg(Pid::from_raw(pid as i32), signal) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => {
                tracing::debug!(pid, signal = signal.as_str(), "Signalled ffmpeg process group");
                Ok(())
            }
            Err(e) => Err(vs_core::Error::tool("ffmpeg", format!("failed to send {}: {e}", signal.as_str()))),
        }
    }

    #[cfg(not(unix))]
    fn signal_group(&self, pause: bool) -> vs_core::Result<()> {
        tracing::debug!(pause, "Job control is unavailable on this platform");
        Ok(())
    }
}

#[async_trait]
impl TranscodeProcess for FfmpegProcess {
    async fn wait(&mut self) -> vs_core::Result<bool> {
        let status = self.child.wait().await?;
        Ok(status.success())
    }

    async fn suspend(&mut self) -> vs_core::Result<()> {
        self.signal_group(true)
    }

    async fn resume(&mut self) -> vs_core::Result<()> {
        self.signal_group(false)
    }

    async fn terminate(&mut self) {
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }

        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            let group = Pid::from_raw(pid as i32);
            match killpg(group, Signal::SIGTERM) {
                Ok(()) => {
                    // A paused group only acts on SIGTERM once continued.
                    let _ = killpg(group, Signal::SIGCONT);
                    if tokio::time::timeout(TERMINATE_GRACE, self.child.wait())
                        .await
                        .is_ok()
                    {
                        return;
                    }
                    tracing::warn!(pid, "ffmpeg ignored SIGTERM; killing");
                }
                Err(nix::errno::Errno::ESRCH) => {}
                Err(e) => tracing::warn!(pid, error = %e, "Failed to signal ffmpeg process group"),
            }
        }

        if let Err(e) = self.child.kill().await {
            tracing::warn!(error = %e, "Failed to kill ffmpeg");
        }
    }
}
