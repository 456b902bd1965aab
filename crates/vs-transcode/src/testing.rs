//! Test doubles for the transcoder seam.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use vs_core::{StreamKey, StreamKind};
use vs_media::Timeline;

use crate::presets::Representation;
use crate::process::{TranscodeJob, TranscodeProcess, Transcoder};
use crate::registry::{RegistrySettings, SessionRequest};
use crate::session::SessionKey;

#[derive(Debug, Clone, Copy)]
enum Behavior {
    /// Never writes anything and never exits on its own.
    Stalled,
    /// Writes `init.mp4` and `count` segments, then exits successfully.
    Producing { count: u32, every: Duration },
    /// Writes a segment every `every` until terminated.
    Streaming { every: Duration },
    /// Refuses to start.
    Failing,
}

/// A transcoder that writes placeholder files instead of running ffmpeg.
#[derive(Debug)]
pub struct FakeTranscoder {
    behavior: Behavior,
    spawns: AtomicUsize,
    terminations: Arc<AtomicUsize>,
    suspends: Arc<AtomicUsize>,
    resumes: Arc<AtomicUsize>,
}

impl FakeTranscoder {
    fn with(behavior: Behavior) -> Self {
        Self {
            behavior,
            spawns: AtomicUsize::new(0),
            terminations: Arc::new(AtomicUsize::new(0)),
            suspends: Arc::new(AtomicUsize::new(0)),
            resumes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn stalled() -> Self {
        Self::with(Behavior::Stalled)
    }

    pub fn producing(count: u32, every: Duration) -> Self {
        Self::with(Behavior::Producing { count, every })
    }

    pub fn streaming(every: Duration) -> Self {
        Self::with(Behavior::Streaming { every })
    }

    pub fn failing() -> Self {
        Self::with(Behavior::Failing)
    }

    pub fn spawns(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }

    pub fn suspends(&self) -> usize {
        self.suspends.load(Ordering::SeqCst)
    }

    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }
}

impl Transcoder for FakeTranscoder {
    fn spawn(&self, job: &TranscodeJob) -> vs_core::Result<Box<dyn TranscodeProcess>> {
        self.spawns.fetch_add(1, Ordering::SeqCst);

        let dir = job.output_dir.clone();
        let start = job.start_segment;
        let paused = Arc::new(AtomicBool::new(false));
        let writer = match self.behavior {
            Behavior::Failing => {
                return Err(vs_core::Error::tool("ffmpeg", "failed to spawn: fake failure"));
            }
            Behavior::Stalled => None,
            Behavior::Producing { count, every } => Some(tokio::spawn(write_segments(
                dir,
                start,
                Some(count),
                every,
                Arc::clone(&paused),
            ))),
            Behavior::Streaming { every } => Some(tokio::spawn(write_segments(
                dir,
                start,
                None,
                every,
                Arc::clone(&paused),
            ))),
        };
        let exits = matches!(self.behavior, Behavior::Producing { .. });

        Ok(Box::new(FakeProcess {
            writer,
            exits,
            paused,
            terminations: Arc::clone(&self.terminations),
            suspends: Arc::clone(&self.suspends),
            resumes: Arc::clone(&self.resumes),
        }))
    }
}

async fn write_segments(
    dir: PathBuf,
    start: u32,
    count: Option<u32>,
    every: Duration,
    paused: Arc<AtomicBool>,
) {
    let _ = tokio::fs::write(dir.join("init.mp4"), b"init").await;
    let mut n = start;
    loop {
        if count.is_some_and(|c| n - start >= c) {
            return;
        }
        tokio::time::sleep(every).await;
        if paused.load(Ordering::SeqCst) {
            continue;
        }
        let _ = tokio::fs::write(dir.join(format!("segment_{n}.m4s")), n.to_be_bytes()).await;
        n += 1;
    }
}

struct FakeProcess {
    writer: Option<JoinHandle<()>>,
    exits: bool,
    paused: Arc<AtomicBool>,
    terminations: Arc<AtomicUsize>,
    suspends: Arc<AtomicUsize>,
    resumes: Arc<AtomicUsize>,
}

#[async_trait]
impl TranscodeProcess for FakeProcess {
    async fn wait(&mut self) -> vs_core::Result<bool> {
        if let Some(writer) = self.writer.as_mut() {
            let _ = writer.await;
            self.writer = None;
        }
        if self.exits {
            Ok(true)
        } else {
            std::future::pending().await
        }
    }

    async fn suspend(&mut self) -> vs_core::Result<()> {
        self.suspends.fetch_add(1, Ordering::SeqCst);
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&mut self) -> vs_core::Result<()> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn terminate(&mut self) {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }
}

pub fn job(scratch: &Path, start_segment: u32) -> TranscodeJob {
    TranscodeJob {
        input: "/media/film.mkv".into(),
        stream_index: 0,
        kind: StreamKind::Video,
        representation: Representation::Passthrough,
        start_segment,
        start_time: Duration::from_secs(u64::from(start_segment) * 5),
        segment_duration: Duration::from_secs(5),
        timeline: Arc::new(Timeline::constant(
            Duration::from_secs(1000),
            Duration::from_secs(5),
        )),
        output_dir: scratch.join(format!("job-{start_segment}")),
    }
}

pub fn settings(scratch: &Path) -> RegistrySettings {
    RegistrySettings {
        scratch_dir: scratch.to_path_buf(),
        lookahead: 5,
        poll_interval: Duration::from_millis(5),
        segment_timeout: Duration::from_secs(5),
        startup_grace: Duration::ZERO,
        idle_timeout: Duration::from_secs(3600),
        throttle_buffer: 0,
    }
}

pub fn request(representation_id: &str) -> SessionRequest {
    SessionRequest {
        key: SessionKey::new(StreamKey::new("local/media/film.mkv", 0), representation_id),
        input: "/media/film.mkv".into(),
        kind: StreamKind::Video,
        representation: Representation::resolve(representation_id).unwrap(),
        timeline: Arc::new(Timeline::constant(
            Duration::from_secs(1000),
            Duration::from_secs(5),
        )),
        segment_duration: Duration::from_secs(5),
    }
}
