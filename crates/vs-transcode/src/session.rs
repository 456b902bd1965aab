//! A single transcoding session: one process writing one representation of
//! one stream into its own output directory.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use vs_core::{SegmentIndex, StreamKey};

use crate::presets::Representation;
use crate::process::{TranscodeJob, TranscodeProcess, Transcoder};

/// Initialization segment file name inside a session directory.
pub const INIT_FILE: &str = "init.mp4";
/// Segment file pattern handed to the segmenter.
pub const SEGMENT_PATTERN: &str = "segment_%d.m4s";
/// The single output file of a subtitle session.
pub const SUBTITLE_FILE: &str = "segment_0.vtt";

const RUNNING: u8 = 0;
const EXITED_OK: u8 = 1;
const EXITED_FAILED: u8 = 2;

/// Identifies a session slot: one representation of one stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SessionKey {
    pub stream: StreamKey,
    pub representation_id: String,
}

impl SessionKey {
    pub fn new(stream: StreamKey, representation_id: impl Into<String>) -> Self {
        Self {
            stream,
            representation_id: representation_id.into(),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.stream, self.representation_id)
    }
}

/// Readiness of one requested segment within a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentState {
    Ready(PathBuf),
    Pending,
    /// The process is gone and the segment was never written.
    Unsatisfiable,
}

/// Point-in-time view of a session for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub key: SessionKey,
    pub start_segment: u32,
    pub last_served: Option<u32>,
    pub exited: bool,
    pub throttled: bool,
    pub created_at: DateTime<Utc>,
    pub idle_secs: u64,
    pub output_dir: PathBuf,
}

/// One running (or finished) transcode and the files it produced.
///
/// The process is owned by a supervisor task, which records when it exits,
/// pauses and resumes it on request, and terminates it when the session is
/// destroyed. Dropping a session that was never destroyed still stops the
/// process and removes the output directory.
#[derive(Debug)]
pub struct TranscodingSession {
    id: Uuid,
    key: SessionKey,
    representation: Representation,
    start_segment: u32,
    output_dir: PathBuf,
    created_at: DateTime<Utc>,
    state: Arc<AtomicU8>,
    /// Highest segment handed to a client, -1 before the first.
    last_served: AtomicI64,
    last_access: Mutex<Instant>,
    cancel: CancellationToken,
    /// Whether the process should be paused.
    throttle: watch::Sender<bool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl TranscodingSession {
    /// Create the output directory and spawn the job.
    ///
    /// On spawn failure the directory is removed again and the error is
    /// returned unchanged.
    pub async fn start(
        key: SessionKey,
        job: TranscodeJob,
        transcoder: &dyn Transcoder,
    ) -> vs_core::Result<Arc<Self>> {
        tokio::fs::create_dir_all(&job.output_dir).await?;

        let process = match transcoder.spawn(&job) {
            Ok(process) => process,
            Err(e) => {
                tracing::error!(session = %key, error = %e, "Failed to start transcode");
                if let Err(rm) = tokio::fs::remove_dir_all(&job.output_dir).await {
                    tracing::warn!(dir = %job.output_dir.display(), error = %rm, "Failed to remove session directory");
                }
                return Err(e);
            }
        };

        let id = Uuid::new_v4();
        let state = Arc::new(AtomicU8::new(RUNNING));
        let cancel = CancellationToken::new();
        let (throttle, throttled) = watch::channel(false);
        let supervisor = tokio::spawn(supervise(
            process,
            Arc::clone(&state),
            cancel.clone(),
            throttled,
            key.clone(),
        ));

        tracing::info!(
            %id,
            session = %key,
            start_segment = job.start_segment,
            dir = %job.output_dir.display(),
            "Started transcoding session"
        );

        Ok(Arc::new(Self {
            id,
            key,
            representation: job.representation,
            start_segment: job.start_segment,
            output_dir: job.output_dir,
            created_at: Utc::now(),
            state,
            last_served: AtomicI64::new(-1),
            last_access: Mutex::new(Instant::now()),
            cancel,
            throttle,
            supervisor: Mutex::new(Some(supervisor)),
            destroyed: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn start_segment(&self) -> u32 {
        self.start_segment
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn has_exited(&self) -> bool {
        self.state.load(Ordering::SeqCst) != RUNNING
    }

    pub fn last_served(&self) -> Option<u32> {
        u32::try_from(self.last_served.load(Ordering::SeqCst)).ok()
    }

    /// Record that `segment` was handed to a client.
    pub fn mark_served(&self, segment: SegmentIndex) {
        if let SegmentIndex::Media(n) = segment {
            self.last_served.fetch_max(i64::from(n), Ordering::SeqCst);
        }
        self.touch();
    }

    pub fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_access.lock().elapsed()
    }

    /// Path of `segment` inside the output directory.
    pub fn segment_path(&self, segment: SegmentIndex) -> PathBuf {
        match segment {
            SegmentIndex::Init => self.output_dir.join(INIT_FILE),
            SegmentIndex::Media(_) if self.representation.is_single_file() => {
                self.output_dir.join(SUBTITLE_FILE)
            }
            SegmentIndex::Media(n) => self.output_dir.join(format!("segment_{n}.m4s")),
        }
    }

    /// Segment numbers currently present on disk.
    pub async fn materialized_segments(&self) -> vs_core::Result<BTreeSet<u32>> {
        let mut found = BTreeSet::new();
        let mut entries = match tokio::fs::read_dir(&self.output_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(n) = name
                .to_str()
                .and_then(|s| s.strip_prefix("segment_"))
                .and_then(|s| s.strip_suffix(".m4s"))
                .and_then(|s| s.parse::<u32>().ok())
            {
                found.insert(n);
            }
        }
        Ok(found)
    }

    /// Whether `segment` can be served now.
    ///
    /// A media segment is complete once the next one has appeared or the
    /// process has exited; the segmenter writes files in order. Single-file
    /// outputs are only complete after the process exits.
    pub async fn segment_state(&self, segment: SegmentIndex) -> vs_core::Result<SegmentState> {
        // Read exit state before the directory, so a file seen missing after
        // an observed exit really is missing.
        let exited = self.has_exited();
        let path = self.segment_path(segment);

        let present = match segment {
            SegmentIndex::Media(n) if !self.representation.is_single_file() => {
                let segments = self.materialized_segments().await?;
                if segments.contains(&n) && (exited || segments.contains(&(n + 1))) {
                    return Ok(SegmentState::Ready(path));
                }
                segments.contains(&n)
            }
            SegmentIndex::Media(_) => {
                let exists = tokio::fs::try_exists(&path).await?;
                if exists && exited {
                    return Ok(SegmentState::Ready(path));
                }
                exists
            }
            SegmentIndex::Init => {
                if tokio::fs::try_exists(&path).await? {
                    return Ok(SegmentState::Ready(path));
                }
                false
            }
        };

        if exited && !present {
            Ok(SegmentState::Unsatisfiable)
        } else {
            Ok(SegmentState::Pending)
        }
    }

    pub fn is_throttled(&self) -> bool {
        *self.throttle.borrow()
    }

    /// Ask the supervisor to pause the process. Returns whether the session
    /// was running unthrottled before.
    pub fn throttle(&self) -> bool {
        self.throttle.send_if_modified(|paused| !std::mem::replace(paused, true))
    }

    /// Ask the supervisor to resume a paused process. Returns whether the
    /// session was throttled.
    pub fn unthrottle(&self) -> bool {
        self.throttle.send_if_modified(|paused| std::mem::replace(paused, false))
    }

    /// Whether the process has written the segment `buffer` past the
    /// furthest point clients have fetched, and so can pause for a while.
    ///
    /// Finished, already-throttled and single-file sessions never qualify.
    pub async fn is_ahead_by(&self, buffer: u32) -> vs_core::Result<bool> {
        if self.has_exited() || self.is_throttled() || self.representation.is_single_file() {
            return Ok(false);
        }
        let head = self
            .last_served()
            .map_or(self.start_segment, |served| served.max(self.start_segment));
        let target = head.saturating_add(buffer);
        Ok(self.materialized_segments().await?.contains(&target))
    }

    /// Whether this session can still produce `segment` soon.
    ///
    /// Any session of the right key serves the initialization segment. A
    /// media segment must not precede the start, and must fall within
    /// `lookahead` segments of the furthest point already served.
    pub fn covers(&self, segment: SegmentIndex, lookahead: u32) -> bool {
        match segment {
            SegmentIndex::Init => true,
            SegmentIndex::Media(n) => window_covers(self.start_segment, self.last_served(), n, lookahead),
        }
    }

    /// Stop the process and remove the output directory.
    ///
    /// Safe to call any number of times; only the first call does work.
    /// Directory removal failures are logged, never returned.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();

        let supervisor = self.supervisor.lock().take();
        if let Some(handle) = supervisor {
            if let Err(e) = handle.await {
                tracing::warn!(id = %self.id, error = %e, "Session supervisor ended abnormally");
            }
        }

        match tokio::fs::remove_dir_all(&self.output_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(dir = %self.output_dir.display(), error = %e, "Failed to remove session directory");
            }
        }
        tracing::info!(id = %self.id, session = %self.key, "Destroyed transcoding session");
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            key: self.key.clone(),
            start_segment: self.start_segment,
            last_served: self.last_served(),
            exited: self.has_exited(),
            throttled: self.is_throttled(),
            created_at: self.created_at,
            idle_secs: self.idle_for().as_secs(),
            output_dir: self.output_dir.clone(),
        }
    }
}

impl Drop for TranscodingSession {
    fn drop(&mut self) {
        // The supervisor terminates the process once cancelled.
        self.cancel.cancel();
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        match std::fs::remove_dir_all(&self.output_dir) {
            Ok(()) => {
                tracing::debug!(id = %self.id, dir = %self.output_dir.display(), "Removed directory of dropped session");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(dir = %self.output_dir.display(), error = %e, "Failed to remove session directory");
            }
        }
    }
}

/// Reuse window for a session starting at `start`.
pub(crate) fn window_covers(start: u32, last_served: Option<u32>, n: u32, lookahead: u32) -> bool {
    let head = last_served.map_or(start, |s| s.saturating_add(1).max(start));
    n >= start && n < head.saturating_add(lookahead)
}

async fn supervise(
    mut process: Box<dyn TranscodeProcess>,
    state: Arc<AtomicU8>,
    cancel: CancellationToken,
    mut throttled: watch::Receiver<bool>,
    key: SessionKey,
) {
    let finished = loop {
        tokio::select! {
            result = process.wait() => break Some(result),
            _ = cancel.cancelled() => break None,
            changed = throttled.changed() => {
                // The session is gone once its sender is.
                if changed.is_err() {
                    break None;
                }
                let pause = *throttled.borrow_and_update();
                let outcome = if pause {
                    process.suspend().await
                } else {
                    process.resume().await
                };
                match outcome {
                    Ok(()) => tracing::debug!(session = %key, pause, "Changed transcode throttling"),
                    Err(e) => tracing::warn!(session = %key, pause, error = %e, "Failed to change transcode throttling"),
                }
            }
        }
    };

    let code = match finished {
        Some(Ok(true)) => {
            tracing::debug!(session = %key, "Transcode finished");
            EXITED_OK
        }
        Some(Ok(false)) => {
            tracing::warn!(session = %key, "Transcode exited with failure");
            EXITED_FAILED
        }
        Some(Err(e)) => {
            tracing::warn!(session = %key, error = %e, "Lost track of transcode process");
            EXITED_FAILED
        }
        None => {
            process.terminate().await;
            EXITED_FAILED
        }
    };
    state.store(code, Ordering::SeqCst);
}
