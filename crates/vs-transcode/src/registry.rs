//! The session table.
//!
//! At most one session exists per (stream, representation). A request for a
//! segment reuses the current session when that session will reach the
//! segment soon, and otherwise replaces it with one starting at the
//! requested segment. The table lock is held only while deciding; spawning
//! and destroying processes always happen outside it.
//!
//! Sessions that run far ahead of their clients are paused until a client
//! asks for a segment again.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use vs_core::config::StreamingConfig;
use vs_core::{Error, SegmentIndex, StreamKind};
use vs_media::Timeline;

use crate::presets::Representation;
use crate::process::{TranscodeJob, Transcoder};
use crate::session::{window_covers, SegmentState, SessionInfo, SessionKey, TranscodingSession};

/// Tunables for session reuse and segment waits.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub scratch_dir: PathBuf,
    pub lookahead: u32,
    pub poll_interval: Duration,
    pub segment_timeout: Duration,
    pub startup_grace: Duration,
    pub idle_timeout: Duration,
    /// Segments a session may run ahead of its clients before it is
    /// paused; 0 never pauses.
    pub throttle_buffer: u32,
}

impl RegistrySettings {
    pub fn from_config(config: &StreamingConfig) -> Self {
        Self {
            scratch_dir: config.scratch_dir.clone(),
            lookahead: config.lookahead_segments,
            poll_interval: config.poll_interval(),
            segment_timeout: config.segment_timeout(),
            startup_grace: config.startup_grace(),
            idle_timeout: config.idle_timeout(),
            throttle_buffer: config.throttle_buffer_segments,
        }
    }
}

/// What the registry needs to start a session for a stream.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub key: SessionKey,
    /// Path or URL the transcoder reads.
    pub input: String,
    pub kind: StreamKind,
    pub representation: Representation,
    pub timeline: Arc<Timeline>,
    /// Target segment length handed to the segmenter.
    pub segment_duration: Duration,
}

/// A table entry. The session is started at most once per slot; every
/// request that lands on the slot while it starts waits for the same
/// outcome.
#[derive(Debug)]
struct Slot {
    start_segment: u32,
    started: OnceCell<Result<Arc<TranscodingSession>, String>>,
}

impl Slot {
    fn new(start_segment: u32) -> Self {
        Self {
            start_segment,
            started: OnceCell::new(),
        }
    }

    fn session(&self) -> Option<Arc<TranscodingSession>> {
        match self.started.get() {
            Some(Ok(session)) => Some(Arc::clone(session)),
            _ => None,
        }
    }

    fn covers(&self, segment: SegmentIndex, lookahead: u32) -> bool {
        match self.started.get() {
            Some(Ok(session)) => session.covers(segment, lookahead),
            Some(Err(_)) => false,
            None => match segment {
                SegmentIndex::Init => true,
                SegmentIndex::Media(n) => window_covers(self.start_segment, None, n, lookahead),
            },
        }
    }
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionKey, Arc<Slot>>>,
    transcoder: Arc<dyn Transcoder>,
    settings: RegistrySettings,
    accepting: AtomicBool,
}

impl SessionRegistry {
    pub fn new(transcoder: Arc<dyn Transcoder>, settings: RegistrySettings) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            transcoder,
            settings,
            accepting: AtomicBool::new(true),
        }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    /// Find or start the session that will produce `segment`, then wait for
    /// the segment to be ready. Returns the session and the segment's path.
    pub async fn segment(
        &self,
        request: &SessionRequest,
        segment: SegmentIndex,
        cancel: &CancellationToken,
    ) -> vs_core::Result<(Arc<TranscodingSession>, PathBuf)> {
        let session = self.get_or_start(request, segment).await?;
        let path = self.await_segment(&session, segment, cancel).await?;
        Ok((session, path))
    }

    /// Find the session for `request` that covers `segment`, starting a
    /// new one if none does.
    ///
    /// A replaced session is destroyed in the background. A session whose
    /// process has exited without writing `segment` is replaced once.
    pub async fn get_or_start(
        &self,
        request: &SessionRequest,
        segment: SegmentIndex,
    ) -> vs_core::Result<Arc<TranscodingSession>> {
        let mut replaced = false;
        loop {
            let slot = self.claim(request, segment)?;
            let session = self.start_slot(&slot, request).await?;

            if !replaced
                && session.has_exited()
                && session.segment_state(segment).await? == SegmentState::Unsatisfiable
            {
                tracing::info!(session = %request.key, %segment, "Session exited before producing segment; restarting");
                self.retire_if_current(&request.key, &slot);
                replaced = true;
                continue;
            }

            if session.unthrottle() {
                tracing::debug!(session = %request.key, "Resuming throttled session");
            }
            session.touch();
            return Ok(session);
        }
    }

    /// Poll until `segment` is ready, the session can no longer produce it,
    /// the timeout passes, or `cancel` fires.
    pub async fn await_segment(
        &self,
        session: &TranscodingSession,
        segment: SegmentIndex,
        cancel: &CancellationToken,
    ) -> vs_core::Result<PathBuf> {
        let timeout = self.settings.segment_timeout;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match session.segment_state(segment).await? {
                SegmentState::Ready(path) => {
                    session.mark_served(segment);
                    return Ok(path);
                }
                SegmentState::Unsatisfiable => {
                    return Err(Error::tool(
                        "ffmpeg",
                        format!("{} exited without producing segment {segment}", session.key()),
                    ));
                }
                SegmentState::Pending => {}
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                tracing::warn!(session = %session.key(), %segment, ?timeout, "Segment wait timed out");
                return Err(Error::Timeout(format!(
                    "segment {segment} of {} not ready after {timeout:?}",
                    session.key()
                )));
            }

            let nap = self.settings.poll_interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(Error::Unavailable(format!("wait for segment {segment} cancelled")));
                }
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }

    /// Remove and destroy the session for `key`. Returns whether one existed.
    pub async fn remove(&self, key: &SessionKey) -> bool {
        let slot = self.sessions.lock().remove(key);
        match slot {
            Some(slot) => {
                if let Some(session) = slot.session() {
                    session.destroy().await;
                }
                true
            }
            None => false,
        }
    }

    /// Destroy sessions idle for longer than the configured timeout.
    /// Returns how many were destroyed.
    pub async fn reap_idle(&self) -> usize {
        let idle_timeout = self.settings.idle_timeout;
        let expired: Vec<Arc<TranscodingSession>> = {
            let mut sessions = self.sessions.lock();
            let keys: Vec<SessionKey> = sessions
                .iter()
                .filter(|(_, slot)| {
                    slot.session()
                        .is_some_and(|s| s.idle_for() >= idle_timeout)
                })
                .map(|(key, _)| key.clone())
                .collect();
            keys.iter()
                .filter_map(|key| sessions.remove(key))
                .filter_map(|slot| slot.session())
                .collect()
        };

        for session in &expired {
            tracing::info!(session = %session.key(), idle = ?session.idle_for(), "Reaping idle session");
            session.destroy().await;
        }
        expired.len()
    }

    /// Pause sessions that have written `throttle_buffer` segments past
    /// what their clients fetched. Returns how many were paused.
    pub async fn throttle_ahead(&self) -> usize {
        let buffer = self.settings.throttle_buffer;
        if buffer == 0 {
            return 0;
        }
        let sessions: Vec<Arc<TranscodingSession>> =
            self.sessions.lock().values().filter_map(|slot| slot.session()).collect();

        let mut paused = 0;
        for session in sessions {
            match session.is_ahead_by(buffer).await {
                Ok(true) => {
                    if session.throttle() {
                        tracing::info!(session = %session.key(), last_served = ?session.last_served(), "Throttling session");
                        paused += 1;
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(session = %session.key(), error = %e, "Failed to check session progress");
                }
            }
        }
        paused
    }

    /// Stop accepting requests and destroy every session.
    pub async fn destroy_all(&self) {
        let slots: Vec<Arc<Slot>> = {
            let mut sessions = self.sessions.lock();
            self.accepting.store(false, Ordering::SeqCst);
            sessions.drain().map(|(_, slot)| slot).collect()
        };

        let mut tasks = JoinSet::new();
        for session in slots.iter().filter_map(|slot| slot.session()) {
            tasks.spawn(async move { session.destroy().await });
        }
        let count = tasks.len();
        while tasks.join_next().await.is_some() {}
        tracing::info!(count, "Destroyed all transcoding sessions");
    }

    /// Diagnostic view of every started session, ordered by key.
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .sessions
            .lock()
            .values()
            .filter_map(|slot| slot.session())
            .map(|s| s.info())
            .collect();
        infos.sort_by_key(|info| info.key.to_string());
        infos
    }

    /// Number of table entries, including sessions still starting.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pick the slot for a request under the table lock.
    fn claim(&self, request: &SessionRequest, segment: SegmentIndex) -> vs_core::Result<Arc<Slot>> {
        let mut sessions = self.sessions.lock();
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("server is shutting down".into()));
        }

        if let Some(slot) = sessions.get(&request.key) {
            if slot.covers(segment, self.settings.lookahead) {
                return Ok(Arc::clone(slot));
            }
        }

        let start = segment.media().unwrap_or(0);
        let slot = Arc::new(Slot::new(start));
        if let Some(old) = sessions.insert(request.key.clone(), Arc::clone(&slot)) {
            tracing::info!(
                session = %request.key,
                from = old.start_segment,
                to = start,
                "Replacing session"
            );
            retire(&old);
        }
        Ok(slot)
    }

    /// Start the slot's session, or wait for whoever is starting it.
    ///
    /// The session is stored in the slot before anything else is awaited,
    /// so a caller that goes away mid-start never strands a process or its
    /// directory outside the table.
    async fn start_slot(
        &self,
        slot: &Arc<Slot>,
        request: &SessionRequest,
    ) -> vs_core::Result<Arc<TranscodingSession>> {
        let mut own_error = None;
        let mut spawned = false;
        let error_out = &mut own_error;
        let spawned_out = &mut spawned;
        let outcome = slot
            .started
            .get_or_init(|| async move {
                *spawned_out = true;
                match self.spawn_session(request, slot.start_segment).await {
                    Ok(session) => Ok(session),
                    Err(e) => {
                        let message = e.to_string();
                        *error_out = Some(e);
                        Err(message)
                    }
                }
            })
            .await;

        match outcome {
            Ok(session) => {
                // Evicted or shut down while starting: nobody else will
                // destroy it.
                let current = self
                    .sessions
                    .lock()
                    .get(&request.key)
                    .is_some_and(|s| Arc::ptr_eq(s, slot));
                let session = Arc::clone(session);
                if !current {
                    let evicted = Arc::clone(&session);
                    tokio::spawn(async move { evicted.destroy().await });
                } else if spawned && !self.settings.startup_grace.is_zero() {
                    tokio::time::sleep(self.settings.startup_grace).await;
                }
                Ok(session)
            }
            Err(message) => {
                let mut sessions = self.sessions.lock();
                if sessions.get(&request.key).is_some_and(|s| Arc::ptr_eq(s, slot)) {
                    sessions.remove(&request.key);
                }
                drop(sessions);
                Err(own_error.unwrap_or_else(|| Error::tool("ffmpeg", message.clone())))
            }
        }
    }

    async fn spawn_session(
        &self,
        request: &SessionRequest,
        start_segment: u32,
    ) -> vs_core::Result<Arc<TranscodingSession>> {
        let (start_time, _) = request
            .timeline
            .interval(start_segment)
            .ok_or_else(|| Error::not_found("segment", format!("{}/{start_segment}", request.key)))?;

        let job = TranscodeJob {
            input: request.input.clone(),
            stream_index: request.key.stream.stream_index,
            kind: request.kind,
            representation: request.representation,
            start_segment,
            start_time,
            segment_duration: request.segment_duration,
            timeline: Arc::clone(&request.timeline),
            output_dir: self.settings.scratch_dir.join(Uuid::new_v4().to_string()),
        };
        TranscodingSession::start(request.key.clone(), job, self.transcoder.as_ref()).await
    }

    /// Replace-on-exit path: drop `slot` from the table if it is still there.
    fn retire_if_current(&self, key: &SessionKey, slot: &Arc<Slot>) {
        let mut sessions = self.sessions.lock();
        if sessions.get(key).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            if let Some(old) = sessions.remove(key) {
                retire(&old);
            }
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .field("settings", &self.settings)
            .finish()
    }
}

/// Destroy a slot's session in the background, if it has one. A slot still
/// starting is cleaned up by its starter once it finds itself out of the
/// table.
fn retire(slot: &Slot) {
    if let Some(session) = slot.session() {
        tokio::spawn(async move { session.destroy().await });
    }
}
