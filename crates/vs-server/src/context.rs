//! Shared application context.
//!
//! [`AppContext`] is handed to every route handler via Axum state. All
//! infrastructure lives behind `Arc`s, so cloning it per request is cheap.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use vs_core::config::Config;
use vs_storage::Resolver;
use vs_transcode::{
    CachedProber, FfmpegTranscoder, FfprobeProber, MediaProber, RegistrySettings, SessionRegistry,
    ToolRegistry, Transcoder,
};

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub tools: Arc<ToolRegistry>,
    pub storage: Arc<Resolver>,
    pub prober: Arc<dyn MediaProber>,
    pub sessions: Arc<SessionRegistry>,
    /// Cancelled when the server shuts down; segment waits observe it.
    pub shutdown: CancellationToken,
}

impl AppContext {
    /// Production wiring: discovered tools, rclone-backed storage, cached
    /// ffprobe, and ffmpeg sessions.
    pub fn from_config(config: Config) -> Self {
        let tools = Arc::new(ToolRegistry::discover(&config.tools));
        let storage = Arc::new(Resolver::from_config(
            &config.storage,
            tools.get("rclone").map(|p| p.to_path_buf()),
        ));
        let prober: Arc<dyn MediaProber> = Arc::new(CachedProber::new(Arc::new(
            FfprobeProber::new(Arc::clone(&tools)),
        )));
        let transcoder: Arc<dyn Transcoder> = Arc::new(FfmpegTranscoder::new(Arc::clone(&tools)));

        Self::with_parts(config, tools, storage, prober, transcoder)
    }

    /// Assemble a context from explicit parts. Tests use this to swap in
    /// fake probers and transcoders.
    pub fn with_parts(
        config: Config,
        tools: Arc<ToolRegistry>,
        storage: Arc<Resolver>,
        prober: Arc<dyn MediaProber>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        let sessions = Arc::new(SessionRegistry::new(
            transcoder,
            RegistrySettings::from_config(&config.streaming),
        ));
        Self {
            config: Arc::new(config),
            tools,
            storage,
            prober,
            sessions,
            shutdown: CancellationToken::new(),
        }
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("config", &self.config)
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}
