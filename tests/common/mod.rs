//! Shared test harness for integration tests.
//!
//! [`TestHarness`] builds a full [`AppContext`] around a scripted prober and
//! a fake transcoder that writes fragmented-MP4-shaped files the way ffmpeg
//! lays them out, then serves the router on a random port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::task::JoinHandle;

use vs_core::config::Config;
use vs_core::{StreamInfo, StreamKey, StreamKind};
use vs_server::context::AppContext;
use vs_server::router::build_router;
use vs_storage::{Locator, Resolver};
use vs_transcode::{MediaProber, ToolRegistry, TranscodeJob, TranscodeProcess, Transcoder};

/// Twelve seconds of 1080p video, one English audio track and one subtitle.
pub const DURATION: Duration = Duration::from_secs(12);

pub struct TestHarness {
    pub ctx: AppContext,
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    pub transcoder: Arc<FakeTranscoder>,
    pub media_dir: TempDir,
    pub scratch_dir: TempDir,
}

impl TestHarness {
    /// Start a server with default streaming settings and a transcoder that
    /// writes every remaining segment.
    pub async fn start() -> Self {
        Self::start_with(FakeTranscoder::producing(), |_| {}).await
    }

    pub async fn start_with(transcoder: FakeTranscoder, tweak: impl FnOnce(&mut Config)) -> Self {
        let media_dir = tempfile::tempdir().expect("media dir");
        let scratch_dir = tempfile::tempdir().expect("scratch dir");

        let mut config = Config::default();
        config.streaming.scratch_dir = scratch_dir.path().to_path_buf();
        config.streaming.poll_interval_ms = 10;
        config.streaming.startup_grace_ms = 0;
        config.streaming.segment_timeout_secs = 5;
        tweak(&mut config);

        let transcoder = Arc::new(transcoder);
        let storage = Arc::new(Resolver::from_config(&config.storage, None));
        let ctx = AppContext::with_parts(
            config,
            Arc::new(ToolRegistry::default()),
            storage,
            Arc::new(FakeProber),
            Arc::clone(&transcoder) as Arc<dyn Transcoder>,
        );

        let app = build_router(ctx.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self {
            ctx,
            addr,
            client: reqwest::Client::new(),
            transcoder,
            media_dir,
            scratch_dir,
        }
    }

    /// Create a media file and return its locator.
    pub fn media(&self, name: &str, contents: &[u8]) -> String {
        let path = self.media_dir.path().join(name);
        std::fs::write(&path, contents).expect("write media file");
        Locator::local(path).to_string()
    }

    pub fn url(&self, tail: &str) -> String {
        format!("http://{}/{}", self.addr, tail.trim_start_matches('/'))
    }

    /// URL of `file` under `locator` in the `/files` namespace.
    pub fn file_url(&self, locator: &str, file: &str) -> String {
        self.url(&format!("files/{locator}/{file}"))
    }

    pub async fn get(&self, url: &str) -> reqwest::Response {
        self.client.get(url).send().await.expect("request failed")
    }

    pub async fn get_text(&self, url: &str) -> (reqwest::StatusCode, String) {
        let response = self.get(url).await;
        let status = response.status();
        (status, response.text().await.expect("body"))
    }

    /// Session directories currently on disk.
    pub fn session_dirs(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.scratch_dir.path())
            .map(|rd| rd.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default()
    }
}

/// Prober that reports the same three streams for every file.
pub struct FakeProber;

#[async_trait]
impl MediaProber for FakeProber {
    async fn streams(&self, locator: &str, _input: &str) -> vs_core::Result<Arc<Vec<StreamInfo>>> {
        let stream = |index: u32, kind: StreamKind| StreamInfo {
            key: StreamKey::new(locator, index),
            kind,
            codec_name: String::new(),
            codecs: String::new(),
            bit_rate: 0,
            duration: DURATION,
            width: 0,
            height: 0,
            language_code: String::new(),
            language: String::new(),
            title: String::new(),
            enabled_by_default: index < 2,
        };

        let mut video = stream(0, StreamKind::Video);
        video.codec_name = "h264".into();
        video.codecs = "avc1.640028".into();
        video.bit_rate = 8_000_000;
        video.width = 1920;
        video.height = 1080;

        let mut audio = stream(1, StreamKind::Audio);
        audio.codec_name = "aac".into();
        audio.codecs = "mp4a.40.2".into();
        audio.bit_rate = 192_000;
        audio.language_code = "eng".into();
        audio.language = "English".into();

        let mut subtitle = stream(2, StreamKind::Subtitle);
        subtitle.codec_name = "subrip".into();
        subtitle.codecs = "wvtt".into();
        subtitle.language_code = "fre".into();
        subtitle.language = "French".into();

        Ok(Arc::new(vec![video, audio, subtitle]))
    }

    async fn keyframes(
        &self,
        _locator: &str,
        _input: &str,
        _stream_index: u32,
    ) -> vs_core::Result<Arc<Vec<Duration>>> {
        // Keyframes every two seconds.
        Ok(Arc::new((0..6).map(|i| Duration::from_secs(i * 2)).collect()))
    }
}

/// Transcoder that writes `init.mp4` plus `segment_{n}.m4s` files from the
/// job's start segment, each holding one `moof` numbered from 1 the way a
/// fresh ffmpeg run numbers its fragments.
pub struct FakeTranscoder {
    segments: u32,
    every: Duration,
    spawns: AtomicUsize,
    pub jobs: Mutex<Vec<TranscodeJob>>,
}

impl FakeTranscoder {
    /// Writes segments until the end of the twelve-second source.
    pub fn producing() -> Self {
        Self {
            segments: u32::MAX,
            every: Duration::from_millis(5),
            spawns: AtomicUsize::new(0),
            jobs: Mutex::new(Vec::new()),
        }
    }

    /// Starts but never writes anything.
    pub fn stalled() -> Self {
        Self {
            segments: 0,
            ..Self::producing()
        }
    }

    pub fn spawns(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }
}

impl Transcoder for FakeTranscoder {
    fn spawn(&self, job: &TranscodeJob) -> vs_core::Result<Box<dyn TranscodeProcess>> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        self.jobs.lock().push(job.clone());

        let job = job.clone();
        let limit = self.segments;
        let every = self.every;
        let writer = tokio::spawn(async move {
            if limit == 0 {
                std::future::pending::<()>().await;
            }
            write_outputs(&job, limit, every).await;
        });
        Ok(Box::new(FakeProcess { writer }))
    }
}

async fn write_outputs(job: &TranscodeJob, limit: u32, every: Duration) {
    let dir = &job.output_dir;
    if job.representation.is_single_file() {
        std::fs::write(dir.join("segment_0.vtt"), "WEBVTT\n\n00:00.000 --> 00:01.000\nBonjour\n")
            .expect("write vtt");
        return;
    }

    std::fs::write(dir.join("init.mp4"), mp4_box(b"ftyp", b"isom")).expect("write init");
    let total = job.timeline.len();
    let mut sequence = 1u32;
    for n in job.start_segment..total.min(job.start_segment.saturating_add(limit)) {
        tokio::time::sleep(every).await;
        std::fs::write(dir.join(format!("segment_{n}.m4s")), fragment(sequence)).expect("write segment");
        sequence += 1;
    }
}

/// `moof { mfhd(sequence) }` followed by a small `mdat`.
pub fn fragment(sequence: u32) -> Vec<u8> {
    let mut mfhd_body = vec![0, 0, 0, 0];
    mfhd_body.extend_from_slice(&sequence.to_be_bytes());
    let moof = mp4_box(b"moof", &mp4_box(b"mfhd", &mfhd_body));
    let mut out = moof;
    out.extend(mp4_box(b"mdat", b"payload"));
    out
}

fn mp4_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = ((body.len() + 8) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
    out
}

struct FakeProcess {
    writer: JoinHandle<()>,
}

#[async_trait]
impl TranscodeProcess for FakeProcess {
    async fn wait(&mut self) -> vs_core::Result<bool> {
        Ok((&mut self.writer).await.is_ok())
    }

    async fn suspend(&mut self) -> vs_core::Result<()> {
        Ok(())
    }

    async fn resume(&mut self) -> vs_core::Result<()> {
        Ok(())
    }

    async fn terminate(&mut self) {
        self.writer.abort();
    }
}

/// Wait until `check` holds, for at most two seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
