//! Source resolution and manifest assembly.
//!
//! Turns a locator into a probed [`MediaSource`], derives the segment
//! timelines representations are cut on, and builds the
//! [`ManifestInput`] both manifest renderers consume.

use std::sync::Arc;
use std::time::Duration;

use vs_core::{Error, StreamInfo, StreamKind};
use vs_media::{
    render_master_playlist, render_mpd, ManifestInput, OfferedStream, RepresentationCombination,
    Timeline,
};
use vs_storage::StorageNode;
use vs_transcode::presets::{self, DEFAULT_AUDIO_PRESET, DIRECT, DIRECT_STREAM_AUDIO, WEBVTT};
use vs_transcode::{Representation, SessionKey, SessionRequest};

use crate::context::AppContext;
use crate::request::ManifestKind;

/// Nominal bandwidth advertised for WebVTT tracks.
const SUBTITLE_BANDWIDTH: u64 = 1_000;
/// Bandwidth advertised for copied audio whose bitrate was not probed.
const FALLBACK_AUDIO_BANDWIDTH: u64 = 128_000;
/// Bandwidth advertised for copied video with no bitrate and no preset.
const FALLBACK_VIDEO_BANDWIDTH: u64 = 5_000_000;

/// How representations are produced from the source streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Transcode,
    Transmux,
}

/// Codecs a client reports it can decode, as RFC 6381 strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientCapabilities {
    playable_codecs: Vec<String>,
}

impl ClientCapabilities {
    pub fn new<I, S>(codecs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            playable_codecs: codecs.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a comma-separated `playableCodecs` list.
    pub fn from_list(list: &str) -> Self {
        Self::new(list.split(',').map(str::trim).filter(|c| !c.is_empty()))
    }

    /// Exact codec string match; an unknown codec is never playable.
    pub fn can_play(&self, codecs: &str) -> bool {
        !codecs.is_empty() && self.playable_codecs.iter().any(|c| c == codecs)
    }
}

/// A resolved, probed source file.
#[derive(Debug, Clone)]
pub struct MediaSource {
    /// Canonical locator string; stream keys are built from it.
    pub locator: String,
    /// What ffmpeg and ffprobe open: a local path or a loopback URL.
    pub input: String,
    pub streams: Arc<Vec<StreamInfo>>,
}

impl MediaSource {
    pub fn stream(&self, index: u32) -> vs_core::Result<&StreamInfo> {
        self.streams
            .iter()
            .find(|s| s.key.stream_index == index)
            .ok_or_else(|| Error::not_found("stream", format!("{}#{index}", self.locator)))
    }

    /// The default-flagged video stream, else the first one.
    pub fn default_video(&self) -> Option<&StreamInfo> {
        let mut videos = self.streams.iter().filter(|s| s.kind == StreamKind::Video);
        let first = videos.clone().next();
        videos.find(|s| s.enabled_by_default).or(first)
    }

    fn of_kind(&self, kind: StreamKind) -> impl Iterator<Item = &StreamInfo> {
        self.streams.iter().filter(move |s| s.kind == kind)
    }

    /// Presentation length: the main video's duration, else the longest
    /// stream's.
    pub fn duration(&self) -> Duration {
        match self.default_video() {
            Some(v) if !v.duration.is_zero() => v.duration,
            _ => self.streams.iter().map(|s| s.duration).max().unwrap_or_default(),
        }
    }
}

/// Resolve a locator to a file node, off the async runtime.
pub async fn resolve_node(ctx: &AppContext, locator: &str) -> vs_core::Result<StorageNode> {
    let storage = Arc::clone(&ctx.storage);
    let locator = locator.to_string();
    let node = tokio::task::spawn_blocking(move || storage.resolve(&locator))
        .await
        .map_err(|e| Error::Internal(format!("resolve task failed: {e}")))??;
    Ok(node)
}

/// Resolve and probe a source file.
pub async fn open_source(ctx: &AppContext, locator: &str) -> vs_core::Result<MediaSource> {
    let node = resolve_node(ctx, locator).await?;
    if node.is_dir() {
        return Err(Error::Validation(format!("{locator} is a directory")));
    }

    let canonical = node.locator().to_string();
    let input = match node.local_path() {
        Some(path) => path.to_string_lossy().into_owned(),
        None => loopback_url(&ctx.config.server.loopback_url(), &canonical)?,
    };
    let streams = ctx.prober.streams(&canonical, &input).await?;

    Ok(MediaSource {
        locator: canonical,
        input,
        streams,
    })
}

/// URL under which this server streams the raw file, for ffmpeg to read
/// remote sources through.
pub fn loopback_url(base: &str, locator: &str) -> vs_core::Result<String> {
    let mut url = reqwest::Url::parse(base)
        .map_err(|e| Error::Internal(format!("invalid server url '{base}': {e}")))?;
    url.path_segments_mut()
        .map_err(|_| Error::Internal(format!("server url '{base}' cannot carry a path")))?
        .pop_if_empty()
        .push("files")
        .extend(locator.split('/'));
    Ok(url.to_string())
}

/// Segment timeline for `mode`.
///
/// Transcodes are cut on a constant grid. Transmuxes can only be cut on
/// source keyframes, so they follow the main video's keyframes.
pub async fn timeline(ctx: &AppContext, source: &MediaSource, mode: Mode) -> vs_core::Result<Arc<Timeline>> {
    let streaming = &ctx.config.streaming;
    let total = source.duration();
    let timeline = match (mode, source.default_video()) {
        (Mode::Transcode, _) => Timeline::constant(total, streaming.segment_duration()),
        (Mode::Transmux, Some(video)) => {
            let keyframes = ctx
                .prober
                .keyframes(&source.locator, &source.input, video.key.stream_index)
                .await?;
            Timeline::from_keyframes(&keyframes, streaming.transmux_min_segment(), total)
        }
        (Mode::Transmux, None) => Timeline::constant(total, streaming.transmux_min_segment()),
    };
    Ok(Arc::new(timeline))
}

/// Everything the registry needs to run `representation_id` of
/// `stream_index`, validated against the probed streams.
pub async fn session_request(
    ctx: &AppContext,
    source: &MediaSource,
    stream_index: u32,
    representation_id: &str,
) -> vs_core::Result<SessionRequest> {
    let stream = source.stream(stream_index)?;
    let representation = Representation::for_stream(representation_id, stream)?;

    let (mode, segment_duration) = match representation {
        Representation::Passthrough => (Mode::Transmux, ctx.config.streaming.transmux_min_segment()),
        _ => (Mode::Transcode, ctx.config.streaming.segment_duration()),
    };

    Ok(SessionRequest {
        key: SessionKey::new(stream.key.clone(), representation_id),
        input: source.input.clone(),
        kind: stream.kind,
        representation,
        timeline: timeline(ctx, source, mode).await?,
        segment_duration,
    })
}

/// Build the manifest input for `mode`.
pub async fn manifest_input(
    ctx: &AppContext,
    source: &MediaSource,
    mode: Mode,
) -> vs_core::Result<ManifestInput> {
    let video = main_video(source)?;
    let subtitles = subtitle_offers(source);

    let combinations = match mode {
        Mode::Transcode => {
            let audio: Vec<OfferedStream> = source
                .of_kind(StreamKind::Audio)
                .map(transcoded_audio)
                .collect::<vs_core::Result<_>>()?;
            combine(transcoded_rungs(video), audio, subtitles)
        }
        Mode::Transmux => {
            let audio = source.of_kind(StreamKind::Audio).map(copied_audio).collect();
            combine(vec![copied_video(video)], audio, subtitles)
        }
    };

    let timeline = timeline(ctx, source, mode).await?;

    Ok(ManifestInput {
        combinations,
        segment_durations: timeline.durations(),
        total_duration: timeline.total(),
    })
}

/// Build the manifest input for a client that reported `capabilities`.
///
/// Each stream is copied when the client can decode its codec as-is and
/// transcoded otherwise. Lower video rungs are only offered next to a
/// transcoded video: players switching between a copied and an encoded
/// rendition of the same stream show garbage.
pub async fn adaptive_input(
    ctx: &AppContext,
    source: &MediaSource,
    capabilities: &ClientCapabilities,
) -> vs_core::Result<ManifestInput> {
    let video = main_video(source)?;
    let subtitles = subtitle_offers(source);

    let audio: Vec<OfferedStream> = source
        .of_kind(StreamKind::Audio)
        .map(|s| {
            if capabilities.can_play(&s.codecs) {
                Ok(copied_audio(s))
            } else {
                transcoded_audio(s)
            }
        })
        .collect::<vs_core::Result<_>>()?;

    let (videos, mode) = if capabilities.can_play(&video.codecs) {
        (vec![copied_video(video)], Mode::Transmux)
    } else {
        (transcoded_rungs(video), Mode::Transcode)
    };
    tracing::debug!(locator = %source.locator, ?mode, "Picked video delivery for client codecs");

    let timeline = timeline(ctx, source, mode).await?;

    Ok(ManifestInput {
        combinations: combine(videos, audio, subtitles),
        segment_durations: timeline.durations(),
        total_duration: timeline.total(),
    })
}

/// Every codec string a manifest for `source` may advertise, in first-seen
/// order. Clients test these before asking for a codec-aware manifest.
pub fn candidate_codecs(source: &MediaSource) -> Vec<String> {
    let mut codecs: Vec<String> = Vec::new();
    let mut add = |c: &str| {
        if !c.is_empty() && !codecs.iter().any(|seen| seen == c) {
            codecs.push(c.to_string());
        }
    };

    if let Some(video) = source.default_video() {
        add(&video.codecs);
        for rung in transcoded_rungs(video) {
            add(&rung.codecs);
        }
    }
    for audio in source.of_kind(StreamKind::Audio) {
        add(&audio.codecs);
    }
    if let Some(preset) = presets::preset(DEFAULT_AUDIO_PRESET) {
        add(preset.codecs);
    }
    codecs
}

/// Render the manifest document `kind` for `locator`.
///
/// `capabilities` only affects [`ManifestKind::HlsAdaptive`].
pub async fn render_manifest(
    ctx: &AppContext,
    locator: &str,
    kind: ManifestKind,
    capabilities: &ClientCapabilities,
) -> vs_core::Result<String> {
    let source = open_source(ctx, locator).await?;
    let input = match kind {
        ManifestKind::HlsAdaptive => adaptive_input(ctx, &source, capabilities).await?,
        kind if kind.is_transmuxing() => manifest_input(ctx, &source, Mode::Transmux).await?,
        _ => manifest_input(ctx, &source, Mode::Transcode).await?,
    };
    let body = if kind.is_hls() {
        render_master_playlist(&input)
    } else {
        render_mpd(&input)
    };

    tracing::debug!(locator = %source.locator, ?kind, "Rendered manifest");
    Ok(body)
}

fn main_video(source: &MediaSource) -> vs_core::Result<&StreamInfo> {
    source
        .default_video()
        .ok_or_else(|| Error::Probe(format!("no video stream in {}", source.locator)))
}

fn subtitle_offers(source: &MediaSource) -> Vec<OfferedStream> {
    source
        .of_kind(StreamKind::Subtitle)
        .map(|s| offer(s, WEBVTT, "wvtt", SUBTITLE_BANDWIDTH, 0, 0))
        .collect()
}

/// The encoder ladder for `video`, never upscaling. Sources below the
/// lowest rung still get one rendition.
fn transcoded_rungs(video: &StreamInfo) -> Vec<OfferedStream> {
    let mut rungs: Vec<_> = presets::video_presets_for(video.height).collect();
    if rungs.is_empty() {
        rungs.extend(presets::video_presets_for(u32::MAX).take(1));
    }
    rungs
        .into_iter()
        .map(|p| {
            offer(
                video,
                p.id,
                p.codecs,
                p.bitrate,
                p.output_width(video.width, video.height),
                p.height,
            )
        })
        .collect()
}

fn transcoded_audio(stream: &StreamInfo) -> vs_core::Result<OfferedStream> {
    let preset = presets::preset(DEFAULT_AUDIO_PRESET)
        .ok_or_else(|| Error::Internal(format!("missing preset {DEFAULT_AUDIO_PRESET}")))?;
    Ok(offer(stream, preset.id, preset.codecs, preset.bitrate, 0, 0))
}

/// Copied video keeps the source bitrate. Containers that do not record
/// one are advertised at the closest preset's rate.
fn copied_video(video: &StreamInfo) -> OfferedStream {
    let bandwidth = if video.bit_rate > 0 {
        video.bit_rate
    } else {
        presets::closest_video_preset(video.height).map_or(FALLBACK_VIDEO_BANDWIDTH, |p| p.bitrate)
    };
    offer(video, DIRECT, &video.codecs, bandwidth, video.width, video.height)
}

fn copied_audio(stream: &StreamInfo) -> OfferedStream {
    let bandwidth = if stream.bit_rate > 0 { stream.bit_rate } else { FALLBACK_AUDIO_BANDWIDTH };
    offer(stream, DIRECT_STREAM_AUDIO, &stream.codecs, bandwidth, 0, 0)
}

fn combine(
    videos: Vec<OfferedStream>,
    audio: Vec<OfferedStream>,
    subtitles: Vec<OfferedStream>,
) -> Vec<RepresentationCombination> {
    videos
        .into_iter()
        .map(|video| RepresentationCombination {
            video,
            audio: audio.clone(),
            subtitles: subtitles.clone(),
        })
        .collect()
}

fn offer(
    stream: &StreamInfo,
    representation_id: &str,
    codecs: &str,
    bandwidth: u64,
    width: u32,
    height: u32,
) -> OfferedStream {
    OfferedStream {
        stream: stream.clone(),
        representation_id: representation_id.to_string(),
        codecs: codecs.to_string(),
        bandwidth,
        width,
        height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_url_encodes_segments() {
        let url = loopback_url("http://127.0.0.1:8080", "rclone/gdrive/Films/A B#1.mkv").unwrap();
        assert_eq!(url, "http://127.0.0.1:8080/files/rclone/gdrive/Films/A%20B%231.mkv");

        let url = loopback_url("https://media.example.com/base/", "rclone/r/x.mkv").unwrap();
        assert_eq!(url, "https://media.example.com/base/files/rclone/r/x.mkv");
    }

    fn stream(index: u32, kind: StreamKind, codecs: &str) -> StreamInfo {
        StreamInfo {
            key: vs_core::StreamKey::new("local/film.mkv", index),
            kind,
            codec_name: String::new(),
            codecs: codecs.to_string(),
            bit_rate: 0,
            duration: Duration::from_secs(60),
            width: if kind == StreamKind::Video { 1280 } else { 0 },
            height: if kind == StreamKind::Video { 720 } else { 0 },
            language_code: String::new(),
            language: String::new(),
            title: String::new(),
            enabled_by_default: true,
        }
    }

    #[test]
    fn capabilities_match_exact_codec_strings() {
        let caps = ClientCapabilities::from_list(" avc1.640028 ,mp4a.40.2,,");
        assert!(caps.can_play("avc1.640028"));
        assert!(caps.can_play("mp4a.40.2"));
        assert!(!caps.can_play("avc1.64001f"));
        assert!(!caps.can_play(""));
        assert!(!ClientCapabilities::default().can_play("mp4a.40.2"));
    }

    #[test]
    fn copied_video_without_bitrate_uses_closest_preset() {
        let video = stream(0, StreamKind::Video, "hvc1.1.6.L93.B0");
        let offered = copied_video(&video);
        assert_eq!(offered.representation_id, DIRECT);
        assert_eq!(offered.bandwidth, 5_000_000);

        let audio = copied_audio(&stream(1, StreamKind::Audio, "ac-3"));
        assert_eq!(audio.bandwidth, FALLBACK_AUDIO_BANDWIDTH);
    }

    #[test]
    fn candidate_codecs_are_distinct() {
        let source = MediaSource {
            locator: "local/film.mkv".into(),
            input: "/film.mkv".into(),
            streams: Arc::new(vec![
                stream(0, StreamKind::Video, "hvc1.1.6.L93.B0"),
                stream(1, StreamKind::Audio, "ac-3"),
                stream(2, StreamKind::Audio, "mp4a.40.2"),
            ]),
        };
        assert_eq!(
            candidate_codecs(&source),
            vec!["hvc1.1.6.L93.B0", "avc1.64001e", "avc1.64001f", "ac-3", "mp4a.40.2"]
        );
    }

    #[test]
    fn loopback_url_rejects_garbage_base() {
        assert_eq!(loopback_url("not a url", "local/a").unwrap_err().http_status(), 500);
    }
}
