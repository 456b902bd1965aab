//! Stream and keyframe probing.
//!
//! [`FfprobeProber`] shells out to `ffprobe` and maps its JSON into
//! [`StreamInfo`]. [`CachedProber`] memoizes results per source locator,
//! since probing a remote file costs a full round trip through rclone.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use vs_core::{Error, StreamInfo, StreamKey, StreamKind};

use crate::command::ToolCommand;
use crate::tools::ToolRegistry;

const PROBE_TIMEOUT: Duration = Duration::from_secs(60);
const KEYFRAME_TIMEOUT: Duration = Duration::from_secs(300);

/// Extracts stream metadata and keyframe positions from a media source.
///
/// `input` is anything ffmpeg can open: a local path or an HTTP URL.
/// `locator` is the canonical source locator used for [`StreamKey`]s.
#[async_trait]
pub trait MediaProber: Send + Sync {
    async fn streams(&self, locator: &str, input: &str) -> vs_core::Result<Arc<Vec<StreamInfo>>>;

    /// Presentation times of keyframes in the stream `stream_index`,
    /// ascending.
    async fn keyframes(
        &self,
        locator: &str,
        input: &str,
        stream_index: u32,
    ) -> vs_core::Result<Arc<Vec<Duration>>>;
}

/// A prober backed by the `ffprobe` CLI.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    tools: Arc<ToolRegistry>,
}

impl FfprobeProber {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }

    fn command(&self) -> vs_core::Result<ToolCommand> {
        let path: PathBuf = self.tools.require("ffprobe")?.to_path_buf();
        Ok(ToolCommand::new(path))
    }
}

#[async_trait]
impl MediaProber for FfprobeProber {
    async fn streams(&self, locator: &str, input: &str) -> vs_core::Result<Arc<Vec<StreamInfo>>> {
        let mut cmd = self.command()?;
        cmd.args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(input)
        .timeout(PROBE_TIMEOUT);

        let output = cmd.execute().await?;
        let streams = parse_streams(locator, &output.stdout)?;
        tracing::debug!(locator, streams = streams.len(), "Probed streams");
        Ok(Arc::new(streams))
    }

    async fn keyframes(
        &self,
        locator: &str,
        input: &str,
        stream_index: u32,
    ) -> vs_core::Result<Arc<Vec<Duration>>> {
        let selector = stream_index.to_string();
        let mut cmd = self.command()?;
        cmd.args([
            "-v",
            "error",
            "-select_streams",
            selector.as_str(),
            "-skip_frame",
            "nokey",
            "-show_entries",
            "packet=pts_time,flags",
            "-of",
            "csv=print_section=0",
        ])
        .arg(input)
        .timeout(KEYFRAME_TIMEOUT);

        let output = cmd.execute().await?;
        let keyframes = parse_keyframes(&output.stdout);
        tracing::debug!(locator, stream_index, keyframes = keyframes.len(), "Probed keyframes");
        Ok(Arc::new(keyframes))
    }
}

/// Memoizes another prober's results by locator.
///
/// Failures are not cached; the next request probes again.
pub struct CachedProber {
    inner: Arc<dyn MediaProber>,
    streams: DashMap<String, Arc<Vec<StreamInfo>>>,
    keyframes: DashMap<StreamKey, Arc<Vec<Duration>>>,
}

impl CachedProber {
    pub fn new(inner: Arc<dyn MediaProber>) -> Self {
        Self {
            inner,
            streams: DashMap::new(),
            keyframes: DashMap::new(),
        }
    }

    pub fn cached_sources(&self) -> usize {
        self.streams.len()
    }
}

#[async_trait]
impl MediaProber for CachedProber {
    async fn streams(&self, locator: &str, input: &str) -> vs_core::Result<Arc<Vec<StreamInfo>>> {
        if let Some(hit) = self.streams.get(locator) {
            return Ok(Arc::clone(hit.value()));
        }
        // Concurrent misses may probe twice; the later insert wins and both
        // results are equivalent.
        let streams = self.inner.streams(locator, input).await?;
        self.streams.insert(locator.to_string(), Arc::clone(&streams));
        Ok(streams)
    }

    async fn keyframes(
        &self,
        locator: &str,
        input: &str,
        stream_index: u32,
    ) -> vs_core::Result<Arc<Vec<Duration>>> {
        let key = StreamKey::new(locator, stream_index);
        if let Some(hit) = self.keyframes.get(&key) {
            return Ok(Arc::clone(hit.value()));
        }
        let keyframes = self.inner.keyframes(locator, input, stream_index).await?;
        self.keyframes.insert(key, Arc::clone(&keyframes));
        Ok(keyframes)
    }
}

// ---------------------------------------------------------------------------
// JSON structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    index: u32,
    codec_type: Option<String>,
    codec_name: Option<String>,
    profile: Option<String>,
    level: Option<i32>,
    width: Option<u32>,
    height: Option<u32>,
    bit_rate: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    disposition: FfprobeDisposition,
    #[serde(default)]
    tags: FfprobeTags,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeDisposition {
    #[serde(default)]
    default: u8,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeTags {
    language: Option<String>,
    title: Option<String>,
    /// Matroska muxers store per-stream bitrate here.
    #[serde(rename = "BPS", alias = "BPS-eng")]
    bps: Option<String>,
    #[serde(rename = "DURATION", alias = "DURATION-eng")]
    duration: Option<String>,
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Map ffprobe JSON into stream metadata. Streams other than video, audio
/// and subtitles (attachments, data) are skipped.
pub fn parse_streams(locator: &str, json: &str) -> vs_core::Result<Vec<StreamInfo>> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| Error::Probe(format!("ffprobe JSON parse error: {e}")))?;

    let format_duration = output.format.duration.as_deref().and_then(parse_seconds);
    let format_bit_rate = output.format.bit_rate.as_deref().and_then(|s| s.parse().ok());

    let mut streams = Vec::new();
    for stream in output.streams {
        let kind = match stream.codec_type.as_deref() {
            Some("video") => StreamKind::Video,
            Some("audio") => StreamKind::Audio,
            Some("subtitle") => StreamKind::Subtitle,
            _ => continue,
        };
        let codec_name = stream.codec_name.clone().unwrap_or_default();

        let duration = stream
            .duration
            .as_deref()
            .and_then(parse_seconds)
            .or_else(|| stream.tags.duration.as_deref().and_then(parse_clock))
            .or(format_duration)
            .unwrap_or_default();

        let mut bit_rate = stream
            .bit_rate
            .as_deref()
            .or(stream.tags.bps.as_deref())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        if bit_rate == 0 && kind == StreamKind::Video {
            bit_rate = format_bit_rate.unwrap_or(0);
        }

        let language_code = stream.tags.language.clone().unwrap_or_default();
        streams.push(StreamInfo {
            key: StreamKey::new(locator, stream.index),
            kind,
            codecs: codec_string(&stream),
            codec_name,
            bit_rate,
            duration,
            width: stream.width.unwrap_or(0),
            height: stream.height.unwrap_or(0),
            language: vs_core::language::humanize(&language_code),
            language_code,
            title: stream.tags.title.clone().unwrap_or_default(),
            enabled_by_default: stream.disposition.default == 1,
        });
    }

    if streams.is_empty() {
        return Err(Error::Probe(format!("no playable streams in {locator}")));
    }
    Ok(streams)
}

/// Parse `pts_time,flags` CSV lines, keeping packets flagged as keyframes.
pub fn parse_keyframes(csv: &str) -> Vec<Duration> {
    let mut out: Vec<Duration> = csv
        .lines()
        .filter_map(|line| {
            let mut fields = line.trim().split(',');
            let pts = fields.next()?;
            let flags = fields.next()?;
            if !flags.contains('K') {
                return None;
            }
            parse_seconds(pts)
        })
        .collect();
    out.sort();
    out.dedup();
    out
}

fn parse_seconds(s: &str) -> Option<Duration> {
    let secs: f64 = s.trim().parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}

/// Parse Matroska `HH:MM:SS.fffffffff` durations.
fn parse_clock(s: &str) -> Option<Duration> {
    let mut parts = s.trim().splitn(3, ':');
    let h: u64 = parts.next()?.parse().ok()?;
    let m: u64 = parts.next()?.parse().ok()?;
    let sec = parse_seconds(parts.next()?)?;
    Some(Duration::from_secs(h * 3600 + m * 60) + sec)
}

/// RFC 6381 codec string for a probed stream, empty when unknown.
fn codec_string(stream: &FfprobeStream) -> String {
    let profile = stream.profile.as_deref().unwrap_or("");
    let level = stream.level.unwrap_or(0).max(0) as u32;
    match stream.codec_name.as_deref().unwrap_or("") {
        "h264" => {
            let profile_idc: u32 = match profile {
                "Baseline" | "Constrained Baseline" => 0x42,
                "Main" => 0x4d,
                "Extended" => 0x58,
                "High 10" | "High 10 Intra" => 0x6e,
                "High 4:2:2" | "High 4:2:2 Intra" => 0x7a,
                "High 4:4:4 Predictive" | "High 4:4:4 Intra" => 0xf4,
                _ => 0x64,
            };
            let constraints: u32 = if profile == "Constrained Baseline" { 0x40 } else { 0 };
            format!("avc1.{profile_idc:02x}{constraints:02x}{level:02x}")
        }
        "hevc" => {
            let profile_idc = if profile == "Main 10" { 2 } else { 1 };
            let compat = if profile_idc == 2 { 4 } else { 6 };
            format!("hvc1.{profile_idc}.{compat}.L{level}.B0")
        }
        "av1" => "av01.0.08M.08".to_string(),
        "vp9" => "vp09.00.40.08".to_string(),
        "aac" => match profile {
            "HE-AAC" => "mp4a.40.5".to_string(),
            "HE-AACv2" => "mp4a.40.29".to_string(),
            _ => "mp4a.40.2".to_string(),
        },
        "mp3" => "mp4a.40.34".to_string(),
        "ac3" => "ac-3".to_string(),
        "eac3" => "ec-3".to_string(),
        "opus" => "Opus".to_string(),
        "flac" => "fLaC".to_string(),
        "subrip" | "webvtt" | "ass" | "ssa" | "mov_text" => "wvtt".to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SAMPLE: &str = r#"{
        "streams": [
            {"index": 0, "codec_type": "video", "codec_name": "h264", "profile": "High",
             "level": 40, "width": 1920, "height": 1080,
             "disposition": {"default": 1},
             "tags": {"BPS": "8000000", "DURATION": "00:42:10.500000000"}},
            {"index": 1, "codec_type": "audio", "codec_name": "aac", "profile": "LC",
             "bit_rate": "192000", "duration": "2530.48",
             "disposition": {"default": 1}, "tags": {"language": "eng"}},
            {"index": 2, "codec_type": "audio", "codec_name": "ac3",
             "disposition": {"default": 0}, "tags": {"language": "fre", "title": "Commentary"}},
            {"index": 3, "codec_type": "subtitle", "codec_name": "subrip",
             "tags": {"language": "spa"}},
            {"index": 4, "codec_type": "attachment", "codec_name": "ttf"}
        ],
        "format": {"duration": "2530.500000", "bit_rate": "9000000"}
    }"#;

    #[test]
    fn parses_streams() {
        let streams = parse_streams("local/m/a.mkv", SAMPLE).unwrap();
        assert_eq!(streams.len(), 4);

        let video = &streams[0];
        assert_eq!(video.kind, StreamKind::Video);
        assert_eq!(video.codecs, "avc1.640028");
        assert_eq!(video.bit_rate, 8_000_000);
        assert_eq!(video.duration, Duration::from_millis(2_530_500));
        assert_eq!((video.width, video.height), (1920, 1080));
        assert!(video.enabled_by_default);

        let audio = &streams[1];
        assert_eq!(audio.key, StreamKey::new("local/m/a.mkv", 1));
        assert_eq!(audio.codecs, "mp4a.40.2");
        assert_eq!(audio.language, "English");
        assert_eq!(audio.duration, Duration::from_millis(2_530_480));

        let commentary = &streams[2];
        assert_eq!(commentary.codecs, "ac-3");
        assert_eq!(commentary.title, "Commentary");
        assert_eq!(commentary.bit_rate, 0);
        // No stream duration: falls back to the container's.
        assert_eq!(commentary.duration, Duration::from_millis(2_530_500));
        assert!(!commentary.enabled_by_default);

        assert_eq!(streams[3].kind, StreamKind::Subtitle);
        assert_eq!(streams[3].language, "Spanish");
    }

    #[test]
    fn bad_json_is_probe_error() {
        let err = parse_streams("local/a", "not json").unwrap_err();
        assert_eq!(err.code(), "probe_error");
    }

    #[test]
    fn no_streams_is_probe_error() {
        let err = parse_streams("local/a", r#"{"streams": [], "format": {}}"#).unwrap_err();
        assert_eq!(err.http_status(), 422);
    }

    #[test]
    fn keyframes_from_csv() {
        let csv = "0.000000,K_\n0.041708,__\n4.004000,K_\n8.008000,K__\nN/A,K_\n\n";
        let kfs = parse_keyframes(csv);
        assert_eq!(
            kfs,
            vec![
                Duration::ZERO,
                Duration::from_secs_f64(4.004),
                Duration::from_secs_f64(8.008)
            ]
        );
    }

    struct CountingProber {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MediaProber for CountingProber {
        async fn streams(&self, locator: &str, _input: &str) -> vs_core::Result<Arc<Vec<StreamInfo>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            parse_streams(locator, SAMPLE).map(Arc::new)
        }

        async fn keyframes(
            &self,
            _locator: &str,
            _input: &str,
            _stream_index: u32,
        ) -> vs_core::Result<Arc<Vec<Duration>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(vec![Duration::ZERO]))
        }
    }

    #[tokio::test]
    async fn cache_probes_each_source_once() {
        let inner = Arc::new(CountingProber {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedProber::new(inner.clone());

        let a = cached.streams("local/a.mkv", "/a.mkv").await.unwrap();
        let b = cached.streams("local/a.mkv", "/a.mkv").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        cached.keyframes("local/a.mkv", "/a.mkv", 0).await.unwrap();
        cached.keyframes("local/a.mkv", "/a.mkv", 0).await.unwrap();
        cached.streams("local/b.mkv", "/b.mkv").await.unwrap();

        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
        assert_eq!(cached.cached_sources(), 2);
    }
}
