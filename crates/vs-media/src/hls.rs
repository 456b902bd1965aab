//! HLS playlist rendering.

use std::fmt::Write;
use std::time::Duration;

use crate::offer::{ManifestInput, OfferedStream};

/// A single entry in a media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistSegment {
    /// Duration in seconds.
    pub duration: f64,
    pub uri: String,
}

/// A VOD media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    /// Whole seconds, at least the longest segment.
    pub target_duration: u64,
    pub init_segment_uri: Option<String>,
    pub segments: Vec<PlaylistSegment>,
}

impl MediaPlaylist {
    /// Fragmented-MP4 playlist: `init.mp4` plus `{index}.m4s` per segment.
    pub fn fmp4(durations: &[Duration]) -> Self {
        let mut segments = Vec::with_capacity(durations.len());
        let mut elapsed = Duration::ZERO;
        let mut prev = 0.0;
        for (i, d) in durations.iter().enumerate() {
            // Differences of cumulative boundaries keep the rendered sum on
            // the true total despite per-line rounding.
            elapsed += *d;
            let end = round_micros(elapsed);
            segments.push(PlaylistSegment {
                duration: end - prev,
                uri: format!("{i}.m4s"),
            });
            prev = end;
        }
        let longest = durations.iter().max().copied().unwrap_or_default();

        Self {
            target_duration: ceil_secs(longest),
            init_segment_uri: Some("init.mp4".to_string()),
            segments,
        }
    }

    /// Subtitle playlist: the whole track is one WebVTT file, so the target
    /// duration is the track duration.
    pub fn subtitle(total: Duration) -> Self {
        Self {
            target_duration: ceil_secs(total),
            init_segment_uri: None,
            segments: vec![PlaylistSegment {
                duration: total.as_secs_f64(),
                uri: "0.vtt".to_string(),
            }],
        }
    }

    /// Render the playlist. Always ends with `#EXT-X-ENDLIST`.
    pub fn render(&self) -> String {
        let mut out = String::new();

        writeln!(out, "#EXTM3U").unwrap();
        writeln!(out, "#EXT-X-VERSION:7").unwrap();
        writeln!(out, "#EXT-X-TARGETDURATION:{}", self.target_duration).unwrap();
        writeln!(out, "#EXT-X-MEDIA-SEQUENCE:0").unwrap();
        writeln!(out, "#EXT-X-PLAYLIST-TYPE:VOD").unwrap();
        writeln!(out, "#EXT-X-INDEPENDENT-SEGMENTS").unwrap();

        if let Some(ref init_uri) = self.init_segment_uri {
            writeln!(out, "#EXT-X-MAP:URI=\"{}\"", init_uri).unwrap();
        }

        for segment in &self.segments {
            writeln!(out, "#EXTINF:{:.6},", segment.duration).unwrap();
            writeln!(out, "{}", segment.uri).unwrap();
        }

        writeln!(out, "#EXT-X-ENDLIST").unwrap();

        out
    }
}

/// Render a master playlist.
///
/// Each distinct audio track list becomes one `AUDIO` group; every video
/// representation gets an `EXT-X-STREAM-INF` pointing at its combination's
/// group. Subtitles share a single `SUBTITLES` group.
pub fn render_master_playlist(input: &ManifestInput) -> String {
    let mut out = String::new();

    writeln!(out, "#EXTM3U").unwrap();
    writeln!(out, "#EXT-X-VERSION:7").unwrap();
    writeln!(out, "#EXT-X-INDEPENDENT-SEGMENTS").unwrap();

    let mut audio_groups: Vec<Vec<String>> = Vec::new();
    for combination in &input.combinations {
        let paths: Vec<String> = combination.audio.iter().map(OfferedStream::path).collect();
        if !paths.is_empty() && !audio_groups.contains(&paths) {
            audio_groups.push(paths);
            let group_id = audio_groups.len() - 1;
            for audio in &combination.audio {
                write_media(&mut out, "AUDIO", &format!("audio{group_id}"), audio);
            }
        }
    }

    let subtitles = input.subtitles();
    for sub in &subtitles {
        write_media(&mut out, "SUBTITLES", "subs", sub);
    }

    let mut written: Vec<String> = Vec::new();
    for combination in &input.combinations {
        let video = &combination.video;
        if written.contains(&video.path()) {
            continue;
        }
        written.push(video.path());

        let audio_paths: Vec<String> = combination.audio.iter().map(OfferedStream::path).collect();
        let audio_bandwidth = combination.audio.iter().map(|a| a.bandwidth).max().unwrap_or(0);

        let mut codecs = vec![video.codecs.clone()];
        for a in &combination.audio {
            if !codecs.contains(&a.codecs) {
                codecs.push(a.codecs.clone());
            }
        }
        codecs.retain(|c| !c.is_empty());

        write!(
            out,
            "#EXT-X-STREAM-INF:BANDWIDTH={}",
            video.bandwidth + audio_bandwidth
        )
        .unwrap();
        if video.width > 0 && video.height > 0 {
            write!(out, ",RESOLUTION={}x{}", video.width, video.height).unwrap();
        }
        if !codecs.is_empty() {
            write!(out, ",CODECS=\"{}\"", codecs.join(",")).unwrap();
        }
        if let Some(group_id) = audio_groups.iter().position(|g| *g == audio_paths) {
            write!(out, ",AUDIO=\"audio{group_id}\"").unwrap();
        }
        if !subtitles.is_empty() {
            write!(out, ",SUBTITLES=\"subs\"").unwrap();
        }
        writeln!(out).unwrap();
        writeln!(out, "{}/media.m3u8", video.path()).unwrap();
    }

    out
}

fn write_media(out: &mut String, media_type: &str, group_id: &str, offered: &OfferedStream) {
    let default = if offered.stream.enabled_by_default { "YES" } else { "NO" };
    write!(
        out,
        "#EXT-X-MEDIA:TYPE={media_type},GROUP-ID=\"{group_id}\",NAME=\"{}\"",
        quote_safe(&offered.label())
    )
    .unwrap();
    if !offered.stream.language_code.is_empty() {
        write!(out, ",LANGUAGE=\"{}\"", quote_safe(&offered.stream.language_code)).unwrap();
    }
    writeln!(
        out,
        ",DEFAULT={default},AUTOSELECT=YES,URI=\"{}/media.m3u8\"",
        offered.path()
    )
    .unwrap();
}

/// Quoted-string attributes may not contain `"` or line breaks.
fn quote_safe(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '"' => '\'',
            '\r' | '\n' => ' ',
            other => other,
        })
        .collect()
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_nanos().div_ceil(1_000_000_000) as u64
}

fn round_micros(d: Duration) -> f64 {
    ((d.as_nanos() + 500) / 1000) as f64 / 1_000_000.0
}
