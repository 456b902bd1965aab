//! Input model shared by the DASH and HLS builders.

use std::time::Duration;

use vs_core::StreamInfo;

/// One stream offered in one encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct OfferedStream {
    pub stream: StreamInfo,
    pub representation_id: String,
    /// RFC 6381 codec string of the encoded output.
    pub codecs: String,
    /// Peak bits per second of the encoded output.
    pub bandwidth: u64,
    pub width: u32,
    pub height: u32,
}

impl OfferedStream {
    /// Location of this representation relative to the manifest:
    /// `{streamIndex}/{representationId}`.
    pub fn path(&self) -> String {
        format!("{}/{}", self.stream.key.stream_index, self.representation_id)
    }

    /// Display name for track pickers.
    pub fn label(&self) -> String {
        match (self.stream.title.is_empty(), self.stream.language.is_empty()) {
            (false, _) => self.stream.title.clone(),
            (true, false) => self.stream.language.clone(),
            (true, true) => format!("Track {}", self.stream.key.stream_index),
        }
    }
}

/// A playable video representation together with the audio and subtitle
/// tracks that may accompany it.
#[derive(Debug, Clone, PartialEq)]
pub struct RepresentationCombination {
    pub video: OfferedStream,
    pub audio: Vec<OfferedStream>,
    pub subtitles: Vec<OfferedStream>,
}

/// Everything a manifest builder needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestInput {
    pub combinations: Vec<RepresentationCombination>,
    /// Shared media segment timeline (subtitles are single-segment).
    pub segment_durations: Vec<Duration>,
    pub total_duration: Duration,
}

impl ManifestInput {
    /// Distinct video representations in first-seen order.
    pub fn videos(&self) -> Vec<&OfferedStream> {
        dedup(self.combinations.iter().map(|c| &c.video))
    }

    /// Distinct audio representations in first-seen order.
    pub fn audio(&self) -> Vec<&OfferedStream> {
        dedup(self.combinations.iter().flat_map(|c| c.audio.iter()))
    }

    /// Distinct subtitle representations in first-seen order.
    pub fn subtitles(&self) -> Vec<&OfferedStream> {
        dedup(self.combinations.iter().flat_map(|c| c.subtitles.iter()))
    }
}

fn dedup<'a>(iter: impl Iterator<Item = &'a OfferedStream>) -> Vec<&'a OfferedStream> {
    let mut seen: Vec<&OfferedStream> = Vec::new();
    for offered in iter {
        if !seen.iter().any(|s| s.path() == offered.path()) {
            seen.push(offered);
        }
    }
    seen
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use vs_core::{StreamKey, StreamKind};

    pub fn stream(index: u32, kind: StreamKind, language: &str, default: bool) -> StreamInfo {
        StreamInfo {
            key: StreamKey::new("local/media/film.mkv", index),
            kind,
            codec_name: String::new(),
            codecs: String::new(),
            bit_rate: 0,
            duration: Duration::from_secs(12),
            width: if kind == StreamKind::Video { 1920 } else { 0 },
            height: if kind == StreamKind::Video { 1080 } else { 0 },
            language_code: String::new(),
            language: language.to_string(),
            title: String::new(),
            enabled_by_default: default,
        }
    }

    pub fn offered(stream: StreamInfo, rep: &str, codecs: &str, bandwidth: u64) -> OfferedStream {
        let (width, height) = match stream.kind {
            StreamKind::Video => (1280, 720),
            _ => (0, 0),
        };
        OfferedStream {
            stream,
            representation_id: rep.to_string(),
            codecs: codecs.to_string(),
            bandwidth,
            width,
            height,
        }
    }

    /// One video in two encodings, two audio tracks, one subtitle track.
    pub fn input() -> ManifestInput {
        let video = stream(0, StreamKind::Video, "", true);
        let eng = stream(1, StreamKind::Audio, "English", true);
        let ger = stream(2, StreamKind::Audio, "German", false);
        let subs = stream(3, StreamKind::Subtitle, "English", false);

        let audio = vec![
            offered(eng, "128k-audio", "mp4a.40.2", 128_000),
            offered(ger, "128k-audio", "mp4a.40.2", 128_000),
        ];
        let subtitles = vec![offered(subs, "webvtt", "wvtt", 256)];

        ManifestInput {
            combinations: vec![
                RepresentationCombination {
                    video: offered(video.clone(), "720-5000k-video", "avc1.64001f", 5_000_000),
                    audio: audio.clone(),
                    subtitles: subtitles.clone(),
                },
                RepresentationCombination {
                    video: offered(video, "480-1000k-video", "avc1.64001e", 1_000_000),
                    audio,
                    subtitles,
                },
            ],
            segment_durations: vec![
                Duration::from_millis(5000),
                Duration::from_millis(5000),
                Duration::from_millis(2000),
            ],
            total_duration: Duration::from_secs(12),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;

    #[test]
    fn distinct_representations() {
        let input = input();
        let videos: Vec<String> = input.videos().iter().map(|v| v.path()).collect();
        assert_eq!(videos, vec!["0/720-5000k-video", "0/480-1000k-video"]);
        let audio: Vec<String> = input.audio().iter().map(|a| a.path()).collect();
        assert_eq!(audio, vec!["1/128k-audio", "2/128k-audio"]);
        assert_eq!(input.subtitles().len(), 1);
    }

    #[test]
    fn labels_fall_back() {
        let input = input();
        assert_eq!(input.audio()[1].label(), "German");
        assert_eq!(input.videos()[0].label(), "Track 0");
    }
}
