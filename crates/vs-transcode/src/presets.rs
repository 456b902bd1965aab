//! Encoder presets and representation-id resolution.
//!
//! A representation id in a request path is either one of the fixed
//! encoder presets below, a passthrough id (stream copied, container
//! rewritten), or the WebVTT subtitle id.

use vs_core::{Error, StreamInfo, StreamKind};

/// Representation id for a copied video stream offered alongside all audio.
pub const DIRECT: &str = "direct";
/// Representation id for a copied video stream.
pub const DIRECT_STREAM_VIDEO: &str = "direct-stream-video";
/// Representation id for a copied audio stream.
pub const DIRECT_STREAM_AUDIO: &str = "direct-stream-audio";
/// Representation id for subtitles converted to WebVTT.
pub const WEBVTT: &str = "webvtt";

/// Audio preset attached to every transcoded video rendition.
pub const DEFAULT_AUDIO_PRESET: &str = "128k-audio";

/// A fixed encoding ladder rung.
#[derive(Debug, PartialEq, Eq)]
pub struct EncoderPreset {
    pub id: &'static str,
    pub kind: StreamKind,
    /// Output height in pixels; 0 for audio.
    pub height: u32,
    /// Target bits per second.
    pub bitrate: u64,
    /// RFC 6381 codec string of the encoded output.
    pub codecs: &'static str,
}

static PRESETS: &[EncoderPreset] = &[
    EncoderPreset {
        id: "480-1000k-video",
        kind: StreamKind::Video,
        height: 480,
        bitrate: 1_000_000,
        codecs: "avc1.64001e",
    },
    EncoderPreset {
        id: "720-5000k-video",
        kind: StreamKind::Video,
        height: 720,
        bitrate: 5_000_000,
        codecs: "avc1.64001f",
    },
    EncoderPreset {
        id: "1080-10000k-video",
        kind: StreamKind::Video,
        height: 1080,
        bitrate: 10_000_000,
        codecs: "avc1.640028",
    },
    EncoderPreset {
        id: "64k-audio",
        kind: StreamKind::Audio,
        height: 0,
        bitrate: 64_000,
        codecs: "mp4a.40.2",
    },
    EncoderPreset {
        id: "128k-audio",
        kind: StreamKind::Audio,
        height: 0,
        bitrate: 128_000,
        codecs: "mp4a.40.2",
    },
];

/// All presets, video rungs in ascending height first.
pub fn presets() -> &'static [EncoderPreset] {
    PRESETS
}

pub fn preset(id: &str) -> Option<&'static EncoderPreset> {
    PRESETS.iter().find(|p| p.id == id)
}

/// Video presets a source of the given height can be offered at.
///
/// A rung is offered only when the source is at least as tall, so nothing
/// is ever upscaled.
pub fn video_presets_for(source_height: u32) -> impl Iterator<Item = &'static EncoderPreset> {
    PRESETS
        .iter()
        .filter(move |p| p.kind == StreamKind::Video && p.height <= source_height)
}

/// The rung closest to the source's own quality: the tallest one that
/// does not upscale, or the lowest rung for sources below every rung.
pub fn closest_video_preset(source_height: u32) -> Option<&'static EncoderPreset> {
    video_presets_for(source_height)
        .last()
        .or_else(|| video_presets_for(u32::MAX).next())
}

impl EncoderPreset {
    /// Output width for a source of `width`x`height`, preserving aspect
    /// ratio and rounded to an even number (as `scale=-2:h` does).
    pub fn output_width(&self, width: u32, height: u32) -> u32 {
        if height == 0 || width == 0 {
            return 0;
        }
        let scaled = (u64::from(width) * u64::from(self.height) + u64::from(height) / 2)
            / u64::from(height);
        let even = (scaled as u32 + 1) & !1;
        even.max(2)
    }
}

/// What a session does to its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    /// Copy the elementary stream into fragmented MP4.
    Passthrough,
    /// Re-encode with a fixed preset.
    Preset(&'static EncoderPreset),
    /// Convert a text subtitle stream to a single WebVTT file.
    Subtitle,
}

impl Representation {
    /// Resolve a representation id from a request path.
    pub fn resolve(id: &str) -> vs_core::Result<Self> {
        match id {
            DIRECT | DIRECT_STREAM_VIDEO | DIRECT_STREAM_AUDIO => Ok(Representation::Passthrough),
            WEBVTT => Ok(Representation::Subtitle),
            other => preset(other)
                .map(Representation::Preset)
                .ok_or_else(|| Error::Validation(format!("unknown representation '{other}'"))),
        }
    }

    /// Resolve `id` and check it can be applied to `stream`.
    pub fn for_stream(id: &str, stream: &StreamInfo) -> vs_core::Result<Self> {
        let rep = Self::resolve(id)?;
        if !rep.applies_to(stream.kind) {
            return Err(Error::Validation(format!(
                "representation '{id}' cannot be applied to {} stream {}",
                stream.kind, stream.key
            )));
        }
        Ok(rep)
    }

    pub fn applies_to(&self, kind: StreamKind) -> bool {
        match self {
            Representation::Passthrough => kind != StreamKind::Subtitle,
            Representation::Preset(p) => p.kind == kind,
            Representation::Subtitle => kind == StreamKind::Subtitle,
        }
    }

    /// Whether the output is one file written in full before it is usable.
    pub fn is_single_file(&self) -> bool {
        matches!(self, Representation::Subtitle)
    }

    /// File extension of media segments in request paths.
    pub fn segment_extension(&self) -> &'static str {
        match self {
            Representation::Subtitle => "vtt",
            _ => "m4s",
        }
    }
}
