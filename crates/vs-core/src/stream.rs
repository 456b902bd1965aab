//! Stream identity and metadata types shared across crates.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Identifies one elementary stream of one source file.
///
/// The locator is the canonical `<backend>/<path>` string of the source, so
/// two keys built from the same file always compare equal regardless of how
/// the request spelled the path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
    pub locator: String,
    pub stream_index: u32,
}

impl StreamKey {
    pub fn new(locator: impl Into<String>, stream_index: u32) -> Self {
        Self {
            locator: locator.into(),
            stream_index,
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.locator, self.stream_index)
    }
}

/// Kind of elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
}

impl StreamKind {
    /// DASH `contentType` / HLS media type spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
            StreamKind::Subtitle => "text",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of one payload inside a representation: the initialization
/// segment or a numbered media segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SegmentIndex {
    Init,
    Media(u32),
}

impl SegmentIndex {
    /// The media sequence number, if this is a media segment.
    pub fn media(self) -> Option<u32> {
        match self {
            SegmentIndex::Init => None,
            SegmentIndex::Media(n) => Some(n),
        }
    }
}

impl fmt::Display for SegmentIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentIndex::Init => f.write_str("init"),
            SegmentIndex::Media(n) => write!(f, "{n}"),
        }
    }
}

impl FromStr for SegmentIndex {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "init" {
            return Ok(SegmentIndex::Init);
        }
        // u32::from_str accepts a leading '+'; segment ids are digits only.
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::Validation(format!("malformed segment id '{s}'")));
        }
        s.parse::<u32>()
            .map(SegmentIndex::Media)
            .map_err(|e| Error::Validation(format!("malformed segment id '{s}': {e}")))
    }
}

/// Probed metadata for one elementary stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub key: StreamKey,
    pub kind: StreamKind,
    /// Decoder name as reported by the prober (e.g. "h264", "aac").
    pub codec_name: String,
    /// RFC 6381 codec string (e.g. "avc1.64001f"), empty when unknown.
    pub codecs: String,
    /// Bits per second, 0 when unknown.
    pub bit_rate: u64,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub width: u32,
    pub height: u32,
    /// ISO 639 code as tagged in the container, empty when untagged.
    pub language_code: String,
    /// Humanised language name, empty when untagged.
    pub language: String,
    pub title: String,
    pub enabled_by_default: bool,
}

/// Serde helpers to (de)serialize `Duration` as whole milliseconds.
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_key_display() {
        let key = StreamKey::new("local/media/a.mkv", 2);
        assert_eq!(key.to_string(), "local/media/a.mkv#2");
    }

    #[test]
    fn segment_index_parse() {
        assert_eq!("init".parse::<SegmentIndex>().unwrap(), SegmentIndex::Init);
        assert_eq!("0".parse::<SegmentIndex>().unwrap(), SegmentIndex::Media(0));
        assert_eq!("17".parse::<SegmentIndex>().unwrap(), SegmentIndex::Media(17));
    }

    #[test]
    fn segment_index_rejects_malformed() {
        for bad in ["", "-1", "+3", "1a", "4294967296", " 1"] {
            let err = bad.parse::<SegmentIndex>().unwrap_err();
            assert_eq!(err.http_status(), 400, "{bad:?} should be a client error");
        }
    }

    #[test]
    fn stream_info_serializes_duration_as_millis() {
        let info = StreamInfo {
            key: StreamKey::new("local/a.mkv", 0),
            kind: StreamKind::Audio,
            codec_name: "aac".into(),
            codecs: "mp4a.40.2".into(),
            bit_rate: 128_000,
            duration: Duration::from_millis(12_345),
            width: 0,
            height: 0,
            language_code: "eng".into(),
            language: "English".into(),
            title: String::new(),
            enabled_by_default: true,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["duration"], 12_345);
        assert_eq!(json["kind"], "audio");
        let back: StreamInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back, info);
    }
}
