//! Parsing of `/files/...` request paths.
//!
//! Everything below `/files/` starts with a source locator. What follows
//! the locator decides the kind of request:
//!
//! ```text
//! <locator>/transcoding-manifest.mpd          DASH, encoder presets
//! <locator>/transmuxing-manifest.mpd          DASH, stream copy
//! <locator>/hls-transcoding-manifest.m3u8     HLS master, encoder presets
//! <locator>/hls-transmuxing-manifest.m3u8     HLS master, stream copy
//! <locator>/hls-manifest.m3u8                 HLS master, copy what the client plays
//! <locator>/check-codecs.json                 codecs the above may advertise
//! <locator>/streams.json                      probed stream list
//! <locator>/<stream>/<rep>/media.m3u8         HLS media playlist
//! <locator>/<stream>/<rep>/init.mp4           initialization segment
//! <locator>/<stream>/<rep>/<n>.m4s            media segment
//! <locator>/<stream>/<rep>/<n>.vtt            subtitle segment
//! <locator>                                   the source file itself
//! ```

use vs_core::{Error, SegmentIndex};

/// Which manifest flavour was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    DashTranscoding,
    DashTransmuxing,
    HlsTranscoding,
    HlsTransmuxing,
    /// Per stream, copied when the client can play the codec, else encoded.
    HlsAdaptive,
}

impl ManifestKind {
    fn from_file_name(name: &str) -> Option<Self> {
        match name {
            "transcoding-manifest.mpd" => Some(ManifestKind::DashTranscoding),
            "transmuxing-manifest.mpd" => Some(ManifestKind::DashTransmuxing),
            "hls-transcoding-manifest.m3u8" => Some(ManifestKind::HlsTranscoding),
            "hls-transmuxing-manifest.m3u8" => Some(ManifestKind::HlsTransmuxing),
            "hls-manifest.m3u8" => Some(ManifestKind::HlsAdaptive),
            _ => None,
        }
    }

    pub fn is_transmuxing(self) -> bool {
        matches!(self, ManifestKind::DashTransmuxing | ManifestKind::HlsTransmuxing)
    }

    pub fn is_hls(self) -> bool {
        matches!(
            self,
            ManifestKind::HlsTranscoding | ManifestKind::HlsTransmuxing | ManifestKind::HlsAdaptive
        )
    }

    pub fn content_type(self) -> &'static str {
        if self.is_hls() {
            "application/vnd.apple.mpegurl"
        } else {
            "application/dash+xml"
        }
    }
}

/// Payload of a representation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepresentationFile {
    MediaPlaylist,
    Segment(SegmentIndex),
    /// `<n>.vtt`
    Subtitle(u32),
}

/// A parsed `/files/...` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaRequest {
    Manifest {
        locator: String,
        kind: ManifestKind,
    },
    Streams {
        locator: String,
    },
    CheckCodecs {
        locator: String,
    },
    Representation {
        locator: String,
        stream_index: u32,
        representation_id: String,
        file: RepresentationFile,
    },
    Raw {
        locator: String,
    },
}

impl MediaRequest {
    /// Parse the path tail after `/files/`.
    ///
    /// Representation paths with a well-formed stream index but a malformed
    /// segment id are rejected rather than treated as raw files.
    pub fn parse(tail: &str) -> vs_core::Result<Self> {
        let tail = tail.trim_matches('/');
        if tail.is_empty() {
            return Err(Error::Validation("missing locator".into()));
        }

        let (head, file_name) = match tail.rsplit_once('/') {
            Some(split) => split,
            None => {
                return Ok(MediaRequest::Raw {
                    locator: tail.to_string(),
                })
            }
        };

        if let Some(kind) = ManifestKind::from_file_name(file_name) {
            return Ok(MediaRequest::Manifest {
                locator: head.to_string(),
                kind,
            });
        }
        if file_name == "streams.json" {
            return Ok(MediaRequest::Streams {
                locator: head.to_string(),
            });
        }
        if file_name == "check-codecs.json" {
            return Ok(MediaRequest::CheckCodecs {
                locator: head.to_string(),
            });
        }

        if let Some(request) = Self::parse_representation(head, file_name)? {
            return Ok(request);
        }

        Ok(MediaRequest::Raw {
            locator: tail.to_string(),
        })
    }

    fn parse_representation(head: &str, file_name: &str) -> vs_core::Result<Option<Self>> {
        let looks_like_payload = file_name == "init.mp4"
            || file_name == "media.m3u8"
            || file_name.ends_with(".m4s")
            || file_name.ends_with(".vtt");
        if !looks_like_payload {
            return Ok(None);
        }

        let mut parts = head.rsplitn(3, '/');
        let (Some(representation_id), Some(stream), Some(locator)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Ok(None);
        };
        if representation_id.is_empty()
            || locator.is_empty()
            || stream.is_empty()
            || !stream.bytes().all(|b| b.is_ascii_digit())
        {
            return Ok(None);
        }
        let stream_index: u32 = stream
            .parse()
            .map_err(|_| Error::Validation(format!("malformed stream id '{stream}'")))?;

        let file = match file_name {
            "media.m3u8" => RepresentationFile::MediaPlaylist,
            "init.mp4" => RepresentationFile::Segment(SegmentIndex::Init),
            name => {
                if let Some(id) = name.strip_suffix(".m4s") {
                    match id.parse::<SegmentIndex>()? {
                        SegmentIndex::Init => {
                            return Err(Error::Validation(format!("malformed segment id '{id}'")))
                        }
                        media => RepresentationFile::Segment(media),
                    }
                } else {
                    let id = name.strip_suffix(".vtt").unwrap_or(name);
                    match id.parse::<SegmentIndex>()? {
                        SegmentIndex::Media(n) => RepresentationFile::Subtitle(n),
                        SegmentIndex::Init => {
                            return Err(Error::Validation(format!("malformed segment id '{id}'")))
                        }
                    }
                }
            }
        };

        Ok(Some(MediaRequest::Representation {
            locator: locator.to_string(),
            stream_index,
            representation_id: representation_id.to_string(),
            file,
        }))
    }

    pub fn locator(&self) -> &str {
        match self {
            MediaRequest::Manifest { locator, .. }
            | MediaRequest::Streams { locator }
            | MediaRequest::CheckCodecs { locator }
            | MediaRequest::Representation { locator, .. }
            | MediaRequest::Raw { locator } => locator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifests() {
        assert_eq!(
            MediaRequest::parse("local/media/film.mkv/transcoding-manifest.mpd").unwrap(),
            MediaRequest::Manifest {
                locator: "local/media/film.mkv".into(),
                kind: ManifestKind::DashTranscoding
            }
        );
        let req = MediaRequest::parse("rclone/gdrive/a b.mkv/hls-transmuxing-manifest.m3u8").unwrap();
        assert_eq!(req.locator(), "rclone/gdrive/a b.mkv");
        assert!(matches!(
            req,
            MediaRequest::Manifest { kind: ManifestKind::HlsTransmuxing, .. }
        ));

        let req = MediaRequest::parse("local/film.mkv/hls-manifest.m3u8").unwrap();
        assert!(matches!(
            req,
            MediaRequest::Manifest { kind: ManifestKind::HlsAdaptive, .. }
        ));
        assert!(ManifestKind::HlsAdaptive.is_hls());
        assert!(!ManifestKind::HlsAdaptive.is_transmuxing());
        assert_eq!(
            MediaRequest::parse("local/film.mkv/check-codecs.json").unwrap(),
            MediaRequest::CheckCodecs {
                locator: "local/film.mkv".into()
            }
        );
    }

    #[test]
    fn segments() {
        assert_eq!(
            MediaRequest::parse("local/media/film.mkv/0/720-5000k-video/17.m4s").unwrap(),
            MediaRequest::Representation {
                locator: "local/media/film.mkv".into(),
                stream_index: 0,
                representation_id: "720-5000k-video".into(),
                file: RepresentationFile::Segment(SegmentIndex::Media(17)),
            }
        );
        assert!(matches!(
            MediaRequest::parse("local/m.mkv/1/direct/init.mp4").unwrap(),
            MediaRequest::Representation {
                file: RepresentationFile::Segment(SegmentIndex::Init),
                ..
            }
        ));
        assert!(matches!(
            MediaRequest::parse("local/m.mkv/3/webvtt/0.vtt").unwrap(),
            MediaRequest::Representation {
                stream_index: 3,
                file: RepresentationFile::Subtitle(0),
                ..
            }
        ));
        assert!(matches!(
            MediaRequest::parse("local/m.mkv/1/128k-audio/media.m3u8").unwrap(),
            MediaRequest::Representation {
                file: RepresentationFile::MediaPlaylist,
                ..
            }
        ));
    }

    #[test]
    fn malformed_segment_ids_are_rejected() {
        for bad in [
            "local/m.mkv/0/direct/-1.m4s",
            "local/m.mkv/0/direct/abc.m4s",
            "local/m.mkv/0/direct/init.m4s",
            "local/m.mkv/0/direct/99999999999.m4s",
            "local/m.mkv/2/webvtt/x.vtt",
        ] {
            let err = MediaRequest::parse(bad).unwrap_err();
            assert_eq!(err.http_status(), 400, "{bad}");
        }
    }

    #[test]
    fn everything_else_is_raw() {
        assert_eq!(
            MediaRequest::parse("local/media/film.mkv").unwrap(),
            MediaRequest::Raw {
                locator: "local/media/film.mkv".into()
            }
        );
        // Parent directory is not a stream index.
        assert!(matches!(
            MediaRequest::parse("local/clips/extra/init.mp4").unwrap(),
            MediaRequest::Raw { .. }
        ));
        assert!(matches!(MediaRequest::parse("film.mkv").unwrap(), MediaRequest::Raw { .. }));
    }

    #[test]
    fn empty_path_is_rejected() {
        assert_eq!(MediaRequest::parse("").unwrap_err().http_status(), 400);
        assert_eq!(MediaRequest::parse("///").unwrap_err().http_status(), 400);
    }
}
