//! vs-media: segment timing, DASH/HLS manifest rendering, and fragmented-MP4
//! fixups.
//!
//! Everything here is a pure function of its inputs: no I/O and no shared
//! state, so identical inputs always render byte-identical documents.
//!
//! # Modules
//!
//! - [`timing`] - Segment boundaries from a duration and a target length, and
//!   the [`Timeline`] type used by manifests and the session orchestrator
//! - [`dash`] - MPEG-DASH MPD rendering
//! - [`hls`] - HLS master and media playlist rendering
//! - [`fmp4`] - In-place `mfhd` sequence number patching
//! - [`offer`] - The representation combinations both builders consume

pub mod dash;
pub mod fmp4;
pub mod hls;
pub mod offer;
pub mod timing;

// Re-export commonly used items at the crate root.
pub use dash::{iso8601_duration, render_mpd};
pub use fmp4::patch_sequence_number;
pub use hls::{render_master_playlist, MediaPlaylist, PlaylistSegment};
pub use offer::{ManifestInput, OfferedStream, RepresentationCombination};
pub use timing::{
    merge_timelines, segment_count, segment_durations, segment_interval, Timeline,
};
