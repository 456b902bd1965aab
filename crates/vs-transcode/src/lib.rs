//! vs-transcode: on-demand transcoding sessions.
//!
//! # Modules
//!
//! - [`command`] - Builder for one-shot tool invocations with timeouts
//! - [`tools`] - Discovery of ffmpeg, ffprobe, and rclone
//! - [`probe`] - Stream metadata and keyframe probing, with caching
//! - [`presets`] - Encoder presets and representation ids
//! - [`ffmpeg`] - ffmpeg argument construction
//! - [`process`] - The transcoder seam and its ffmpeg implementation
//! - [`session`] - One running transcode and its output directory
//! - [`registry`] - The session table: reuse, replacement, waiting, reaping

pub mod command;
pub mod ffmpeg;
pub mod presets;
pub mod probe;
pub mod process;
pub mod registry;
pub mod session;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

pub use command::{ToolCommand, ToolOutput};
pub use presets::{EncoderPreset, Representation};
pub use probe::{CachedProber, FfprobeProber, MediaProber};
pub use process::{FfmpegTranscoder, TranscodeJob, TranscodeProcess, Transcoder};
pub use registry::{RegistrySettings, SessionRegistry, SessionRequest};
pub use session::{SegmentState, SessionInfo, SessionKey, TranscodingSession};
pub use tools::{ToolInfo, ToolRegistry};
