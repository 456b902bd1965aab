//! ffmpeg argument construction for session jobs.

use std::time::Duration;

use crate::presets::Representation;
use crate::process::TranscodeJob;
use crate::session::{INIT_FILE, SEGMENT_PATTERN, SUBTITLE_FILE};

/// Build the ffmpeg argument list for `job`.
///
/// Media representations are written as fMP4 into the job's output
/// directory: `init.mp4` plus `segment_<n>.m4s` numbered from the job's
/// start segment. Timestamps are kept from the source (`-copyts`) so
/// segments from different sessions line up on one timeline.
///
/// Encoded jobs go through the HLS muxer with keyframes forced on the
/// segment grid. Copied streams cannot be re-keyed, so they are cut by the
/// segment muxer at exactly the boundaries of the job's timeline.
pub fn build_args(job: &TranscodeJob) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-loglevel", "error", "-y"]
        .into_iter()
        .map(String::from)
        .collect();

    if job.representation == Representation::Subtitle {
        args.extend([
            "-i".to_string(),
            job.input.clone(),
            "-map".to_string(),
            format!("0:{}", job.stream_index),
            "-c:s".to_string(),
            "webvtt".to_string(),
            "-f".to_string(),
            "webvtt".to_string(),
            job.output_dir.join(SUBTITLE_FILE).to_string_lossy().into_owned(),
        ]);
        return args;
    }

    if !job.start_time.is_zero() {
        args.extend(["-ss".to_string(), seconds(job.start_time)]);
    }
    args.extend([
        "-i".to_string(),
        job.input.clone(),
        "-copyts".to_string(),
        "-map".to_string(),
        format!("0:{}", job.stream_index),
    ]);

    match job.representation {
        Representation::Passthrough => {
            args.extend(["-c".to_string(), "copy".to_string()]);
        }
        Representation::Preset(preset) if preset.height > 0 => {
            let rate = preset.bitrate.to_string();
            args.extend([
                "-c:v".to_string(),
                "libx264".to_string(),
                "-preset".to_string(),
                "veryfast".to_string(),
                "-profile:v".to_string(),
                "high".to_string(),
                "-pix_fmt".to_string(),
                "yuv420p".to_string(),
                "-vf".to_string(),
                format!("scale=-2:{}", preset.height),
                "-b:v".to_string(),
                rate.clone(),
                "-maxrate".to_string(),
                rate,
                "-bufsize".to_string(),
                (preset.bitrate * 2).to_string(),
                "-sc_threshold".to_string(),
                "0".to_string(),
                "-force_key_frames".to_string(),
                format!(
                    "expr:gte(t,{}+n_forced*{})",
                    seconds(job.start_time),
                    seconds(job.segment_duration)
                ),
            ]);
        }
        Representation::Preset(preset) => {
            args.extend([
                "-c:a".to_string(),
                "aac".to_string(),
                "-b:a".to_string(),
                preset.bitrate.to_string(),
                "-ac".to_string(),
                "2".to_string(),
                "-ar".to_string(),
                "48000".to_string(),
            ]);
        }
        Representation::Subtitle => {}
    }

    if job.representation == Representation::Passthrough {
        args.extend(segment_muxer_args(job));
        return args;
    }

    args.extend([
        "-f".to_string(),
        "hls".to_string(),
        "-hls_time".to_string(),
        seconds(job.segment_duration),
        "-hls_playlist_type".to_string(),
        "vod".to_string(),
        "-hls_list_size".to_string(),
        "0".to_string(),
        "-hls_segment_type".to_string(),
        "fmp4".to_string(),
        "-hls_flags".to_string(),
        "independent_segments".to_string(),
        "-start_number".to_string(),
        job.start_segment.to_string(),
        "-hls_fmp4_init_filename".to_string(),
        INIT_FILE.to_string(),
        "-hls_segment_filename".to_string(),
        job.output_dir.join(SEGMENT_PATTERN).to_string_lossy().into_owned(),
        job.output_dir.join("rendition.m3u8").to_string_lossy().into_owned(),
    ]);
    args
}

fn segment_muxer_args(job: &TranscodeJob) -> Vec<String> {
    vec![
        "-f".to_string(),
        "segment".to_string(),
        "-segment_format".to_string(),
        "mp4".to_string(),
        "-segment_format_options".to_string(),
        "movflags=+frag_keyframe+empty_moov+default_base_moof".to_string(),
        "-segment_header_filename".to_string(),
        job.output_dir.join(INIT_FILE).to_string_lossy().into_owned(),
        "-segment_times".to_string(),
        cut_times(job),
        "-segment_time_delta".to_string(),
        "0.010".to_string(),
        "-segment_start_number".to_string(),
        job.start_segment.to_string(),
        job.output_dir.join(SEGMENT_PATTERN).to_string_lossy().into_owned(),
    ]
}

/// Absolute source times at which segments after the first one start.
/// With nothing left to cut, the end of the media keeps the list non-empty.
fn cut_times(job: &TranscodeJob) -> String {
    let cuts: Vec<String> = (job.start_segment.saturating_add(1)..job.timeline.len())
        .filter_map(|i| job.timeline.interval(i))
        .map(|(start, _)| seconds(start))
        .collect();
    if cuts.is_empty() {
        seconds(job.timeline.total())
    } else {
        cuts.join(",")
    }
}

/// Seconds with millisecond precision, as ffmpeg time arguments.
fn seconds(d: Duration) -> String {
    format!("{}.{:03}", d.as_secs(), d.subsec_millis())
}
