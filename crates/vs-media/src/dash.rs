//! MPEG-DASH manifest rendering.

use std::fmt::Write;
use std::time::Duration;

use crate::offer::{ManifestInput, OfferedStream};

/// Render `d` as an ISO-8601 duration, `PT{h}H{m}M{s}.{ms}S`.
///
/// Hours are taken first and the remainder cascades through minutes,
/// seconds, and milliseconds, so no component overflows its range.
pub fn iso8601_duration(d: Duration) -> String {
    let total_ms = d.as_millis();
    let hours = total_ms / 3_600_000;
    let rem = total_ms % 3_600_000;
    let minutes = rem / 60_000;
    let rem = rem % 60_000;
    let seconds = rem / 1000;
    let millis = rem % 1000;
    format!("PT{hours}H{minutes}M{seconds}.{millis:03}S")
}

/// Render a static (VOD) MPD.
///
/// One video `AdaptationSet` holds every video representation; each audio
/// and subtitle stream gets its own `AdaptationSet` so players can switch
/// language. All media sets share one `SegmentTimeline` at a millisecond
/// timescale; the first `<S>` carries `t="0"` and the rest are implicitly
/// contiguous.
pub fn render_mpd(input: &ManifestInput) -> String {
    let mut out = String::new();

    writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#).unwrap();
    writeln!(
        out,
        r#"<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" profiles="urn:mpeg:dash:profile:isoff-live:2011" type="static" minBufferTime="PT2S" mediaPresentationDuration="{}">"#,
        iso8601_duration(input.total_duration)
    )
    .unwrap();
    writeln!(out, r#"  <Period id="0" start="PT0S">"#).unwrap();

    let timeline = millis_timeline(&input.segment_durations);
    let mut set_id = 0;

    let videos = input.videos();
    if !videos.is_empty() {
        writeln!(
            out,
            r#"    <AdaptationSet id="{set_id}" contentType="video" mimeType="video/mp4" segmentAlignment="true" startWithSAP="1">"#
        )
        .unwrap();
        write_segment_template(&mut out, &timeline);
        for v in videos {
            writeln!(
                out,
                r#"      <Representation id="{}" codecs="{}" bandwidth="{}" width="{}" height="{}"/>"#,
                escape(&v.path()),
                escape(&v.codecs),
                v.bandwidth,
                v.width,
                v.height
            )
            .unwrap();
        }
        writeln!(out, "    </AdaptationSet>").unwrap();
        set_id += 1;
    }

    for group in group_by_stream(input.audio()) {
        let first = group[0];
        write_adaptation_set_open(&mut out, set_id, "audio", "audio/mp4", first);
        let role = if first.stream.enabled_by_default { "main" } else { "alternate" };
        writeln!(
            out,
            r#"      <Role schemeIdUri="urn:mpeg:dash:role:2011" value="{role}"/>"#
        )
        .unwrap();
        write_segment_template(&mut out, &timeline);
        for a in group {
            writeln!(
                out,
                r#"      <Representation id="{}" codecs="{}" bandwidth="{}" audioSamplingRate="48000">"#,
                escape(&a.path()),
                escape(&a.codecs),
                a.bandwidth
            )
            .unwrap();
            writeln!(
                out,
                r#"        <AudioChannelConfiguration schemeIdUri="urn:mpeg:dash:23003:3:audio_channel_configuration:2011" value="2"/>"#
            )
            .unwrap();
            writeln!(out, "      </Representation>").unwrap();
        }
        writeln!(out, "    </AdaptationSet>").unwrap();
        set_id += 1;
    }

    for group in group_by_stream(input.subtitles()) {
        let first = group[0];
        write_adaptation_set_open(&mut out, set_id, "text", "text/vtt", first);
        writeln!(
            out,
            r#"      <Role schemeIdUri="urn:mpeg:dash:role:2011" value="subtitle"/>"#
        )
        .unwrap();
        for s in group {
            writeln!(
                out,
                r#"      <Representation id="{}" bandwidth="{}">"#,
                escape(&s.path()),
                s.bandwidth
            )
            .unwrap();
            writeln!(out, "        <BaseURL>{}/0.vtt</BaseURL>", escape(&s.path())).unwrap();
            writeln!(out, "      </Representation>").unwrap();
        }
        writeln!(out, "    </AdaptationSet>").unwrap();
        set_id += 1;
    }

    writeln!(out, "  </Period>").unwrap();
    writeln!(out, "</MPD>").unwrap();

    out
}

fn write_adaptation_set_open(
    out: &mut String,
    id: usize,
    content_type: &str,
    mime: &str,
    first: &OfferedStream,
) {
    write!(
        out,
        r#"    <AdaptationSet id="{id}" contentType="{content_type}" mimeType="{mime}""#
    )
    .unwrap();
    if !first.stream.language_code.is_empty() {
        write!(out, r#" lang="{}""#, escape(&first.stream.language_code)).unwrap();
    }
    if content_type != "text" {
        write!(out, r#" segmentAlignment="true" startWithSAP="1""#).unwrap();
    }
    writeln!(out, ">").unwrap();
    writeln!(out, "      <Label>{}</Label>", escape(&first.label())).unwrap();
}

fn write_segment_template(out: &mut String, timeline: &[u64]) {
    writeln!(
        out,
        r#"      <SegmentTemplate timescale="1000" initialization="$RepresentationID$/init.mp4" media="$RepresentationID$/$Number$.m4s" startNumber="0">"#
    )
    .unwrap();
    writeln!(out, "        <SegmentTimeline>").unwrap();
    for (i, d) in timeline.iter().enumerate() {
        if i == 0 {
            writeln!(out, r#"          <S t="0" d="{d}"/>"#).unwrap();
        } else {
            writeln!(out, r#"          <S d="{d}"/>"#).unwrap();
        }
    }
    writeln!(out, "        </SegmentTimeline>").unwrap();
    writeln!(out, "      </SegmentTemplate>").unwrap();
}

/// Segment durations in whole milliseconds, taken as differences of rounded
/// cumulative boundaries so the rendered sum equals the rounded total.
fn millis_timeline(durations: &[Duration]) -> Vec<u64> {
    let mut out = Vec::with_capacity(durations.len());
    let mut elapsed = Duration::ZERO;
    let mut prev_ms = 0u64;
    for d in durations {
        elapsed += *d;
        let end_ms = round_millis(elapsed);
        out.push(end_ms - prev_ms);
        prev_ms = end_ms;
    }
    out
}

fn round_millis(d: Duration) -> u64 {
    ((d.as_nanos() + 500_000) / 1_000_000) as u64
}

/// Representations of the same stream, in first-seen stream order.
fn group_by_stream(offered: Vec<&OfferedStream>) -> Vec<Vec<&OfferedStream>> {
    let mut groups: Vec<Vec<&OfferedStream>> = Vec::new();
    for o in offered {
        match groups.iter_mut().find(|g| g[0].stream.key == o.stream.key) {
            Some(g) => g.push(o),
            None => groups.push(vec![o]),
        }
    }
    groups
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}
