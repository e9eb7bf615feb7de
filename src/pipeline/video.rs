use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::common::{duplicate, PipelineContext};
use crate::error::IndexerError;
use crate::exec::Exec;
use crate::hasher::Hasher;
use crate::model::{Metadata, ObjectKind, Record, SoundInfo};
use crate::pipeline::{canonical_directory, mkdir_p, occurrence_from_path, relative_to_save, set_mode, shard};
use crate::slotpool::SlotPool;

/// State machine for a single enqueued video file, spec §4.10 — the most
/// complex pipeline: probe, subtitle extraction, transcode with
/// streaming progress, post-convert dedup, thumbnail, sound detection
/// and preview clip.
pub fn convert(
    ctx: &PipelineContext,
    pool: &Arc<SlotPool>,
    slot: usize,
    save_root: &Path,
    file: &Path,
) -> Result<(), IndexerError> {
    if ctx.skip(ObjectKind::Video, file) {
        return Ok(());
    }

    let hasher = Hasher::new(&ctx.effective.shasum);
    let id = hasher.hash(file)?;

    let occurrence = occurrence_from_path(&id, file).map_err(|e| IndexerError::IOFailure {
        path: file.to_path_buf(),
        source: e,
    })?;

    if !pool.claim_or_join(slot, &id, occurrence) {
        return Ok(());
    }

    if let Some(mut existing) = ctx.lookup(&id)? {
        for occ in pool.drain_occurrences(slot) {
            duplicate(ctx, ObjectKind::Video, &mut existing, occ)?;
        }
        ctx.mark_indexed(&file.to_string_lossy());
        return Ok(());
    }

    let source_probe = probe(ctx, file)?;

    let directory = canonical_directory(save_root, &id);
    let (_, suffix) = shard(&id);
    let output = directory.join(format!("{suffix}.{}", ctx.effective.format));
    let preview_path = directory.join(format!("{suffix}p.{}", ctx.effective.format));
    let thumbnail_path = directory.join(format!("{suffix}p.{}", ctx.effective.thumbnail.format));
    let subtitles_path = directory.join(format!("{suffix}.{}", ctx.effective.subtitle_format));

    mkdir_p(&directory)?;

    let subtitles_text = extract_subtitles(ctx, file, source_probe.has_subtitle, &subtitles_path);

    transcode(ctx, pool, slot, file, &output)?;
    set_mode(&output, ctx.effective.mode)?;

    let hash = Hasher::new(&ctx.effective.shasum).hash(&output)?;
    if hash != id {
        if let Some(mut existing) = ctx.lookup(&hash)? {
            for occ in pool.drain_occurrences(slot) {
                duplicate(ctx, ObjectKind::Video, &mut existing, occ)?;
            }
            let _ = std::fs::remove_file(&output);
            let _ = std::fs::remove_dir(&directory);
            ctx.mark_indexed(&file.to_string_lossy());
            return Ok(());
        }
    }

    if let Some(template) = &ctx.effective.templates.thumbnail {
        let time = thumbnail_time(ctx.effective.thumbnail_time, source_probe.duration);
        run_media_template(
            template,
            &output,
            &thumbnail_path,
            &[("time", format!("{:05}", time as u64))],
        )
        .map_err(|reason| IndexerError::ThumbnailFailed {
            path: file.to_path_buf(),
            reason,
        })?;
        set_mode(&thumbnail_path, ctx.effective.mode)?;
    }

    let final_probe = probe(ctx, &output)?;

    let sound = if ctx.effective.check_sound {
        detect_sound(ctx, &output).unwrap_or_else(|_| SoundInfo::silent_default())
    } else {
        SoundInfo::silent_default()
    };

    if let Some(template) = &ctx.effective.templates.preview {
        let interval = preview_interval(final_probe.duration, ctx.effective.preview_duration);
        run_media_template(template, &output, &preview_path, &[("interval", interval.to_string())])
            .map_err(|reason| IndexerError::PreviewFailed {
                path: file.to_path_buf(),
                reason,
            })?;
        set_mode(&preview_path, ctx.effective.mode)?;
    }

    let size = std::fs::metadata(&output)
        .map(|m| m.len())
        .map_err(|e| IndexerError::IOFailure {
            path: output.clone(),
            source: e,
        })?;

    let occurrences = pool.drain_occurrences(slot);
    let created = occurrences.first().map(|o| o.timestamp).unwrap_or(0);
    let now = Utc::now();

    let mut description = String::new();
    let subtitles_relative = subtitles_text
        .as_ref()
        .map(|_| relative_to_save(save_root, &subtitles_path));
    if let Some(text) = &subtitles_text {
        if ctx.effective.subtitles_to_description {
            description = text.clone();
        }
        let idx = ctx
            .effective
            .subtitles_index
            .clone()
            .unwrap_or_else(|| "subtitles".to_string());
        let _ = ctx.search.index(&idx, &id, &json!({"text": text}));
        let _ = ctx.search.refresh(&idx);
    }

    let name = file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_string();

    let mut record = Record {
        id: id.clone(),
        object: ObjectKind::Video,
        version: "1".to_string(),
        name: name.clone(),
        description,
        hash,
        sources: Default::default(),
        relative: relative_to_save(save_root, &output),
        thumbnail: ctx
            .effective
            .templates
            .thumbnail
            .as_ref()
            .map(|_| relative_to_save(save_root, &thumbnail_path)),
        preview: ctx
            .effective
            .templates
            .preview
            .as_ref()
            .map(|_| relative_to_save(save_root, &preview_path)),
        subtitles: subtitles_relative,
        size,
        duration: Some(final_probe.duration),
        aspect: final_probe.aspect,
        width: final_probe.width,
        height: final_probe.height,
        sound: Some(sound),
        compression: None,
        metadata: Metadata {
            created,
            added: now,
            updated: now,
            occurrences,
            ..Metadata::default()
        },
        deleted: false,
    };
    record.rebuild_sources();

    ctx.tag(&mut record);
    let _ = ctx
        .search
        .index("videos", &id, &json!({"name": name, "description": record.description}));
    let _ = ctx.search.refresh("videos");
    ctx.insert(&record)?;
    ctx.delete_source(&file.to_string_lossy());
    ctx.mark_indexed(&file.to_string_lossy());

    ctx.stats.inc_videos();
    ctx.stats.inc_converted();
    log::info!("indexed:video {}", record.relative);
    Ok(())
}

struct ProbeResult {
    duration: f64,
    width: Option<u32>,
    height: Option<u32>,
    aspect: Option<f64>,
    has_subtitle: bool,
}

#[derive(Debug, Deserialize, Default)]
struct ProbeFormat {
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ProbeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    display_aspect_ratio: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ProbeDoc {
    #[serde(default)]
    format: Option<ProbeFormat>,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

fn probe(ctx: &PipelineContext, path: &Path) -> Result<ProbeResult, IndexerError> {
    let template = ctx.effective.templates.probe.clone().unwrap_or_else(|| {
        "ffprobe -v quiet -print_format json -show_format -show_streams $input".to_string()
    });
    let mut vars = HashMap::new();
    vars.insert("input", path.to_string_lossy().into_owned());
    let args = Exec::build_args(&template, &vars);
    let bin = args.first().cloned().unwrap_or_default();
    let rest = if args.is_empty() { Vec::new() } else { args[1..].to_vec() };
    let output = Exec::run(&bin, &rest).map_err(|e| IndexerError::ProbeFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let doc: ProbeDoc = serde_json::from_str(&output.stdout).map_err(|e| IndexerError::ProbeFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let duration = doc
        .format
        .as_ref()
        .and_then(|f| f.duration.as_ref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);
    let video_stream = doc.streams.iter().find(|s| s.codec_type.as_deref() == Some("video"));
    let width = video_stream.and_then(|s| s.width);
    let height = video_stream.and_then(|s| s.height);
    let aspect = video_stream
        .and_then(|s| s.display_aspect_ratio.as_deref())
        .and_then(parse_aspect_ratio)
        .or_else(|| match (width, height) {
            (Some(w), Some(h)) if h != 0 => Some(w as f64 / h as f64),
            _ => None,
        });
    let has_subtitle = doc.streams.iter().any(|s| s.codec_type.as_deref() == Some("subtitle"));

    Ok(ProbeResult {
        duration,
        width,
        height,
        aspect,
        has_subtitle,
    })
}

fn parse_aspect_ratio(raw: &str) -> Option<f64> {
    let mut parts = raw.split(':');
    let w: f64 = parts.next()?.trim().parse().ok()?;
    let h: f64 = parts.next()?.trim().parse().ok()?;
    if h == 0.0 {
        None
    } else {
        Some(w / h)
    }
}

/// `floor(min(thumbnailTime, duration - 1))`, guarded against
/// NaN/Infinity/negative durations, per spec §4.10 step 11.
fn thumbnail_time(configured: f64, duration: f64) -> f64 {
    if !duration.is_finite() {
        return 0.0;
    }
    let t = configured.min(duration - 1.0);
    if !t.is_finite() || t < 0.0 {
        0.0
    } else {
        t.floor()
    }
}

fn preview_interval(duration: f64, preview_duration: f64) -> u64 {
    if preview_duration <= 0.0 || !duration.is_finite() || duration <= 0.0 {
        return 1;
    }
    (duration / preview_duration).ceil() as u64
}

fn run_media_template(
    template: &str,
    input: &Path,
    output: &Path,
    extra: &[(&str, String)],
) -> Result<(), String> {
    let mut vars: HashMap<&str, String> = HashMap::new();
    vars.insert("input", input.to_string_lossy().into_owned());
    vars.insert("output", output.to_string_lossy().into_owned());
    for (key, value) in extra {
        vars.insert(key, value.clone());
    }
    let args = Exec::build_args(template, &vars);
    let bin = args.first().cloned().unwrap_or_default();
    let rest = if args.is_empty() { Vec::new() } else { args[1..].to_vec() };
    Exec::run(&bin, &rest).map(|_| ()).map_err(|e| e.to_string())
}

fn run_subtitle_template(template: &str, input: &Path, output: &Path, language: Option<&str>) -> Result<(), String> {
    let mut vars = HashMap::new();
    vars.insert("input", input.to_string_lossy().into_owned());
    vars.insert("output", output.to_string_lossy().into_owned());
    vars.insert("language", language.unwrap_or("").to_string());
    let args = Exec::build_args(template, &vars);
    let bin = args.first().cloned().unwrap_or_default();
    let rest = if args.is_empty() { Vec::new() } else { args[1..].to_vec() };
    Exec::run(&bin, &rest).map(|_| ()).map_err(|e| e.to_string())
}

/// Best-effort subtitle extraction, spec §4.10 step 7: sibling file
/// first, then in-stream extraction with a fallback template, sanity
/// checked against empty/non-word-only text.
fn extract_subtitles(ctx: &PipelineContext, file: &Path, has_subtitle_stream: bool, subtitles_path: &Path) -> Option<String> {
    let sibling = file.with_extension(&ctx.effective.subtitle_format);
    let raw_text = if sibling.is_file() {
        std::fs::copy(&sibling, subtitles_path).ok()?;
        let _ = set_mode(subtitles_path, ctx.effective.mode);
        std::fs::read_to_string(subtitles_path).ok()?
    } else if has_subtitle_stream {
        let primary = ctx.effective.templates.subtitle.as_ref()?;
        let extracted = run_subtitle_template(primary, file, subtitles_path, ctx.effective.language.as_deref());
        let ok = match extracted {
            Ok(()) => true,
            Err(_) => ctx
                .effective
                .templates
                .subtitle_fallback
                .as_ref()
                .map(|fallback| {
                    run_subtitle_template(fallback, file, subtitles_path, ctx.effective.language.as_deref()).is_ok()
                })
                .unwrap_or(false),
        };
        if !ok {
            return None;
        }
        std::fs::read_to_string(subtitles_path).ok()?
    } else {
        return None;
    };

    let text = strip_subtitle_markup(&raw_text);
    let word_chars: String = text.chars().filter(|c| c.is_alphanumeric()).collect();
    if text.trim().is_empty() || word_chars.is_empty() {
        let _ = std::fs::remove_file(subtitles_path);
        return None;
    }
    Some(text)
}

/// Minimal `.srt`/`.vtt` stripper: drops cue-index and timestamp lines,
/// joins the remaining dialogue lines. Supplemental beyond the
/// distilled spec's silence on subtitle parsing detail; grounded in its
/// own requirement that extraction yield "plain text" for sanity
/// checking and optional indexing.
fn strip_subtitle_markup(raw: &str) -> String {
    raw.lines()
        .filter(|line| {
            let t = line.trim();
            if t.is_empty() || t == "WEBVTT" {
                return false;
            }
            if t.chars().all(|c| c.is_ascii_digit()) {
                return false;
            }
            if t.contains("-->") {
                return false;
            }
            true
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn transcode(ctx: &PipelineContext, pool: &Arc<SlotPool>, slot: usize, file: &Path, output: &Path) -> Result<(), IndexerError> {
    let template = ctx
        .effective
        .templates
        .convert
        .clone()
        .unwrap_or_else(|| "ffmpeg -y -i $input $output".to_string());
    let mut vars = HashMap::new();
    vars.insert("input", file.to_string_lossy().into_owned());
    vars.insert("output", output.to_string_lossy().into_owned());
    vars.insert("format", ctx.effective.format.clone());
    let args = Exec::build_args(&template, &vars);
    let bin = args.first().cloned().unwrap_or_default();
    let rest = if args.is_empty() { Vec::new() } else { args[1..].to_vec() };

    let pool = pool.clone();
    let status = Exec::run_stream(&bin, &rest, move |line| {
        if let Some(tok) = extract_after(line, "Duration:") {
            if let Some(secs) = parse_timecode(&tok) {
                pool.set_progress_total(slot, secs);
            }
        }
        if let Some(tok) = extract_after(line, "time=") {
            if let Some(secs) = parse_timecode(&tok) {
                pool.set_progress_value(slot, secs);
            }
        }
    })
    .map_err(|e| IndexerError::ConvertFailed {
        path: file.to_path_buf(),
        reason: e.to_string(),
    })?;

    if status != 0 {
        let _ = std::fs::remove_file(output);
        return Err(IndexerError::ConvertFailed {
            path: file.to_path_buf(),
            reason: format!("exited with status {status}"),
        });
    }
    Ok(())
}

fn detect_sound(ctx: &PipelineContext, path: &Path) -> Result<SoundInfo, IndexerError> {
    let template = ctx.effective.templates.sound.as_ref().ok_or_else(|| IndexerError::SoundCheckFailed {
        path: path.to_path_buf(),
        reason: "no sound template configured".to_string(),
    })?;
    let mut vars = HashMap::new();
    vars.insert("input", path.to_string_lossy().into_owned());
    let args = Exec::build_args(template, &vars);
    let bin = args.first().cloned().unwrap_or_default();
    let rest = if args.is_empty() { Vec::new() } else { args[1..].to_vec() };
    let output = Exec::run_safe(&bin, &rest);

    let combined = format!("{}\n{}", output.stdout, output.stderr);
    match (extract_db(&combined, "mean_volume:"), extract_db(&combined, "max_volume:")) {
        (Some(mean), Some(max)) => Ok(SoundInfo {
            silent: mean <= ctx.effective.sound_threshold,
            mean,
            max,
        }),
        _ => Ok(SoundInfo::silent_default()),
    }
}

fn extract_db(text: &str, marker: &str) -> Option<f64> {
    let idx = text.find(marker)?;
    let rest = &text[idx + marker.len()..];
    let token: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '-' || *c == '.')
        .collect();
    token.parse::<f64>().ok()
}

fn extract_after(line: &str, marker: &str) -> Option<String> {
    let idx = line.find(marker)?;
    let rest = &line[idx + marker.len()..];
    let token: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ':' || *c == '.')
        .collect();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

fn parse_timecode(s: &str) -> Option<f64> {
    let mut parts = s.trim().splitn(3, ':');
    let h: f64 = parts.next()?.parse().ok()?;
    let m: f64 = parts.next()?.parse().ok()?;
    let sec: f64 = parts.next()?.parse().ok()?;
    Some(h * 3600.0 + m * 60.0 + sec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thumbnail_time_floors_min_of_configured_and_duration_minus_one() {
        assert_eq!(thumbnail_time(5.0, 100.0), 5.0);
        assert_eq!(thumbnail_time(5.0, 3.5), 2.0);
    }

    #[test]
    fn thumbnail_time_guards_short_nan_and_infinite_duration() {
        assert_eq!(thumbnail_time(5.0, 1.0), 0.0);
        assert_eq!(thumbnail_time(5.0, 0.5), 0.0);
        assert_eq!(thumbnail_time(5.0, f64::NAN), 0.0);
        assert_eq!(thumbnail_time(5.0, f64::INFINITY), 0.0);
    }

    #[test]
    fn preview_interval_rounds_up() {
        assert_eq!(preview_interval(12.0, 5.0), 3);
        assert_eq!(preview_interval(10.0, 5.0), 2);
    }

    #[test]
    fn parse_timecode_converts_hms_to_seconds() {
        assert_eq!(parse_timecode("00:01:02.50"), Some(62.5));
    }

    #[test]
    fn extract_after_stops_at_delimiter() {
        let line = "  Duration: 00:01:23.45, start: 0.000000, bitrate: 128 kb/s";
        let tok = extract_after(line, "Duration:").unwrap();
        assert_eq!(tok, "00:01:23.45");
    }

    #[test]
    fn extract_after_time_marker() {
        let line = "frame=  120 fps= 30 time=00:00:04.00 bitrate=N/A speed=1.2x";
        let tok = extract_after(line, "time=").unwrap();
        assert_eq!(tok, "00:00:04.00");
    }

    #[test]
    fn extract_db_parses_negative_decibels() {
        let text = "[Parsed_volumedetect_0 @ 0x1] mean_volume: -20.1 dB\nmax_volume: -3.2 dB";
        assert_eq!(extract_db(text, "mean_volume:"), Some(-20.1));
        assert_eq!(extract_db(text, "max_volume:"), Some(-3.2));
    }

    #[test]
    fn strip_subtitle_markup_removes_indices_and_timestamps() {
        let srt = "1\n00:00:01,000 --> 00:00:02,000\nHello there\n\n2\n00:00:02,500 --> 00:00:03,000\nGeneral Kenobi";
        let text = strip_subtitle_markup(srt);
        assert_eq!(text, "Hello there General Kenobi");
    }

    #[test]
    fn strip_subtitle_markup_of_blank_cues_is_empty() {
        let vtt = "WEBVTT\n\n00:00:01.000 --> 00:00:02.000\n\n";
        let text = strip_subtitle_markup(vtt);
        assert!(text.trim().is_empty());
    }
}
