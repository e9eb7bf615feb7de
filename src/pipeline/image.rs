use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};

use crate::common::{duplicate, PipelineContext};
use crate::error::IndexerError;
use crate::exec::Exec;
use crate::hasher::Hasher;
use crate::model::{Metadata, ObjectKind, Record};
use crate::pipeline::{canonical_directory, mkdir_p, occurrence_from_path, relative_to_save, set_mode, shard};
use crate::slotpool::SlotPool;

/// State machine for a single enqueued image file, spec §4.8.
pub fn convert(
    ctx: &PipelineContext,
    pool: &Arc<SlotPool>,
    slot: usize,
    save_root: &Path,
    file: &Path,
) -> Result<(), IndexerError> {
    if ctx.skip(ObjectKind::Image, file) {
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
            duplicate(ctx, ObjectKind::Image, &mut existing, occ)?;
        }
        ctx.mark_indexed(&file.to_string_lossy());
        return Ok(());
    }

    let attrs = examine(ctx, file)?;
    let width = attrs.get("width").and_then(Value::as_u64).map(|v| v as u32);
    let height = attrs.get("height").and_then(Value::as_u64).map(|v| v as u32);
    let aspect = attrs.get("aspect").and_then(Value::as_f64);

    if let (Some(w), Some(h)) = (width, height) {
        if let Some(min) = ctx.effective.minimum {
            if w < min.width || h < min.height {
                ctx.stats.inc_skipped();
                log::debug!("image below minimum dimensions, skipping {}", file.display());
                return Ok(());
            }
        }
        if let Some(max) = ctx.effective.maximum {
            if w > max.width || h > max.height {
                ctx.stats.inc_skipped();
                log::debug!("image above maximum dimensions, skipping {}", file.display());
                return Ok(());
            }
        }
    }

    let extension = file
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    let directory = canonical_directory(save_root, &id);
    let (_, suffix) = shard(&id);
    let output = directory.join(format!("{suffix}.{extension}"));
    let thumbnail_path = directory.join(format!("{suffix}p.{}", ctx.effective.thumbnail.format));

    mkdir_p(&directory)?;
    std::fs::copy(file, &output).map_err(|e| IndexerError::IOFailure {
        path: output.clone(),
        source: e,
    })?;
    set_mode(&output, ctx.effective.mode)?;

    let mut thumbnail = None;
    if let Some(template) = &ctx.effective.templates.thumbnail {
        run_template(
            template,
            &output,
            &thumbnail_path,
            &ctx.effective.thumbnail.format,
            ctx.effective.thumbnail.geometry.as_deref(),
        )
        .map_err(|reason| IndexerError::ThumbnailFailed {
            path: file.to_path_buf(),
            reason,
        })?;
        set_mode(&thumbnail_path, ctx.effective.mode)?;
        thumbnail = Some(relative_to_save(save_root, &thumbnail_path));
    }

    let mut preview = None;
    if extension == "gif" {
        if let Some(template) = &ctx.effective.templates.preview {
            let preview_path = directory.join(format!("{suffix}p.{}", ctx.effective.format));
            run_template(template, &output, &preview_path, &ctx.effective.format, None).map_err(
                |reason| IndexerError::PreviewFailed {
                    path: file.to_path_buf(),
                    reason,
                },
            )?;
            set_mode(&preview_path, ctx.effective.mode)?;
            preview = Some(relative_to_save(save_root, &preview_path));
        }
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
    let mut record = Record {
        id: id.clone(),
        object: ObjectKind::Image,
        version: "1".to_string(),
        name: file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_string(),
        description: String::new(),
        hash: id.clone(),
        sources: Default::default(),
        relative: relative_to_save(save_root, &output),
        thumbnail,
        preview,
        subtitles: None,
        size,
        duration: None,
        aspect,
        width,
        height,
        sound: None,
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
    ctx.insert(&record)?;
    ctx.delete_source(&file.to_string_lossy());
    ctx.mark_indexed(&file.to_string_lossy());

    ctx.stats.inc_images();
    ctx.stats.inc_converted();
    log::info!("indexed:image {}", record.relative);
    Ok(())
}

fn run_template(
    template: &str,
    input: &Path,
    output: &Path,
    format: &str,
    geometry: Option<&str>,
) -> Result<(), String> {
    let mut vars = HashMap::new();
    vars.insert("input", input.to_string_lossy().into_owned());
    vars.insert("output", output.to_string_lossy().into_owned());
    vars.insert("format", format.to_string());
    vars.insert("geometry", geometry.unwrap_or("").to_string());

    let args = Exec::build_args(template, &vars);
    let bin = args.first().cloned().unwrap_or_default();
    let rest = if args.is_empty() { Vec::new() } else { args[1..].to_vec() };
    Exec::run(&bin, &rest).map(|_| ()).map_err(|e| e.to_string())
}

fn examine(ctx: &PipelineContext, file: &Path) -> Result<Value, IndexerError> {
    let template = ctx
        .effective
        .templates
        .identify
        .clone()
        .unwrap_or_else(|| "identify -verbose $input".to_string());
    let mut vars = HashMap::new();
    vars.insert("input", file.to_string_lossy().into_owned());
    let args = Exec::build_args(&template, &vars);
    let bin = args.first().cloned().unwrap_or_default();
    let rest = if args.is_empty() { Vec::new() } else { args[1..].to_vec() };
    let output = Exec::run(&bin, &rest).map_err(|e| IndexerError::ProbeFailed {
        path: file.to_path_buf(),
        reason: e.to_string(),
    })?;

    let lines: Vec<&str> = output.stdout.lines().skip(1).collect();
    Ok(parse_identify(&lines))
}

/// Parses the identify tool's verbose output (lines after the header
/// line) into a nested tree, per spec §4.8.1. Indentation is in units of
/// two spaces; `Key: Value` is a leaf, `Key:` with no value opens a
/// subtree. `geometry` additionally sets `width`/`height`/`aspect` in the
/// same subtree.
pub fn parse_identify(lines: &[&str]) -> Value {
    let mut pos = 0usize;
    parse_level(lines, &mut pos, 0)
}

fn line_indent(line: &str) -> usize {
    line.chars().take_while(|c| *c == ' ').count() / 2
}

fn normalize_value(raw: &str) -> Value {
    match raw {
        "True" | "true" => Value::Bool(true),
        "False" | "false" => Value::Bool(false),
        "Undefined" | "undefined" => Value::Null,
        _ => {
            if let Ok(i) = raw.parse::<i64>() {
                Value::Number(i.into())
            } else if let Ok(f) = raw.parse::<f64>() {
                serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::String(raw.to_string()))
            } else {
                Value::String(raw.to_string())
            }
        }
    }
}

fn parse_geometry(raw: &str) -> Option<(u32, u32)> {
    let dims = raw.split('+').next()?;
    let mut parts = dims.split('x');
    let w = parts.next()?.trim().parse::<u32>().ok()?;
    let h = parts.next()?.trim().parse::<u32>().ok()?;
    Some((w, h))
}

fn parse_level(lines: &[&str], pos: &mut usize, level: usize) -> Value {
    let mut map = Map::new();
    while *pos < lines.len() {
        let line = lines[*pos];
        if line.trim().is_empty() {
            *pos += 1;
            continue;
        }
        let indent = line_indent(line);
        if indent < level {
            break;
        }
        if indent > level {
            *pos += 1;
            continue;
        }

        let content = line.trim();
        let (key, rest) = match content.split_once(':') {
            Some((k, r)) => (k.trim(), r.trim()),
            None => {
                *pos += 1;
                continue;
            }
        };
        *pos += 1;

        if rest.is_empty() {
            let child = parse_level(lines, pos, level + 1);
            map.insert(key.to_string(), child);
        } else {
            map.insert(key.to_string(), normalize_value(rest));
            if key.eq_ignore_ascii_case("geometry") {
                if let Some((w, h)) = parse_geometry(rest) {
                    map.insert("width".to_string(), serde_json::json!(w));
                    map.insert("height".to_string(), serde_json::json!(h));
                    map.insert("aspect".to_string(), serde_json::json!(w as f64 / h as f64));
                }
            }
        }
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_line_sets_width_height_aspect_on_same_subtree() {
        let text = "Geometry: 1920x1080+0+0\nColorspace: sRGB";
        let lines: Vec<&str> = text.lines().collect();
        let tree = parse_identify(&lines);
        assert_eq!(tree.get("width").unwrap(), 1920);
        assert_eq!(tree.get("height").unwrap(), 1080);
        assert!((tree.get("aspect").unwrap().as_f64().unwrap() - (1920.0 / 1080.0)).abs() < 1e-9);
        assert_eq!(tree.get("Colorspace").unwrap(), "sRGB");
    }

    #[test]
    fn nested_keys_with_no_value_open_a_subtree() {
        let text = "Channel statistics:\n  Red:\n    min: 0\n    max: 255\nFormat: PNG";
        let lines: Vec<&str> = text.lines().collect();
        let tree = parse_identify(&lines);
        let red = tree.get("Channel statistics").unwrap().get("Red").unwrap();
        assert_eq!(red.get("min").unwrap(), 0);
        assert_eq!(red.get("max").unwrap(), 255);
        assert_eq!(tree.get("Format").unwrap(), "PNG");
    }

    #[test]
    fn boolean_and_undefined_tokens_normalize() {
        let text = "Interlace: False\nGamma: Undefined";
        let lines: Vec<&str> = text.lines().collect();
        let tree = parse_identify(&lines);
        assert_eq!(tree.get("Interlace").unwrap(), false);
        assert!(tree.get("Gamma").unwrap().is_null());
    }
}
