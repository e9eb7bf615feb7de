use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::common::{duplicate, PipelineContext};
use crate::config::Compression;
use crate::error::IndexerError;
use crate::hasher::Hasher;
use crate::model::{Metadata, ObjectKind, Record};
use crate::pipeline::{canonical_directory, mkdir_p, occurrence_from_path, relative_to_save, set_mode, shard};
use crate::slotpool::SlotPool;

/// State machine for a single enqueued text file, spec §4.9.
///
/// The shared per-type `minimum`/`maximum` config fields are typed as
/// pixel `Dimensions` for image's sake; for text their `width` component
/// is reused as a plain byte-count threshold rather than adding a
/// text-only config shape.
pub fn convert(
    ctx: &PipelineContext,
    pool: &Arc<SlotPool>,
    slot: usize,
    save_root: &Path,
    file: &Path,
) -> Result<(), IndexerError> {
    if ctx.skip(ObjectKind::Text, file) {
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
            duplicate(ctx, ObjectKind::Text, &mut existing, occ)?;
        }
        ctx.mark_indexed(&file.to_string_lossy());
        return Ok(());
    }

    let source_meta = std::fs::metadata(file).map_err(|e| IndexerError::IOFailure {
        path: file.to_path_buf(),
        source: e,
    })?;
    if let Some(min) = ctx.effective.minimum {
        if source_meta.len() < min.width as u64 {
            ctx.stats.inc_skipped();
            log::debug!("text below minimum size, skipping {}", file.display());
            return Ok(());
        }
    }
    if let Some(max) = ctx.effective.maximum {
        if source_meta.len() > max.width as u64 {
            ctx.stats.inc_skipped();
            log::debug!("text above maximum size, skipping {}", file.display());
            return Ok(());
        }
    }

    let raw = std::fs::read(file).map_err(|e| IndexerError::IOFailure {
        path: file.to_path_buf(),
        source: e,
    })?;
    let mut text = String::from_utf8_lossy(&raw).into_owned();
    if let Some(processor) = &ctx.processor {
        text = processor(&text);
    }

    let hash = hash_text(&ctx.effective.shasum, &text)?;
    if hash != id {
        if let Some(mut existing) = ctx.lookup(&hash)? {
            for occ in pool.drain_occurrences(slot) {
                duplicate(ctx, ObjectKind::Text, &mut existing, occ)?;
            }
            ctx.mark_indexed(&file.to_string_lossy());
            return Ok(());
        }
    }

    let description = if ctx.effective.summarize > 0 {
        summarize(&text, ctx.effective.summarize)
    } else {
        text.chars().take(ctx.effective.summary_fallback).collect()
    };

    let name = file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_string();

    let _ = ctx.search.index(
        "texts",
        &id,
        &json!({"name": name, "description": description, "contents": text}),
    );
    let _ = ctx.search.refresh("texts");

    let extension = file
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    let directory = canonical_directory(save_root, &id);
    let (_, suffix) = shard(&id);
    let compression_suffix = match ctx.effective.compression {
        Compression::None => "",
        Compression::Brotli => ".br",
        Compression::Gzip => ".gz",
    };
    let output = directory.join(format!("{suffix}.{extension}{compression_suffix}"));

    mkdir_p(&directory)?;
    let compressed = compress(ctx.effective.compression, text.as_bytes()).map_err(|e| {
        IndexerError::ConvertFailed {
            path: file.to_path_buf(),
            reason: e.to_string(),
        }
    })?;
    std::fs::write(&output, &compressed).map_err(|e| IndexerError::IOFailure {
        path: output.clone(),
        source: e,
    })?;
    set_mode(&output, ctx.effective.mode)?;

    let size = std::fs::metadata(&output)
        .map(|m| m.len())
        .map_err(|e| IndexerError::IOFailure {
            path: output.clone(),
            source: e,
        })?;

    let occurrences = pool.drain_occurrences(slot);
    let created = occurrences.first().map(|o| o.timestamp).unwrap_or(0);
    let now = Utc::now();
    let compression = match ctx.effective.compression {
        Compression::None => None,
        Compression::Brotli => Some("brotli".to_string()),
        Compression::Gzip => Some("gzip".to_string()),
    };

    let mut record = Record {
        id,
        object: ObjectKind::Text,
        version: "1".to_string(),
        name,
        description,
        hash,
        sources: Default::default(),
        relative: relative_to_save(save_root, &output),
        thumbnail: None,
        preview: None,
        subtitles: None,
        size,
        duration: None,
        aspect: None,
        width: None,
        height: None,
        sound: None,
        compression,
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

    ctx.stats.inc_texts();
    ctx.stats.inc_converted();
    log::info!("indexed:text {}", record.relative);
    Ok(())
}

/// Hashes in-memory text by spilling it to a temp file, since the
/// configured hash tool (spec §4.2) only ever operates on a path.
fn hash_text(shasum: &str, text: &str) -> Result<String, IndexerError> {
    let mut tmp = tempfile::NamedTempFile::new().map_err(|e| IndexerError::HashFailed {
        path: "<in-memory text>".into(),
        reason: e.to_string(),
    })?;
    tmp.write_all(text.as_bytes())
        .map_err(|e| IndexerError::HashFailed {
            path: "<in-memory text>".into(),
            reason: e.to_string(),
        })?;
    Hasher::new(shasum).hash(tmp.path())
}

fn summarize(text: &str, limit: usize) -> String {
    let normalized: String = text
        .chars()
        .filter(|c| c.is_ascii())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    normalized.chars().take(limit).collect()
}

fn compress(compression: Compression, data: &[u8]) -> std::io::Result<Vec<u8>> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Gzip => {
            use flate2::write::GzEncoder;
            let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data)?;
            encoder.finish()
        }
        Compression::Brotli => {
            let mut out = Vec::new();
            let params = brotli::enc::BrotliEncoderParams::default();
            brotli::BrotliCompress(&mut std::io::Cursor::new(data), &mut out, &params)?;
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarize_collapses_whitespace_and_truncates() {
        let text = "Hello   world\n\nthis   is text";
        let out = summarize(text, 11);
        assert_eq!(out, "Hello world");
    }

    #[test]
    fn gzip_round_trips() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let compressed = compress(Compression::Gzip, data).unwrap();
        assert_ne!(compressed, data);
        let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
        let mut out = String::new();
        std::io::Read::read_to_string(&mut decoder, &mut out).unwrap();
        assert_eq!(out.as_bytes(), data);
    }

    #[test]
    fn brotli_round_trips() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let compressed = compress(Compression::Brotli, data).unwrap();
        let mut out = Vec::new();
        brotli::BrotliDecompress(&mut std::io::Cursor::new(&compressed), &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn none_compression_is_identity() {
        let data = b"hello";
        let compressed = compress(Compression::None, data).unwrap();
        assert_eq!(compressed, data);
    }
}
