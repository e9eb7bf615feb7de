use std::path::PathBuf;

use thiserror::Error;

/// Per-operation error taxonomy. Pipelines match on this to decide which
/// stats counter to bump and whether a partial artifact needs cleanup;
/// the binary boundary wraps everything else in `anyhow`.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("failed to scan directory {path}: {source}")]
    ScanError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("hash tool failed for {path}: {reason}")]
    HashFailed { path: PathBuf, reason: String },

    #[error("probe tool failed for {path}: {reason}")]
    ProbeFailed { path: PathBuf, reason: String },

    #[error("convert tool failed for {path}: {reason}")]
    ConvertFailed { path: PathBuf, reason: String },

    #[error("thumbnail tool failed for {path}: {reason}")]
    ThumbnailFailed { path: PathBuf, reason: String },

    #[error("preview tool failed for {path}: {reason}")]
    PreviewFailed { path: PathBuf, reason: String },

    #[error("sound check failed for {path}: {reason}")]
    SoundCheckFailed { path: PathBuf, reason: String },

    #[error("subtitle extraction failed for {path}: {reason}")]
    SubtitleExtractFailed { path: PathBuf, reason: String },

    #[error("catalog operation failed: {0}")]
    CatalogError(String),

    #[error("search index operation failed: {0}")]
    SearchError(String),

    #[error("filesystem operation failed on {path}: {source}")]
    IOFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fatal startup failure: {0}")]
    Fatal(String),
}

impl IndexerError {
    /// True for the per-file failure variants that should increment
    /// `stats.failed` and release the slot without aborting the pool.
    pub fn is_per_file(&self) -> bool {
        !matches!(self, IndexerError::Fatal(_))
    }
}
