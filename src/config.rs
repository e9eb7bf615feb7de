use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_mode() -> u32 {
    0o644
}

fn default_save() -> PathBuf {
    PathBuf::from("save")
}

fn default_shasum() -> String {
    "shasum".to_string()
}

/// Global options. Fields that cascade into per-type blocks per spec §9.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub cache: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub can_skip: bool,
    #[serde(default)]
    pub delete: bool,
    #[serde(default)]
    pub drop_tags: bool,
    #[serde(default = "default_mode")]
    pub mode: u32,
    #[serde(default = "default_save")]
    pub save: PathBuf,
    #[serde(default)]
    pub scan: Vec<PathBuf>,
    #[serde(default = "default_shasum")]
    pub shasum: String,

    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub types: TypesConfig,
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Config {
            concurrency: default_concurrency(),
            cache: Some(PathBuf::from(".mediadex-cache.json")),
            can_skip: true,
            delete: false,
            drop_tags: false,
            mode: default_mode(),
            save: default_save(),
            scan: Vec::new(),
            shasum: default_shasum(),
            scanner: ScannerConfig::default(),
            services: ServicesConfig::default(),
            types: TypesConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub persistent: bool,
    #[serde(default = "default_rescan")]
    pub rescan: u64,
    #[serde(default = "default_true")]
    pub sort: bool,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default)]
    pub dotfiles: bool,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_rescan() -> u64 {
    0
}

fn default_max_depth() -> usize {
    usize::MAX
}

impl Default for ScannerConfig {
    fn default() -> Self {
        ScannerConfig {
            exclude: Vec::new(),
            persistent: false,
            rescan: default_rescan(),
            sort: true,
            recursive: true,
            dotfiles: false,
            max_depth: default_max_depth(),
            follow_symlinks: false,
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub elastic: ElasticConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
}

fn default_db_url() -> String {
    "catalog.sqlite3".to_string()
}

fn default_collection() -> String {
    "records".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            url: default_db_url(),
            collection: default_collection(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElasticConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub node: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeBlock {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub pattern: String,
    #[serde(default)]
    pub exclude: Option<String>,

    // cascading overrides; None means "inherit from global"
    #[serde(default)]
    pub can_skip: Option<bool>,
    #[serde(default)]
    pub delete: Option<bool>,
    #[serde(default)]
    pub drop_tags: Option<bool>,
    #[serde(default)]
    pub mode: Option<u32>,
    #[serde(default)]
    pub save: Option<PathBuf>,
    #[serde(default)]
    pub shasum: Option<String>,

    #[serde(default)]
    pub minimum: Option<Dimensions>,
    #[serde(default)]
    pub maximum: Option<Dimensions>,

    #[serde(default)]
    pub thumbnail: ThumbnailConfig,
    #[serde(default)]
    pub templates: Templates,

    #[serde(default)]
    pub compression: Compression,
    #[serde(default = "default_summary_fallback")]
    pub summary_fallback: usize,
    #[serde(default)]
    pub summarize: usize,

    #[serde(default = "default_true")]
    pub check_sound: bool,
    #[serde(default = "default_sound_threshold")]
    pub sound_threshold: f64,
    #[serde(default = "default_thumbnail_time")]
    pub thumbnail_time: f64,
    #[serde(default = "default_preview_duration")]
    pub preview_duration: f64,
    #[serde(default = "default_subtitle_format")]
    pub subtitle_format: String,
    #[serde(default)]
    pub subtitles_to_description: bool,
    #[serde(default)]
    pub subtitles_index: Option<String>,
    #[serde(default)]
    pub language: Option<String>,

    #[serde(default = "default_format")]
    pub format: String,
}

fn default_summary_fallback() -> usize {
    280
}
fn default_sound_threshold() -> f64 {
    -50.0
}
fn default_thumbnail_time() -> f64 {
    5.0
}
fn default_preview_duration() -> f64 {
    5.0
}
fn default_subtitle_format() -> String {
    "srt".to_string()
}
fn default_format() -> String {
    "mp4".to_string()
}

impl Default for TypeBlock {
    fn default() -> Self {
        TypeBlock {
            enabled: true,
            pattern: "**/*".to_string(),
            exclude: None,
            can_skip: None,
            delete: None,
            drop_tags: None,
            mode: None,
            save: None,
            shasum: None,
            minimum: None,
            maximum: None,
            thumbnail: ThumbnailConfig::default(),
            templates: Templates::default(),
            compression: Compression::default(),
            summary_fallback: default_summary_fallback(),
            summarize: 0,
            check_sound: true,
            sound_threshold: default_sound_threshold(),
            thumbnail_time: default_thumbnail_time(),
            preview_duration: default_preview_duration(),
            subtitle_format: default_subtitle_format(),
            subtitles_to_description: false,
            subtitles_index: None,
            language: None,
            format: default_format(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    #[serde(default = "default_thumbnail_format")]
    pub format: String,
    #[serde(default)]
    pub geometry: Option<String>,
}

fn default_thumbnail_format() -> String {
    "jpg".to_string()
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        ThumbnailConfig {
            format: default_thumbnail_format(),
            geometry: None,
        }
    }
}

/// Command templates, `$name`-substituted (spec §4.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Templates {
    #[serde(default)]
    pub convert: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub preview: Option<String>,
    #[serde(default)]
    pub probe: Option<String>,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub subtitle_fallback: Option<String>,
    #[serde(default)]
    pub sound: Option<String>,
    #[serde(default)]
    pub identify: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Brotli,
    Gzip,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypesConfig {
    #[serde(default)]
    pub image: Option<TypeBlock>,
    #[serde(default)]
    pub text: Option<TypeBlock>,
    #[serde(default)]
    pub video: Option<TypeBlock>,
}

/// Fully resolved per-type configuration, computed once at startup by
/// cascading inheritable fields from the global block into each type.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub enabled: bool,
    pub pattern: String,
    pub exclude: Option<String>,
    pub can_skip: bool,
    pub delete: bool,
    pub drop_tags: bool,
    pub mode: u32,
    pub save: PathBuf,
    pub shasum: String,
    pub minimum: Option<Dimensions>,
    pub maximum: Option<Dimensions>,
    pub thumbnail: ThumbnailConfig,
    pub templates: Templates,
    pub compression: Compression,
    pub summary_fallback: usize,
    pub summarize: usize,
    pub check_sound: bool,
    pub sound_threshold: f64,
    pub thumbnail_time: f64,
    pub preview_duration: f64,
    pub subtitle_format: String,
    pub subtitles_to_description: bool,
    pub subtitles_index: Option<String>,
    pub language: Option<String>,
    pub format: String,
}

impl Config {
    pub fn load_from_file(path: &std::path::Path) -> anyhow::Result<Config> {
        let text = std::fs::read_to_string(path)?;
        let cfg: Config = toml::from_str(&text)?;
        Ok(cfg)
    }

    /// Resolve the effective config for a media kind, cascading global
    /// fields into the type block when the type block leaves them unset.
    pub fn effective(&self, block: &TypeBlock) -> EffectiveConfig {
        EffectiveConfig {
            enabled: block.enabled,
            pattern: block.pattern.clone(),
            exclude: block.exclude.clone(),
            can_skip: block.can_skip.unwrap_or(self.can_skip),
            delete: block.delete.unwrap_or(self.delete),
            drop_tags: block.drop_tags.unwrap_or(self.drop_tags),
            mode: block.mode.unwrap_or(self.mode),
            save: block.save.clone().unwrap_or_else(|| self.save.clone()),
            shasum: block.shasum.clone().unwrap_or_else(|| self.shasum.clone()),
            minimum: block.minimum,
            maximum: block.maximum,
            thumbnail: block.thumbnail.clone(),
            templates: block.templates.clone(),
            compression: block.compression,
            summary_fallback: block.summary_fallback,
            summarize: block.summarize,
            check_sound: block.check_sound,
            sound_threshold: block.sound_threshold,
            thumbnail_time: block.thumbnail_time,
            preview_duration: block.preview_duration,
            subtitle_format: block.subtitle_format.clone(),
            subtitles_to_description: block.subtitles_to_description,
            subtitles_index: block.subtitles_index.clone(),
            language: block.language.clone(),
            format: block.format.clone(),
        }
    }

    pub fn image_block(&self) -> TypeBlock {
        self.types.image.clone().unwrap_or_else(|| TypeBlock {
            pattern: "**/*.{jpg,jpeg,png,gif,webp,bmp}".to_string(),
            format: default_format(),
            ..TypeBlock::default()
        })
    }

    pub fn text_block(&self) -> TypeBlock {
        self.types.text.clone().unwrap_or_else(|| TypeBlock {
            pattern: "**/*.{txt,md}".to_string(),
            ..TypeBlock::default()
        })
    }

    pub fn video_block(&self) -> TypeBlock {
        self.types.video.clone().unwrap_or_else(|| TypeBlock {
            pattern: "**/*.{mp4,mkv,mov,avi,webm}".to_string(),
            ..TypeBlock::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_defaults_cascade_into_type_block() {
        let mut cfg = Config::default();
        cfg.delete = true;
        cfg.mode = 0o600;
        let block = TypeBlock {
            delete: None,
            mode: Some(0o640),
            ..cfg.image_block()
        };
        let eff = cfg.effective(&block);
        assert!(eff.delete, "delete should cascade from global");
        assert_eq!(eff.mode, 0o640, "explicit type mode should win");
    }

    #[test]
    fn toml_roundtrip_parses_minimal_config() {
        let text = r#"
            concurrency = 4
            save = "out"

            [types.image]
            pattern = "**/*.png"
            minimum = { width = 128, height = 128 }
        "#;
        let cfg: Config = toml::from_str(text).unwrap();
        assert_eq!(cfg.concurrency, 4);
        let img = cfg.types.image.unwrap();
        assert_eq!(img.pattern, "**/*.png");
        assert_eq!(img.minimum.unwrap().width, 128);
    }
}
