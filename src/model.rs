use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Fingerprint = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Image,
    Text,
    Video,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Image => "image",
            ObjectKind::Text => "text",
            ObjectKind::Video => "video",
        }
    }
}

/// One filesystem observation of a given work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    pub id: Fingerprint,
    pub file: String,
    pub path: String,
    pub name: String,
    pub extension: String,
    pub size: u64,
    /// source mtime, milliseconds since epoch
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SoundInfo {
    pub silent: bool,
    pub mean: f64,
    pub max: f64,
}

impl SoundInfo {
    /// Sentinel used when sound detection is disabled or unparsable.
    pub fn silent_default() -> Self {
        SoundInfo {
            silent: true,
            mean: -91.0,
            max: -91.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// source mtime, milliseconds since epoch
    pub created: i64,
    pub added: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub occurrences: Vec<Occurrence>,
    #[serde(default)]
    pub series: Option<String>,
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub stars: u32,
    #[serde(default)]
    pub favorited: bool,
    #[serde(default)]
    pub reviewed: bool,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Default for Metadata {
    /// `chrono::DateTime<Utc>` has no `Default` impl, so `added`/`updated`
    /// are seeded at the Unix epoch rather than derived.
    fn default() -> Self {
        let epoch = DateTime::<Utc>::from_timestamp(0, 0).expect("unix epoch is a valid timestamp");
        Metadata {
            created: 0,
            added: epoch,
            updated: epoch,
            occurrences: Vec::new(),
            series: None,
            views: 0,
            stars: 0,
            favorited: false,
            reviewed: false,
            private: false,
            tags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: Fingerprint,
    pub object: ObjectKind,
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub hash: Fingerprint,
    pub sources: BTreeSet<Fingerprint>,
    pub relative: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub preview: Option<String>,
    #[serde(default)]
    pub subtitles: Option<String>,
    pub size: u64,

    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub aspect: Option<f64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub sound: Option<SoundInfo>,
    #[serde(default)]
    pub compression: Option<String>,

    pub metadata: Metadata,

    #[serde(default)]
    pub deleted: bool,
}

impl Record {
    /// `id ∈ sources ∧ hash ∈ sources ∧ ∀o ∈ occurrences. o.id ∈ sources`.
    pub fn sources_invariant_holds(&self) -> bool {
        if !self.sources.contains(&self.id) || !self.sources.contains(&self.hash) {
            return false;
        }
        self.metadata
            .occurrences
            .iter()
            .all(|o| self.sources.contains(&o.id))
    }

    /// No two occurrences share the same `file`.
    pub fn occurrences_unique_by_file(&self) -> bool {
        let mut seen = std::collections::HashSet::new();
        self.metadata.occurrences.iter().all(|o| seen.insert(&o.file))
    }

    pub fn rebuild_sources(&mut self) {
        let mut sources: BTreeSet<Fingerprint> = BTreeSet::new();
        sources.insert(self.id.clone());
        sources.insert(self.hash.clone());
        for o in &self.metadata.occurrences {
            sources.insert(o.id.clone());
        }
        self.sources = sources;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occ(id: &str, file: &str) -> Occurrence {
        Occurrence {
            id: id.to_string(),
            file: file.to_string(),
            path: "/".to_string(),
            name: file.to_string(),
            extension: "mp4".to_string(),
            size: 10,
            timestamp: 0,
        }
    }

    fn base_record() -> Record {
        Record {
            id: "aaaa".to_string(),
            object: ObjectKind::Video,
            version: "1".to_string(),
            name: "a".to_string(),
            description: String::new(),
            hash: "bbbb".to_string(),
            sources: BTreeSet::from(["aaaa".to_string(), "bbbb".to_string()]),
            relative: "aa/aa.mp4".to_string(),
            thumbnail: None,
            preview: None,
            subtitles: None,
            size: 10,
            duration: None,
            aspect: None,
            width: None,
            height: None,
            sound: None,
            compression: None,
            metadata: Metadata::default(),
            deleted: false,
        }
    }

    #[test]
    fn invariant_holds_for_fresh_record() {
        let r = base_record();
        assert!(r.sources_invariant_holds());
        assert!(r.occurrences_unique_by_file());
    }

    #[test]
    fn invariant_fails_when_occurrence_id_missing_from_sources() {
        let mut r = base_record();
        r.metadata.occurrences.push(occ("cccc", "/f1"));
        assert!(!r.sources_invariant_holds());
    }

    #[test]
    fn rebuild_sources_adds_occurrence_ids() {
        let mut r = base_record();
        r.metadata.occurrences.push(occ("cccc", "/f1"));
        r.rebuild_sources();
        assert!(r.sources_invariant_holds());
        assert!(r.sources.contains("cccc"));
    }

    #[test]
    fn occurrence_uniqueness_detects_duplicate_file() {
        let mut r = base_record();
        r.metadata.occurrences.push(occ("cccc", "/f1"));
        r.metadata.occurrences.push(occ("dddd", "/f1"));
        assert!(!r.occurrences_unique_by_file());
    }

    #[test]
    fn object_kind_serializes_lowercase() {
        let s = serde_json::to_string(&ObjectKind::Video).unwrap();
        assert_eq!(s, "\"video\"");
    }
}
