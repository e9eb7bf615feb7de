use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::IndexerError;
use crate::model::Record;

/// Abstract record store keyed by fingerprint and `sources` set. Spec §4.3.
pub trait Catalog: Send + Sync {
    fn lookup(&self, key: &str) -> Result<Option<Record>, IndexerError>;
    fn insert(&self, record: &Record) -> Result<(), IndexerError>;
    fn replace(&self, id: &str, record: &Record) -> Result<(), IndexerError>;
}

/// Concrete `rusqlite`-backed catalog. Generalizes the teacher's `db.rs`
/// (WAL pragmas, `prepare_cached` batched transactions) from a flat
/// `files` table into `records` + a `sources` join table, giving the
/// multi-key `id`/`hash`/`sources` lookup spec §4.3 requires.
pub struct SqliteCatalog {
    conn: std::sync::Mutex<Connection>,
}

impl SqliteCatalog {
    pub fn open(db_path: &Path) -> Result<Self, IndexerError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| IndexerError::IOFailure {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        let conn = Connection::open(db_path)
            .map_err(|e| IndexerError::CatalogError(format!("failed to open database: {e}")))?;
        Self::init_schema(&conn)?;

        Ok(SqliteCatalog {
            conn: std::sync::Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, IndexerError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| IndexerError::CatalogError(format!("failed to open database: {e}")))?;
        Self::init_schema(&conn)?;
        Ok(SqliteCatalog {
            conn: std::sync::Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), IndexerError> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;

             CREATE TABLE IF NOT EXISTS records (
                id          TEXT PRIMARY KEY,
                object      TEXT NOT NULL,
                deleted     INTEGER NOT NULL DEFAULT 0,
                body        TEXT NOT NULL,
                name        TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT ''
             );
             CREATE TABLE IF NOT EXISTS sources (
                source    TEXT NOT NULL,
                record_id TEXT NOT NULL REFERENCES records(id)
             );
             CREATE INDEX IF NOT EXISTS idx_sources_source ON sources(source);
             CREATE INDEX IF NOT EXISTS idx_records_deleted ON records(deleted);",
        )
        .map_err(|e| IndexerError::CatalogError(format!("failed to init schema: {e}")))?;
        Ok(())
    }

    fn row_to_record(body: String) -> Result<Record, IndexerError> {
        serde_json::from_str(&body)
            .map_err(|e| IndexerError::CatalogError(format!("failed to decode record: {e}")))
    }

    fn write_sources(conn: &Connection, record: &Record) -> Result<(), IndexerError> {
        conn.execute(
            "DELETE FROM sources WHERE record_id = ?1",
            params![record.id],
        )
        .map_err(|e| IndexerError::CatalogError(e.to_string()))?;
        let mut stmt = conn
            .prepare_cached("INSERT INTO sources (source, record_id) VALUES (?1, ?2)")
            .map_err(|e| IndexerError::CatalogError(e.to_string()))?;
        for source in &record.sources {
            stmt.execute(params![source, record.id])
                .map_err(|e| IndexerError::CatalogError(e.to_string()))?;
        }
        Ok(())
    }
}

impl Catalog for SqliteCatalog {
    fn lookup(&self, key: &str) -> Result<Option<Record>, IndexerError> {
        let conn = self.conn.lock().expect("catalog mutex poisoned");

        // id or hash direct hit
        let direct: Option<String> = conn
            .query_row(
                "SELECT body FROM records WHERE id = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| IndexerError::CatalogError(e.to_string()))?;
        if let Some(body) = direct {
            return Ok(Some(Self::row_to_record(body)?));
        }

        // live (non-deleted) sources match wins over tombstones
        let live: Option<String> = conn
            .query_row(
                "SELECT r.body FROM records r
                 JOIN sources s ON s.record_id = r.id
                 WHERE s.source = ?1 AND r.deleted = 0
                 LIMIT 1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| IndexerError::CatalogError(e.to_string()))?;
        if let Some(body) = live {
            return Ok(Some(Self::row_to_record(body)?));
        }

        let tombstoned: Option<String> = conn
            .query_row(
                "SELECT r.body FROM records r
                 JOIN sources s ON s.record_id = r.id
                 WHERE s.source = ?1
                 LIMIT 1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| IndexerError::CatalogError(e.to_string()))?;

        tombstoned.map(Self::row_to_record).transpose()
    }

    fn insert(&self, record: &Record) -> Result<(), IndexerError> {
        let mut conn = self.conn.lock().expect("catalog mutex poisoned");
        let tx = conn
            .transaction()
            .map_err(|e| IndexerError::CatalogError(e.to_string()))?;

        let body = serde_json::to_string(record)
            .map_err(|e| IndexerError::CatalogError(format!("failed to encode record: {e}")))?;
        tx.execute(
            "INSERT INTO records (id, object, deleted, body, name, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id,
                record.object.as_str(),
                record.deleted as i64,
                body,
                record.name,
                record.description,
            ],
        )
        .map_err(|e| IndexerError::CatalogError(e.to_string()))?;
        Self::write_sources(&tx, record)?;
        tx.commit()
            .map_err(|e| IndexerError::CatalogError(e.to_string()))?;
        Ok(())
    }

    fn replace(&self, id: &str, record: &Record) -> Result<(), IndexerError> {
        let mut conn = self.conn.lock().expect("catalog mutex poisoned");
        let tx = conn
            .transaction()
            .map_err(|e| IndexerError::CatalogError(e.to_string()))?;

        let body = serde_json::to_string(record)
            .map_err(|e| IndexerError::CatalogError(format!("failed to encode record: {e}")))?;
        tx.execute(
            "UPDATE records SET id = ?1, object = ?2, deleted = ?3, body = ?4,
                name = ?5, description = ?6
             WHERE id = ?7",
            params![
                record.id,
                record.object.as_str(),
                record.deleted as i64,
                body,
                record.name,
                record.description,
                id,
            ],
        )
        .map_err(|e| IndexerError::CatalogError(e.to_string()))?;
        Self::write_sources(&tx, record)?;
        tx.commit()
            .map_err(|e| IndexerError::CatalogError(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Metadata, ObjectKind};
    use std::collections::BTreeSet;

    fn record(id: &str, hash: &str) -> Record {
        Record {
            id: id.to_string(),
            object: ObjectKind::Video,
            version: "1".to_string(),
            name: "clip".to_string(),
            description: String::new(),
            hash: hash.to_string(),
            sources: BTreeSet::from([id.to_string(), hash.to_string()]),
            relative: format!("{}/{}.mp4", &id[0..2], &id[2..]),
            thumbnail: None,
            preview: None,
            subtitles: None,
            size: 100,
            duration: Some(10.0),
            aspect: Some(1.77),
            width: Some(1920),
            height: Some(1080),
            sound: None,
            compression: None,
            metadata: Metadata::default(),
            deleted: false,
        }
    }

    #[test]
    fn insert_then_lookup_by_id_and_hash() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        let r = record("aaaaaaaa", "bbbbbbbb");
        catalog.insert(&r).unwrap();

        let by_id = catalog.lookup("aaaaaaaa").unwrap().unwrap();
        assert_eq!(by_id.id, "aaaaaaaa");
        let by_hash = catalog.lookup("bbbbbbbb").unwrap().unwrap();
        assert_eq!(by_hash.id, "aaaaaaaa");
        assert!(catalog.lookup("cccccccc").unwrap().is_none());
    }

    #[test]
    fn lookup_by_occurrence_source_after_replace() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        let mut r = record("aaaaaaaa", "bbbbbbbb");
        catalog.insert(&r).unwrap();

        r.sources.insert("dddddddd".to_string());
        catalog.replace("aaaaaaaa", &r).unwrap();

        let found = catalog.lookup("dddddddd").unwrap().unwrap();
        assert_eq!(found.id, "aaaaaaaa");
    }

    #[test]
    fn live_sources_preferred_over_tombstoned() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        let mut dead = record("11111111", "22222222");
        dead.sources.insert("shared".to_string());
        dead.deleted = true;
        catalog.insert(&dead).unwrap();

        let mut alive = record("33333333", "44444444");
        alive.sources.insert("shared".to_string());
        catalog.insert(&alive).unwrap();

        let found = catalog.lookup("shared").unwrap().unwrap();
        assert_eq!(found.id, "33333333");
    }
}
