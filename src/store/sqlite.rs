use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use super::{Metadata, SOURCE_KEY, ScoredRecord, VectorIndex, schema};
use crate::embed::{Embedder, Embedding, relevance};
use crate::error::IndexError;

const DB_FILE: &str = "index.db";

/// SQLite-backed collection. Records are embedded on insert, staged in
/// memory, and written in a single transaction by `persist`.
pub struct SqliteIndex {
    conn: Mutex<Connection>,
    pending: Mutex<Vec<StagedRecord>>,
    embedder: Arc<dyn Embedder>,
    collection: String,
    dimensions: usize,
    db_path: PathBuf,
}

struct StagedRecord {
    source: String,
    metadata: String,
    text: String,
    embedding: Embedding,
}

#[derive(Debug, Serialize)]
pub struct IndexStats {
    pub collection: String,
    pub model: Option<String>,
    pub dimensions: Option<usize>,
    pub record_count: u64,
    pub source_count: u64,
    /// Records per source, most first
    pub sources: Vec<(String, u64)>,
    pub db_size_bytes: u64,
}

impl IndexStats {
    pub fn empty(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            model: None,
            dimensions: None,
            record_count: 0,
            source_count: 0,
            sources: Vec::new(),
            db_size_bytes: 0,
        }
    }
}

impl SqliteIndex {
    /// Open (creating if needed) the collection under `storage_dir`.
    ///
    /// A collection is bound to the model that first wrote to it; opening it
    /// with a different model fails with `ModelMismatch`.
    pub fn open(
        storage_dir: &Path,
        collection: &str,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, IndexError> {
        std::fs::create_dir_all(storage_dir).map_err(|source| IndexError::Open {
            path: storage_dir.display().to_string(),
            source,
        })?;
        let db_path = storage_dir.join(DB_FILE);
        let conn = Connection::open(&db_path)?;
        schema::run_migrations(&conn)?;

        let existing: Option<(String, i64)> = conn
            .query_row(
                "SELECT model, dimensions FROM collections WHERE name = ?1",
                params![collection],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let dimensions = match existing {
            Some((model, _)) if model != embedder.model_name() => {
                return Err(IndexError::ModelMismatch {
                    collection: collection.to_string(),
                    stored: model,
                    requested: embedder.model_name().to_string(),
                });
            }
            Some((_, dims)) => dims as usize,
            None => {
                let now = chrono::Utc::now().to_rfc3339();
                conn.execute(
                    "INSERT INTO collections (name, model, dimensions, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![
                        collection,
                        embedder.model_name(),
                        embedder.dimensions() as i64,
                        now
                    ],
                )?;
                embedder.dimensions()
            }
        };

        debug!(collection, path = %db_path.display(), dimensions, "opened index");

        Ok(Self {
            conn: Mutex::new(conn),
            pending: Mutex::new(Vec::new()),
            embedder,
            collection: collection.to_string(),
            dimensions,
            db_path,
        })
    }

    /// Statistics for `collection` without creating, migrating, or
    /// registering anything. A missing database or collection reads as empty.
    pub fn read_stats(storage_dir: &Path, collection: &str) -> Result<IndexStats, IndexError> {
        let db_path = storage_dir.join(DB_FILE);
        if !db_path.exists() {
            return Ok(IndexStats::empty(collection));
        }
        let conn = Connection::open_with_flags(
            &db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        collect_stats(&conn, collection, &db_path)
    }

    /// Persist anything staged and release the connection.
    pub fn close(self) -> Result<(), IndexError> {
        self.persist()
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Collect statistics for this collection.
    pub fn stats(&self) -> Result<IndexStats, IndexError> {
        let conn = self.lock_conn()?;
        collect_stats(&conn, &self.collection, &self.db_path)
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, IndexError> {
        self.conn.lock().map_err(|_| IndexError::Poisoned)
    }

    fn lock_pending(&self) -> Result<MutexGuard<'_, Vec<StagedRecord>>, IndexError> {
        self.pending.lock().map_err(|_| IndexError::Poisoned)
    }

    fn check_dimensions(&self, len: usize) -> Result<(), IndexError> {
        if len != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                collection: self.collection.clone(),
                expected: self.dimensions,
                actual: len,
            });
        }
        Ok(())
    }
}

impl VectorIndex for SqliteIndex {
    fn insert(&self, text: &str, metadata: Metadata) -> Result<(), IndexError> {
        let embedding = self.embedder.embed(text)?;
        self.check_dimensions(embedding.len())?;

        let source = metadata.get(SOURCE_KEY).cloned().unwrap_or_default();
        let record = StagedRecord {
            source,
            metadata: serde_json::to_string(&metadata)?,
            text: text.to_string(),
            embedding,
        };
        self.lock_pending()?.push(record);
        Ok(())
    }

    fn persist(&self) -> Result<(), IndexError> {
        let mut conn = self.lock_conn()?;
        let mut pending = self.lock_pending()?;
        if pending.is_empty() {
            return Ok(());
        }

        let now = chrono::Utc::now().to_rfc3339();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO records (collection, source, metadata, text, embedding, indexed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for record in pending.iter() {
                stmt.execute(params![
                    self.collection,
                    record.source,
                    record.metadata,
                    record.text,
                    encode_embedding(&record.embedding),
                    now,
                ])?;
            }
        }
        tx.commit()?;

        debug!(collection = %self.collection, records = pending.len(), "persisted");
        pending.clear();
        Ok(())
    }

    fn rollback(&self) -> Result<usize, IndexError> {
        let mut pending = self.lock_pending()?;
        let dropped = pending.len();
        pending.clear();
        Ok(dropped)
    }

    fn query_similar(&self, text: &str, k: usize) -> Result<Vec<ScoredRecord>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        // Embed before taking the lock so concurrent queries overlap on the slow part
        let query = self.embedder.embed(text)?;
        self.check_dimensions(query.len())?;

        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, text, metadata, embedding FROM records WHERE collection = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![self.collection], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Vec<u8>>(3)?,
            ))
        })?;

        let mut scored = Vec::new();
        for row in rows {
            let (id, text, metadata, blob) = row?;
            let embedding = decode_embedding(id, &blob)?;
            if embedding.len() != query.len() {
                return Err(IndexError::Corrupt {
                    id,
                    details: format!("{} dimensions, expected {}", embedding.len(), query.len()),
                });
            }
            let metadata: Metadata =
                serde_json::from_str(&metadata).map_err(|e| IndexError::Corrupt {
                    id,
                    details: e.to_string(),
                })?;
            scored.push(ScoredRecord {
                text,
                metadata,
                score: relevance(&query, &embedding),
            });
        }

        // Stable: equal scores keep insertion order
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    fn count(&self) -> Result<u64, IndexError> {
        let conn = self.lock_conn()?;
        let stored: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE collection = ?1",
            params![self.collection],
            |r| r.get(0),
        )?;
        let staged = self.lock_pending()?.len();
        Ok(stored as u64 + staged as u64)
    }
}

impl Drop for SqliteIndex {
    fn drop(&mut self) {
        let staged = self.pending.get_mut().map(|p| p.len()).unwrap_or(0);
        if staged > 0 {
            warn!(
                collection = %self.collection,
                records = staged,
                "discarding records that were never persisted"
            );
        }
    }
}

fn collect_stats(conn: &Connection, collection: &str, db_path: &Path) -> Result<IndexStats, IndexError> {
    let registered: Option<(String, i64)> = conn
        .query_row(
            "SELECT model, dimensions FROM collections WHERE name = ?1",
            params![collection],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((model, dimensions)) = registered else {
        return Ok(IndexStats::empty(collection));
    };

    let mut stmt = conn.prepare(
        "SELECT source, COUNT(*) FROM records WHERE collection = ?1
         GROUP BY source ORDER BY COUNT(*) DESC, source",
    )?;
    let sources: Vec<(String, u64)> = stmt
        .query_map(params![collection], |row| {
            Ok((row.get(0)?, row.get::<_, i64>(1)? as u64))
        })?
        .collect::<Result<_, _>>()?;

    let db_size_bytes = std::fs::metadata(db_path).map(|m| m.len()).unwrap_or(0);

    Ok(IndexStats {
        collection: collection.to_string(),
        model: Some(model),
        dimensions: Some(dimensions as usize),
        record_count: sources.iter().map(|(_, n)| n).sum(),
        source_count: sources.len() as u64,
        sources,
        db_size_bytes,
    })
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(id: i64, blob: &[u8]) -> Result<Embedding, IndexError> {
    if blob.len() % 4 != 0 {
        return Err(IndexError::Corrupt {
            id,
            details: format!("embedding blob of {} bytes", blob.len()),
        });
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
