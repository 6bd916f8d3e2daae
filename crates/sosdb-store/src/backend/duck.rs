//! DuckDB-backed persistent backend
//!
//! Two tables in a single database file:
//! ```text
//! documents(collection, id, oid, body)   -- body = StoredDocument JSON
//! blobs(collection, id, data)
//! ```

use std::path::{Path, PathBuf};

use duckdb::{Connection, OptionalExt, params};
use parking_lot::Mutex;

use serde_json::Value;

use super::{Backend, BlobWrite, Upsert, sql};
use crate::document::{Metadata, Oid, Record, StoredDocument};
use crate::error::{Result, StoreError};
use crate::query::{GroupRow, Output, Pipeline};

const SCHEMA: &str = "
CREATE SEQUENCE IF NOT EXISTS document_oid START 1;
CREATE TABLE IF NOT EXISTS documents (
    collection VARCHAR NOT NULL,
    id VARCHAR NOT NULL,
    oid BIGINT NOT NULL,
    body VARCHAR NOT NULL,
    PRIMARY KEY (collection, id)
);
CREATE TABLE IF NOT EXISTS blobs (
    collection VARCHAR NOT NULL,
    id VARCHAR NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (collection, id)
);
";

/// Backend persisting to a DuckDB database file.
pub struct DuckDbBackend {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl DuckDbBackend {
    /// Open (or create) the database file at `path`.
    ///
    /// Failure to open the file is reported as [`StoreError::Unavailable`].
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| StoreError::Unavailable {
            target: path.display().to_string(),
            reason: e.to_string(),
        })?;
        conn.execute_batch(SCHEMA)?;
        log::debug!("duckdb: opened {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn decode(collection: &str, oid: i64, body: &str) -> Result<Record> {
    let document: StoredDocument =
        serde_json::from_str(body).map_err(|e| StoreError::Corrupt {
            collection: collection.to_string(),
            id: format!("oid {oid}"),
            reason: e.to_string(),
        })?;
    Ok(Record {
        oid: Oid(oid as u64),
        document,
    })
}

fn fetch(conn: &Connection, collection: &str, id: &str) -> Result<Option<Record>> {
    let row = conn
        .query_row(
            "SELECT oid, body FROM documents WHERE collection = ? AND id = ?",
            params![collection, id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()?;
    row.map(|(oid, body)| decode(collection, oid, &body))
        .transpose()
}

fn query_records(conn: &Connection, sql: &str, collection: &str) -> Result<Vec<Record>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params![collection], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.iter()
        .map(|(oid, body)| decode(collection, *oid, body))
        .collect()
}

fn insert_row(
    conn: &Connection,
    collection: &str,
    doc: &StoredDocument,
    blob: Option<BlobWrite<'_>>,
) -> Result<Oid> {
    let oid: i64 = conn.query_row("SELECT nextval('document_oid')", [], |row| row.get(0))?;
    let body = serde_json::to_string(doc)?;
    conn.execute(
        "INSERT INTO documents (collection, id, oid, body) VALUES (?, ?, ?, ?)",
        params![collection, doc.id, oid, body],
    )?;
    if let Some(blob) = blob {
        conn.execute(
            "INSERT OR REPLACE INTO blobs (collection, id, data) VALUES (?, ?, ?)",
            params![blob.collection, doc.id, blob.data],
        )?;
    }
    Ok(Oid(oid as u64))
}

fn write_body(conn: &Connection, collection: &str, doc: &StoredDocument) -> Result<()> {
    let body = serde_json::to_string(doc)?;
    conn.execute(
        "UPDATE documents SET body = ? WHERE collection = ? AND id = ?",
        params![body, collection, doc.id],
    )?;
    Ok(())
}

impl Backend for DuckDbBackend {
    fn describe(&self) -> String {
        format!("duckdb://{}", self.path.display())
    }

    fn ping(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i32>(0))
            .map_err(|e| StoreError::Unavailable {
                target: self.describe(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    fn collections(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT DISTINCT collection FROM documents ORDER BY collection")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn get(&self, collection: &str, id: &str) -> Result<Option<Record>> {
        let conn = self.conn.lock();
        fetch(&conn, collection, id)
    }

    fn scan(&self, collection: &str) -> Result<Vec<Record>> {
        let conn = self.conn.lock();
        query_records(
            &conn,
            "SELECT oid, body FROM documents WHERE collection = ? ORDER BY oid",
            collection,
        )
    }

    fn count(&self, collection: &str) -> Result<u64> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT count(*) FROM documents WHERE collection = ?",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    fn aggregate(&self, collection: &str, pipeline: &Pipeline) -> Result<Output> {
        let Some(key) = pipeline.group_key() else {
            let sql = sql::select_records(pipeline);
            log::trace!("duckdb: {sql}");
            let conn = self.conn.lock();
            return Ok(Output::Records(query_records(&conn, &sql, collection)?));
        };

        let width = key.paths().len();
        let sql = sql::select_groups(pipeline, key);
        log::trace!("duckdb: {sql}");
        let raw = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![collection], |row| {
                    let mut key = Vec::with_capacity(width);
                    for i in 0..width {
                        key.push(row.get::<_, String>(i)?);
                    }
                    Ok((key, row.get::<_, i64>(width)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let rows = raw
            .into_iter()
            .map(|(key, count)| {
                let key = key
                    .iter()
                    .map(|text| serde_json::from_str::<Value>(text))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(GroupRow {
                    key,
                    count: count as u64,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(pipeline.collect_groups(rows))
    }

    fn sample(&self, collection: &str, n: usize, seed: u64) -> Result<Vec<Record>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        query_records(&conn, &sql::select_sample(n, seed), collection)
    }

    fn insert(
        &self,
        collection: &str,
        doc: StoredDocument,
        blob: Option<BlobWrite<'_>>,
    ) -> Result<Option<Oid>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        if fetch(&tx, collection, &doc.id)?.is_some() {
            return Ok(None);
        }
        let oid = insert_row(&tx, collection, &doc, blob)?;
        tx.commit()?;
        Ok(Some(oid))
    }

    fn upsert(
        &self,
        collection: &str,
        doc: StoredDocument,
        blob: Option<BlobWrite<'_>>,
    ) -> Result<Upsert> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let outcome = match fetch(&tx, collection, &doc.id)? {
            Some(mut existing) => {
                existing.document.merge_metadata(&doc.metadata);
                write_body(&tx, collection, &existing.document)?;
                Upsert::Merged
            }
            None => Upsert::Inserted(insert_row(&tx, collection, &doc, blob)?),
        };
        tx.commit()?;
        Ok(outcome)
    }

    fn merge_metadata(&self, collection: &str, id: &str, delta: &Metadata) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let Some(mut existing) = fetch(&tx, collection, id)? else {
            return Ok(false);
        };
        existing.document.merge_metadata(delta);
        write_body(&tx, collection, &existing.document)?;
        tx.commit()?;
        Ok(true)
    }

    fn delete(
        &self,
        collection: &str,
        ids: &[String],
        blob_collection: Option<&str>,
    ) -> Result<u64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut removed = 0u64;
        for id in ids {
            removed += tx.execute(
                "DELETE FROM documents WHERE collection = ? AND id = ?",
                params![collection, id],
            )? as u64;
            if let Some(blob_collection) = blob_collection {
                tx.execute(
                    "DELETE FROM blobs WHERE collection = ? AND id = ?",
                    params![blob_collection, id],
                )?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    fn get_blob(&self, collection: &str, id: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock();
        let data = conn
            .query_row(
                "SELECT data FROM blobs WHERE collection = ? AND id = ?",
                params![collection, id],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(data)
    }
}
