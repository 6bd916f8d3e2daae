//! Static JSON exports for the frontend
//!
//! Each export is written as `<dir>/<name>.json` with a common envelope:
//! `data`, `count`, `exported_at`, `description`, `source`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use sosdb_store::{Filter, GroupKey, Output, Pipeline, StoredDocument};

use crate::SosDb;
use crate::error::{CatalogError, Result};

/// Envelope shared by all exported files.
#[derive(Debug, Clone, Serialize)]
pub struct Export<T> {
    pub data: T,
    pub count: usize,
    pub exported_at: DateTime<Utc>,
    pub description: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionStat {
    pub collection: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineRow {
    pub venue: Value,
    pub year: Value,
    pub count: u64,
}

/// Builds exports from a catalog and writes them under `dir`.
pub struct Exporter<'a> {
    db: &'a SosDb,
    dir: PathBuf,
}

impl<'a> Exporter<'a> {
    pub fn new(db: &'a SosDb, dir: &Path) -> Self {
        Self {
            db,
            dir: dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Document count of every collection.
    pub fn collection_stats(&self) -> Result<Export<Vec<CollectionStat>>> {
        let store = self.db.store();
        let mut stats = Vec::new();
        for collection in store.collections()? {
            let count = store.estimated_count(&collection)?;
            stats.push(CollectionStat { collection, count });
        }
        Ok(Export {
            count: stats.len(),
            data: stats,
            exported_at: Utc::now(),
            description: "Document counts per collection".into(),
            source: "all collections".into(),
        })
    }

    /// Random sample of up to `limit` documents of `collection`,
    /// reproducible for a given `seed`.
    pub fn sample(
        &self,
        collection: &str,
        limit: usize,
        seed: u64,
    ) -> Result<Export<Vec<StoredDocument>>> {
        let docs: Vec<_> = self
            .db
            .store()
            .sample(collection, limit, seed)?
            .into_iter()
            .map(|r| r.into_document())
            .collect();
        Ok(Export {
            count: docs.len(),
            description: format!("Random sample of {} documents (seed {seed})", docs.len()),
            data: docs,
            exported_at: Utc::now(),
            source: format!("{collection} collection"),
        })
    }

    /// Document counts per (venue, year), ordered by year then venue.
    ///
    /// Documents missing either path are skipped.
    pub fn venue_timeline(
        &self,
        collection: &str,
        venue_path: &str,
        year_path: &str,
    ) -> Result<Export<Vec<TimelineRow>>> {
        let store = self.db.store();
        if store.estimated_count(collection)? == 0 {
            return Err(CatalogError::Export(format!(
                "no documents found in {collection}"
            )));
        }

        let pipeline = Pipeline::new()
            .filter(Filter::exists(venue_path).and(Filter::exists(year_path)))
            .group_by(GroupKey::Paths(vec![
                venue_path.to_string(),
                year_path.to_string(),
            ]));

        let Output::Groups(groups) = store.aggregate(collection, &pipeline)? else {
            return Err(CatalogError::Export("timeline pipeline did not group".into()));
        };

        let mut rows: Vec<TimelineRow> = groups
            .into_iter()
            .map(|g| {
                let mut key = g.key.into_iter();
                TimelineRow {
                    venue: key.next().unwrap_or(Value::Null),
                    year: key.next().unwrap_or(Value::Null),
                    count: g.count,
                }
            })
            .collect();
        rows.sort_by(|a, b| {
            year_key(&a.year)
                .cmp(&year_key(&b.year))
                .then_with(|| a.venue.to_string().cmp(&b.venue.to_string()))
        });

        Ok(Export {
            count: rows.len(),
            data: rows,
            exported_at: Utc::now(),
            description: "Document counts by venue and year".into(),
            source: format!("{collection} collection ({venue_path}, {year_path})"),
        })
    }

    /// Write an export as pretty JSON to `<dir>/<name>.json`.
    pub fn write<T: Serialize>(&self, name: &str, export: &Export<T>) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            CatalogError::Export(format!("failed to create {}: {e}", self.dir.display()))
        })?;
        let path = self.dir.join(format!("{name}.json"));
        let json = serde_json::to_string_pretty(export)
            .map_err(|e| CatalogError::Export(format!("failed to serialize {name}: {e}")))?;
        std::fs::write(&path, json)
            .map_err(|e| CatalogError::Export(format!("failed to write {}: {e}", path.display())))?;
        log::info!("exported {} records to {}", export.count, path.display());
        Ok(path)
    }
}

/// Years may be stored as numbers or strings.
fn year_key(year: &Value) -> i64 {
    match year {
        Value::Number(n) => n.as_i64().unwrap_or(i64::MAX),
        Value::String(s) => s.parse().unwrap_or(i64::MAX),
        _ => i64::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sosdb_store::{Connection, Document, Layout};

    fn db_with_papers() -> SosDb {
        let db = SosDb::new(&Connection::in_memory(), Layout::default());
        let papers = [
            ("1", "Nature", 2021),
            ("2", "Nature", 2020),
            ("3", "Science", 2020),
            ("4", "Nature", 2020),
        ];
        for (id, venue, year) in papers {
            db.upload(
                &Document::new(id, "papers")
                    .with("venue", venue)
                    .with("year", year),
            )
            .unwrap();
        }
        db.upload(&Document::new("5", "papers").with("venue", "Cell"))
            .unwrap();
        db
    }

    #[test]
    fn collection_stats_counts() {
        let db = db_with_papers();
        db.upload(&Document::new("a", "authors")).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let export = Exporter::new(&db, dir.path()).collection_stats().unwrap();
        assert_eq!(
            export.data,
            vec![
                CollectionStat {
                    collection: "authors".into(),
                    count: 1
                },
                CollectionStat {
                    collection: "papers".into(),
                    count: 5
                },
            ]
        );
    }

    #[test]
    fn timeline_sorted_by_year_then_venue() {
        let db = db_with_papers();
        let dir = tempfile::tempdir().unwrap();
        let export = Exporter::new(&db, dir.path())
            .venue_timeline("papers", "metadata.venue", "metadata.year")
            .unwrap();
        let rows: Vec<_> = export
            .data
            .iter()
            .map(|r| (r.venue.as_str().unwrap(), r.year.as_i64().unwrap(), r.count))
            .collect();
        assert_eq!(
            rows,
            vec![("Nature", 2020, 2), ("Science", 2020, 1), ("Nature", 2021, 1)]
        );
    }

    #[test]
    fn sample_is_reproducible() {
        let db = db_with_papers();
        let dir = tempfile::tempdir().unwrap();
        let exporter = Exporter::new(&db, dir.path());
        let ids = |seed| -> Vec<String> {
            exporter
                .sample("papers", 3, seed)
                .unwrap()
                .data
                .into_iter()
                .map(|d| d.id)
                .collect()
        };
        assert_eq!(ids(7), ids(7));
        assert_eq!(ids(7).len(), 3);
        assert_eq!(exporter.sample("papers", 100, 7).unwrap().count, 5);
    }

    #[test]
    fn timeline_on_empty_collection_fails() {
        let db = SosDb::new(&Connection::in_memory(), Layout::default());
        let dir = tempfile::tempdir().unwrap();
        let err = Exporter::new(&db, dir.path())
            .venue_timeline("papers", "metadata.venue", "metadata.year")
            .unwrap_err();
        assert!(matches!(err, CatalogError::Export(_)));
    }

    #[test]
    fn write_pretty_json_envelope() {
        let db = db_with_papers();
        let dir = tempfile::tempdir().unwrap();
        let exporter = Exporter::new(&db, &dir.path().join("exports"));
        let export = exporter.sample("papers", 2, 42).unwrap();
        let path = exporter.write("papers_sample", &export).unwrap();

        let written: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written["count"], 2);
        assert!(written["data"][0]["id"].is_string());
        assert_eq!(written["source"], "papers collection");
        assert_eq!(written["description"], "Random sample of 2 documents (seed 42)");
        assert!(written["exported_at"].is_string());
    }
}
