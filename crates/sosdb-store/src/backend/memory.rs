//! In-process backend

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use rand::{SeedableRng, rngs::StdRng};

use super::{Backend, BlobWrite, Upsert};
use crate::document::{Metadata, Oid, Record, StoredDocument};
use crate::error::Result;
use crate::query::{Output, Pipeline};

#[derive(Default)]
struct State {
    collections: BTreeMap<String, HashMap<String, Record>>,
    blobs: HashMap<(String, String), Vec<u8>>,
    next_oid: u64,
}

impl State {
    fn insert_new(
        &mut self,
        collection: &str,
        doc: StoredDocument,
        blob: Option<BlobWrite<'_>>,
    ) -> Oid {
        self.next_oid += 1;
        let oid = Oid(self.next_oid);
        if let Some(blob) = blob {
            self.blobs.insert(
                (blob.collection.to_string(), doc.id.clone()),
                blob.data.to_vec(),
            );
        }
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(doc.id.clone(), Record { oid, document: doc });
        oid
    }

    fn lookup_mut(&mut self, collection: &str, id: &str) -> Option<&mut Record> {
        self.collections.get_mut(collection)?.get_mut(id)
    }
}

/// Backend holding everything in memory. Contents are lost on drop.
#[derive(Default)]
pub struct MemoryBackend {
    state: RwLock<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for MemoryBackend {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn collections(&self) -> Result<Vec<String>> {
        let state = self.state.read();
        Ok(state
            .collections
            .iter()
            .filter(|(_, docs)| !docs.is_empty())
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn get(&self, collection: &str, id: &str) -> Result<Option<Record>> {
        let state = self.state.read();
        Ok(state
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    fn scan(&self, collection: &str) -> Result<Vec<Record>> {
        let state = self.state.read();
        let mut records: Vec<Record> = state
            .collections
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by_key(|r| r.oid);
        Ok(records)
    }

    fn count(&self, collection: &str) -> Result<u64> {
        let state = self.state.read();
        Ok(state
            .collections
            .get(collection)
            .map_or(0, |docs| docs.len() as u64))
    }

    fn aggregate(&self, collection: &str, pipeline: &Pipeline) -> Result<Output> {
        let state = self.state.read();
        let filter = pipeline.match_filter();
        let mut matched: Vec<Record> = state
            .collections
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|r| filter.matches(&r.document))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        drop(state);
        matched.sort_by_key(|r| r.oid);
        Ok(pipeline.run(matched))
    }

    fn sample(&self, collection: &str, n: usize, seed: u64) -> Result<Vec<Record>> {
        let records = self.scan(collection)?;
        let mut rng = StdRng::seed_from_u64(seed);
        let mut picked =
            rand::seq::index::sample(&mut rng, records.len(), n.min(records.len())).into_vec();
        picked.sort_unstable();
        Ok(records
            .into_iter()
            .enumerate()
            .filter(|(i, _)| picked.binary_search(i).is_ok())
            .map(|(_, r)| r)
            .collect())
    }

    fn insert(
        &self,
        collection: &str,
        doc: StoredDocument,
        blob: Option<BlobWrite<'_>>,
    ) -> Result<Option<Oid>> {
        let mut state = self.state.write();
        if state.lookup_mut(collection, &doc.id).is_some() {
            return Ok(None);
        }
        Ok(Some(state.insert_new(collection, doc, blob)))
    }

    fn upsert(
        &self,
        collection: &str,
        doc: StoredDocument,
        blob: Option<BlobWrite<'_>>,
    ) -> Result<Upsert> {
        let mut state = self.state.write();
        if let Some(existing) = state.lookup_mut(collection, &doc.id) {
            existing.document.merge_metadata(&doc.metadata);
            return Ok(Upsert::Merged);
        }
        Ok(Upsert::Inserted(state.insert_new(collection, doc, blob)))
    }

    fn merge_metadata(&self, collection: &str, id: &str, delta: &Metadata) -> Result<bool> {
        let mut state = self.state.write();
        match state.lookup_mut(collection, id) {
            Some(record) => {
                record.document.merge_metadata(delta);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(
        &self,
        collection: &str,
        ids: &[String],
        blob_collection: Option<&str>,
    ) -> Result<u64> {
        let mut state = self.state.write();
        let mut removed = 0;
        if let Some(docs) = state.collections.get_mut(collection) {
            for id in ids {
                if docs.remove(id).is_some() {
                    removed += 1;
                }
            }
        }
        if let Some(blob_collection) = blob_collection {
            for id in ids {
                state
                    .blobs
                    .remove(&(blob_collection.to_string(), id.clone()));
            }
        }
        Ok(removed)
    }

    fn get_blob(&self, collection: &str, id: &str) -> Result<Option<Vec<u8>>> {
        let state = self.state.read();
        Ok(state
            .blobs
            .get(&(collection.to_string(), id.to_string()))
            .cloned())
    }
}
