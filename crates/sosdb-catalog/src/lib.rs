//! sosdb-catalog - Catalog API over the storage facade
//!
//! Turns "nothing found" into [`CatalogError::InvalidId`] and strips the
//! backend identity from returned documents. Uploads are a single atomic
//! insert-or-merge.

pub mod error;
pub mod export;

pub use error::{CatalogError, Result};
pub use export::{CollectionStat, Export, Exporter, TimelineRow};

use sosdb_store::{
    BlobFetch, BlobSink, Connection, CountQuery, Counts, Document, Layout, Metadata, Oid, Store,
    StoredDocument, TagField, Upsert,
};

/// Catalog API for the science-of-science database.
#[derive(Debug, Clone)]
pub struct SosDb {
    store: Store,
}

impl SosDb {
    pub fn new(conn: &Connection, layout: Layout) -> Self {
        Self {
            store: Store::new(conn, layout),
        }
    }

    pub fn from_store(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Whether a document with this id exists in its collection.
    pub fn already_exists(&self, doc: &Document) -> Result<bool> {
        Ok(self.store.find_one(&doc.id, &doc.collection, None)?.is_some())
    }

    /// Add a document, or merge its metadata into the existing one.
    ///
    /// Returns the new internal id when inserted, `None` when merged.
    pub fn upload(&self, doc: &Document) -> Result<Option<Oid>> {
        match self.store.upsert(doc)? {
            Upsert::Inserted(oid) => {
                log::debug!("uploaded {}/{}", doc.collection, doc.id);
                Ok(Some(oid))
            }
            Upsert::Merged => {
                log::debug!("{}/{} exists, metadata merged", doc.collection, doc.id);
                Ok(None)
            }
        }
    }

    /// Merge `metadata` into an existing document.
    pub fn update(&self, id: &str, metadata: Metadata, collection: &str) -> Result<()> {
        let doc = Document::new(id, collection).with_metadata(metadata);
        if self.store.update(&doc)? {
            Ok(())
        } else {
            Err(CatalogError::InvalidId(id.to_string()))
        }
    }

    /// By primary id, or by `metadata.<tag> == id`.
    pub fn find_one(
        &self,
        id: &str,
        tag: Option<TagField>,
        collection: &str,
    ) -> Result<StoredDocument> {
        self.store
            .find_one(id, collection, tag)?
            .map(|r| r.into_document())
            .ok_or_else(|| CatalogError::InvalidId(id.to_string()))
    }

    /// Every document with `metadata.<tag> == value`; at least one.
    pub fn find(&self, value: &str, tag: TagField, collection: &str) -> Result<Vec<StoredDocument>> {
        let docs: Vec<_> = self
            .store
            .find(value, tag, collection)?
            .into_iter()
            .map(|r| r.into_document())
            .collect();
        if docs.is_empty() {
            return Err(CatalogError::InvalidId(value.to_string()));
        }
        Ok(docs)
    }

    /// Load a payload from a large-object collection.
    pub fn find_one_blob(&self, id: &str, collection: &str, sink: BlobSink<'_>) -> Result<BlobFetch> {
        self.store
            .find_one_blob(id, collection, sink)?
            .ok_or_else(|| CatalogError::InvalidId(id.to_string()))
    }

    /// Every payload tagged `<tag> == value`; at least one.
    pub fn find_blobs(
        &self,
        value: &str,
        tag: TagField,
        collection: &str,
    ) -> Result<Vec<(String, Vec<u8>)>> {
        let blobs = self.store.find_blobs(value, tag, collection)?;
        if blobs.is_empty() {
            return Err(CatalogError::InvalidId(value.to_string()));
        }
        Ok(blobs)
    }

    pub fn delete_one(&self, id: &str, collection: &str) -> Result<()> {
        if self.store.delete_one(id, collection)? {
            Ok(())
        } else {
            Err(CatalogError::InvalidId(id.to_string()))
        }
    }

    /// Remove every document tagged `<tag> == value`. Returns how many.
    pub fn delete_all(&self, value: &str, tag: TagField, collection: &str) -> Result<u64> {
        Ok(self.store.delete_all(value, tag, collection)?)
    }

    pub fn count(&self, query: &CountQuery) -> Result<Counts> {
        Ok(self.store.count(query)?)
    }
}
