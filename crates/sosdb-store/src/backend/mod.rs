//! Storage backends
//!
//! A backend stores [`StoredDocument`]s per named collection plus raw blobs
//! keyed by `(collection, id)` and evaluates [`Pipeline`]s against one
//! collection. It knows nothing about large-object collection naming; the
//! [`crate::Store`] facade layers that on top.

mod duck;
mod memory;
mod sql;

pub use duck::DuckDbBackend;
pub use memory::MemoryBackend;

use crate::document::{Metadata, Oid, Record, StoredDocument};
use crate::error::Result;
use crate::query::{Output, Pipeline};

/// Blob written alongside a document in the same operation.
#[derive(Debug, Clone, Copy)]
pub struct BlobWrite<'a> {
    pub collection: &'a str,
    pub data: &'a [u8],
}

/// Outcome of an insert-or-merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted(Oid),
    /// Document existed; its metadata was merged.
    Merged,
}

/// Document and blob storage.
///
/// Every call is a single blocking round trip. `insert`, `upsert`,
/// `merge_metadata` and `delete` are atomic per call.
pub trait Backend: Send + Sync {
    /// Short description for logs (`memory`, a file path, ...).
    fn describe(&self) -> String;

    /// Cheap liveness check.
    fn ping(&self) -> Result<()>;

    /// Names of collections holding at least one document.
    fn collections(&self) -> Result<Vec<String>>;

    fn get(&self, collection: &str, id: &str) -> Result<Option<Record>>;

    /// All documents of a collection in insertion order.
    fn scan(&self, collection: &str) -> Result<Vec<Record>>;

    fn count(&self, collection: &str) -> Result<u64>;

    /// Run `pipeline` against one collection. Records come back in
    /// insertion order; groups as produced by [`Pipeline::collect_groups`].
    fn aggregate(&self, collection: &str, pipeline: &Pipeline) -> Result<Output>;

    /// Up to `n` documents drawn at random, reproducible for a given
    /// `seed`, in insertion order.
    fn sample(&self, collection: &str, n: usize, seed: u64) -> Result<Vec<Record>>;

    /// Insert unless the id already exists. Returns `None` and writes
    /// nothing when it does.
    fn insert(
        &self,
        collection: &str,
        doc: StoredDocument,
        blob: Option<BlobWrite<'_>>,
    ) -> Result<Option<Oid>>;

    /// Insert `doc` (and `blob`) if absent, otherwise merge `doc.metadata`
    /// into the stored document and leave its blob untouched.
    fn upsert(
        &self,
        collection: &str,
        doc: StoredDocument,
        blob: Option<BlobWrite<'_>>,
    ) -> Result<Upsert>;

    /// Shallow-merge `delta` into the stored metadata. `false` if the id is
    /// unknown.
    fn merge_metadata(&self, collection: &str, id: &str, delta: &Metadata) -> Result<bool>;

    /// Delete documents by id, and blobs with the same ids from
    /// `blob_collection` when given. Returns the number of documents removed.
    fn delete(&self, collection: &str, ids: &[String], blob_collection: Option<&str>)
        -> Result<u64>;

    fn get_blob(&self, collection: &str, id: &str) -> Result<Option<Vec<u8>>>;
}
