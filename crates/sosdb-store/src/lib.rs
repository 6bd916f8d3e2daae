//! sosdb-store - Storage facade for the science-of-science catalog
//!
//! Wraps a document store (in-process or DuckDB-backed) and exposes
//! create/update/find/delete/count per logical collection. Binary content
//! too large for a document lives in a separate large-object store keyed
//! by the same id as its metadata document.

pub mod backend;
pub mod connection;
pub mod document;
pub mod error;
pub mod hash;
pub mod query;
pub mod store;

pub use backend::{Backend, BlobWrite, Upsert};
pub use connection::{Connection, Target};
pub use document::{Body, Document, FileInfo, Metadata, Oid, Record, StoredDocument};
pub use error::{Result, StoreError};
pub use query::{
    CountPlan, CountQuery, Counts, Filter, GroupKey, GroupRow, Output, Pipeline, Stage, TagField,
};
pub use store::{BlobFetch, BlobSink, Layout, Store};
