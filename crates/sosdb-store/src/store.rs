//! Storage facade over a [`Connection`]
//!
//! Collections listed in the [`Layout`] as large-object collections keep
//! their payloads in the blob store and their metadata documents in
//! `<collection>.files`, both addressed by the document id:
//! ```text
//! cc_pdf        -> blobs(cc_pdf, id)
//! cc_pdf.files  -> documents(cc_pdf.files, id)   { id, file, metadata }
//! cc_catalog    -> documents(cc_catalog, id)     { id, text?, metadata }
//! ```

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

use crate::backend::{Backend, BlobWrite, Upsert};
use crate::connection::Connection;
use crate::document::{Body, Document, FileInfo, Oid, Record, StoredDocument};
use crate::error::{Result, StoreError};
use crate::hash;
use crate::query::{CountQuery, Counts, Filter, Output, Pipeline, TagField};

const FILES_SUFFIX: &str = ".files";

/// Which collections hold binary payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    large_objects: Vec<String>,
}

impl Default for Layout {
    fn default() -> Self {
        Self::new(["cc_pdf", "cc_png"])
    }
}

impl Layout {
    pub fn new<I, S>(large_objects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            large_objects: large_objects.into_iter().map(Into::into).collect(),
        }
    }

    pub fn large_object_collections(&self) -> &[String] {
        &self.large_objects
    }

    pub fn is_large_object(&self, collection: &str) -> bool {
        self.large_objects.iter().any(|c| c == collection)
    }

    /// Physical collection holding the documents of `collection`.
    pub fn document_collection<'a>(&self, collection: &'a str) -> Cow<'a, str> {
        if self.is_large_object(collection) {
            Cow::Owned(format!("{collection}{FILES_SUFFIX}"))
        } else {
            Cow::Borrowed(collection)
        }
    }
}

/// Where a fetched blob goes.
#[derive(Debug, Clone, Copy)]
pub enum BlobSink<'a> {
    Memory,
    /// Write `<dir>/<id>.<ext>`, `ext` being the collection suffix after the
    /// last `_` (`cc_pdf` -> `pdf`).
    Disk(&'a Path),
}

/// Fetched blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobFetch {
    Bytes(Vec<u8>),
    Saved(PathBuf),
}

/// Create/update/find/delete/count per logical collection.
///
/// Every call is one stateless round trip to the backend; nothing is cached.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Connection,
    layout: Layout,
}

impl Store {
    pub fn new(conn: &Connection, layout: Layout) -> Self {
        Self {
            conn: conn.clone(),
            layout,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn backend(&self) -> &dyn Backend {
        self.conn.backend()
    }

    fn validate(&self, doc: &Document) -> Result<()> {
        if doc.id.is_empty() {
            return Err(StoreError::invalid("document id must not be empty"));
        }
        if doc.collection.is_empty() {
            return Err(StoreError::invalid(format!(
                "document `{}` has no collection",
                doc.id
            )));
        }
        let large = self.layout.is_large_object(&doc.collection);
        match (&doc.body, large) {
            (Body::Binary(_), true) | (Body::Empty | Body::Text(_), false) => Ok(()),
            (body, true) => Err(StoreError::invalid(format!(
                "`{}` is a large-object collection; got a {} document",
                doc.collection,
                body.kind()
            ))),
            (Body::Binary(_), false) => Err(StoreError::invalid(format!(
                "binary content for `{}` needs a large-object collection",
                doc.id
            ))),
        }
    }

    fn require_large_object(&self, collection: &str) -> Result<()> {
        if self.layout.is_large_object(collection) {
            Ok(())
        } else {
            Err(StoreError::invalid(format!(
                "`{collection}` is not a large-object collection"
            )))
        }
    }

    /// Split a document into its top-level stored form and blob payload.
    fn top_level<'d>(&self, doc: &'d Document) -> (StoredDocument, Option<BlobWrite<'d>>) {
        let mut stored = StoredDocument::new(doc.id.as_str());
        let blob = match &doc.body {
            Body::Empty => None,
            Body::Text(text) => {
                stored.text = Some(text.clone());
                None
            }
            Body::Binary(data) => {
                stored.file = Some(FileInfo {
                    length: data.len() as u64,
                    content_hash: hash::content_hash(data),
                });
                Some(BlobWrite {
                    collection: doc.collection.as_str(),
                    data: data.as_slice(),
                })
            }
        };
        (stored, blob)
    }

    /// Insert the top-level fields of `doc` (id, text or payload) with empty
    /// metadata. Returns `None` if the id already exists.
    pub fn create(&self, doc: &Document) -> Result<Option<Oid>> {
        self.validate(doc)?;
        let (stored, blob) = self.top_level(doc);
        let target = self.layout.document_collection(&doc.collection);
        let oid = self.backend().insert(&target, stored, blob)?;
        match oid {
            Some(oid) => log::debug!("created {}/{} ({oid})", doc.collection, doc.id),
            None => log::debug!("{}/{} already exists", doc.collection, doc.id),
        }
        Ok(oid)
    }

    /// Merge `doc.metadata` into the stored document. `false` if unknown.
    pub fn update(&self, doc: &Document) -> Result<bool> {
        if doc.id.is_empty() {
            return Err(StoreError::invalid("document id must not be empty"));
        }
        let target = self.layout.document_collection(&doc.collection);
        self.backend()
            .merge_metadata(&target, &doc.id, &doc.metadata)
    }

    /// Insert with metadata if absent, otherwise merge metadata, in one
    /// atomic backend call.
    pub fn upsert(&self, doc: &Document) -> Result<Upsert> {
        self.validate(doc)?;
        let (mut stored, blob) = self.top_level(doc);
        stored.merge_metadata(&doc.metadata);
        let target = self.layout.document_collection(&doc.collection);
        self.backend().upsert(&target, stored, blob)
    }

    /// By primary id, or by `metadata.<tag> == id` when `tag` is given.
    pub fn find_one(
        &self,
        id: &str,
        collection: &str,
        tag: Option<TagField>,
    ) -> Result<Option<Record>> {
        let target = self.layout.document_collection(collection);
        match tag {
            None => self.backend().get(&target, id),
            Some(field) => {
                let pipeline = Pipeline::new().filter(Filter::tag(field, id)).limit(1);
                Ok(self.select(&target, &pipeline)?.into_iter().next())
            }
        }
    }

    /// All documents with `metadata.<tag> == value`.
    pub fn find(&self, value: &str, tag: TagField, collection: &str) -> Result<Vec<Record>> {
        let target = self.layout.document_collection(collection);
        self.select(&target, &Pipeline::new().filter(Filter::tag(tag, value)))
    }

    /// Records of an ungrouped pipeline over a physical collection.
    fn select(&self, target: &str, pipeline: &Pipeline) -> Result<Vec<Record>> {
        match self.backend().aggregate(target, pipeline)? {
            Output::Records(records) => Ok(records),
            Output::Groups(_) => Err(StoreError::invalid(
                "grouped pipeline where records were expected",
            )),
        }
    }

    fn load_blob(&self, collection: &str, record: &Record) -> Result<Vec<u8>> {
        let id = &record.document.id;
        let data = self
            .backend()
            .get_blob(collection, id)?
            .ok_or_else(|| StoreError::Corrupt {
                collection: collection.to_string(),
                id: id.clone(),
                reason: "metadata present but payload missing".into(),
            })?;
        if let Some(info) = &record.document.file {
            if !hash::matches(&data, &info.content_hash) {
                return Err(StoreError::Corrupt {
                    collection: collection.to_string(),
                    id: id.clone(),
                    reason: format!(
                        "content hash mismatch (expected {})",
                        hash::short_hash(&info.content_hash)
                    ),
                });
            }
        }
        Ok(data)
    }

    /// Read one payload from a large-object collection.
    pub fn find_one_blob(
        &self,
        id: &str,
        collection: &str,
        sink: BlobSink<'_>,
    ) -> Result<Option<BlobFetch>> {
        self.require_large_object(collection)?;
        let Some(record) = self.find_one(id, collection, None)? else {
            return Ok(None);
        };
        let data = self.load_blob(collection, &record)?;
        match sink {
            BlobSink::Memory => Ok(Some(BlobFetch::Bytes(data))),
            BlobSink::Disk(dir) => {
                if id.contains(['/', '\\']) || id.starts_with('.') {
                    return Err(StoreError::invalid(format!(
                        "id `{id}` cannot be used as a file name"
                    )));
                }
                let ext = collection.rsplit('_').next().unwrap_or(collection);
                fs::create_dir_all(dir)?;
                let path = dir.join(format!("{id}.{ext}"));
                fs::write(&path, &data)?;
                log::info!("downloaded {id} to {}", path.display());
                Ok(Some(BlobFetch::Saved(path)))
            }
        }
    }

    /// All payloads whose metadata has `<tag> == value`, as `(id, bytes)`.
    pub fn find_blobs(
        &self,
        value: &str,
        tag: TagField,
        collection: &str,
    ) -> Result<Vec<(String, Vec<u8>)>> {
        self.require_large_object(collection)?;
        self.find(value, tag, collection)?
            .into_iter()
            .map(|record| {
                let data = self.load_blob(collection, &record)?;
                Ok((record.document.id, data))
            })
            .collect()
    }

    fn blob_collection<'a>(&self, collection: &'a str) -> Option<&'a str> {
        self.layout
            .is_large_object(collection)
            .then_some(collection)
    }

    /// Remove one document (and its payload). `false` if nothing matched.
    pub fn delete_one(&self, id: &str, collection: &str) -> Result<bool> {
        let target = self.layout.document_collection(collection);
        let removed = self.backend().delete(
            &target,
            &[id.to_string()],
            self.blob_collection(collection),
        )?;
        Ok(removed > 0)
    }

    /// Remove every document with `metadata.<tag> == value`.
    pub fn delete_all(&self, value: &str, tag: TagField, collection: &str) -> Result<u64> {
        let ids: Vec<String> = self
            .find(value, tag, collection)?
            .into_iter()
            .map(|r| r.document.id)
            .collect();
        if ids.is_empty() {
            log::info!("no documents with {tag} = {value} in {collection}");
            return Ok(0);
        }
        let target = self.layout.document_collection(collection);
        let removed = self
            .backend()
            .delete(&target, &ids, self.blob_collection(collection))?;
        log::info!("deleted {removed} documents with {tag} = {value} from {collection}");
        Ok(removed)
    }

    /// Run a pipeline against a logical collection.
    pub fn aggregate(&self, collection: &str, pipeline: &Pipeline) -> Result<Output> {
        let target = self.layout.document_collection(collection);
        log::debug!("aggregate {target}: {:?}", pipeline.stages());
        self.backend().aggregate(&target, pipeline)
    }

    /// Total or grouped document count. The query is validated before the
    /// backend is touched.
    pub fn count(&self, query: &CountQuery) -> Result<Counts> {
        let plan = query.plan()?;
        let output = self.aggregate(&plan.collection, &plan.pipeline)?;
        Ok(plan.finish(output))
    }

    /// Physical collection names.
    pub fn collections(&self) -> Result<Vec<String>> {
        self.backend().collections()
    }

    /// Document count without evaluating any filter.
    pub fn estimated_count(&self, collection: &str) -> Result<u64> {
        let target = self.layout.document_collection(collection);
        self.backend().count(&target)
    }

    /// Up to `n` documents picked at random; the same `seed` picks the
    /// same documents from unchanged data.
    pub fn sample(&self, collection: &str, n: usize, seed: u64) -> Result<Vec<Record>> {
        let target = self.layout.document_collection(collection);
        self.backend().sample(&target, n, seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::CountQuery;
    use serde_json::{Value, json};

    fn store() -> Store {
        Store::new(&Connection::in_memory(), Layout::default())
    }

    fn meta(v: Value) -> crate::Metadata {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn layout_document_collection() {
        let layout = Layout::default();
        assert_eq!(layout.document_collection("cc_pdf"), "cc_pdf.files");
        assert_eq!(layout.document_collection("papers"), "papers");
        assert!(!layout.is_large_object("cc_text"));
    }

    #[test]
    fn create_then_find_has_empty_metadata() {
        let s = store();
        let doc = Document::text("t1", "cc_text", "page one").with("inst_id", "r1");
        assert!(s.create(&doc).unwrap().is_some());
        let rec = s.find_one("t1", "cc_text", None).unwrap().unwrap();
        assert_eq!(rec.document.id, "t1");
        assert_eq!(rec.document.text.as_deref(), Some("page one"));
        assert!(rec.document.metadata.is_empty());
    }

    #[test]
    fn create_twice_is_noop() {
        let s = store();
        let doc = Document::new("c1", "cc_catalog");
        assert!(s.create(&doc).unwrap().is_some());
        assert!(s.create(&doc).unwrap().is_none());
        assert_eq!(s.estimated_count("cc_catalog").unwrap(), 1);
    }

    #[test]
    fn update_merges_shallowly() {
        let s = store();
        s.create(&Document::new("c1", "cc_catalog")).unwrap();
        let m1 = meta(json!({"inst_id": "r1", "years": {"start": 2020}}));
        let m2 = meta(json!({"years": {"end": 2021}, "college": "x"}));
        assert!(s
            .update(&Document::new("c1", "cc_catalog").with_metadata(m1))
            .unwrap());
        assert!(s
            .update(&Document::new("c1", "cc_catalog").with_metadata(m2))
            .unwrap());
        let rec = s.find_one("c1", "cc_catalog", None).unwrap().unwrap();
        assert_eq!(
            Value::Object(rec.document.metadata),
            json!({"inst_id": "r1", "years": {"end": 2021}, "college": "x"})
        );
    }

    #[test]
    fn update_unknown_id() {
        let s = store();
        assert!(!s.update(&Document::new("nope", "cc_catalog")).unwrap());
    }

    #[test]
    fn validate_body_against_layout() {
        let s = store();
        let err = s
            .create(&Document::text("p", "cc_pdf", "not a pdf"))
            .unwrap_err();
        assert!(err.is_invalid_argument());
        let err = s
            .create(&Document::binary("p", "cc_text", vec![1, 2]))
            .unwrap_err();
        assert!(err.is_invalid_argument());
        let err = s.create(&Document::new("", "cc_text")).unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn find_by_tag() {
        let s = store();
        for (id, inst) in [("a", "r1"), ("b", "r2"), ("c", "r1")] {
            s.upsert(&Document::new(id, "cc_catalog").with("inst_id", inst))
                .unwrap();
        }
        let ids: Vec<_> = s
            .find("r1", TagField::InstId, "cc_catalog")
            .unwrap()
            .into_iter()
            .map(|r| r.document.id)
            .collect();
        assert_eq!(ids, vec!["a", "c"]);
        let first = s
            .find_one("r2", "cc_catalog", Some(TagField::InstId))
            .unwrap()
            .unwrap();
        assert_eq!(first.document.id, "b");
    }

    #[test]
    fn blob_memory_and_disk() {
        let s = store();
        let doc = Document::binary("scan1", "cc_pdf", b"%PDF-1.7".to_vec()).with("pdf_id", "p1");
        s.upsert(&doc).unwrap();

        let rec = s.find_one("scan1", "cc_pdf", None).unwrap().unwrap();
        assert_eq!(rec.document.file.as_ref().unwrap().length, 8);
        assert_eq!(rec.document.metadata.get("pdf_id"), Some(&json!("p1")));

        let fetched = s
            .find_one_blob("scan1", "cc_pdf", BlobSink::Memory)
            .unwrap()
            .unwrap();
        assert_eq!(fetched, BlobFetch::Bytes(b"%PDF-1.7".to_vec()));

        let dir = tempfile::tempdir().unwrap();
        let saved = s
            .find_one_blob("scan1", "cc_pdf", BlobSink::Disk(dir.path()))
            .unwrap()
            .unwrap();
        let path = dir.path().join("scan1.pdf");
        assert_eq!(saved, BlobFetch::Saved(path.clone()));
        assert_eq!(std::fs::read(path).unwrap(), b"%PDF-1.7");

        assert!(s
            .find_one_blob("missing", "cc_pdf", BlobSink::Memory)
            .unwrap()
            .is_none());
    }

    #[test]
    fn blob_reads_require_large_object_collection() {
        let s = store();
        let err = s
            .find_one_blob("x", "cc_text", BlobSink::Memory)
            .unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn find_blobs_by_tag() {
        let s = store();
        for (id, pdf) in [("p1_1", "p1"), ("p1_2", "p1"), ("p2_1", "p2")] {
            s.upsert(&Document::binary(id, "cc_png", id.as_bytes().to_vec()).with("pdf_id", pdf))
                .unwrap();
        }
        let blobs = s.find_blobs("p1", TagField::PdfId, "cc_png").unwrap();
        assert_eq!(blobs.len(), 2);
        assert_eq!(blobs[0], ("p1_1".to_string(), b"p1_1".to_vec()));
    }

    #[test]
    fn delete_one_and_all() {
        let s = store();
        for (id, inst) in [("a", "r1"), ("b", "r1"), ("c", "r2")] {
            s.upsert(&Document::new(id, "cc_catalog").with("inst_id", inst))
                .unwrap();
        }
        assert!(s.delete_one("c", "cc_catalog").unwrap());
        assert!(!s.delete_one("c", "cc_catalog").unwrap());
        assert_eq!(s.delete_all("r1", TagField::InstId, "cc_catalog").unwrap(), 2);
        assert_eq!(s.delete_all("r1", TagField::InstId, "cc_catalog").unwrap(), 0);
        assert_eq!(s.estimated_count("cc_catalog").unwrap(), 0);
    }

    #[test]
    fn delete_all_removes_payloads() {
        let s = store();
        s.upsert(&Document::binary("x", "cc_pdf", vec![1]).with("inst_id", "r1"))
            .unwrap();
        assert_eq!(s.delete_all("r1", TagField::InstId, "cc_pdf").unwrap(), 1);
        assert!(s
            .connection()
            .backend()
            .get_blob("cc_pdf", "x")
            .unwrap()
            .is_none());
    }

    #[test]
    fn count_total_and_grouped() {
        let s = store();
        for (id, inst) in [("a", "r1"), ("b", "r1"), ("c", "r2")] {
            s.upsert(&Document::new(id, "cc_catalog").with("inst_id", inst))
                .unwrap();
        }
        assert_eq!(
            s.count(&CountQuery::new("cc_catalog")).unwrap(),
            Counts::Total(3)
        );
        let grouped = s.count(&CountQuery::new("cc_catalog").by("inst_id")).unwrap();
        assert_eq!(grouped.get("r1"), Some(2));
        assert_eq!(grouped.get("r2"), Some(1));
        assert_eq!(
            s.count(&CountQuery::new("cc_catalog").id("r2").by("inst_id"))
                .unwrap(),
            Counts::Total(1)
        );
    }

    #[test]
    fn sample_is_random_but_seeded() {
        let s = store();
        for i in 0..50 {
            s.create(&Document::new(format!("p{i}"), "papers")).unwrap();
        }
        let ids = |seed| -> Vec<String> {
            s.sample("papers", 5, seed)
                .unwrap()
                .into_iter()
                .map(|r| r.document.id)
                .collect()
        };
        assert_eq!(ids(1), ids(1));
        assert_eq!(ids(1).len(), 5);
        // distinct seeds over 50 documents do not all land on the first five
        let first_five: Vec<String> = (0..5).map(|i| format!("p{i}")).collect();
        assert!((0..8).any(|seed| ids(seed) != first_five));
    }

    #[test]
    fn find_by_tag_on_duckdb() {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(&dir.path().join("t.duckdb").display().to_string()).unwrap();
        let s = Store::new(&conn, Layout::default());
        for (id, pdf) in [("p_0", "p"), ("p_1", "p"), ("q_0", "q")] {
            s.upsert(&Document::text(id, "cc_text", "page").with("pdf_id", pdf))
                .unwrap();
        }
        let found: Vec<_> = s
            .find("p", TagField::PdfId, "cc_text")
            .unwrap()
            .into_iter()
            .map(|r| r.document.id)
            .collect();
        assert_eq!(found, vec!["p_0", "p_1"]);
        let first = s.find_one("q", "cc_text", Some(TagField::PdfId)).unwrap();
        assert_eq!(first.unwrap().document.id, "q_0");
        assert_eq!(s.delete_all("p", TagField::PdfId, "cc_text").unwrap(), 2);
        assert_eq!(s.estimated_count("cc_text").unwrap(), 1);
    }
}
