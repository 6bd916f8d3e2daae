//! Document shapes accepted and returned by the store

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Nested metadata attached to a document under the `metadata` key.
pub type Metadata = serde_json::Map<String, Value>;

/// Top-level keys that never land inside metadata.
pub const RESERVED_KEYS: [&str; 3] = ["id", "text", "file"];

/// Internal identity assigned by the backend on insert.
///
/// Never exposed past the catalog layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Oid(pub u64);

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Content carried by a document being written.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Metadata only (paper records, catalog entries).
    Empty,
    /// Inline text (extracted page text, abstracts).
    Text(String),
    /// Binary payload routed to the large-object store.
    Binary(Vec<u8>),
}

impl Body {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
        }
    }
}

/// A document to be written into one named collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub collection: String,
    pub body: Body,
    pub metadata: Metadata,
}

impl Document {
    pub fn new(id: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            collection: collection.into(),
            body: Body::Empty,
            metadata: Metadata::new(),
        }
    }

    pub fn text(id: impl Into<String>, collection: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            body: Body::Text(text.into()),
            ..Self::new(id, collection)
        }
    }

    pub fn binary(id: impl Into<String>, collection: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            body: Body::Binary(data),
            ..Self::new(id, collection)
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Set a single metadata key.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Size and blake3 hash of a payload held in the large-object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub length: u64,
    pub content_hash: String,
}

/// Document as persisted by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileInfo>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl StoredDocument {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: None,
            file: None,
            metadata: Metadata::new(),
        }
    }

    /// Resolve a dotted path such as `metadata.inst_id` or `file.length`.
    ///
    /// Numeric segments index into arrays. Returns `None` when any segment
    /// is missing.
    pub fn lookup(&self, path: &str) -> Option<Value> {
        let mut segments = path.split('.');
        match segments.next()? {
            "id" => descend(Value::String(self.id.clone()), segments),
            "text" => descend(Value::String(self.text.clone()?), segments),
            "file" => descend(serde_json::to_value(self.file.as_ref()?).ok()?, segments),
            "metadata" => match segments.next() {
                None => Some(Value::Object(self.metadata.clone())),
                Some(key) => descend(self.metadata.get(key)?.clone(), segments),
            },
            _ => None,
        }
    }

    /// Shallow-merge `delta` into this document's metadata.
    pub fn merge_metadata(&mut self, delta: &Metadata) {
        merge_metadata(&mut self.metadata, delta);
    }
}

fn descend<'a>(mut value: Value, segments: impl Iterator<Item = &'a str>) -> Option<Value> {
    for seg in segments {
        value = match value {
            Value::Object(mut map) => map.remove(seg)?,
            Value::Array(mut items) => {
                let idx: usize = seg.parse().ok()?;
                if idx >= items.len() {
                    return None;
                }
                items.swap_remove(idx)
            }
            _ => return None,
        };
    }
    Some(value)
}

/// Shallow merge: new keys added, existing keys overwritten, nested objects
/// replaced rather than merged. Reserved keys are dropped.
pub fn merge_metadata(target: &mut Metadata, delta: &Metadata) {
    for (key, value) in delta {
        if RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }
        target.insert(key.clone(), value.clone());
    }
}

/// A stored document together with its backend identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub oid: Oid,
    pub document: StoredDocument,
}

impl Record {
    pub fn into_document(self) -> StoredDocument {
        self.document
    }
}
