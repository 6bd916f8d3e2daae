//! Typed filters and aggregation pipelines
//!
//! A [`Pipeline`] is an optional match, an optional group and an optional
//! limit, always applied in that order. [`CountQuery`] validates user
//! supplied group-by fields against the [`TagField`] allow-list and
//! compiles to a pipeline without touching the backend.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{Metadata, Record, StoredDocument};
use crate::error::{Result, StoreError};

/// Metadata fields usable as grouping or filtering keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagField {
    /// Institution identifier (ROR id).
    InstId,
    /// Parent PDF identifier.
    PdfId,
    /// Text conversion method (`fitz`, `paddleOCR`, ...).
    Conversion,
}

impl TagField {
    pub const ALL: [TagField; 3] = [Self::InstId, Self::PdfId, Self::Conversion];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InstId => "inst_id",
            Self::PdfId => "pdf_id",
            Self::Conversion => "conversion",
        }
    }

    pub fn metadata_path(self) -> String {
        format!("metadata.{}", self.as_str())
    }
}

impl fmt::Display for TagField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TagField {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<_> = Self::ALL.iter().map(|f| f.as_str()).collect();
                StoreError::invalid(format!(
                    "invalid aggregation field `{s}`. Valid options: {}",
                    valid.join(", ")
                ))
            })
    }
}

/// Predicate over stored documents.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    /// Primary id equality.
    Id(String),
    /// `metadata.<field> == value`.
    Tag { field: TagField, value: Value },
    /// Equality on an arbitrary dotted path.
    Eq { path: String, value: Value },
    /// Path resolves to a non-null value.
    Exists { path: String },
    /// Inequality; a missing path counts as `null`.
    Ne { path: String, value: Value },
    /// Inclusive bounds. Numbers compare with numbers, strings with
    /// strings; any other pairing never matches.
    Range {
        path: String,
        gte: Option<Value>,
        lte: Option<Value>,
    },
    /// Equal to any of `values`.
    In { path: String, values: Vec<Value> },
    And(Vec<Filter>),
}

impl Filter {
    pub fn id(id: impl Into<String>) -> Self {
        Self::Id(id.into())
    }

    pub fn tag(field: TagField, value: impl Into<Value>) -> Self {
        Self::Tag {
            field,
            value: value.into(),
        }
    }

    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn exists(path: impl Into<String>) -> Self {
        Self::Exists { path: path.into() }
    }

    pub fn ne(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Ne {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn range(path: impl Into<String>, gte: Option<Value>, lte: Option<Value>) -> Self {
        Self::Range {
            path: path.into(),
            gte,
            lte,
        }
    }

    pub fn one_of(path: impl Into<String>, values: Vec<Value>) -> Self {
        Self::In {
            path: path.into(),
            values,
        }
    }

    /// Conjunction, flattening nested `And` and dropping `All`.
    pub fn and(self, other: Filter) -> Filter {
        let mut parts = Vec::new();
        for f in [self, other] {
            match f {
                Self::All => {}
                Self::And(inner) => parts.extend(inner),
                f => parts.push(f),
            }
        }
        match parts.len() {
            0 => Self::All,
            1 => parts.remove(0),
            _ => Self::And(parts),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Build a filter from a raw match document such as
    /// `{"metadata.inst_id": "0155zta11", "metadata.year": {"$gte": 2000, "$ne": null}}`.
    ///
    /// Understood operators: `$eq`, `$ne`, `$in`, `$gte`, `$lte` and
    /// `$exists: true`. Anything else is rejected.
    pub fn from_match(doc: &Metadata) -> Result<Self> {
        let mut filter = Self::All;
        for (path, cond) in doc {
            if path.starts_with('$') {
                return Err(StoreError::invalid(format!(
                    "unsupported match operator `{path}`"
                )));
            }
            let part = match cond {
                Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                    Self::from_operators(path, ops)?
                }
                v => Self::eq(path.as_str(), v.clone()),
            };
            filter = filter.and(part);
        }
        Ok(filter)
    }

    fn from_operators(path: &str, ops: &Metadata) -> Result<Self> {
        let unsupported = |op: &str, arg: &Value| {
            StoreError::invalid(format!("unsupported condition on `{path}`: {op}: {arg}"))
        };

        let mut filter = Self::All;
        let (mut gte, mut lte) = (None, None);
        for (op, arg) in ops {
            let part = match (op.as_str(), arg) {
                ("$exists", Value::Bool(true)) => Self::exists(path),
                ("$eq", v) => Self::eq(path, v.clone()),
                ("$ne", v) => Self::ne(path, v.clone()),
                ("$in", Value::Array(values)) => Self::one_of(path, values.clone()),
                ("$gte", v @ (Value::Number(_) | Value::String(_))) => {
                    gte = Some(v.clone());
                    continue;
                }
                ("$lte", v @ (Value::Number(_) | Value::String(_))) => {
                    lte = Some(v.clone());
                    continue;
                }
                (op, arg) => return Err(unsupported(op, arg)),
            };
            filter = filter.and(part);
        }
        if gte.is_some() || lte.is_some() {
            filter = filter.and(Self::range(path, gte, lte));
        }
        Ok(filter)
    }

    pub fn matches(&self, doc: &StoredDocument) -> bool {
        match self {
            Self::All => true,
            Self::Id(id) => doc.id == *id,
            Self::Tag { field, value } => same(doc.metadata.get(field.as_str()), value),
            Self::Eq { path, value } => same(doc.lookup(path).as_ref(), value),
            Self::Exists { path } => doc.lookup(path).is_some_and(|v| !v.is_null()),
            Self::Ne { path, value } => !same(doc.lookup(path).as_ref(), value),
            Self::Range { path, gte, lte } => {
                let found = doc.lookup(path);
                let above = gte.as_ref().map_or(true, |b| {
                    matches!(compare(found.as_ref(), b), Some(Ordering::Greater | Ordering::Equal))
                });
                let below = lte.as_ref().map_or(true, |b| {
                    matches!(compare(found.as_ref(), b), Some(Ordering::Less | Ordering::Equal))
                });
                above && below
            }
            Self::In { path, values } => {
                let found = doc.lookup(path);
                values.iter().any(|v| same(found.as_ref(), v))
            }
            Self::And(parts) => parts.iter().all(|f| f.matches(doc)),
        }
    }
}

/// Equality where a missing value equals `null` and numbers compare by
/// value (`1 == 1.0`).
fn same(found: Option<&Value>, expected: &Value) -> bool {
    match (found, expected) {
        (None | Some(Value::Null), Value::Null) => true,
        (Some(Value::Number(a)), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Some(a), b) => a == b,
        (None, _) => false,
    }
}

fn compare(found: Option<&Value>, bound: &Value) -> Option<Ordering> {
    match (found?, bound) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
        _ => None,
    }
}

/// Grouping key of a group stage.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupKey {
    Tag(TagField),
    /// Compound key over explicit document paths.
    Paths(Vec<String>),
}

impl GroupKey {
    /// Dotted document paths making up the key.
    pub fn paths(&self) -> Vec<String> {
        match self {
            Self::Tag(field) => vec![field.metadata_path()],
            Self::Paths(paths) => paths.clone(),
        }
    }
}

/// One pipeline stage, as reported by [`Pipeline::stages`].
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    Group(GroupKey),
    Limit(usize),
}

/// Match, group and limit, in that order.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    filter: Filter,
    group: Option<GroupKey>,
    limit: Option<usize>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// One row of a grouped aggregation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupRow {
    /// One value per grouped path; missing paths group as `null`.
    pub key: Vec<Value>,
    pub count: u64,
}

impl GroupRow {
    /// Key rendered as a map key. Strings are verbatim; other values carry
    /// a type marker so `"1"` and `1` stay apart, and missing or `null`
    /// values render as `<null>`. Compound keys are joined with `|`.
    pub fn label(&self) -> String {
        self.key.iter().map(render_key).collect::<Vec<_>>().join("|")
    }
}

fn render_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "<null>".to_string(),
        Value::Bool(b) => format!("<bool {b}>"),
        Value::Number(n) => format!("<number {n}>"),
        other => format!("<json {other}>"),
    }
}

/// Result of running a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Records(Vec<Record>),
    Groups(Vec<GroupRow>),
}

impl Output {
    /// Number of matched documents (sum of group counts when grouped).
    pub fn total(&self) -> u64 {
        match self {
            Self::Records(records) => records.len() as u64,
            Self::Groups(rows) => rows.iter().map(|r| r.count).sum(),
        }
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            filter: Filter::All,
            group: None,
            limit: None,
        }
    }

    /// Add a match condition (ANDed with any existing one).
    pub fn filter(mut self, filter: Filter) -> Self {
        let current = std::mem::replace(&mut self.filter, Filter::All);
        self.filter = current.and(filter);
        self
    }

    pub fn group_by(mut self, key: GroupKey) -> Self {
        self.group = Some(key);
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn is_grouped(&self) -> bool {
        self.group.is_some()
    }

    pub fn match_filter(&self) -> &Filter {
        &self.filter
    }

    pub fn group_key(&self) -> Option<&GroupKey> {
        self.group.as_ref()
    }

    pub fn row_limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn stages(&self) -> Vec<Stage> {
        let mut stages = Vec::new();
        if !self.filter.is_all() {
            stages.push(Stage::Match(self.filter.clone()));
        }
        if let Some(key) = &self.group {
            stages.push(Stage::Group(key.clone()));
        }
        if let Some(n) = self.limit {
            stages.push(Stage::Limit(n));
        }
        stages
    }

    /// Evaluate against records in backend order.
    pub fn run(&self, records: Vec<Record>) -> Output {
        let matched = records
            .into_iter()
            .filter(|r| self.filter.matches(&r.document));

        let Some(key) = &self.group else {
            let limit = self.limit.unwrap_or(usize::MAX);
            return Output::Records(matched.take(limit).collect());
        };

        let paths = key.paths();
        self.collect_groups(matched.map(|record| GroupRow {
            key: paths
                .iter()
                .map(|p| record.document.lookup(p).unwrap_or(Value::Null))
                .collect(),
            count: 1,
        }))
    }

    /// Merge partial group rows with equal keys, order them by the
    /// canonical JSON text of the key and apply the limit.
    pub fn collect_groups(&self, rows: impl IntoIterator<Item = GroupRow>) -> Output {
        let mut groups: BTreeMap<String, GroupRow> = BTreeMap::new();
        for row in rows {
            let canonical = Value::Array(row.key.clone()).to_string();
            groups
                .entry(canonical)
                .or_insert(GroupRow {
                    key: row.key,
                    count: 0,
                })
                .count += row.count;
        }

        let limit = self.limit.unwrap_or(usize::MAX);
        Output::Groups(groups.into_values().take(limit).collect())
    }
}

/// Document count, optionally filtered and grouped by one tag field.
#[derive(Debug, Clone, Default)]
pub struct CountQuery {
    /// Tag value to count (with exactly one `by` field), or a primary id
    /// when `by` is empty.
    pub id: Option<String>,
    /// Group-by fields; must be in the [`TagField`] allow-list. Only the
    /// first one is used for grouping.
    pub by: Vec<String>,
    /// Raw match filter.
    pub filter: Option<Filter>,
    pub collection: String,
}

/// Validated, backend-independent form of a [`CountQuery`].
#[derive(Debug, Clone, PartialEq)]
pub struct CountPlan {
    pub collection: String,
    pub pipeline: Pipeline,
    /// Collapse the result into a single total.
    pub total: bool,
}

/// Result of a count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Counts {
    Total(u64),
    Grouped(BTreeMap<String, u64>),
}

impl Counts {
    pub fn total(&self) -> u64 {
        match self {
            Self::Total(n) => *n,
            Self::Grouped(map) => map.values().sum(),
        }
    }

    pub fn get(&self, key: &str) -> Option<u64> {
        match self {
            Self::Total(_) => None,
            Self::Grouped(map) => map.get(key).copied(),
        }
    }
}

impl CountQuery {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Self::default()
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn by(mut self, field: impl Into<String>) -> Self {
        self.by.push(field.into());
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Validate and compile to a pipeline.
    pub fn plan(&self) -> Result<CountPlan> {
        if self.collection.is_empty() {
            return Err(StoreError::invalid("parameter 'collection' must be provided"));
        }

        let fields = self
            .by
            .iter()
            .map(|f| f.parse::<TagField>())
            .collect::<Result<Vec<_>>>()?;

        if fields.len() > 1 {
            log::warn!(
                "count: grouping by `{}` only; ignoring {:?}",
                fields[0],
                &self.by[1..]
            );
        }

        let mut pipeline = Pipeline::new();
        if let Some(filter) = &self.filter {
            pipeline = pipeline.filter(filter.clone());
        }

        let total = match (&self.id, fields.as_slice()) {
            (Some(id), []) => {
                pipeline = pipeline.filter(Filter::id(id.as_str()));
                true
            }
            (Some(id), [field]) => {
                pipeline = pipeline.filter(Filter::tag(*field, id.as_str()));
                true
            }
            (_, []) => true,
            _ => false,
        };

        if let Some(first) = fields.first() {
            pipeline = pipeline.group_by(GroupKey::Tag(*first));
        }

        Ok(CountPlan {
            collection: self.collection.clone(),
            pipeline,
            total,
        })
    }
}

impl CountPlan {
    /// Shape pipeline output into the caller-facing result.
    pub fn finish(&self, output: Output) -> Counts {
        if self.total {
            return Counts::Total(output.total());
        }
        match output {
            Output::Groups(rows) => {
                let mut map = BTreeMap::new();
                for row in rows {
                    *map.entry(row.label()).or_insert(0) += row.count;
                }
                Counts::Grouped(map)
            }
            Output::Records(records) => Counts::Total(records.len() as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Oid;
    use serde_json::json;

    fn record(oid: u64, id: &str, meta: Value) -> Record {
        let mut document = StoredDocument::new(id);
        document.metadata = meta.as_object().cloned().unwrap();
        Record {
            oid: Oid(oid),
            document,
        }
    }

    fn sample() -> Vec<Record> {
        vec![
            record(1, "a", json!({"inst_id": "r1", "conversion": "fitz"})),
            record(2, "b", json!({"inst_id": "r1", "conversion": "paddleOCR"})),
            record(3, "c", json!({"inst_id": "r2", "conversion": "fitz"})),
            record(4, "d", json!({"year": 2020})),
        ]
    }

    #[test]
    fn tag_field_parse() {
        assert_eq!("inst_id".parse::<TagField>().unwrap(), TagField::InstId);
        assert_eq!("pdf_id".parse::<TagField>().unwrap(), TagField::PdfId);
        assert_eq!(
            "conversion".parse::<TagField>().unwrap(),
            TagField::Conversion
        );
    }

    #[test]
    fn tag_field_rejects_unknown() {
        let err = "venue".parse::<TagField>().unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(err.to_string().contains("inst_id, pdf_id, conversion"));
    }

    #[test]
    fn and_flattens() {
        let f = Filter::All
            .and(Filter::id("a"))
            .and(Filter::tag(TagField::InstId, "r1").and(Filter::exists("text")));
        match f {
            Filter::And(parts) => assert_eq!(parts.len(), 3),
            other => panic!("expected And, got {other:?}"),
        }
        assert_eq!(Filter::All.and(Filter::All), Filter::All);
        assert_eq!(Filter::All.and(Filter::id("x")), Filter::id("x"));
    }

    #[test]
    fn from_match_equality_and_exists() {
        let doc = json!({"metadata.inst_id": "r1", "metadata.conversion": {"$exists": true}});
        let filter = Filter::from_match(doc.as_object().unwrap()).unwrap();
        let records = sample();
        let hits: Vec<_> = records
            .iter()
            .filter(|r| filter.matches(&r.document))
            .map(|r| r.document.id.as_str())
            .collect();
        assert_eq!(hits, vec!["a", "b"]);
    }

    fn hits(filter: &Filter, records: &[Record]) -> Vec<String> {
        records
            .iter()
            .filter(|r| filter.matches(&r.document))
            .map(|r| r.document.id.clone())
            .collect()
    }

    fn years() -> Vec<Record> {
        vec![
            record(1, "a", json!({"year": 1999, "venue": "Nature"})),
            record(2, "b", json!({"year": 2000, "venue": "Science"})),
            record(3, "c", json!({"year": 2010.0, "venue": null})),
            record(4, "d", json!({"year": "2015"})),
            record(5, "e", json!({"venue": "Cell"})),
        ]
    }

    fn parse(doc: Value) -> Result<Filter> {
        Filter::from_match(doc.as_object().unwrap())
    }

    #[test]
    fn from_match_ne_null_skips_missing_and_null() {
        let filter = parse(json!({"metadata.venue": {"$ne": null}})).unwrap();
        assert_eq!(hits(&filter, &years()), vec!["a", "b", "e"]);
    }

    #[test]
    fn from_match_ne_value_includes_missing() {
        let filter = parse(json!({"metadata.venue": {"$ne": "Nature"}})).unwrap();
        assert_eq!(hits(&filter, &years()), vec!["b", "c", "d", "e"]);
    }

    #[test]
    fn from_match_numeric_range() {
        let filter = parse(json!({"metadata.year": {"$gte": 2000, "$lte": 2010}})).unwrap();
        assert_eq!(
            filter,
            Filter::range("metadata.year", Some(json!(2000)), Some(json!(2010)))
        );
        // "2015" is a string and never compares with a number bound
        assert_eq!(hits(&filter, &years()), vec!["b", "c"]);

        let open = parse(json!({"metadata.year": {"$gte": 2000}})).unwrap();
        assert_eq!(hits(&open, &years()), vec!["b", "c"]);
    }

    #[test]
    fn from_match_string_range() {
        let filter = parse(json!({"metadata.venue": {"$gte": "N", "$lte": "T"}})).unwrap();
        assert_eq!(hits(&filter, &years()), vec!["a", "b"]);
    }

    #[test]
    fn from_match_in() {
        let filter = parse(json!({"metadata.venue": {"$in": ["Cell", "Science"]}})).unwrap();
        assert_eq!(hits(&filter, &years()), vec!["b", "e"]);
        let with_null = parse(json!({"metadata.venue": {"$in": [null]}})).unwrap();
        assert_eq!(hits(&with_null, &years()), vec!["c", "d"]);
    }

    #[test]
    fn from_match_combines_operators() {
        let filter = parse(json!({
            "metadata.year": {"$gte": 1990, "$ne": 2000},
            "metadata.venue": {"$exists": true}
        }))
        .unwrap();
        assert_eq!(hits(&filter, &years()), vec!["a"]);
    }

    #[test]
    fn eq_compares_numbers_by_value() {
        let filter = parse(json!({"metadata.year": 2010})).unwrap();
        assert_eq!(hits(&filter, &years()), vec!["c"]);
    }

    #[test]
    fn from_match_rejects_operators() {
        for doc in [
            json!({"metadata.year": {"$gt": 2000}}),
            json!({"metadata.year": {"$gte": [2000]}}),
            json!({"metadata.year": {"$in": 2000}}),
            json!({"metadata.year": {"$exists": false}}),
            json!({"$or": []}),
        ] {
            assert!(parse(doc).unwrap_err().is_invalid_argument());
        }
    }

    #[test]
    fn pipeline_stage_order() {
        let p = Pipeline::new()
            .limit(5)
            .group_by(GroupKey::Tag(TagField::InstId))
            .filter(Filter::exists("metadata.inst_id"));
        let stages = p.stages();
        assert!(matches!(stages[0], Stage::Match(_)));
        assert!(matches!(stages[1], Stage::Group(_)));
        assert!(matches!(stages[2], Stage::Limit(5)));
        assert!(Pipeline::new().stages().is_empty());
    }

    #[test]
    fn pipeline_groups_missing_as_null() {
        let out = Pipeline::new()
            .group_by(GroupKey::Tag(TagField::InstId))
            .run(sample());
        let Output::Groups(rows) = out else {
            panic!("expected groups");
        };
        let labels: BTreeMap<String, u64> = rows.iter().map(|r| (r.label(), r.count)).collect();
        assert_eq!(labels.get("r1"), Some(&2));
        assert_eq!(labels.get("r2"), Some(&1));
        assert_eq!(labels.get("<null>"), Some(&1));
    }

    #[test]
    fn grouped_counts_keep_mixed_types_apart() {
        let records = vec![
            record(1, "a", json!({"inst_id": "1"})),
            record(2, "b", json!({"inst_id": "1"})),
            record(3, "c", json!({"inst_id": 1})),
            record(4, "d", json!({})),
            record(5, "e", json!({"inst_id": "null"})),
            record(6, "f", json!({"inst_id": "null"})),
            record(7, "g", json!({"inst_id": null})),
        ];
        let plan = CountQuery::new("cc_catalog").by("inst_id").plan().unwrap();
        let counts = plan.finish(plan.pipeline.run(records));
        assert_eq!(counts.total(), 7);
        assert_eq!(
            counts,
            Counts::Grouped(BTreeMap::from([
                ("1".to_string(), 2),
                ("<number 1>".to_string(), 1),
                ("<null>".to_string(), 2),
                ("null".to_string(), 2),
            ]))
        );
    }

    #[test]
    fn colliding_labels_are_summed() {
        let plan = CountQuery::new("cc_catalog").by("inst_id").plan().unwrap();
        let rows = vec![
            GroupRow {
                key: vec![json!("<null>")],
                count: 3,
            },
            GroupRow {
                key: vec![Value::Null],
                count: 2,
            },
        ];
        let counts = plan.finish(Output::Groups(rows));
        assert_eq!(counts.get("<null>"), Some(5));
        assert_eq!(counts.total(), 5);
    }

    #[test]
    fn collect_groups_merges_equal_keys() {
        let pipeline = Pipeline::new().group_by(GroupKey::Tag(TagField::InstId));
        let rows = ["r2", "r1", "r2"].map(|k| GroupRow {
            key: vec![json!(k)],
            count: 2,
        });
        let Output::Groups(groups) = pipeline.collect_groups(rows) else {
            panic!("expected groups");
        };
        let flat: Vec<_> = groups.iter().map(|g| (g.label(), g.count)).collect();
        assert_eq!(flat, vec![("r1".to_string(), 2), ("r2".to_string(), 4)]);
    }

    #[test]
    fn pipeline_compound_key() {
        let out = Pipeline::new()
            .filter(Filter::exists("metadata.inst_id"))
            .group_by(GroupKey::Paths(vec![
                "metadata.inst_id".into(),
                "metadata.conversion".into(),
            ]))
            .run(sample());
        let Output::Groups(rows) = out else {
            panic!("expected groups");
        };
        let labels: Vec<_> = rows.iter().map(|r| r.label()).collect();
        assert_eq!(labels, vec!["r1|fitz", "r1|paddleOCR", "r2|fitz"]);
    }

    #[test]
    fn pipeline_limit_records() {
        let out = Pipeline::new().limit(2).run(sample());
        assert_eq!(out.total(), 2);
    }

    #[test]
    fn count_plan_invalid_field() {
        let err = CountQuery::new("cc_text").by("venue").plan().unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn count_plan_requires_collection() {
        let err = CountQuery::default().plan().unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn count_plan_grouped() {
        let plan = CountQuery::new("cc_text").by("inst_id").plan().unwrap();
        assert!(!plan.total);
        let counts = plan.finish(plan.pipeline.run(sample()));
        assert_eq!(counts.get("r1"), Some(2));
        assert_eq!(counts.get("r2"), Some(1));
    }

    #[test]
    fn count_plan_id_with_field_is_total() {
        let plan = CountQuery::new("cc_text")
            .id("r1")
            .by("inst_id")
            .plan()
            .unwrap();
        assert!(plan.total);
        assert_eq!(plan.finish(plan.pipeline.run(sample())), Counts::Total(2));
    }

    #[test]
    fn count_plan_id_without_field_matches_primary_id() {
        let plan = CountQuery::new("cc_text").id("c").plan().unwrap();
        assert_eq!(plan.finish(plan.pipeline.run(sample())), Counts::Total(1));
    }

    #[test]
    fn count_plan_multi_field_uses_first() {
        let plan = CountQuery::new("cc_text")
            .by("conversion")
            .by("inst_id")
            .plan()
            .unwrap();
        let counts = plan.finish(plan.pipeline.run(sample()));
        assert_eq!(counts.get("fitz"), Some(2));
        assert_eq!(counts.get("paddleOCR"), Some(1));
    }

    #[test]
    fn counts_serialize_untagged() {
        assert_eq!(serde_json::to_value(Counts::Total(3)).unwrap(), json!(3));
        let grouped = Counts::Grouped(BTreeMap::from([("r1".to_string(), 2)]));
        assert_eq!(serde_json::to_value(&grouped).unwrap(), json!({"r1": 2}));
        assert_eq!(grouped.total(), 2);
    }
}
