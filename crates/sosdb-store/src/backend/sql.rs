//! SQL generation for pipelines over the `documents` table.
//!
//! Filters and group keys compile to DuckDB JSON functions over the
//! serialized `body` column. Paths become JSON pointers (`metadata.year`
//! -> `/metadata/year`) embedded as escaped string literals; the only bound
//! parameter is the collection name.

use serde_json::Value;

use crate::query::{Filter, GroupKey, Pipeline};

const NUMERIC_TYPES: &str = "('BIGINT', 'UBIGINT', 'DOUBLE')";

/// Quote `s` as a SQL string literal.
fn literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Dotted document path as a quoted JSON pointer literal.
pub(super) fn pointer(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for seg in path.split('.') {
        out.push('/');
        out.push_str(&seg.replace('~', "~0").replace('/', "~1"));
    }
    literal(&out)
}

fn number(n: &serde_json::Number) -> Option<String> {
    n.as_f64().map(|f| format!("{f:?}::DOUBLE"))
}

/// Missing paths and JSON `null` both read as `NULL` here.
fn is_null(p: &str) -> String {
    format!("coalesce(json_type(body, {p}), 'NULL') = 'NULL'")
}

fn eq(p: &str, value: &Value) -> String {
    match value {
        Value::Null => is_null(p),
        Value::Bool(b) => format!(
            "(json_type(body, {p}) = 'BOOLEAN' AND json_extract_string(body, {p}) = '{b}')"
        ),
        Value::Number(n) => match number(n) {
            Some(n) => format!(
                "(json_type(body, {p}) IN {NUMERIC_TYPES} \
                 AND TRY_CAST(json_extract_string(body, {p}) AS DOUBLE) = {n})"
            ),
            None => "FALSE".to_string(),
        },
        Value::String(s) => format!(
            "(json_type(body, {p}) = 'VARCHAR' AND json_extract_string(body, {p}) = {})",
            literal(s)
        ),
        other => format!(
            "(CAST(json_extract(body, {p}) AS VARCHAR) = CAST(json({}) AS VARCHAR))",
            literal(&other.to_string())
        ),
    }
}

/// `op` is `>=` or `<=`.
fn bound(p: &str, op: &str, value: &Value) -> String {
    match value {
        Value::Number(n) => match number(n) {
            Some(n) => format!(
                "(json_type(body, {p}) IN {NUMERIC_TYPES} \
                 AND TRY_CAST(json_extract_string(body, {p}) AS DOUBLE) {op} {n})"
            ),
            None => "FALSE".to_string(),
        },
        Value::String(s) => format!(
            "(json_type(body, {p}) = 'VARCHAR' AND json_extract_string(body, {p}) {op} {})",
            literal(s)
        ),
        _ => "FALSE".to_string(),
    }
}

/// WHERE-clause expression for `filter`.
pub(super) fn condition(filter: &Filter) -> String {
    match filter {
        Filter::All => "TRUE".to_string(),
        Filter::Id(id) => format!("id = {}", literal(id)),
        Filter::Tag { field, value } => eq(&pointer(&field.metadata_path()), value),
        Filter::Eq { path, value } => eq(&pointer(path), value),
        Filter::Exists { path } => format!("NOT ({})", is_null(&pointer(path))),
        Filter::Ne { path, value } => {
            format!("NOT coalesce({}, FALSE)", eq(&pointer(path), value))
        }
        Filter::Range { path, gte, lte } => {
            let p = pointer(path);
            let parts: Vec<String> = [(">=", gte), ("<=", lte)]
                .into_iter()
                .filter_map(|(op, v)| v.as_ref().map(|v| bound(&p, op, v)))
                .collect();
            join(&parts, " AND ", "TRUE")
        }
        Filter::In { path, values } => {
            let p = pointer(path);
            let parts: Vec<String> = values.iter().map(|v| eq(&p, v)).collect();
            join(&parts, " OR ", "FALSE")
        }
        Filter::And(parts) => {
            let parts: Vec<String> = parts.iter().map(condition).collect();
            join(&parts, " AND ", "TRUE")
        }
    }
}

fn join(parts: &[String], sep: &str, empty: &str) -> String {
    if parts.is_empty() {
        empty.to_string()
    } else {
        format!("({})", parts.join(sep))
    }
}

/// Matching `oid, body` rows in insertion order. Binds the collection.
pub(super) fn select_records(pipeline: &Pipeline) -> String {
    let mut sql = format!(
        "SELECT oid, body FROM documents WHERE collection = ? AND {} ORDER BY oid",
        condition(pipeline.match_filter())
    );
    if let Some(n) = pipeline.row_limit() {
        sql.push_str(&format!(" LIMIT {n}"));
    }
    sql
}

/// One row per distinct key: the JSON text of each key column (`'null'` when
/// missing) followed by the count. Binds the collection. Ordering and the
/// limit are applied by [`Pipeline::collect_groups`].
pub(super) fn select_groups(pipeline: &Pipeline, key: &GroupKey) -> String {
    let columns: Vec<String> = key
        .paths()
        .iter()
        .enumerate()
        .map(|(i, path)| {
            format!(
                "coalesce(CAST(json_extract(body, {}) AS VARCHAR), 'null') AS k{i}",
                pointer(path)
            )
        })
        .collect();
    format!(
        "SELECT {}, count(*) AS n FROM documents WHERE collection = ? AND {} GROUP BY ALL",
        columns.join(", "),
        condition(pipeline.match_filter())
    )
}

/// Seeded reservoir sample, returned in insertion order. Binds the
/// collection.
pub(super) fn select_sample(n: usize, seed: u64) -> String {
    format!(
        "WITH docs AS (SELECT oid, body FROM documents WHERE collection = ?) \
         SELECT oid, body FROM docs USING SAMPLE reservoir({n} ROWS) REPEATABLE ({seed}) \
         ORDER BY oid"
    )
}
