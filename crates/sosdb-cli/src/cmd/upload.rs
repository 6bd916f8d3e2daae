//! `sosdb upload|put` - bulk JSON Lines ingest and single binary uploads

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Args;
use flate2::read::MultiGzDecoder;
use serde_json::Value;

use sosdb_catalog::SosDb;
use sosdb_store::document::RESERVED_KEYS;
use sosdb_store::{Body, Document, Metadata};

use crate::progress::{ProgressContext, fmt_num};

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// JSON Lines files or glob patterns (`.gz` is decompressed)
    #[arg(required = true)]
    pub inputs: Vec<String>,

    #[arg(short, long)]
    pub collection: String,

    /// Field holding the document id
    #[arg(long, default_value = "id")]
    pub id_field: String,

    /// Field stored as the document text instead of metadata
    #[arg(long)]
    pub text_field: Option<String>,
}

#[derive(Args, Debug)]
pub struct PutArgs {
    /// File to store
    pub file: PathBuf,

    /// Large-object collection (e.g. cc_pdf, cc_png)
    #[arg(short, long)]
    pub collection: String,

    /// Document id (default: file stem)
    #[arg(long)]
    pub id: Option<String>,

    /// Metadata as a JSON object
    #[arg(long)]
    pub meta: Option<String>,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Tally {
    inserted: u64,
    merged: u64,
    skipped: u64,
}

pub fn run(args: UploadArgs, db: &SosDb, progress: &ProgressContext) -> Result<()> {
    if db.store().layout().is_large_object(&args.collection) {
        bail!(
            "{} holds binary payloads; use `sosdb put` instead",
            args.collection
        );
    }

    let files = resolve_inputs(&args.inputs)?;
    let mut total = Tally::default();
    for path in &files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let pb = progress.file_bar(&name);
        let tally = upload_file(path, &args, db, |n| pb.set_position(n))?;
        pb.finish_and_clear();
        log::info!(
            "{name}: {} inserted, {} merged, {} skipped",
            fmt_num(tally.inserted),
            fmt_num(tally.merged),
            fmt_num(tally.skipped)
        );
        total.inserted += tally.inserted;
        total.merged += tally.merged;
        total.skipped += tally.skipped;
    }

    eprintln!(
        "Uploaded {} files into {}: {} inserted, {} merged, {} skipped",
        files.len(),
        args.collection,
        fmt_num(total.inserted),
        fmt_num(total.merged),
        fmt_num(total.skipped)
    );
    Ok(())
}

/// Expand glob patterns; plain paths pass through.
fn resolve_inputs(inputs: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        let path = Path::new(input);
        if path.is_file() {
            files.push(path.to_path_buf());
            continue;
        }
        let matched: Vec<PathBuf> = glob::glob(input)
            .with_context(|| format!("Invalid glob pattern: {input}"))?
            .filter_map(|entry| entry.ok())
            .filter(|p| p.is_file())
            .collect();
        if matched.is_empty() {
            bail!("No input files match {input}");
        }
        files.extend(matched);
    }
    files.sort();
    files.dedup();
    Ok(files)
}

fn open_lines(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader: Box<dyn Read> = if path.extension().is_some_and(|e| e == "gz") {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(Box::new(BufReader::new(reader)))
}

fn upload_file(
    path: &Path,
    args: &UploadArgs,
    db: &SosDb,
    on_progress: impl Fn(u64),
) -> Result<Tally> {
    let mut tally = Tally::default();
    for (lineno, line) in open_lines(path)?.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let doc = match parse_line(&line, &args.collection, &args.id_field, args.text_field.as_deref()) {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                log::warn!(
                    "{}:{}: no `{}` field, skipped",
                    path.display(),
                    lineno + 1,
                    args.id_field
                );
                tally.skipped += 1;
                continue;
            }
            Err(e) => {
                log::warn!("{}:{}: {e}", path.display(), lineno + 1);
                tally.skipped += 1;
                continue;
            }
        };
        match db.upload(&doc)? {
            Some(_) => tally.inserted += 1,
            None => tally.merged += 1,
        }
        on_progress(tally.inserted + tally.merged);
    }
    Ok(tally)
}

/// One JSON object per line. Returns `None` when the id field is missing
/// or not a string/number.
fn parse_line(
    line: &str,
    collection: &str,
    id_field: &str,
    text_field: Option<&str>,
) -> Result<Option<Document>> {
    let Value::Object(mut obj) = serde_json::from_str::<Value>(line)? else {
        bail!("line is not a JSON object");
    };
    let id = match obj.get(id_field) {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Ok(None),
    };

    let mut doc = Document::new(id, collection);
    if let Some(field) = text_field {
        match obj.remove(field) {
            Some(Value::String(text)) => doc.body = Body::Text(text),
            Some(Value::Null) | None => {}
            Some(other) => doc.body = Body::Text(other.to_string()),
        }
    }
    obj.retain(|k, _| !RESERVED_KEYS.contains(&k.as_str()));
    Ok(Some(doc.with_metadata(obj)))
}

pub fn put(args: PutArgs, db: &SosDb) -> Result<()> {
    if !db.store().layout().is_large_object(&args.collection) {
        bail!("{} is not a large-object collection", args.collection);
    }
    let id = match args.id {
        Some(id) => id,
        None => args
            .file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .with_context(|| format!("Cannot derive an id from {}", args.file.display()))?,
    };
    let data = std::fs::read(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let metadata: Metadata = match &args.meta {
        Some(raw) => serde_json::from_str(raw)
            .with_context(|| format!("--meta is not a JSON object: {raw}"))?,
        None => Metadata::new(),
    };

    let len = data.len();
    let doc = Document::binary(&id, &args.collection, data).with_metadata(metadata);
    match db.upload(&doc)? {
        Some(_) => eprintln!("Stored {id} in {} ({len} bytes)", args.collection),
        None => eprintln!("{id} already in {}, metadata merged", args.collection),
    }
    Ok(())
}
