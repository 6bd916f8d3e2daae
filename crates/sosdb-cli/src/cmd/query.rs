//! `sosdb collections|count|get|find` - read-only queries

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::Cell;

use sosdb_catalog::SosDb;
use sosdb_store::{BlobFetch, BlobSink, CountQuery, Counts, Filter, Metadata, TagField};

use super::{parse_tag, table};
use crate::progress::fmt_num;

#[derive(Args, Debug)]
pub struct CountArgs {
    /// Collection to count in
    #[arg(short, long)]
    pub collection: String,

    /// Group by tag field (inst_id, pdf_id, conversion)
    #[arg(long)]
    pub by: Vec<String>,

    /// Restrict to one id (primary id, or tag value when --by is given)
    #[arg(long)]
    pub id: Option<String>,

    /// Extra match filter as a JSON object, e.g. '{"metadata.year": 2020}'
    #[arg(long = "match")]
    pub filter: Option<String>,
}

#[derive(Args, Debug)]
pub struct GetArgs {
    /// Document id (or tag value with --tag)
    pub id: String,

    #[arg(short, long)]
    pub collection: String,

    /// Look up by tag field instead of primary id
    #[arg(long, value_parser = parse_tag)]
    pub tag: Option<TagField>,

    /// Save the payload of a large object into this directory
    #[arg(long)]
    pub save: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct FindArgs {
    /// Tag value to match
    pub value: String,

    #[arg(short, long)]
    pub collection: String,

    /// Tag field to match on
    #[arg(long, value_parser = parse_tag)]
    pub tag: TagField,
}

pub fn collections(db: &SosDb) -> Result<()> {
    let store = db.store();
    let names = store.collections()?;
    if names.is_empty() {
        eprintln!("No collections.");
        return Ok(());
    }

    let mut table = table(&["Collection", "Documents"]);
    let mut total = 0;
    for name in &names {
        let count = store.estimated_count(name)?;
        total += count;
        table.add_row(vec![Cell::new(name), Cell::new(fmt_num(count))]);
    }
    eprintln!("\n{table}");
    eprintln!(
        "{} collections, {} documents total",
        names.len(),
        fmt_num(total)
    );
    Ok(())
}

pub fn count(args: CountArgs, db: &SosDb) -> Result<()> {
    let mut query = CountQuery::new(&args.collection);
    for field in &args.by {
        query = query.by(field);
    }
    if let Some(id) = args.id {
        query = query.id(id);
    }
    if let Some(raw) = &args.filter {
        query = query.filter(parse_filter(raw)?);
    }

    match db.count(&query)? {
        Counts::Total(n) => println!("{n}"),
        Counts::Grouped(groups) => {
            let mut rows: Vec<_> = groups.into_iter().collect();
            rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

            let mut table = table(&[args.by[0].as_str(), "Count"]);
            for (key, n) in &rows {
                table.add_row(vec![Cell::new(key), Cell::new(fmt_num(*n))]);
            }
            eprintln!("\n{table}");
            eprintln!("{} groups", rows.len());
        }
    }
    Ok(())
}

fn parse_filter(raw: &str) -> Result<Filter> {
    let doc: Metadata =
        serde_json::from_str(raw).with_context(|| format!("--match is not a JSON object: {raw}"))?;
    Ok(Filter::from_match(&doc)?)
}

pub fn get(args: GetArgs, db: &SosDb) -> Result<()> {
    if let Some(dir) = &args.save {
        if let BlobFetch::Saved(path) =
            db.find_one_blob(&args.id, &args.collection, BlobSink::Disk(dir))?
        {
            eprintln!("Saved {}", path.display());
        }
        return Ok(());
    }

    let doc = db.find_one(&args.id, args.tag, &args.collection)?;
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

pub fn find(args: FindArgs, db: &SosDb) -> Result<()> {
    let docs = db.find(&args.value, args.tag, &args.collection)?;
    for doc in &docs {
        println!("{}", serde_json::to_string(doc)?);
    }
    log::info!(
        "{} documents with {} = {}",
        docs.len(),
        args.tag,
        args.value
    );
    Ok(())
}
