//! `sosdb delete` - remove documents (dry-run unless --confirm)

use anyhow::Result;
use clap::Args;
use comfy_table::Cell;

use sosdb_catalog::SosDb;
use sosdb_store::TagField;

use super::{parse_tag, table};

#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Document id, or tag value with --tag
    pub value: String,

    #[arg(short, long)]
    pub collection: String,

    /// Delete every document whose tag field equals the value
    #[arg(long, value_parser = parse_tag)]
    pub tag: Option<TagField>,

    /// Actually delete (otherwise dry-run)
    #[arg(long)]
    pub confirm: bool,
}

pub fn run(args: DeleteArgs, db: &SosDb) -> Result<()> {
    if !args.confirm {
        return preview(&args, db);
    }

    match args.tag {
        Some(tag) => {
            let removed = db.delete_all(&args.value, tag, &args.collection)?;
            eprintln!(
                "Removed {removed} documents with {tag} = {} from {}",
                args.value, args.collection
            );
        }
        None => {
            db.delete_one(&args.value, &args.collection)?;
            eprintln!("Removed {} from {}", args.value, args.collection);
        }
    }
    Ok(())
}

fn preview(args: &DeleteArgs, db: &SosDb) -> Result<()> {
    let ids: Vec<String> = match args.tag {
        Some(tag) => db
            .store()
            .find(&args.value, tag, &args.collection)?
            .into_iter()
            .map(|r| r.document.id)
            .collect(),
        None => db
            .store()
            .find_one(&args.value, &args.collection, None)?
            .into_iter()
            .map(|r| r.document.id)
            .collect(),
    };

    if ids.is_empty() {
        eprintln!("Nothing to remove.");
        return Ok(());
    }

    let mut table = table(&["Id", "Collection"]);
    for id in &ids {
        table.add_row(vec![Cell::new(id), Cell::new(&args.collection)]);
    }
    eprintln!("\n{table}");
    eprintln!(
        "{} documents would be removed. Run with --confirm to delete.",
        ids.len()
    );
    Ok(())
}
