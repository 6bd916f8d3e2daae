//! `sosdb export` - static JSON files for the frontend

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Subcommand};

use sosdb_catalog::{Exporter, SosDb};

#[derive(Args, Debug)]
pub struct ExportArgs {
    #[command(subcommand)]
    pub action: ExportAction,

    /// Output directory (default: <data_root>/exports)
    #[arg(short, long, global = true)]
    pub out: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum ExportAction {
    /// Document counts per collection -> collection_stats.json
    Stats,
    /// Random sample of N documents -> <collection>_sample.json
    Sample {
        #[arg(short, long, default_value = "papers")]
        collection: String,

        #[arg(short, long, default_value_t = 10_000)]
        limit: usize,

        /// Random seed; the same seed re-draws the same sample
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Counts per (venue, year) -> venue_timeline.json
    Timeline {
        #[arg(short, long, default_value = "papers")]
        collection: String,

        #[arg(long, default_value = "metadata.venue")]
        venue: String,

        #[arg(long, default_value = "metadata.year")]
        year: String,
    },
    /// All of the above with defaults
    All,
}

pub fn run(args: ExportArgs, db: &SosDb, default_dir: &Path) -> Result<()> {
    let dir = args.out.as_deref().unwrap_or(default_dir);
    let exporter = Exporter::new(db, dir);

    match args.action {
        ExportAction::Stats => stats(&exporter),
        ExportAction::Sample {
            collection,
            limit,
            seed,
        } => sample(&exporter, &collection, limit, seed),
        ExportAction::Timeline {
            collection,
            venue,
            year,
        } => timeline(&exporter, &collection, &venue, &year),
        ExportAction::All => {
            stats(&exporter)?;
            sample(&exporter, "papers", 10_000, 42)?;
            if let Err(e) = timeline(&exporter, "papers", "metadata.venue", "metadata.year") {
                log::warn!("skipping venue timeline: {e}");
            }
            Ok(())
        }
    }
}

fn stats(exporter: &Exporter<'_>) -> Result<()> {
    let export = exporter.collection_stats()?;
    let path = exporter.write("collection_stats", &export)?;
    eprintln!("Wrote {} ({} collections)", path.display(), export.count);
    Ok(())
}

fn sample(exporter: &Exporter<'_>, collection: &str, limit: usize, seed: u64) -> Result<()> {
    let export = exporter.sample(collection, limit, seed)?;
    let path = exporter.write(&format!("{collection}_sample"), &export)?;
    eprintln!("Wrote {} ({} documents)", path.display(), export.count);
    Ok(())
}

fn timeline(exporter: &Exporter<'_>, collection: &str, venue: &str, year: &str) -> Result<()> {
    let export = exporter.venue_timeline(collection, venue, year)?;
    let path = exporter.write("venue_timeline", &export)?;
    eprintln!("Wrote {} ({} rows)", path.display(), export.count);
    Ok(())
}
