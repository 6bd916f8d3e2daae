//! sosdb - CLI for the science-of-science catalog database
//!
//! Thin front end over `sosdb-catalog`: counts, lookups, deletes, bulk
//! JSON Lines uploads and static JSON exports for the frontend.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

mod cmd;
mod config;
mod logging;
mod progress;

use config::{Config, Environment};
use progress::ProgressContext;
use sosdb_catalog::SosDb;
use sosdb_store::{Connection, Layout};

#[derive(Parser)]
#[command(name = "sosdb")]
#[command(about = "Catalog storage for the science-of-science corpus")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file path (default: ./sosdb.toml or ~/.config/sosdb/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Database URI (memory, duckdb://<path>, or a path); overrides config
    #[arg(long, global = true)]
    uri: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// List collections with document counts
    Collections,
    /// Count documents, optionally grouped by a tag field
    Count(cmd::query::CountArgs),
    /// Fetch one document (or save a large object to disk)
    Get(cmd::query::GetArgs),
    /// Find all documents with a tag value
    Find(cmd::query::FindArgs),
    /// Delete one document, or every document with a tag value
    Delete(cmd::delete::DeleteArgs),
    /// Upload JSON Lines files (plain or gzip) into a collection
    Upload(cmd::upload::UploadArgs),
    /// Store a binary file in a large-object collection
    Put(cmd::upload::PutArgs),
    /// Write static JSON exports for the frontend
    Export(cmd::export::ExportArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let progress = ProgressContext::new();
    let multi = progress.is_tty().then(|| progress.multi());
    logging::init_logging(cli.quiet, cli.debug, multi);

    let config = if let Some(path) = &cli.config {
        Config::from_file(path)?
    } else {
        Config::load()?
    };
    let env = Environment::detect();

    if let Command::Config = cli.command {
        cmd::show_config(&config, env);
        return Ok(());
    }

    let uri = cli.uri.unwrap_or_else(|| config.database_uri(env));
    let conn = Connection::open(&uri).with_context(|| format!("Failed to open database {uri}"))?;
    if !conn.ping() {
        anyhow::bail!("database {} is not reachable", conn.describe());
    }
    let db = SosDb::new(
        &conn,
        Layout::new(config.storage.large_object_collections.iter().cloned()),
    );

    match cli.command {
        Command::Collections => cmd::query::collections(&db),
        Command::Count(args) => cmd::query::count(args, &db),
        Command::Get(args) => cmd::query::get(args, &db),
        Command::Find(args) => cmd::query::find(args, &db),
        Command::Delete(args) => cmd::delete::run(args, &db),
        Command::Upload(args) => cmd::upload::run(args, &db, &progress),
        Command::Put(args) => cmd::upload::put(args, &db),
        Command::Export(args) => cmd::export::run(args, &db, &config.export_dir(env)),
        Command::Config => Ok(()),
    }
}
