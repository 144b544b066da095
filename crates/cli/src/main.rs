mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use photomanager_core::hasher::Algorithm;
use photomanager_core::storage::StorageClass;

/// PhotoManager: content-addressed archival for photo and video libraries
#[derive(Parser)]
#[command(name = "photomanager", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a catalog. Save a new version if it already exists
    Create(CreateCmd),
    /// Index and add items to the catalog
    Index(IndexCmd),
    /// Collect highest-priority items into storage
    Collect(CollectCmd),
    /// Index items and collect them to storage
    Import(ImportCmd),
    /// Verify checksums of stored items
    Verify(VerifyCmd),
    /// Remove lower-priority alternatives of stored items
    Clean(CleanCmd),
    /// Show catalog statistics
    Stats(StatsCmd),
}

#[derive(Args)]
pub struct CreateCmd {
    /// Catalog filepath (.json); add .zst or .gz to compress
    #[arg(long, default_value = "photos.json")]
    pub db: PathBuf,
    /// Hash algorithm for file checksums
    #[arg(long, default_value = "blake2b-256")]
    pub hash_algorithm: Algorithm,
    /// Timezone for timezone-naive photos (e.g. "-0400", default "local")
    #[arg(long, default_value = "local")]
    pub timezone_default: String,
    /// Run in debug mode
    #[arg(long)]
    pub debug: bool,
}

#[derive(Args)]
pub struct IndexCmd {
    /// Catalog filepath (.json); add .zst or .gz to compress
    #[arg(long, default_value = "photos.json")]
    pub db: PathBuf,
    /// Directory to index
    #[arg(long)]
    pub source: Option<PathBuf>,
    /// Single file to index
    #[arg(long)]
    pub file: Option<PathBuf>,
    /// Paths (directories or files) to index
    pub paths: Vec<PathBuf>,
    /// Basename glob patterns to exclude (repeatable)
    #[arg(long)]
    pub exclude: Vec<String>,
    /// Don't index files that are already in the catalog
    #[arg(long)]
    pub skip_existing: bool,
    /// Priority of indexed photos (lower is preferred)
    #[arg(long, default_value_t = 10)]
    pub priority: i32,
    /// Timezone for timezone-naive photos, overriding the catalog default
    #[arg(long)]
    pub timezone_default: Option<String>,
    /// Class of storage medium
    #[arg(long, default_value = "HDD")]
    pub storage_type: StorageClass,
    /// Print per-path results to stdout as JSON
    #[arg(long)]
    pub dump: bool,
    /// Perform a dry run that makes no changes
    #[arg(long)]
    pub dry_run: bool,
    /// Run in debug mode
    #[arg(long)]
    pub debug: bool,
}

#[derive(Args)]
pub struct CollectCmd {
    /// Catalog filepath
    #[arg(long, default_value = "photos.json")]
    pub db: PathBuf,
    /// Photo storage base directory
    #[arg(long)]
    pub destination: PathBuf,
    /// Also save a catalog copy within the destination
    #[arg(long)]
    pub collect_db: bool,
    /// Perform a dry run that makes no changes
    #[arg(long)]
    pub dry_run: bool,
    /// Run in debug mode
    #[arg(long)]
    pub debug: bool,
}

#[derive(Args)]
pub struct ImportCmd {
    #[command(flatten)]
    pub index: IndexCmd,
    /// Photo storage base directory
    #[arg(long)]
    pub destination: PathBuf,
    /// Also save a catalog copy within the destination
    #[arg(long)]
    pub collect_db: bool,
}

#[derive(Args)]
pub struct VerifyCmd {
    /// Catalog filepath
    #[arg(long, default_value = "photos.json")]
    pub db: PathBuf,
    /// Photo storage base directory
    #[arg(long)]
    pub destination: PathBuf,
    /// Verify only items within this subdirectory
    #[arg(long, default_value = "")]
    pub subdir: String,
    /// Class of storage medium
    #[arg(long, default_value = "HDD")]
    pub storage_type: StorageClass,
    /// Verify a randomly sampled fraction of the stored photos
    #[arg(long)]
    pub random_fraction: Option<f64>,
    /// Run in debug mode
    #[arg(long)]
    pub debug: bool,
}

#[derive(Args)]
pub struct CleanCmd {
    /// Catalog filepath
    #[arg(long, default_value = "photos.json")]
    pub db: PathBuf,
    /// Photo storage base directory
    #[arg(long)]
    pub destination: PathBuf,
    /// Remove only items within this subdirectory
    #[arg(long, default_value = "")]
    pub subdir: String,
    /// Perform a dry run that makes no changes
    #[arg(long)]
    pub dry_run: bool,
    /// Run in debug mode
    #[arg(long)]
    pub debug: bool,
}

#[derive(Args)]
pub struct StatsCmd {
    /// Catalog filepath
    #[arg(long, default_value = "photos.json")]
    pub db: PathBuf,
}

/// Reconstructed argv recorded into the catalog's command history.
pub(crate) fn history_argv() -> Vec<String> {
    let mut argv = vec!["photomanager".to_string()];
    argv.extend(std::env::args().skip(1));
    argv
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Create(cmd) => commands::create::run(cmd),
        Commands::Index(cmd) => commands::index::run(cmd),
        Commands::Collect(cmd) => commands::collect::run(cmd),
        Commands::Import(cmd) => commands::import::run(cmd),
        Commands::Verify(cmd) => commands::verify::run(cmd),
        Commands::Clean(cmd) => commands::clean::run(cmd),
        Commands::Stats(cmd) => commands::stats::run(cmd),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
