use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

use listing_store::batch::{BatchFormat, FileBatch, RecordSource};
use listing_store::logging::{init_logging, LogContext};
use listing_store::stats::{popular_titles, write_popular, PriceSummary};
use listing_store::{AppConfig, IdentityKey, RecordStore, Status};

#[derive(Parser)]
#[command(name = "lstore")]
#[command(about = "Incremental CSV store for scraped listings")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    verbose: bool,

    #[arg(short, long, global = true, help = "Configuration file path")]
    config: Option<PathBuf>,
}

/// Which store to operate on: a configured source, or an explicit file and key
#[derive(clap::Args, Clone)]
struct StoreArgs {
    #[arg(short, long, help = "Configured source name", conflicts_with_all = ["store", "key"])]
    source: Option<String>,

    #[arg(long, help = "Store CSV file", requires = "key")]
    store: Option<PathBuf>,

    #[arg(short, long, help = "Identity key, e.g. `link` or `title,year,price`")]
    key: Option<IdentityKey>,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge a scraped batch into a store
    Ingest {
        #[command(flatten)]
        target: StoreArgs,

        #[arg(short, long, help = "Batch file (.json, .jsonl, .ndjson or .csv)")]
        batch: PathBuf,

        #[arg(long, help = "Batch format (json, jsonl, csv); detected from the extension by default")]
        format: Option<BatchFormat>,
    },

    /// Show record and status counts of a store
    Show {
        #[command(flatten)]
        target: StoreArgs,
    },

    /// Summarize the price column of a store
    Stats {
        #[command(flatten)]
        target: StoreArgs,

        #[arg(long, default_value = "price", help = "Price column")]
        field: String,

        #[arg(long, default_value_t = 10, help = "Histogram bins")]
        bins: usize,
    },

    /// Rank the most frequent titles of a store
    Popular {
        #[command(flatten)]
        target: StoreArgs,

        #[arg(long, default_value = "title", help = "Title column")]
        field: String,

        #[arg(long, default_value_t = 10, help = "Number of titles to keep")]
        top: usize,

        #[arg(short, long, help = "Also write the ranking to this CSV file")]
        output: Option<PathBuf>,
    },

    /// Rewrite a store, collapsing duplicate keys left by earlier runs
    Compact {
        #[command(flatten)]
        target: StoreArgs,
    },

    /// List configured sources
    Sources,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path)?,
        None => AppConfig::load()?,
    };
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    init_logging(&config.logging)?;

    let context = LogContext::new("cli", "startup").with_string_field("version", env!("CARGO_PKG_VERSION"));
    listing_store::log_info!(context, "lstore starting");

    match cli.command {
        Commands::Ingest { target, batch, format } => ingest(&config, &target, batch, format),
        Commands::Show { target } => show(&config, &target),
        Commands::Stats { target, field, bins } => stats(&config, &target, &field, bins),
        Commands::Popular { target, field, top, output } => {
            popular(&config, &target, &field, top, output.as_deref())
        }
        Commands::Compact { target } => compact(&config, &target),
        Commands::Sources => list_sources(&config),
    }
}

fn resolve_store(config: &AppConfig, target: &StoreArgs) -> Result<RecordStore> {
    match (&target.source, &target.store, &target.key) {
        (Some(name), _, _) => config.store_for(name),
        (None, Some(path), Some(key)) => config.store_at(path.clone(), key.clone()),
        _ => Err(anyhow::anyhow!("Specify either --source or both --store and --key")),
    }
}

fn ingest(config: &AppConfig, target: &StoreArgs, batch: PathBuf, format: Option<BatchFormat>) -> Result<()> {
    let store = resolve_store(config, target)?;
    let mut source = match format {
        Some(format) => FileBatch::with_format(&batch, format),
        None => FileBatch::open(&batch)?,
    };
    let records = source
        .produce()
        .with_context(|| format!("Failed to read batch {}", batch.display()))?;
    info!("Batch '{}' has {} records", source.name(), records.len());

    let (merged, report) = store
        .ingest(records)
        .with_context(|| format!("Failed to update store {}", store.path().display()))?;

    println!("Store: {}", store.path().display());
    println!("Key:   {}", store.key());
    println!("{}", report);
    println!("{} records stored", merged.len());
    Ok(())
}

fn show(config: &AppConfig, target: &StoreArgs) -> Result<()> {
    let store = resolve_store(config, target)?;
    let set = store.load()?;

    println!("Store:    {}", store.path().display());
    println!("Key:      {}", store.key());
    println!("Columns:  {}", set.columns().join(", "));
    println!("Records:  {}", set.len());
    println!("  new:      {}", set.count_status(Some(Status::New)));
    println!("  existing: {}", set.count_status(Some(Status::Existing)));
    println!("  untagged: {}", set.count_status(None));
    Ok(())
}

fn stats(config: &AppConfig, target: &StoreArgs, field: &str, bins: usize) -> Result<()> {
    let store = resolve_store(config, target)?;
    let set = store.load()?;
    let summary = PriceSummary::from_records(set.records(), field);

    println!("{} prices parsed, {} unparsed", summary.count(), summary.unparsed);
    let (Some(min), Some(max), Some(mean), Some(median)) =
        (summary.min(), summary.max(), summary.mean(), summary.median())
    else {
        return Ok(());
    };
    println!("min {:.2}  max {:.2}  mean {:.2}  median {:.2}", min, max, mean, median);

    if let Some(bands) = summary.bands() {
        println!("Low  (<= {:.2}): {}", bands.edges[1], bands.low);
        println!("Mid  (<= {:.2}): {}", bands.edges[2], bands.mid);
        println!("High (>  {:.2}): {}", bands.edges[2], bands.high);
    }

    println!("{:>14} {:>14} {:>8}", "from", "to", "count");
    for bin in summary.histogram(bins) {
        println!("{:>14.2} {:>14.2} {:>8}", bin.lower, bin.upper, bin.count);
    }
    Ok(())
}

fn popular(config: &AppConfig, target: &StoreArgs, field: &str, top: usize, output: Option<&Path>) -> Result<()> {
    let store = resolve_store(config, target)?;
    let set = store.load()?;
    let ranking = popular_titles(set.records(), field, top);

    println!("{:<48} {:>9}", "Title", "Frequency");
    println!("{}", "-".repeat(58));
    for entry in &ranking {
        println!("{:<48} {:>9}", entry.title, entry.frequency);
    }

    if let Some(path) = output {
        write_popular(path, &ranking)?;
        info!("Popular titles written to {}", path.display());
    }
    Ok(())
}

fn compact(config: &AppConfig, target: &StoreArgs) -> Result<()> {
    let store = resolve_store(config, target)?;
    let set = store.load()?;
    store.save(&set)?;
    println!("{}: {} records", store.path().display(), set.len());
    Ok(())
}

fn list_sources(config: &AppConfig) -> Result<()> {
    if config.sources.is_empty() {
        println!("No sources configured");
        return Ok(());
    }

    println!("{:<24} {:<24} {}", "Name", "Key", "File");
    println!("{}", "-".repeat(72));
    for source in &config.sources {
        println!(
            "{:<24} {:<24} {}",
            source.name,
            source.key.to_string(),
            config.resolve(&source.file).display()
        );
    }
    Ok(())
}
