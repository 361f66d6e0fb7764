//! cairn: command-line front end for the address-clustering engine.
//!
//! Clusters co-spent addresses from a JSON-lines block feed into a RocksDB
//! store, exports the final address → label table, and annotates blocks with
//! ledger rows and change-output flags.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use cairn_core::ledger::LedgerAnnotator;
use cairn_core::traits::{LabelLookup, TransactionSource};
use cairn_forest::ClusterStore;
use cairn_node_lib::labels::{load_label_table, CsvClusterSink, LedgerCsvWriter};
use cairn_node_lib::{ClusterConfig, ClusterExporter, ClusteringDriver, JsonlSource, RocksBackend};

/// Persistent address clustering and change detection.
#[derive(Parser, Debug)]
#[command(name = "cairn", version, about = "Cluster addresses by common input ownership")]
struct Cli {
    /// Optional TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory (overrides config and CAIRN_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Cluster co-spent input addresses over a block-height range.
    Cluster(ClusterArgs),
    /// Write the final address,label table.
    Export(ExportArgs),
    /// Write ledger rows with change flags for a block-height range.
    Annotate(AnnotateArgs),
    /// Show store size and the last checkpoint.
    Status,
    /// Delete the cluster store.
    Reset {
        /// Confirm deletion.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args, Debug)]
struct ClusterArgs {
    /// JSON-lines block feed.
    #[arg(long)]
    blocks: PathBuf,

    /// First height to cluster.
    #[arg(long, default_value_t = 0)]
    start: u64,

    /// Height to stop before.
    #[arg(long)]
    end: u64,

    /// Blocks per batch (overrides config).
    #[arg(long)]
    batch_blocks: Option<u64>,

    /// address,label CSV applied before clustering.
    #[arg(long)]
    seed_labels: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ExportArgs {
    /// Output CSV path.
    #[arg(short, long)]
    out: PathBuf,
}

#[derive(Args, Debug)]
struct AnnotateArgs {
    /// JSON-lines block feed.
    #[arg(long)]
    blocks: PathBuf,

    #[arg(long, default_value_t = 0)]
    start: u64,

    #[arg(long)]
    end: u64,

    /// address,label CSV to resolve labels from instead of the store.
    #[arg(long)]
    labels: Option<PathBuf>,

    /// Output CSV path.
    #[arg(short, long)]
    out: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ClusterConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    init_logging(&config.log_level, &cli.log_format);

    match cli.command {
        Commands::Cluster(args) => cluster(config, args).await,
        Commands::Export(args) => export(&config, args),
        Commands::Annotate(args) => annotate(&config, args),
        Commands::Status => status(&config),
        Commands::Reset { yes } => reset(&config, yes),
    }
}

fn open_store(config: &ClusterConfig) -> Result<ClusterStore<RocksBackend>> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
    let backend = RocksBackend::open(config.db_path())
        .with_context(|| format!("opening {}", config.db_path().display()))?;
    let mut store = ClusterStore::open(Arc::new(backend))?;
    store.set_max_resident_pages(config.max_resident_pages);
    Ok(store)
}

/// Run the clustering driver on a blocking thread; Ctrl+C stops it at the
/// next batch boundary.
async fn cluster(mut config: ClusterConfig, args: ClusterArgs) -> Result<()> {
    if let Some(batch_blocks) = args.batch_blocks {
        config.batch_blocks = batch_blocks;
    }
    config.validate()?;

    let mut store = open_store(&config)?;
    if let Some(path) = &args.seed_labels {
        let table = load_label_table(path)?;
        store.seed_labels(table)?;
        store.flush()?;
    }

    let source = JsonlSource::open(&args.blocks)
        .with_context(|| format!("opening block feed {}", args.blocks.display()))?;
    let mut driver = ClusteringDriver::new(store, source, &config);
    let cancel = driver.cancel_flag();

    let (start, end) = (args.start, args.end);
    let mut task = tokio::task::spawn_blocking(move || driver.run(start, end));

    let report = tokio::select! {
        joined = &mut task => joined?,
        _ = tokio::signal::ctrl_c() => {
            warn!("received Ctrl+C, stopping after the current batch");
            cancel.store(true, Ordering::SeqCst);
            task.await?
        }
    }?;

    info!(
        started_at = report.started_at,
        last_block_processed = report.last_block_processed,
        batches = report.batches,
        handles = report.handle_count,
        merges = report.stats.merges,
        cancelled = report.cancelled,
        "clustering finished"
    );
    Ok(())
}

fn export(config: &ClusterConfig, args: ExportArgs) -> Result<()> {
    let mut store = open_store(config)?;
    let mut sink = CsvClusterSink::create(&args.out)
        .with_context(|| format!("creating {}", args.out.display()))?;
    let report = ClusterExporter::from_config(config).export(&mut store, &mut sink)?;
    println!(
        "exported {} addresses ({} new labels) to {}",
        report.addresses,
        report.generated_labels,
        args.out.display()
    );
    Ok(())
}

fn annotate(config: &ClusterConfig, args: AnnotateArgs) -> Result<()> {
    if args.start > args.end {
        bail!("start {} is after end {}", args.start, args.end);
    }
    let out = File::create(&args.out).with_context(|| format!("creating {}", args.out.display()))?;
    let writer = LedgerCsvWriter::new(out)?;
    let source = JsonlSource::open(&args.blocks)
        .with_context(|| format!("opening block feed {}", args.blocks.display()))?;

    let rows = match &args.labels {
        Some(path) => {
            let mut table: HashMap<String, String> = load_label_table(path)?;
            write_ledger(config, source, &mut table, writer, args.start, args.end)?
        }
        None => {
            let mut store = open_store(config)?;
            write_ledger(config, source, &mut store, writer, args.start, args.end)?
        }
    };
    println!("wrote {rows} ledger rows to {}", args.out.display());
    Ok(())
}

fn write_ledger<S: TransactionSource, W: Write>(
    config: &ClusterConfig,
    mut source: S,
    labels: &mut impl LabelLookup,
    mut writer: LedgerCsvWriter<W>,
    start: u64,
    end: u64,
) -> Result<u64> {
    let mut rows = 0u64;
    let mut from = start;
    while from < end {
        let to = from.saturating_add(config.batch_blocks).min(end);
        for block in source.blocks(from, to)? {
            let events = LedgerAnnotator::annotate_block(&block, labels)?;
            rows += events.len() as u64;
            writer.write_all(&events)?;
        }
        from = to;
    }
    writer.finish()?;
    Ok(rows)
}

fn status(config: &ClusterConfig) -> Result<()> {
    let store = open_store(config)?;
    println!("data_dir:  {}", config.data_dir.display());
    println!("handles:   {}", store.handle_count());
    println!("capacity:  {}", store.capacity());
    println!(
        "disk:      {:.1} MiB",
        store.backend().estimated_live_bytes()? as f64 / (1024.0 * 1024.0)
    );
    match store.last_checkpoint()? {
        Some(checkpoint) => {
            let written = chrono::DateTime::from_timestamp(checkpoint.written_at, 0)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| checkpoint.written_at.to_string());
            println!("resume at: {}", checkpoint.last_block_processed);
            println!("forest:    {:.1} MiB", checkpoint.storage_mib());
            println!("written:   {written}");
        }
        None => println!("resume at: (no checkpoint)"),
    }
    Ok(())
}

fn reset(config: &ClusterConfig, yes: bool) -> Result<()> {
    let path = config.db_path();
    if !yes {
        bail!("refusing to delete {} without --yes", path.display());
    }
    RocksBackend::destroy(&path).with_context(|| format!("destroying {}", path.display()))?;
    println!("deleted {}", path.display());
    Ok(())
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// Pass `format = "json"` for structured JSON output. Any other value
/// defaults to human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
