use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use mbox_indexer::{
    BulkSink, DryRunSink, FileConfig, IngestConfig, IngestPipeline, MeilisearchSink, SinkConfig,
    init_logger,
};

#[derive(Parser, Debug)]
#[command(
    name = "mbox-indexer",
    about = "Index the sender, domain and date of every message in an mbox file"
)]
struct Args {
    /// TOML file with defaults for every other setting.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Mailbox file to read (`.gz` files are decompressed on the fly).
    #[arg(long, env = "MBOX_PATH")]
    mbox: Option<PathBuf>,

    /// Messages per batch.
    #[arg(long)]
    batch: Option<usize>,

    /// Number of indexing workers (defaults to the CPU count).
    #[arg(long)]
    threads: Option<usize>,

    /// Batches buffered between the reader and the workers.
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Target index.
    #[arg(long)]
    index: Option<String>,

    /// Drop and recreate the index before ingesting.
    #[arg(long)]
    init: bool,

    /// Parse everything but write nothing.
    #[arg(long, conflicts_with = "init")]
    dry_run: bool,
}

impl Args {
    fn ingest_config(&self, file: &FileConfig) -> IngestConfig {
        let mut config = IngestConfig::from_sources(file);
        if let Some(batch) = self.batch {
            config.batch_size = batch;
        }
        if let Some(threads) = self.threads {
            config.worker_count = threads;
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if let Some(index) = &self.index {
            config.collection = index.clone();
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();

    let args = Args::parse();
    let file = match &args.config {
        Some(path) => {
            log::info!("loading settings from {}", path.display());
            FileConfig::from_file(path)?
        }
        None => FileConfig::default(),
    };

    let Some(mbox) = args.mbox.clone().or_else(|| file.mbox.clone()) else {
        writeln!(
            io::stderr(),
            "error: no mailbox given (use --mbox, MBOX_PATH or `mbox` in the config file)"
        )?;
        std::process::exit(2);
    };

    let config = args.ingest_config(&file);
    config.validate()?;

    let sink: Arc<dyn BulkSink> = if args.dry_run {
        log::info!("dry run: documents will not be written");
        Arc::new(DryRunSink::new())
    } else {
        let sink_config = SinkConfig::from_sources(&file);
        let sink = MeilisearchSink::new(sink_config, config.collection.clone())?;
        if args.init {
            log::info!("resetting index '{}'", sink.index_uid());
            sink.reset_collection().await?;
        }
        sink.ensure_collection().await?;
        Arc::new(sink)
    };

    let report = IngestPipeline::new(config, sink)?
        .run_path(&mbox)
        .await?;

    log::info!(
        "Processed {} messages ({} indexed, {} skipped); sink wrote {} of {} documents in {} requests",
        report.stats.total_slots(),
        report.stats.indexed(),
        report.stats.skipped(),
        report.sink.flushed,
        report.sink.added,
        report.sink.requests
    );

    Ok(())
}
