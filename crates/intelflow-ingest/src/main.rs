//! Intelflow ingestion daemon.
//!
//! This is the main entry point for the feed aggregation service. It reads
//! topic-tagged frames from a file (or stdin), classifies and expands each
//! one, and maintains the derived aggregate state: contribution scores,
//! day-bucketed counters, geo indexes, and the rank-requirement ledger.
//!
//! # Usage
//!
//! ```bash
//! # Replay a frame file
//! intelflow-ingest --input ./frames.txt --geo-table ./geo.json
//!
//! # Consume a transport bridge on stdin, writing notifications out
//! bridge | intelflow-ingest --publish-out ./notifications.jsonl
//! ```
//!
//! # Graceful Shutdown
//!
//! The daemon handles SIGINT (Ctrl+C): the current frame finishes, the
//! outbound writer drains, and a summary is printed before exit.

use anyhow::{Context, Result};
use clap::Parser;
use intelflow_core::metrics::{init_metrics, start_metrics_server};
use intelflow_ingest::{
    Config, Dispatcher, FileSource, FrameSource, GeoResolver, MemoryStore, OutboundWriter,
    Publisher, SourceOptions, SourceStats, StaticResolver, StdinSource, TracingPublisher,
};
use metrics::gauge;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Intelflow ingestion daemon.
#[derive(Parser, Debug)]
#[command(name = "intelflow-ingest")]
#[command(about = "Threat-intelligence feed aggregation daemon")]
#[command(version)]
struct Args {
    /// Input file or directory of newline-delimited frames (omit for stdin)
    #[arg(long, short)]
    input: Option<PathBuf>,

    /// Feed name stamped into outbound envelopes
    #[arg(long, default_value = "intelflow default feed")]
    feed_name: String,

    /// JSON geo table for the static resolver
    #[arg(long)]
    geo_table: Option<PathBuf>,

    /// Write published notification envelopes to this JSONL file
    #[arg(long)]
    publish_out: Option<PathBuf>,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, default_value = "9090")]
    metrics_port: u16,

    /// Abort on unknown topics instead of dropping them
    #[arg(long)]
    strict_topics: bool,

    /// Abort on the first malformed frame instead of skipping it
    #[arg(long)]
    no_skip_errors: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap())
                .add_directive("intelflow_ingest=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    tracing::info!("Intelflow ingestion daemon starting...");

    // Initialize metrics
    if args.metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(args.metrics_port, metrics_handle).await?;
        gauge!("ingest_running").set(1.0);
    }

    // Set up graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received, stopping gracefully...");
        running_clone.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let config = Config::from_env()?;

    // Resolver: static table when provided, otherwise everything is a miss
    let resolver: Arc<dyn GeoResolver> = match &args.geo_table {
        Some(path) => Arc::new(
            StaticResolver::from_file(path)
                .with_context(|| format!("Failed to load geo table {}", path.display()))?,
        ),
        None => {
            tracing::warn!("No geo table configured, network indicators will not be enriched");
            Arc::new(StaticResolver::empty())
        }
    };

    // Publisher: outbound JSONL writer when configured, log lines otherwise
    let (publisher, writer): (Arc<dyn Publisher>, Option<OutboundWriter>) =
        match &args.publish_out {
            Some(path) => {
                let (publisher, writer) = OutboundWriter::spawn(path)
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                (Arc::new(publisher), Some(writer))
            }
            None => (Arc::new(TracingPublisher), None),
        };

    let store = Arc::new(MemoryStore::new());

    tracing::info!("Configuration:");
    tracing::info!("  Feed name: {}", args.feed_name);
    tracing::info!(
        "  Input: {}",
        args.input
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "stdin".to_string())
    );
    tracing::info!(
        "  Geo table: {}",
        args.geo_table
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "disabled".to_string())
    );
    tracing::info!(
        "  Publish out: {}",
        args.publish_out
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "log only".to_string())
    );

    let mut dispatcher = Dispatcher::new(
        config,
        args.feed_name.clone(),
        store,
        publisher,
        resolver,
    );

    let options = SourceOptions {
        continue_on_error: !args.no_skip_errors,
        strict_topics: args.strict_topics,
    };

    // Run the dispatch loop: one frame fully processed before the next
    tracing::info!("Starting dispatch loop...");
    let handler_running = Arc::clone(&running);
    let handler = |frame| {
        if !handler_running.load(Ordering::SeqCst) {
            return Ok(false);
        }
        dispatcher.dispatch(&frame);
        Ok(true)
    };

    let stats = match args.input {
        Some(path) => FileSource::new(path, options).process(handler)?,
        None => StdinSource::new(options).process(handler)?,
    };

    // Shutdown sequence
    tracing::info!("Shutting down...");

    let written = writer.map(OutboundWriter::stop);

    if args.metrics_port > 0 {
        gauge!("ingest_running").set(0.0);
    }

    print_summary(&stats, &dispatcher, written);

    Ok(())
}

fn print_summary(stats: &SourceStats, dispatcher: &Dispatcher, written: Option<usize>) {
    let d = dispatcher.stats();

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("SHUTDOWN COMPLETE");
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("Frames read:          {}", stats.total_frames);
    tracing::info!("Frames dispatched:    {}", d.frames);
    tracing::info!("Unknown topics:       {}", stats.unknown_topics);
    tracing::info!("Malformed frames:     {}", stats.malformed);
    tracing::info!("Events expanded:      {}", d.events);
    tracing::info!("Attributes handled:   {}", d.attributes);
    tracing::info!("Sightings handled:    {}", d.sightings);
    tracing::info!("Contributions scored: {}", d.contributions);
    tracing::info!("Geo enrichments:      {}", d.geo_enriched);
    if let Some(written) = written {
        tracing::info!("Notifications written:{}", written);
    }

    let recent = dispatcher.recent_contributors();
    if !recent.is_empty() {
        let preview: Vec<&str> = recent.iter().take(5).map(String::as_str).collect();
        tracing::info!("Recent contributors:  {}", preview.join(", "));
    }
}
