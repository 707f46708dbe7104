use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use sync_relay::{Capture, Config, Replicator};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "sync-relay")]
#[command(
    about = "Routes captured database changes into batches for remote nodes",
    long_about = None
)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "relay.toml")]
    config: PathBuf,

    #[arg(short, long, value_name = "FILE", help = "JSON capture document to route")]
    input: PathBuf,

    #[arg(short, long, value_name = "DIR", help = "Override the extraction output directory")]
    output: Option<PathBuf>,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!("Starting sync-relay");
    info!("Loading configuration from {:?}", args.config);

    let config = match Config::from_file(&args.config) {
        Ok(cfg) => {
            info!("Configuration loaded successfully");
            cfg
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(sync_relay::Error::Config(e.to_string()).into());
        }
    };

    info!(
        node_id = %config.node.node_id,
        group_id = %config.node.group_id,
        max_batch_size = config.routing.max_batch_size,
        checkpoint_file = ?config.routing.checkpoint_file,
        "Configuration summary"
    );

    let json = tokio::fs::read_to_string(&args.input)
        .await
        .with_context(|| format!("reading capture file {}", args.input.display()))?;
    let capture = Capture::from_json(&json)
        .with_context(|| format!("parsing capture file {}", args.input.display()))?;

    info!(
        nodes = capture.nodes.len(),
        routes = capture.routes.len(),
        changes = capture.changes.len(),
        "Capture loaded"
    );

    let output_dir = args
        .output
        .unwrap_or_else(|| config.extraction.output_dir.clone());
    let replicator =
        Replicator::new(config, capture.routes.clone()).context("validating routes")?;

    let summary = replicator
        .run(&capture, &output_dir)
        .await
        .context("routing pass failed")?;

    info!(
        routed = summary.routed,
        skipped = summary.skipped,
        files = summary.files.len(),
        output_dir = %output_dir.display(),
        "Done"
    );

    Ok(())
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("sync_relay=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sync_relay=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
