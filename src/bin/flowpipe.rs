use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::runtime;
use tracing::{error, info, warn};

use flowpipe::message::{ElementRegistry, Record};
use flowpipe::network::FrameSink;
use flowpipe::{setup_tracing, AppResult, MessageBatch, Pipeline, PipelineConfig};

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long, default_value = "conf.toml")]
    pub conf: PathBuf,
    /// JSON lines, one batch per line (default: stdin)
    #[arg(short, long)]
    pub input: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Option<Command>,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// print the effective configuration and exit
    PrintConfig,
    /// listen for publisher connections and print every message received
    Sink {
        #[arg(short, long, default_value = "127.0.0.1:9092")]
        listen: String,
    },
}

/// One input line.
#[derive(Deserialize)]
struct BatchLine {
    records: Vec<Record>,
}

fn main() -> AppResult<()> {
    let commandline = CommandLine::parse();
    let config = PipelineConfig::set_up_config(&commandline.conf)?;

    if matches!(commandline.command, Some(Command::PrintConfig)) {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let _log_guard = setup_tracing(&config.log, commandline.verbose)?;

    match commandline.command {
        Some(Command::Sink { listen }) => run_sink(&listen),
        _ => run_pipeline(&config, commandline.input.as_deref()),
    }
}

fn run_pipeline(config: &PipelineConfig, input: Option<&Path>) -> AppResult<()> {
    let reader: Box<dyn BufRead> = match input {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(BufReader::new(io::stdin())),
    };
    let elements = Arc::new(ElementRegistry::with_iana_defaults());

    let mut pipeline = Pipeline::from_config(config);
    let state = pipeline.start()?;
    info!("broker connection {:?}", state);

    let mut batches = 0usize;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let batch: BatchLine = match serde_json::from_str(&line) {
            Ok(batch) => batch,
            Err(err) => {
                warn!("skipping input line {}: {}", index + 1, err);
                continue;
            }
        };
        if pipeline
            .enqueue(MessageBatch::new(batch.records, elements.clone()))
            .is_err()
        {
            error!("pipeline stopped while reading input");
            break;
        }
        batches += 1;
    }

    if !pipeline.wait_drained(config.broker.flush_timeout()) {
        warn!("workers did not claim every batch before the flush timeout");
    }
    pipeline.stop();

    let stats = pipeline.stats();
    info!(
        batches,
        converted = stats.workers.converted,
        codec_failures = stats.workers.codec_failures,
        published = stats.publisher.enqueued,
        dropped = stats.publisher.dropped,
        "input exhausted"
    );
    Ok(())
}

fn run_sink(listen: &str) -> AppResult<()> {
    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(serve_sink(listen))
}

async fn serve_sink(listen: &str) -> AppResult<()> {
    let sink = FrameSink::bind(listen).await?;
    info!("sink listening on {}", sink.local_addr()?);
    tokio::select! {
        res = sink.run(|frame| {
            println!("{}\t{}", frame.topic, String::from_utf8_lossy(&frame.payload));
        }) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("sink interrupted");
            Ok(())
        }
    }
}
