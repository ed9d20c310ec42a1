mod cadu;
mod capture;
mod cli;
mod config;
mod convert;
mod generic_data;
mod hexcsv;
mod ingest;
mod model;
mod network;
mod queue;
mod replay;
mod space_packet;
#[cfg(test)]
mod testutil;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Args, Command};
use crate::config::{AppConfig, ConvertJob};
use crate::hexcsv::LineTerminator;
use crate::ingest::{IngestOptions, SpacePacketIngestor};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = AppConfig::load(args.config.as_deref())?;

    let level = if args.verbose { "debug" } else { config.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    match args.command {
        Command::Convert {
            capture,
            output,
            payload_len,
            lf,
        } => {
            let mut options = config.convert.options();
            if let Some(len) = payload_len {
                options.payload_len = len;
            }
            if lf {
                options.terminator = LineTerminator::Lf;
            }
            let jobs = match (capture, output) {
                (Some(capture), Some(output)) => vec![ConvertJob { capture, output }],
                _ => config.convert.jobs.clone(),
            };
            for job in jobs {
                let stats = tokio::task::spawn_blocking(move || {
                    convert::convert(&job.capture, &job.output, &options)
                })
                .await??;
                info!(
                    "{} packets, {} UDP, {} rows written",
                    stats.packets, stats.udp_packets, stats.rows
                );
            }
        }
        Command::Ingest { input, output } => {
            let options = config.ingest.options();
            tokio::task::spawn_blocking(move || run_ingest(&input, output, options)).await??;
        }
        Command::Replay {
            input,
            target,
            interval_ms,
        } => {
            let target = target.unwrap_or(config.replay.target);
            let interval = Duration::from_millis(interval_ms.unwrap_or(config.replay.interval_ms));
            let rows = tokio::task::spawn_blocking(move || hexcsv::read_hex_rows(&input)).await??;
            let sent = replay::replay(&rows, &target, interval).await?;
            info!("Sent {} datagrams to {}", sent, target);
        }
    }
    Ok(())
}

fn run_ingest(input: &Path, output: Option<PathBuf>, options: IngestOptions) -> Result<()> {
    let rows = hexcsv::read_hex_rows(input)?;
    let out: Box<dyn Write> = match &output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };
    let mut out = BufWriter::new(out);

    let mut ingestor = SpacePacketIngestor::new(options);
    for row in &rows {
        for packet in ingestor.process_frame(row) {
            serde_json::to_writer(&mut out, &packet)?;
            out.write_all(b"\n")?;
        }
    }
    out.flush()?;

    let stats = ingestor.stats();
    info!(
        "{} frames, {} packets decoded, {} dropped, {} invalid frames",
        stats.frames, stats.decoded, stats.packets_dropped, stats.invalid_frames
    );
    Ok(())
}
