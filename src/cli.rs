use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "GOES-R rebroadcast capture tools", long_about = None)]
pub struct Args {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Write the 2048-byte UDP payloads of a capture as hex CSV rows.
    /// Without paths, every configured job is run.
    Convert {
        #[arg(requires = "output")]
        capture: Option<PathBuf>,

        #[arg(requires = "capture")]
        output: Option<PathBuf>,

        /// Exact payload length to keep
        #[arg(long)]
        payload_len: Option<usize>,

        /// End rows with LF instead of CRLF
        #[arg(long)]
        lf: bool,
    },
    /// Decode the CADUs in a hex CSV file and print instrument packets as JSON lines
    Ingest {
        input: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Send the rows of a hex CSV file as UDP datagrams
    Replay {
        input: PathBuf,

        /// Destination, HOST:PORT
        #[arg(short, long)]
        target: Option<String>,

        #[arg(long)]
        interval_ms: Option<u64>,
    },
}
