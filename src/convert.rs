use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, trace};

use crate::capture::CaptureReader;
use crate::hexcsv::{HexRowWriter, LineTerminator};
use crate::model::{ConvertStats, CADU_LEN};
use crate::network::UdpExtractor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertOptions {
    pub payload_len: usize,
    pub terminator: LineTerminator,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            payload_len: CADU_LEN,
            terminator: LineTerminator::Crlf,
        }
    }
}

/// Writes one hex row per UDP payload of exactly `payload_len` bytes, in
/// capture order. The output is overwritten, never appended.
pub fn convert(capture_path: &Path, output_path: &Path, options: &ConvertOptions) -> Result<ConvertStats> {
    // open the capture first so a bad input never clobbers an existing output
    let mut capture = CaptureReader::open(capture_path)?;
    let mut writer = HexRowWriter::create(output_path, options.terminator)?;
    let mut extractor = UdpExtractor::new();
    let mut stats = ConvertStats::default();

    info!("Converting {:?} -> {:?}", capture_path, output_path);
    while let Some(packet) = capture
        .next_packet()
        .with_context(|| format!("Failed reading {:?}", capture_path))?
    {
        stats.packets += 1;
        let Some(payload) = extractor.udp_payload(packet.linktype, &packet.data) else {
            trace!("packet {} is not UDP", packet.index);
            continue;
        };
        stats.udp_packets += 1;

        if payload.len() != options.payload_len {
            trace!("packet {}: {} byte payload skipped", packet.index, payload.len());
            continue;
        }
        writer
            .write_row(&payload)
            .with_context(|| format!("Failed writing {:?}", output_path))?;
    }

    if extractor.pending_datagrams() > 0 {
        debug!("{} fragmented datagrams never completed", extractor.pending_datagrams());
    }
    stats.rows = writer.finish()?;
    info!(
        "{} packets read, {} UDP, {} rows written",
        stats.packets, stats.udp_packets, stats.rows
    );
    Ok(stats)
}
