// Application settings, read from a TOML file

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::cadu::FRAME_COUNT_ROLLOVER;
use crate::convert::ConvertOptions;
use crate::hexcsv::LineTerminator;
use crate::ingest::IngestOptions;
use crate::model::CADU_LEN;
use crate::space_packet::SEQUENCE_COUNT_ROLLOVER;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub log_level: String,
    pub convert: ConvertConfig,
    pub ingest: IngestConfig,
    pub replay: ReplayConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertJob {
    pub capture: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    pub payload_len: usize,
    pub line_terminator: LineTerminator,
    pub jobs: Vec<ConvertJob>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub virtual_channel: u8,
    pub apids: Vec<u16>,
    pub frame_capacity: usize,
    pub pending_capacity: usize,
    pub segment_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub target: String,
    pub interval_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            convert: ConvertConfig::default(),
            ingest: IngestConfig::default(),
            replay: ReplayConfig::default(),
        }
    }
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            payload_len: CADU_LEN,
            line_terminator: LineTerminator::Crlf,
            jobs: vec![
                ConvertJob {
                    capture: PathBuf::from("GOESR.pcap"),
                    output: PathBuf::from("packets.csv"),
                },
                ConvertJob {
                    capture: PathBuf::from("data/GOESR_larger.pcap"),
                    output: PathBuf::from("packets_large.csv"),
                },
            ],
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        let options = IngestOptions::default();
        Self {
            virtual_channel: options.virtual_channel,
            apids: options.apids,
            frame_capacity: options.frame_capacity,
            pending_capacity: options.pending_capacity,
            segment_capacity: options.segment_capacity,
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            target: "127.0.0.1:50020".to_string(),
            interval_ms: 0,
        }
    }
}

impl ConvertConfig {
    pub fn options(&self) -> ConvertOptions {
        ConvertOptions {
            payload_len: self.payload_len,
            terminator: self.line_terminator,
        }
    }
}

impl IngestConfig {
    pub fn options(&self) -> IngestOptions {
        IngestOptions {
            virtual_channel: self.virtual_channel,
            apids: self.apids.clone(),
            frame_capacity: self.frame_capacity,
            pending_capacity: self.pending_capacity,
            segment_capacity: self.segment_capacity,
        }
    }
}

impl AppConfig {
    /// Reads `path`, or the default location when `path` is None. A missing
    /// file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path(),
        };
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
            .join("grbtool")
            .join("config.toml")
    }

    fn validate(&self) -> Result<()> {
        if self.convert.payload_len == 0 {
            bail!("convert.payload_len must be positive");
        }
        let ingest = &self.ingest;
        if ingest.virtual_channel > 0x3f {
            bail!("ingest.virtual_channel {} does not fit in 6 bits", ingest.virtual_channel);
        }
        let frame_limit = (FRAME_COUNT_ROLLOVER / 4) as usize;
        for (name, value) in [
            ("frame_capacity", ingest.frame_capacity),
            ("pending_capacity", ingest.pending_capacity),
        ] {
            if value == 0 || value > frame_limit {
                bail!("ingest.{} must be between 1 and {}", name, frame_limit);
            }
        }
        let segment_limit = (SEQUENCE_COUNT_ROLLOVER / 4) as usize;
        if ingest.segment_capacity == 0 || ingest.segment_capacity > segment_limit {
            bail!("ingest.segment_capacity must be between 1 and {}", segment_limit);
        }
        Ok(())
    }
}
