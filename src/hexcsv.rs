use std::fs::File;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// Row terminator used when writing hex rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineTerminator {
    #[default]
    Crlf,
    Lf,
}

/// Lowercase two-character hex token per byte.
pub fn to_tokens(bytes: &[u8]) -> Vec<String> {
    bytes.iter().map(|b| hex::encode([*b])).collect()
}

pub struct HexRowWriter {
    writer: csv::Writer<File>,
    rows: u64,
}

impl HexRowWriter {
    /// Creates (or truncates) `path`.
    pub fn create(path: &Path, terminator: LineTerminator) -> Result<Self> {
        let terminator = match terminator {
            LineTerminator::Crlf => csv::Terminator::CRLF,
            LineTerminator::Lf => csv::Terminator::Any(b'\n'),
        };
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(terminator)
            .from_path(path)
            .with_context(|| format!("Cannot create {:?}", path))?;
        Ok(Self { writer, rows: 0 })
    }

    pub fn write_row(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_record(to_tokens(bytes))?;
        self.rows += 1;
        Ok(())
    }

    /// Flushes buffered rows and closes the file.
    pub fn finish(mut self) -> Result<u64> {
        self.writer.flush().context("Cannot flush hex rows")?;
        Ok(self.rows)
    }
}

/// Reads every row of a hex CSV back into bytes.
pub fn read_hex_rows(path: &Path) -> Result<Vec<Vec<u8>>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Cannot open hex rows {:?}", path))?;

    let mut rows = Vec::new();
    for (row, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("Cannot read row {} of {:?}", row + 1, path))?;
        let bytes = record
            .iter()
            .enumerate()
            .map(|(column, token)| parse_token(token).ok_or_else(|| {
                anyhow!("{:?} row {} column {}: {:?} is not a hex byte", path, row + 1, column + 1, token)
            }))
            .collect::<Result<Vec<u8>>>()?;
        rows.push(bytes);
    }
    Ok(rows)
}

fn parse_token(token: &str) -> Option<u8> {
    if token.len() != 2 {
        return None;
    }
    hex::decode(token).ok().map(|bytes| bytes[0])
}
