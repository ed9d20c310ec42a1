// src/model.rs
use chrono::{DateTime, Utc};
use pcap_parser::Linktype;
use serde::Serialize;

/// Size of one GRB channel access data unit, and the default row width.
pub const CADU_LEN: usize = 2048;

pub struct CapturedPacket {
    pub index: u64,
    pub linktype: Linktype,
    pub data: Vec<u8>, // link-layer frame as captured
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConvertStats {
    pub packets: u64,
    pub udp_packets: u64,
    pub rows: u64,
}

/// Unix time of the J2000 epoch, 2000-01-01T12:00:00Z.
pub const J2000_UNIX_SECONDS: i64 = 946_728_000;

/// Converts a J2000-relative time to UTC.
pub fn from_j2000(seconds: i64, micros: u32) -> Option<DateTime<Utc>> {
    let extra = i64::from(micros / 1_000_000);
    let nanos = (micros % 1_000_000) * 1_000;
    DateTime::from_timestamp(J2000_UNIX_SECONDS + seconds + extra, nanos)
}
