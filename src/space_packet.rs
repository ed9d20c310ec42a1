//! CCSDS space packets with the GRB secondary header.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::from_j2000;

pub const PRIMARY_HEADER_LEN: usize = 6;
pub const SECONDARY_HEADER_LEN: usize = 8;
pub const HEADER_LEN: usize = PRIMARY_HEADER_LEN + SECONDARY_HEADER_LEN;
/// Largest user data field, CRC included.
pub const USER_DATA_MAX_LEN: usize = 16376;
pub const CRC_LEN: usize = 4;
pub const SEQUENCE_COUNT_ROLLOVER: u32 = 1 << 14;
pub const GENERIC_PAYLOAD_VARIANT: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceFlags {
    Continuation,
    First,
    Last,
    Unsegmented,
}

impl SequenceFlags {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0b00 => SequenceFlags::Continuation,
            0b01 => SequenceFlags::First,
            0b10 => SequenceFlags::Last,
            _ => SequenceFlags::Unsegmented,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PrimaryHeader {
    pub version: u8,
    pub packet_type: u8,
    pub secondary_header: bool,
    pub apid: u16,
    pub sequence_flags: SequenceFlags,
    pub sequence_count: u16,
    pub data_length: u16,
}

impl PrimaryHeader {
    fn parse(bytes: &[u8]) -> Self {
        let word0 = u16::from_be_bytes([bytes[0], bytes[1]]);
        let word1 = u16::from_be_bytes([bytes[2], bytes[3]]);
        Self {
            version: (word0 >> 13) as u8,
            packet_type: ((word0 >> 12) & 0x01) as u8,
            secondary_header: word0 & 0x0800 != 0,
            apid: word0 & 0x07ff,
            sequence_flags: SequenceFlags::from_bits((word1 >> 14) as u8),
            sequence_count: word1 & 0x3fff,
            data_length: u16::from_be_bytes([bytes[4], bytes[5]]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SecondaryHeader {
    pub days: u16,
    pub milliseconds: u32,
    pub grb_version: u8,
    pub payload_variant: u8,
    pub assembler_id: u8,
    pub system_environment: u8,
}

impl SecondaryHeader {
    fn parse(bytes: &[u8]) -> Self {
        let tail = u16::from_be_bytes([bytes[6], bytes[7]]);
        Self {
            days: u16::from_be_bytes([bytes[0], bytes[1]]),
            milliseconds: u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
            grb_version: (tail >> 11) as u8,
            payload_variant: ((tail >> 6) & 0x1f) as u8,
            assembler_id: ((tail >> 4) & 0x03) as u8,
            system_environment: (tail & 0x0f) as u8,
        }
    }

    /// Packet creation time; days and milliseconds count from J2000.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let seconds = i64::from(self.days) * 86_400 + i64::from(self.milliseconds / 1_000);
        from_j2000(seconds, (self.milliseconds % 1_000) * 1_000)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpacePacketError {
    Truncated(usize),
    Version(u8),
    PacketType(u8),
    NoSecondaryHeader,
    GrbVersion(u8),
    DataLength(usize),
}

impl fmt::Display for SpacePacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpacePacketError::Truncated(len) => {
                write!(f, "only {} of {} header bytes available", len, HEADER_LEN)
            }
            SpacePacketError::Version(v) => write!(f, "packet version {} is not 0", v),
            SpacePacketError::PacketType(t) => write!(f, "packet type {} is not 0", t),
            SpacePacketError::NoSecondaryHeader => write!(f, "secondary header flag is not set"),
            SpacePacketError::GrbVersion(v) => write!(f, "GRB version {} is not 0", v),
            SpacePacketError::DataLength(len) => write!(f, "user data length {} out of range", len),
        }
    }
}

impl std::error::Error for SpacePacketError {}

#[derive(Debug, Clone)]
pub struct SpacePacket {
    pub primary: PrimaryHeader,
    pub secondary: SecondaryHeader,
    /// User data; the CRC is split off into `crc` once the packet is complete.
    pub data: Vec<u8>,
    /// Bytes of user data still expected from following frames.
    pub remaining: usize,
    pub crc: Option<u32>,
    pub crc_valid: Option<bool>,
    raw: Vec<u8>,
}

impl SpacePacket {
    /// Parses a packet starting at `bytes[0]`. When `bytes` ends before the
    /// packet does, the packet is returned with `remaining > 0`.
    pub fn parse(bytes: &[u8]) -> Result<Self, SpacePacketError> {
        if bytes.len() < HEADER_LEN {
            return Err(SpacePacketError::Truncated(bytes.len()));
        }
        let primary = PrimaryHeader::parse(&bytes[..PRIMARY_HEADER_LEN]);
        let secondary = SecondaryHeader::parse(&bytes[PRIMARY_HEADER_LEN..HEADER_LEN]);

        if primary.version != 0 {
            return Err(SpacePacketError::Version(primary.version));
        }
        if primary.packet_type != 0 {
            return Err(SpacePacketError::PacketType(primary.packet_type));
        }
        if !primary.secondary_header {
            return Err(SpacePacketError::NoSecondaryHeader);
        }
        if secondary.grb_version != 0 {
            return Err(SpacePacketError::GrbVersion(secondary.grb_version));
        }

        // the length field counts the secondary header and is one less than the field size
        let user_len = (usize::from(primary.data_length) + 1)
            .checked_sub(SECONDARY_HEADER_LEN)
            .ok_or(SpacePacketError::DataLength(0))?;
        if !(CRC_LEN..=USER_DATA_MAX_LEN).contains(&user_len) {
            return Err(SpacePacketError::DataLength(user_len));
        }

        let available = bytes.len() - HEADER_LEN;
        let take = user_len.min(available);
        let mut packet = Self {
            primary,
            secondary,
            data: bytes[HEADER_LEN..HEADER_LEN + take].to_vec(),
            remaining: user_len - take,
            crc: None,
            crc_valid: None,
            raw: bytes[..HEADER_LEN + take].to_vec(),
        };
        if packet.is_complete() {
            packet.finish();
        }
        Ok(packet)
    }

    pub fn apid(&self) -> u16 {
        self.primary.apid
    }

    pub fn sequence_count(&self) -> u16 {
        self.primary.sequence_count
    }

    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }

    /// Bytes the packet occupies on the wire so far.
    pub fn wire_len(&self) -> usize {
        self.raw.len()
    }

    /// Appends continuation bytes and returns how many were used.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let take = self.remaining.min(bytes.len());
        self.data.extend_from_slice(&bytes[..take]);
        self.raw.extend_from_slice(&bytes[..take]);
        self.remaining -= take;
        if take > 0 && self.is_complete() {
            self.finish();
        }
        take
    }

    fn finish(&mut self) {
        let split = self.data.len() - CRC_LEN;
        let crc = u32::from_be_bytes([
            self.data[split],
            self.data[split + 1],
            self.data[split + 2],
            self.data[split + 3],
        ]);
        self.data.truncate(split);
        self.crc = Some(crc);
        self.crc_valid = Some(crc32fast::hash(&self.raw[..self.raw.len() - CRC_LEN]) == crc);
    }
}

/// Sequence count `delta` steps away from `count`, with rollover.
pub fn step_sequence_count(count: u16, delta: i32) -> u16 {
    let rollover = SEQUENCE_COUNT_ROLLOVER as i32;
    (i32::from(count) + delta).rem_euclid(rollover) as u16
}
