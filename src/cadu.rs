//! GRB channel access data units: a sync marker followed by one AOS transfer
//! frame carrying an M_PDU.

use std::fmt;

use crate::model::CADU_LEN;

pub const SYNC_MARKER: u32 = 0x1acf_fc1d;
/// Virtual channel carrying the right-hand circular polarisation stream.
pub const RHCP_VIRTUAL_CHANNEL: u8 = 5;
/// First header pointer value meaning "no packet starts in this frame".
pub const FIRST_HEADER_OVERFLOW: u16 = 0x07ff;
pub const FRAME_COUNT_ROLLOVER: u32 = 1 << 24;
pub const PACKET_ZONE_LEN: usize = 2034;

const PACKET_ZONE_START: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaduError {
    Length(usize),
    Sync(u32),
    ReplayFlag,
    ReservedSpare(u8),
}

impl fmt::Display for CaduError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaduError::Length(len) => write!(f, "CADU is {} bytes, expected {}", len, CADU_LEN),
            CaduError::Sync(sync) => write!(f, "invalid sync marker {:#010x}", sync),
            CaduError::ReplayFlag => write!(f, "replay flag is set"),
            CaduError::ReservedSpare(spare) => write!(f, "signalling reserved spare is {:#04b}", spare),
        }
    }
}

impl std::error::Error for CaduError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cadu {
    pub version: u8,
    pub spacecraft_id: u8,
    pub virtual_channel_id: u8,
    pub frame_count: u32,
    pub replay: bool,
    pub frame_count_usage: bool,
    pub frame_count_cycle: u8,
    pub first_header_pointer: u16,
    pub packet_zone: Vec<u8>,
    pub frame_error_control: u16,
}

impl Cadu {
    pub fn parse(bytes: &[u8]) -> Result<Self, CaduError> {
        if bytes.len() != CADU_LEN {
            return Err(CaduError::Length(bytes.len()));
        }
        let sync = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if sync != SYNC_MARKER {
            return Err(CaduError::Sync(sync));
        }

        let signalling = bytes[9];
        let replay = signalling & 0x80 != 0;
        if replay {
            return Err(CaduError::ReplayFlag);
        }
        let spare = (signalling >> 4) & 0x03;
        if spare != 0 {
            return Err(CaduError::ReservedSpare(spare));
        }

        Ok(Self {
            version: bytes[4] >> 6,
            spacecraft_id: (bytes[4] << 2) | (bytes[5] >> 6),
            virtual_channel_id: bytes[5] & 0x3f,
            frame_count: u32::from_be_bytes([0, bytes[6], bytes[7], bytes[8]]),
            replay,
            frame_count_usage: signalling & 0x40 != 0,
            frame_count_cycle: signalling & 0x0f,
            first_header_pointer: u16::from_be_bytes([bytes[10], bytes[11]]) & 0x07ff,
            packet_zone: bytes[PACKET_ZONE_START..PACKET_ZONE_START + PACKET_ZONE_LEN].to_vec(),
            frame_error_control: u16::from_be_bytes([bytes[CADU_LEN - 2], bytes[CADU_LEN - 1]]),
        })
    }

    /// Byte offset of the first packet header in the packet zone, if any.
    pub fn first_header_offset(&self) -> Option<usize> {
        (self.first_header_pointer != FIRST_HEADER_OVERFLOW).then_some(usize::from(self.first_header_pointer))
    }
}

/// Frame count following `frame_count`, with rollover.
pub fn next_frame_count(frame_count: u32) -> u32 {
    (frame_count + 1) % FRAME_COUNT_ROLLOVER
}
