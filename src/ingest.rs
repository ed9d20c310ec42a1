use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::cadu::{next_frame_count, Cadu, FRAME_COUNT_ROLLOVER, RHCP_VIRTUAL_CHANNEL};
use crate::generic_data::{
    decode_fields, FieldSet, GenericHeader, Instrument, PROTON_LOW_APID, PROTON_MED_HI_APID, XRAY_APID,
};
use crate::queue::SequenceQueue;
use crate::space_packet::{
    step_sequence_count, SequenceFlags, SpacePacket, SpacePacketError, GENERIC_PAYLOAD_VARIANT,
    SEQUENCE_COUNT_ROLLOVER,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOptions {
    pub virtual_channel: u8,
    pub apids: Vec<u16>,
    pub frame_capacity: usize,
    pub pending_capacity: usize,
    pub segment_capacity: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            virtual_channel: RHCP_VIRTUAL_CHANNEL,
            apids: vec![XRAY_APID, PROTON_LOW_APID, PROTON_MED_HI_APID],
            frame_capacity: 256,
            pending_capacity: 64,
            segment_capacity: 1024,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub frames: u64,
    pub invalid_frames: u64,
    pub other_channel_frames: u64,
    pub duplicate_frames: u64,
    pub packets_seen: u64,
    pub packets_skipped: u64,
    pub packets_dropped: u64,
    pub decoded: u64,
}

/// A fully reassembled space packet with its instrument payload decoded.
#[derive(Debug, Clone, Serialize)]
pub struct DecodedPacket {
    pub apid: u16,
    pub instrument: Instrument,
    pub sequence_count: u16,
    pub segments: usize,
    /// Data time from the generic header.
    pub timestamp: Option<DateTime<Utc>>,
    /// Packet creation time from the secondary header.
    pub packet_time: Option<DateTime<Utc>>,
    pub header: GenericHeader,
    pub headline: Option<f64>,
    pub crc_valid: bool,
    pub fields: FieldSet,
}

/// Rebuilds space packets from a stream of CADUs that may arrive out of order.
pub struct SpacePacketIngestor {
    options: IngestOptions,
    frames: SequenceQueue<Cadu>,
    // packets waiting for the frame count they are keyed by
    pending: SequenceQueue<SpacePacket>,
    segments: BTreeMap<u16, SequenceQueue<SpacePacket>>,
    stats: IngestStats,
}

impl SpacePacketIngestor {
    pub fn new(options: IngestOptions) -> Self {
        Self {
            frames: SequenceQueue::new(FRAME_COUNT_ROLLOVER, options.frame_capacity),
            pending: SequenceQueue::new(FRAME_COUNT_ROLLOVER, options.pending_capacity),
            segments: BTreeMap::new(),
            stats: IngestStats::default(),
            options,
        }
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// Feeds one 2048-byte frame and returns the packets it completed.
    pub fn process_frame(&mut self, bytes: &[u8]) -> Vec<DecodedPacket> {
        let mut decoded = Vec::new();
        self.stats.frames += 1;

        let cadu = match Cadu::parse(bytes) {
            Ok(cadu) => cadu,
            Err(e) => {
                warn!("Invalid CADU: {}", e);
                self.stats.invalid_frames += 1;
                return decoded;
            }
        };
        if cadu.virtual_channel_id != self.options.virtual_channel {
            trace!("frame {} on virtual channel {}", cadu.frame_count, cadu.virtual_channel_id);
            self.stats.other_channel_frames += 1;
            return decoded;
        }

        let frame_count = cadu.frame_count;
        let first_header = cadu.first_header_offset();
        let zone = cadu.packet_zone.clone();
        if !self.frames.enqueue(frame_count, cadu) {
            debug!("Duplicate frame {} ignored", frame_count);
            self.stats.duplicate_frames += 1;
            return decoded;
        }

        for seq in self.pending.sequence_numbers() {
            self.continue_pending(seq, &mut decoded);
        }
        if let Some(offset) = first_header {
            self.walk_zone(frame_count, &zone, offset, &mut decoded);
        }
        decoded
    }

    fn walk_zone(&mut self, frame_count: u32, zone: &[u8], mut offset: usize, out: &mut Vec<DecodedPacket>) {
        while offset < zone.len() {
            let packet = match SpacePacket::parse(&zone[offset..]) {
                Ok(packet) => packet,
                Err(SpacePacketError::Truncated(len)) => {
                    trace!("frame {}: {} header bytes at end of zone", frame_count, len);
                    return;
                }
                Err(e) => {
                    trace!("frame {} offset {}: {}", frame_count, offset, e);
                    return;
                }
            };
            self.stats.packets_seen += 1;
            offset += packet.wire_len();

            if !self.options.apids.contains(&packet.apid()) {
                self.stats.packets_skipped += 1;
                continue;
            }
            if packet.is_complete() {
                self.record(packet, out);
                continue;
            }

            // the rest of this packet is in the following frame(s)
            let next = next_frame_count(frame_count);
            if self.pending.enqueue(next, packet) {
                self.continue_pending(next, out);
            } else {
                warn!("A packet already waits on frame {}, dropping", next);
                self.stats.packets_dropped += 1;
            }
            return;
        }
    }

    fn continue_pending(&mut self, mut seq: u32, out: &mut Vec<DecodedPacket>) {
        loop {
            let Some(frame) = self.frames.get(seq) else {
                return;
            };
            let Some(mut packet) = self.pending.remove(seq) else {
                return;
            };

            let need = packet.remaining;
            let zone = &frame.packet_zone;
            // a new header may only start right where this packet ends
            let pointer_ok = match frame.first_header_offset() {
                None => true,
                Some(offset) => need <= zone.len() && offset == need,
            };
            if !pointer_ok {
                warn!(
                    "APID {:#05x} count {}: frame {} header pointer {} does not follow {} missing bytes",
                    packet.apid(),
                    packet.sequence_count(),
                    seq,
                    frame.first_header_pointer,
                    need
                );
                self.stats.packets_dropped += 1;
                return;
            }

            packet.append(zone);
            if packet.is_complete() {
                self.record(packet, out);
                return;
            }
            seq = next_frame_count(seq);
            if !self.pending.enqueue(seq, packet) {
                warn!("A packet already waits on frame {}, dropping", seq);
                self.stats.packets_dropped += 1;
                return;
            }
        }
    }

    fn record(&mut self, packet: SpacePacket, out: &mut Vec<DecodedPacket>) {
        if packet.secondary.payload_variant != GENERIC_PAYLOAD_VARIANT {
            warn!(
                "APID {:#05x}: payload variant {} is not generic data",
                packet.apid(),
                packet.secondary.payload_variant
            );
            self.stats.packets_skipped += 1;
            return;
        }

        let flags = packet.primary.sequence_flags;
        if flags == SequenceFlags::Unsegmented {
            self.assemble(vec![packet], out);
            return;
        }

        let apid = packet.apid();
        let count = packet.sequence_count();
        let capacity = self.options.segment_capacity;
        let store = self
            .segments
            .entry(apid)
            .or_insert_with(|| SequenceQueue::new(SEQUENCE_COUNT_ROLLOVER, capacity));
        if !store.enqueue(u32::from(count), packet) {
            debug!("APID {:#05x}: duplicate segment {}", apid, count);
            return;
        }

        let first = if flags == SequenceFlags::First {
            Some(count)
        } else {
            chain_end(store, count, -1, SequenceFlags::First)
        };
        let last = if flags == SequenceFlags::Last {
            Some(count)
        } else {
            chain_end(store, count, 1, SequenceFlags::Last)
        };
        let (Some(first), Some(last)) = (first, last) else {
            return;
        };

        let mut segments = Vec::new();
        let mut at = first;
        loop {
            if let Some(segment) = store.remove(u32::from(at)) {
                segments.push(segment);
            }
            if at == last {
                break;
            }
            at = step_sequence_count(at, 1);
        }
        self.assemble(segments, out);
    }

    fn assemble(&mut self, segments: Vec<SpacePacket>, out: &mut Vec<DecodedPacket>) {
        let Some(first) = segments.first() else {
            return;
        };
        let apid = first.apid();
        let sequence_count = first.sequence_count();
        let packet_time = first.secondary.timestamp();
        let Some(instrument) = Instrument::from_apid(apid) else {
            debug!("APID {:#05x} has no decoder", apid);
            self.stats.packets_skipped += 1;
            return;
        };

        let crc_valid = segments.iter().all(|s| s.crc_valid == Some(true));
        if !crc_valid {
            debug!("APID {:#05x} count {}: CRC mismatch", apid, sequence_count);
        }
        let data: Vec<u8> = segments.iter().flat_map(|s| s.data.iter().copied()).collect();
        let (header, payload) = match GenericHeader::parse(&data) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("APID {:#05x} count {}: {}", apid, sequence_count, e);
                self.stats.packets_dropped += 1;
                return;
            }
        };

        let fields = decode_fields(instrument, payload);
        let headline = instrument.headline(&fields);
        self.stats.decoded += 1;
        out.push(DecodedPacket {
            apid,
            instrument,
            sequence_count,
            segments: segments.len(),
            timestamp: header.timestamp(),
            packet_time,
            header,
            headline,
            crc_valid,
            fields,
        });
    }
}

/// Walks from `count` in `step` direction to the segment flagged `end`,
/// returning its sequence count if every segment in between is present.
fn chain_end(store: &SequenceQueue<SpacePacket>, count: u16, step: i32, end: SequenceFlags) -> Option<u16> {
    let mut at = count;
    for _ in 0..store.len() {
        at = step_sequence_count(at, step);
        let flags = store.get(u32::from(at))?.primary.sequence_flags;
        if flags == end {
            return Some(at);
        }
        if flags != SequenceFlags::Continuation {
            return None;
        }
    }
    None
}
