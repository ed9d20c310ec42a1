// Capture and frame builders shared by the unit tests.
use std::path::Path;

use etherparse::PacketBuilder;

const SRC_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
const DST_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x02];
const SRC_IP: [u8; 4] = [10, 0, 0, 1];
const DST_IP: [u8; 4] = [10, 0, 0, 2];
const SRC_IP6: [u8; 16] = [0xfd, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
const DST_IP6: [u8; 16] = [0xfd, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2];

pub fn udp_frame(payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2(SRC_MAC, DST_MAC)
        .ipv4(SRC_IP, DST_IP, 64)
        .udp(50020, 50020);
    let mut frame = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut frame, payload).unwrap();
    frame
}

pub fn udp6_frame(payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2(SRC_MAC, DST_MAC)
        .ipv6(SRC_IP6, DST_IP6, 64)
        .udp(50020, 50020);
    let mut frame = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut frame, payload).unwrap();
    frame
}

/// IPv4/UDP packet without a link-layer header.
pub fn udp_ip_packet(payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ipv4(SRC_IP, DST_IP, 64).udp(50020, 50020);
    let mut packet = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut packet, payload).unwrap();
    packet
}

/// Ethernet/IPv6 frame with a hop-by-hop options header before UDP.
pub fn udp6_frame_with_hop_by_hop(payload: &[u8]) -> Vec<u8> {
    let plain = udp6_frame(payload);
    let (head, udp) = plain.split_at(14 + 40);
    let mut frame = head.to_vec();
    let payload_len = u16::from_be_bytes([frame[18], frame[19]]) + 8;
    frame[18..20].copy_from_slice(&payload_len.to_be_bytes());
    frame[20] = 0; // next header: hop-by-hop
    // next header UDP, length 0 (8 bytes), PadN option over the remainder
    frame.extend_from_slice(&[17, 0, 1, 4, 0, 0, 0, 0]);
    frame.extend_from_slice(udp);
    frame
}

/// Ethernet/IPv6 fragments of one UDP datagram. `fragment_len` must be a
/// multiple of 8.
pub fn fragmented_udp6_frames(payload: &[u8], fragment_len: usize) -> Vec<Vec<u8>> {
    let plain = udp6_frame(payload);
    let (head, datagram) = plain.split_at(14 + 40);

    let chunks: Vec<&[u8]> = datagram.chunks(fragment_len).collect();
    let last = chunks.len() - 1;
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let offset_units = (i * fragment_len / 8) as u16;
            let offset_flags = if i < last { (offset_units << 3) | 1 } else { offset_units << 3 };
            let mut frame = head.to_vec();
            frame[18..20].copy_from_slice(&((8 + chunk.len()) as u16).to_be_bytes());
            frame[20] = 44; // next header: fragment
            frame.extend_from_slice(&[17, 0]);
            frame.extend_from_slice(&offset_flags.to_be_bytes());
            frame.extend_from_slice(&0x0bad_cafeu32.to_be_bytes());
            frame.extend_from_slice(chunk);
            frame
        })
        .collect()
}

pub fn tcp_frame(payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2(SRC_MAC, DST_MAC)
        .ipv4(SRC_IP, DST_IP, 64)
        .tcp(40000, 50020, 1, 65535);
    let mut frame = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut frame, payload).unwrap();
    frame
}

pub fn fragmented_udp_frames(payload: &[u8], fragment_len: usize) -> Vec<Vec<u8>> {
    fragmented_udp_frames_with_id(payload, fragment_len, 0x1234)
}

/// Ethernet/IPv4 fragments of one UDP datagram. `fragment_len` must be a
/// multiple of 8.
pub fn fragmented_udp_frames_with_id(payload: &[u8], fragment_len: usize, id: u16) -> Vec<Vec<u8>> {
    let udp_len = (payload.len() + 8) as u16;
    let mut datagram = Vec::with_capacity(payload.len() + 8);
    datagram.extend_from_slice(&50020u16.to_be_bytes());
    datagram.extend_from_slice(&50020u16.to_be_bytes());
    datagram.extend_from_slice(&udp_len.to_be_bytes());
    datagram.extend_from_slice(&[0, 0]); // checksum not computed
    datagram.extend_from_slice(payload);

    let chunks: Vec<&[u8]> = datagram.chunks(fragment_len).collect();
    let last = chunks.len() - 1;
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let offset_units = (i * fragment_len / 8) as u16;
            let flags_offset = if i < last { 0x2000 | offset_units } else { offset_units };
            let total_len = (20 + chunk.len()) as u16;

            let mut frame = Vec::with_capacity(14 + total_len as usize);
            frame.extend_from_slice(&DST_MAC);
            frame.extend_from_slice(&SRC_MAC);
            frame.extend_from_slice(&[0x08, 0x00]);
            frame.extend_from_slice(&[0x45, 0x00]);
            frame.extend_from_slice(&total_len.to_be_bytes());
            frame.extend_from_slice(&id.to_be_bytes());
            frame.extend_from_slice(&flags_offset.to_be_bytes());
            frame.extend_from_slice(&[64, 17, 0, 0]);
            frame.extend_from_slice(&SRC_IP);
            frame.extend_from_slice(&DST_IP);
            frame.extend_from_slice(chunk);
            frame
        })
        .collect()
}

/// Little-endian legacy pcap with an Ethernet link type.
pub fn write_pcap(path: &Path, frames: &[Vec<u8>]) {
    let mut out = Vec::new();
    out.extend_from_slice(&0xa1b2c3d4u32.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&4u16.to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&262_144u32.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    for (i, frame) in frames.iter().enumerate() {
        out.extend_from_slice(&(i as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(frame);
    }
    std::fs::write(path, out).unwrap();
}

/// Little-endian pcapng: one section, one Ethernet interface, enhanced packets.
pub fn write_pcapng(path: &Path, frames: &[Vec<u8>]) {
    let mut out = pcapng_preamble();
    for frame in frames {
        let padded = (frame.len() + 3) / 4 * 4;
        let block_len = (32 + padded) as u32;
        out.extend_from_slice(&6u32.to_le_bytes());
        out.extend_from_slice(&block_len.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(frame);
        out.resize(out.len() + padded - frame.len(), 0);
        out.extend_from_slice(&block_len.to_le_bytes());
    }
    std::fs::write(path, out).unwrap();
}

/// Same layout as `write_pcapng`, with simple packet blocks.
pub fn write_pcapng_simple(path: &Path, frames: &[Vec<u8>]) {
    let mut out = pcapng_preamble();
    for frame in frames {
        let padded = (frame.len() + 3) / 4 * 4;
        let block_len = (16 + padded) as u32;
        out.extend_from_slice(&3u32.to_le_bytes());
        out.extend_from_slice(&block_len.to_le_bytes());
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(frame);
        out.resize(out.len() + padded - frame.len(), 0);
        out.extend_from_slice(&block_len.to_le_bytes());
    }
    std::fs::write(path, out).unwrap();
}

// section header and one Ethernet interface description
fn pcapng_preamble() -> Vec<u8> {
    let mut out = Vec::new();

    out.extend_from_slice(&0x0a0d0d0au32.to_le_bytes());
    out.extend_from_slice(&28u32.to_le_bytes());
    out.extend_from_slice(&0x1a2b3c4du32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(-1i64).to_le_bytes());
    out.extend_from_slice(&28u32.to_le_bytes());

    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&20u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&65535u32.to_le_bytes());
    out.extend_from_slice(&20u32.to_le_bytes());
    out
}

/// A valid CADU on `vcid` carrying `zone` (padded with 0x55) in its packet zone.
pub fn cadu(vcid: u8, frame_count: u32, first_header_pointer: u16, zone: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2048);
    out.extend_from_slice(&[0x1a, 0xcf, 0xfc, 0x1d]);
    // version 01, spacecraft id 0x10
    out.push(0x40 | (0x10 >> 2));
    out.push(((0x10 & 0x03) << 6) | (vcid & 0x3f));
    out.extend_from_slice(&frame_count.to_be_bytes()[1..]);
    out.push(0x00);
    out.extend_from_slice(&(first_header_pointer & 0x07ff).to_be_bytes());
    out.extend_from_slice(zone);
    out.resize(2046, 0x55);
    out.extend_from_slice(&[0xab, 0xcd]);
    out
}

/// A complete GRB space packet with generic-data header and `data` as the
/// instrument payload.
pub fn space_packet(apid: u16, sequence_flags: u8, sequence_count: u16, data: &[u8]) -> Vec<u8> {
    let mut user_data = Vec::new();
    // generic header: compression, seconds, microseconds, reserved, data unit count
    user_data.push(0);
    user_data.extend_from_slice(&700_000_000u32.to_be_bytes());
    user_data.extend_from_slice(&250_000u32.to_be_bytes());
    user_data.extend_from_slice(&[0; 8]);
    user_data.extend_from_slice(&1u32.to_be_bytes());
    user_data.extend_from_slice(data);
    raw_space_packet(apid, sequence_flags, sequence_count, &user_data)
}

/// A space packet around an arbitrary user data field; the CRC is appended.
pub fn raw_space_packet(apid: u16, sequence_flags: u8, sequence_count: u16, user_data: &[u8]) -> Vec<u8> {
    let mut packet = Vec::new();
    let word0 = 0x0800 | (apid & 0x07ff); // version 0, type 0, secondary header present
    let word1 = (u16::from(sequence_flags & 0x03) << 14) | (sequence_count & 0x3fff);
    let data_length = (8 + user_data.len() + 4 - 1) as u16;
    packet.extend_from_slice(&word0.to_be_bytes());
    packet.extend_from_slice(&word1.to_be_bytes());
    packet.extend_from_slice(&data_length.to_be_bytes());
    // secondary header: days, milliseconds, grb version 0, generic payload variant 0
    packet.extend_from_slice(&8766u16.to_be_bytes());
    packet.extend_from_slice(&43_200_000u32.to_be_bytes());
    packet.extend_from_slice(&[0x00, 0x00]);
    packet.extend_from_slice(user_data);
    let crc = crc32fast::hash(&packet);
    packet.extend_from_slice(&crc.to_be_bytes());
    packet
}
