use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;

use etherparse::{IpNumber, Ipv4Header, Ipv6Extensions, Ipv6Header, UdpHeader};
use pcap_parser::Linktype;
use tracing::trace;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86dd;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_QINQ: u16 = 0x88a8;

const SLL_HEADER_LEN: usize = 16;
const NULL_HEADER_LEN: usize = 4;
const UDP_HEADER_LEN: usize = 8;
const MAX_PENDING_DATAGRAMS: usize = 64;

/// Finds the start of the IP header inside a link-layer frame.
fn network_layer(linktype: Linktype, frame: &[u8]) -> Option<&[u8]> {
    if linktype == Linktype::ETHERNET {
        let mut offset = 12;
        loop {
            let ethertype = u16::from_be_bytes([*frame.get(offset)?, *frame.get(offset + 1)?]);
            match ethertype {
                ETHERTYPE_VLAN | ETHERTYPE_QINQ => offset += 4,
                ETHERTYPE_IPV4 | ETHERTYPE_IPV6 => return frame.get(offset + 2..),
                _ => return None,
            }
        }
    } else if linktype == Linktype::RAW || linktype == Linktype::IPV4 || linktype == Linktype::IPV6 {
        Some(frame)
    } else if linktype == Linktype::NULL || linktype == Linktype::LOOP {
        frame.get(NULL_HEADER_LEN..)
    } else if linktype == Linktype::LINUX_SLL {
        let protocol = u16::from_be_bytes([*frame.get(14)?, *frame.get(15)?]);
        match protocol {
            ETHERTYPE_IPV4 | ETHERTYPE_IPV6 => frame.get(SLL_HEADER_LEN..),
            _ => None,
        }
    } else {
        None
    }
}

/// Splits a UDP datagram into its payload, trimmed to the UDP length field.
fn udp_payload_of(datagram: &[u8]) -> Option<&[u8]> {
    let (header, rest) = UdpHeader::from_slice(datagram).ok()?;
    let payload_len = usize::from(header.length).checked_sub(UDP_HEADER_LEN)?;
    Some(&rest[..payload_len.min(rest.len())])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FragmentKey {
    source: IpAddr,
    destination: IpAddr,
    identification: u32,
}

#[derive(Default)]
struct PartialDatagram {
    pieces: BTreeMap<usize, Vec<u8>>,
    total_len: Option<usize>,
    first_seen: u64,
}

impl PartialDatagram {
    fn assemble(&self) -> Option<Vec<u8>> {
        let total = self.total_len?;
        let mut out = Vec::with_capacity(total);
        for (&offset, piece) in &self.pieces {
            if offset > out.len() {
                return None;
            }
            let end = offset + piece.len();
            if end > out.len() {
                out.extend_from_slice(&piece[out.len() - offset..]);
            }
        }
        if out.len() < total {
            return None;
        }
        out.truncate(total);
        Some(out)
    }
}

/// Pulls UDP payloads out of captured frames, reassembling IPv4 fragments.
#[derive(Default)]
pub struct UdpExtractor {
    fragments: HashMap<FragmentKey, PartialDatagram>,
    arrivals: u64,
}

impl UdpExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the UDP payload carried by `frame`, or `None` when the frame is
    /// not UDP, is malformed, or is a fragment of a datagram still incomplete.
    pub fn udp_payload<'a>(&mut self, linktype: Linktype, frame: &'a [u8]) -> Option<Cow<'a, [u8]>> {
        let ip = network_layer(linktype, frame)?;
        match ip.first()? >> 4 {
            4 => self.ipv4(ip),
            6 => self.ipv6(ip),
            _ => None,
        }
    }

    pub fn pending_datagrams(&self) -> usize {
        self.fragments.len()
    }

    fn ipv4<'a>(&mut self, ip: &'a [u8]) -> Option<Cow<'a, [u8]>> {
        let (header, _) = Ipv4Header::from_slice(ip).ok()?;
        if header.protocol != IpNumber::UDP {
            return None;
        }
        let header_len = header.header_len();
        let total_len = usize::from(header.total_len).min(ip.len());
        if total_len < header_len {
            return None;
        }
        let body = &ip[header_len..total_len];
        let fragment_offset = usize::from(header.fragment_offset.value()) * 8;

        if !header.more_fragments && fragment_offset == 0 {
            return udp_payload_of(body).map(Cow::Borrowed);
        }

        let key = FragmentKey {
            source: header.source.into(),
            destination: header.destination.into(),
            identification: u32::from(header.identification),
        };
        let datagram = self.add_fragment(key, fragment_offset, body, header.more_fragments)?;
        udp_payload_of(&datagram).map(|payload| Cow::Owned(payload.to_vec()))
    }

    fn ipv6<'a>(&mut self, ip: &'a [u8]) -> Option<Cow<'a, [u8]>> {
        let (header, rest) = Ipv6Header::from_slice(ip).ok()?;
        let body = &rest[..usize::from(header.payload_length).min(rest.len())];
        // hop-by-hop, routing, destination and fragment headers are skipped
        let (extensions, next_header, body) = Ipv6Extensions::from_slice(header.next_header, body).ok()?;
        if next_header != IpNumber::UDP {
            return None;
        }

        match extensions.fragment {
            Some(fragment) if fragment.is_fragmenting_payload() => {
                let key = FragmentKey {
                    source: header.source.into(),
                    destination: header.destination.into(),
                    identification: fragment.identification,
                };
                let offset = usize::from(fragment.fragment_offset.value()) * 8;
                let datagram = self.add_fragment(key, offset, body, fragment.more_fragments)?;
                udp_payload_of(&datagram).map(|payload| Cow::Owned(payload.to_vec()))
            }
            _ => udp_payload_of(body).map(Cow::Borrowed),
        }
    }

    fn add_fragment(&mut self, key: FragmentKey, offset: usize, body: &[u8], more: bool) -> Option<Vec<u8>> {
        if !self.fragments.contains_key(&key) && self.fragments.len() >= MAX_PENDING_DATAGRAMS {
            if let Some(oldest) = self
                .fragments
                .iter()
                .min_by_key(|(_, partial)| partial.first_seen)
                .map(|(key, _)| *key)
            {
                trace!("Evicting incomplete datagram {:?}", oldest);
                self.fragments.remove(&oldest);
            }
        }

        self.arrivals += 1;
        let arrivals = self.arrivals;
        let partial = self.fragments.entry(key).or_insert_with(|| PartialDatagram {
            first_seen: arrivals,
            ..Default::default()
        });
        partial.pieces.insert(offset, body.to_vec());
        if !more {
            partial.total_len = Some(offset + body.len());
        }

        let datagram = partial.assemble()?;
        self.fragments.remove(&key);
        Some(datagram)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn extracts_udp_payload_from_ethernet() {
        let frame = testutil::udp_frame(&[1, 2, 3, 4]);
        let mut extractor = UdpExtractor::new();
        let payload = extractor.udp_payload(Linktype::ETHERNET, &frame).unwrap();
        assert_eq!(payload.as_ref(), &[1, 2, 3, 4]);
    }

    #[test]
    fn ignores_tcp() {
        let frame = testutil::tcp_frame(&[1, 2, 3, 4]);
        let mut extractor = UdpExtractor::new();
        assert!(extractor.udp_payload(Linktype::ETHERNET, &frame).is_none());
    }

    #[test]
    fn ignores_non_ip_ethertypes() {
        let mut frame = testutil::udp_frame(&[9; 10]);
        frame[12] = 0x08;
        frame[13] = 0x06; // ARP
        let mut extractor = UdpExtractor::new();
        assert!(extractor.udp_payload(Linktype::ETHERNET, &frame).is_none());
    }

    #[test]
    fn skips_vlan_tags() {
        let frame = testutil::udp_frame(&[7; 16]);
        let mut tagged = frame[..12].to_vec();
        tagged.extend_from_slice(&[0x81, 0x00, 0x00, 0x0a]);
        tagged.extend_from_slice(&frame[12..]);

        let mut extractor = UdpExtractor::new();
        let payload = extractor.udp_payload(Linktype::ETHERNET, &tagged).unwrap();
        assert_eq!(payload.as_ref(), &[7; 16]);
    }

    #[test]
    fn skips_qinq_tags() {
        let frame = testutil::udp_frame(&[3; 24]);
        let mut tagged = frame[..12].to_vec();
        tagged.extend_from_slice(&[0x88, 0xa8, 0x00, 0x64]);
        tagged.extend_from_slice(&[0x81, 0x00, 0x00, 0x0a]);
        tagged.extend_from_slice(&frame[12..]);

        let mut extractor = UdpExtractor::new();
        let payload = extractor.udp_payload(Linktype::ETHERNET, &tagged).unwrap();
        assert_eq!(payload.as_ref(), &[3; 24]);
    }

    #[test]
    fn extracts_udp_over_ipv6() {
        let payload: Vec<u8> = (0..2048u32).map(|i| (i % 199) as u8).collect();
        let mut extractor = UdpExtractor::new();
        let frame = testutil::udp6_frame(&payload);
        let found = extractor.udp_payload(Linktype::ETHERNET, &frame).unwrap();
        assert_eq!(found.as_ref(), payload.as_slice());
    }

    #[test]
    fn follows_ipv6_extension_headers() {
        let frame = testutil::udp6_frame_with_hop_by_hop(&[8; 40]);
        let mut extractor = UdpExtractor::new();
        let payload = extractor.udp_payload(Linktype::ETHERNET, &frame).unwrap();
        assert_eq!(payload.as_ref(), &[8; 40]);
    }

    #[test]
    fn reassembles_ipv6_fragments() {
        let payload: Vec<u8> = (0..2048u32).map(|i| (i % 241) as u8).collect();
        let fragments = testutil::fragmented_udp6_frames(&payload, 1448);
        assert_eq!(fragments.len(), 2);

        let mut extractor = UdpExtractor::new();
        assert!(extractor.udp_payload(Linktype::ETHERNET, &fragments[0]).is_none());
        assert_eq!(extractor.pending_datagrams(), 1);
        let whole = extractor.udp_payload(Linktype::ETHERNET, &fragments[1]).unwrap();
        assert_eq!(whole.as_ref(), payload.as_slice());
        assert_eq!(extractor.pending_datagrams(), 0);
    }

    #[test]
    fn extracts_udp_from_linux_cooked_capture() {
        let mut frame = vec![0, 0, 0, 1, 0, 6, 2, 0, 0, 0, 0, 1, 0, 0];
        frame.extend_from_slice(&[0x08, 0x00]);
        frame.extend_from_slice(&testutil::udp_ip_packet(&[6; 2048]));

        let mut extractor = UdpExtractor::new();
        let payload = extractor.udp_payload(Linktype::LINUX_SLL, &frame).unwrap();
        assert_eq!(payload.len(), 2048);

        frame[14..16].copy_from_slice(&[0x08, 0x06]);
        assert!(extractor.udp_payload(Linktype::LINUX_SLL, &frame).is_none());
    }

    #[test]
    fn extracts_udp_from_loopback_captures() {
        let packet = testutil::udp_ip_packet(&[4; 2048]);
        let mut extractor = UdpExtractor::new();
        for linktype in [Linktype::NULL, Linktype::LOOP] {
            let mut frame = 2u32.to_le_bytes().to_vec(); // AF_INET
            frame.extend_from_slice(&packet);
            let payload = extractor.udp_payload(linktype, &frame).unwrap();
            assert_eq!(payload.len(), 2048);
        }
    }

    #[test]
    fn unknown_link_type_yields_nothing() {
        let frame = testutil::udp_frame(&[1; 8]);
        let mut extractor = UdpExtractor::new();
        assert!(extractor.udp_payload(Linktype(147), &frame).is_none());
    }

    #[test]
    fn handles_raw_ip_and_truncated_frames() {
        let frame = testutil::udp_frame(&[5; 32]);
        let mut extractor = UdpExtractor::new();
        let payload = extractor.udp_payload(Linktype::RAW, &frame[14..]).unwrap();
        assert_eq!(payload.len(), 32);

        assert!(extractor.udp_payload(Linktype::ETHERNET, &frame[..20]).is_none());
        assert!(extractor.udp_payload(Linktype::ETHERNET, &[]).is_none());
    }

    #[test]
    fn reassembles_fragments_in_any_order() {
        let payload: Vec<u8> = (0..2048u32).map(|i| (i % 251) as u8).collect();
        let fragments = testutil::fragmented_udp_frames(&payload, 1480);
        assert_eq!(fragments.len(), 2);

        let mut extractor = UdpExtractor::new();
        assert!(extractor.udp_payload(Linktype::ETHERNET, &fragments[1]).is_none());
        assert_eq!(extractor.pending_datagrams(), 1);
        let whole = extractor.udp_payload(Linktype::ETHERNET, &fragments[0]).unwrap();
        assert_eq!(whole.as_ref(), payload.as_slice());
        assert_eq!(extractor.pending_datagrams(), 0);
    }

    #[test]
    fn bounds_incomplete_datagrams() {
        let payload = vec![1u8; 3000];
        let mut extractor = UdpExtractor::new();
        for id in 0..(MAX_PENDING_DATAGRAMS as u16 + 10) {
            let fragments = testutil::fragmented_udp_frames_with_id(&payload, 1480, id);
            extractor.udp_payload(Linktype::ETHERNET, &fragments[0]);
        }
        assert_eq!(extractor.pending_datagrams(), MAX_PENDING_DATAGRAMS);
    }
}
