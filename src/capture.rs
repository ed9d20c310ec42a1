use std::fs::File;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{create_reader, Block, Linktype, PcapBlockOwned, PcapError};
use tracing::debug;

use crate::model::CapturedPacket;

const READER_CAPACITY: usize = 65536;
// largest single record the reader will grow to hold
const MAX_READER_CAPACITY: usize = 16 << 20;

/// Streams the packets of a pcap or pcapng file in file order.
pub struct CaptureReader {
    reader: Box<dyn PcapReaderIterator>,
    capacity: usize,
    legacy_linktype: Linktype,
    // pcapng interface descriptions of the current section, by interface id
    interfaces: Vec<Linktype>,
    next_index: u64,
}

impl CaptureReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Cannot open capture {:?}", path))?;
        let reader = create_reader(READER_CAPACITY, file)
            .map_err(|e| anyhow!("{:?} is not a pcap or pcapng capture: {:?}", path, e))?;
        debug!("Opened capture {:?}", path);

        Ok(Self {
            reader,
            capacity: READER_CAPACITY,
            legacy_linktype: Linktype::ETHERNET,
            interfaces: Vec::new(),
            next_index: 0,
        })
    }

    /// Returns the next packet, or `None` once the capture is exhausted.
    pub fn next_packet(&mut self) -> Result<Option<CapturedPacket>> {
        let mut stalled = false;
        loop {
            match self.reader.next() {
                Ok((offset, block)) => {
                    stalled = false;
                    let packet = match block {
                        PcapBlockOwned::LegacyHeader(hdr) => {
                            self.legacy_linktype = hdr.network;
                            None
                        }
                        PcapBlockOwned::Legacy(pkt) => Some((self.legacy_linktype, pkt.data.to_vec())),
                        PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                            self.interfaces.clear();
                            None
                        }
                        PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
                            self.interfaces.push(idb.linktype);
                            None
                        }
                        PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                            let Some(&linktype) = self.interfaces.get(epb.if_id as usize) else {
                                bail!("packet block references unknown interface {}", epb.if_id);
                            };
                            let len = (epb.caplen as usize).min(epb.data.len());
                            Some((linktype, epb.data[..len].to_vec()))
                        }
                        PcapBlockOwned::NG(Block::SimplePacket(spb)) => {
                            let Some(&linktype) = self.interfaces.first() else {
                                bail!("simple packet block before any interface description");
                            };
                            let len = (spb.origlen as usize).min(spb.data.len());
                            Some((linktype, spb.data[..len].to_vec()))
                        }
                        PcapBlockOwned::NG(_) => None,
                    };
                    self.reader.consume(offset);

                    if let Some((linktype, data)) = packet {
                        let index = self.next_index;
                        self.next_index += 1;
                        return Ok(Some(CapturedPacket { index, linktype, data }));
                    }
                }
                Err(PcapError::Eof) => return Ok(None),
                Err(PcapError::Incomplete(_)) => {
                    if stalled {
                        bail!("capture is truncated after {} packets", self.next_index);
                    }
                    stalled = true;
                    self.reader
                        .refill()
                        .map_err(|e| anyhow!("refill error: {:?}", e))?;
                }
                Err(PcapError::BufferTooSmall) => {
                    if self.capacity >= MAX_READER_CAPACITY {
                        bail!(
                            "record after packet {} exceeds {} bytes",
                            self.next_index,
                            MAX_READER_CAPACITY
                        );
                    }
                    let capacity = (self.capacity * 2).min(MAX_READER_CAPACITY);
                    if !self.reader.grow(capacity) {
                        bail!("cannot grow capture buffer to {} bytes", capacity);
                    }
                    debug!("Capture buffer grown to {} bytes", capacity);
                    self.capacity = capacity;
                    stalled = false;
                    self.reader
                        .refill()
                        .map_err(|e| anyhow!("refill error: {:?}", e))?;
                }
                Err(e) => bail!("error while reading capture: {:?}", e),
            }
        }
    }
}
