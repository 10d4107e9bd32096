use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, trace};
use pcap_parser::pcapng::Block;
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{LegacyPcapReader, PcapBlockOwned, PcapError, PcapNGReader};

use super::frame_decoder::link_type;
use super::types::RawFrame;
use crate::error_handling::types::SegmentError;

/// Size of the pcap_parser read buffer; must hold the largest block.
const BUFFER_SIZE: usize = 1 << 20;

const PCAPNG_MAGIC: [u8; 4] = [0x0A, 0x0D, 0x0D, 0x0A];
const LEGACY_MAGIC_MICRO: u32 = 0xA1B2_C3D4;
const LEGACY_MAGIC_NANO: u32 = 0xA1B2_3C4D;

const MICROS_PER_SEC: u64 = 1_000_000;
const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Per-interface decoding parameters.
#[derive(Debug, Clone, Copy)]
struct InterfaceInfo {
    link_type: u16,
    /// Timestamp units per second.
    units_per_sec: u64,
    /// Seconds added to every timestamp (`if_tsoffset`).
    offset_secs: i64,
}

impl Default for InterfaceInfo {
    fn default() -> Self {
        Self {
            link_type: link_type::ETHERNET,
            units_per_sec: MICROS_PER_SEC,
            offset_secs: 0,
        }
    }
}

impl InterfaceInfo {
    fn timestamp(&self, ts: u64) -> DateTime<Utc> {
        let secs = (ts / self.units_per_sec) as i64 + self.offset_secs;
        let frac = ts % self.units_per_sec;
        let nanos =
            (u128::from(frac) * u128::from(NANOS_PER_SEC) / u128::from(self.units_per_sec)) as u32;
        DateTime::from_timestamp(secs, nanos).unwrap_or_default()
    }

    fn frame(&self, timestamp: DateTime<Utc>, data: &[u8], caplen: u32) -> RawFrame {
        let len = (caplen as usize).min(data.len());
        RawFrame {
            frame_number: 0,
            timestamp,
            link_type: self.link_type,
            data: data[..len].to_vec(),
        }
    }
}

/// Units per second encoded by an `if_tsresol` option value.
fn resolution_units(tsresol: u8) -> u64 {
    let exponent = u32::from(tsresol & 0x7F);
    let units = if tsresol & 0x80 != 0 {
        2u64.checked_pow(exponent)
    } else {
        10u64.checked_pow(exponent)
    };
    match units {
        Some(0) | None => MICROS_PER_SEC,
        Some(units) => units,
    }
}

enum ReaderInner {
    Legacy(LegacyPcapReader<File>),
    Ng(PcapNGReader<File>),
}

/// Outcome of asking pcap_parser for one block.
enum Step {
    Frame(RawFrame),
    Skipped,
    Eof,
    Incomplete,
    Failed(String),
}

/// Sequential frame reader over one finalized segment.
///
/// Accepts pcapng (as written by the capture process) as well as legacy
/// pcap, selected by the file magic.
pub struct SegmentReader {
    path: PathBuf,
    inner: ReaderInner,
    interfaces: Vec<InterfaceInfo>,
    frames_read: u64,
}

impl SegmentReader {
    pub fn open(path: &Path) -> Result<Self, SegmentError> {
        let mut file =
            File::open(path).map_err(|e| SegmentError::OpenFailed(path.to_path_buf(), e))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic).map_err(|_| {
            SegmentError::InvalidFormat(format!("{} is too short to be a capture", path.display()))
        })?;
        file.rewind()
            .map_err(|e| SegmentError::OpenFailed(path.to_path_buf(), e))?;

        let inner = if magic == PCAPNG_MAGIC {
            let reader = PcapNGReader::new(BUFFER_SIZE, file).map_err(|e| {
                SegmentError::InvalidFormat(format!("{}: {}", path.display(), e))
            })?;
            ReaderInner::Ng(reader)
        } else if is_legacy_magic(magic) {
            let reader = LegacyPcapReader::new(BUFFER_SIZE, file).map_err(|e| {
                SegmentError::InvalidFormat(format!("{}: {}", path.display(), e))
            })?;
            ReaderInner::Legacy(reader)
        } else {
            return Err(SegmentError::InvalidFormat(format!(
                "{}: unknown magic {:02x?}",
                path.display(),
                magic
            )));
        };

        debug!("Opened segment {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            inner,
            interfaces: Vec::new(),
            frames_read: 0,
        })
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Returns the next captured frame, `Ok(None)` at a clean end of file.
    ///
    /// A block that cannot be completed even after refilling the buffer means
    /// the file was cut short, which is reported as [`SegmentError::Truncated`].
    pub fn next_frame(&mut self) -> Result<Option<RawFrame>, SegmentError> {
        let mut stalled = false;
        loop {
            let step = match &mut self.inner {
                ReaderInner::Legacy(reader) => legacy_step(reader, &mut self.interfaces),
                ReaderInner::Ng(reader) => ng_step(reader, &mut self.interfaces),
            };
            match step {
                Step::Frame(mut frame) => {
                    self.frames_read += 1;
                    frame.frame_number = self.frames_read;
                    return Ok(Some(frame));
                }
                Step::Skipped => stalled = false,
                Step::Eof => return Ok(None),
                Step::Incomplete if stalled => {
                    return Err(SegmentError::Truncated(format!(
                        "{}: partial block after frame {}",
                        self.path.display(),
                        self.frames_read
                    )));
                }
                Step::Incomplete => {
                    self.refill()?;
                    stalled = true;
                }
                Step::Failed(reason) => {
                    return Err(SegmentError::Truncated(format!(
                        "{}: {} after frame {}",
                        self.path.display(),
                        reason,
                        self.frames_read
                    )));
                }
            }
        }
    }

    fn refill(&mut self) -> Result<(), SegmentError> {
        let result = match &mut self.inner {
            ReaderInner::Legacy(reader) => reader.refill().map_err(|e| e.to_string()),
            ReaderInner::Ng(reader) => reader.refill().map_err(|e| e.to_string()),
        };
        result.map_err(|reason| {
            SegmentError::Truncated(format!("{}: {}", self.path.display(), reason))
        })
    }
}

fn is_legacy_magic(magic: [u8; 4]) -> bool {
    [LEGACY_MAGIC_MICRO, LEGACY_MAGIC_NANO]
        .iter()
        .any(|m| magic == m.to_le_bytes() || magic == m.to_be_bytes())
}

fn legacy_step(reader: &mut LegacyPcapReader<File>, interfaces: &mut Vec<InterfaceInfo>) -> Step {
    match reader.next() {
        Ok((offset, block)) => {
            let step = match block {
                PcapBlockOwned::LegacyHeader(header) => {
                    let nanos = header.magic_number == LEGACY_MAGIC_NANO
                        || header.magic_number == LEGACY_MAGIC_NANO.swap_bytes();
                    interfaces.clear();
                    interfaces.push(InterfaceInfo {
                        link_type: header.network.0 as u16,
                        units_per_sec: if nanos { NANOS_PER_SEC } else { MICROS_PER_SEC },
                        offset_secs: 0,
                    });
                    trace!("Legacy header, link type {}", header.network.0);
                    Step::Skipped
                }
                PcapBlockOwned::Legacy(packet) => {
                    let iface = interfaces.first().copied().unwrap_or_default();
                    let ts = u64::from(packet.ts_sec) * iface.units_per_sec
                        + u64::from(packet.ts_usec);
                    Step::Frame(iface.frame(iface.timestamp(ts), packet.data, packet.caplen))
                }
                PcapBlockOwned::NG(_) => Step::Skipped,
            };
            reader.consume(offset);
            step
        }
        Err(PcapError::Eof) => Step::Eof,
        Err(PcapError::Incomplete(_)) => Step::Incomplete,
        Err(e) => Step::Failed(e.to_string()),
    }
}

fn ng_step(reader: &mut PcapNGReader<File>, interfaces: &mut Vec<InterfaceInfo>) -> Step {
    match reader.next() {
        Ok((offset, block)) => {
            let step = match block {
                PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                    interfaces.clear();
                    Step::Skipped
                }
                PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
                    interfaces.push(InterfaceInfo {
                        link_type: idb.linktype.0 as u16,
                        units_per_sec: resolution_units(idb.if_tsresol),
                        offset_secs: idb.if_tsoffset as i64,
                    });
                    trace!(
                        "Interface {} link type {}",
                        interfaces.len() - 1,
                        idb.linktype.0
                    );
                    Step::Skipped
                }
                PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                    let iface = interfaces
                        .get(epb.if_id as usize)
                        .copied()
                        .unwrap_or_default();
                    let ts = (u64::from(epb.ts_high) << 32) | u64::from(epb.ts_low);
                    Step::Frame(iface.frame(iface.timestamp(ts), epb.data, epb.caplen))
                }
                PcapBlockOwned::NG(Block::SimplePacket(spb)) => {
                    // simple packets carry no timestamp
                    let iface = interfaces.first().copied().unwrap_or_default();
                    let caplen = spb.data.len() as u32;
                    Step::Frame(iface.frame(Utc::now(), spb.data, caplen))
                }
                _ => Step::Skipped,
            };
            reader.consume(offset);
            step
        }
        Err(PcapError::Eof) => Step::Eof,
        Err(PcapError::Incomplete(_)) => Step::Incomplete,
        Err(e) => Step::Failed(e.to_string()),
    }
}
