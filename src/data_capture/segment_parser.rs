use std::collections::VecDeque;

use chrono::Utc;
use log::{debug, info, trace, warn};
use tokio::sync::mpsc;

use super::frame_decoder::{decode_frame, NetworkLayer, Transport};
use super::segment_reader::SegmentReader;
use super::tcp_reassembly::{StreamChunk, TcpReassembler, TcpSegment};
use super::types::{FlowKey, ProtocolTag, RawFrame, ReassembledRecord};
use crate::error_handling::types::SegmentError;
use crate::storage::types::CaptureSegment;

#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Out-of-order bytes one TCP flow direction may buffer.
    pub max_flow_buffer: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_flow_buffer: 4 * 1024 * 1024,
        }
    }
}

/// Counters for one parsed segment.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParseSummary {
    pub frames: u64,
    /// Frames that could not be decoded down to the IP layer.
    pub skipped_frames: u64,
    pub tcp_records: u64,
    pub udp_records: u64,
    pub other_records: u64,
    pub tcp_flows: usize,
    pub abandoned_flows: usize,
    /// The file ended in the middle of a block.
    pub truncated: bool,
}

impl ParseSummary {
    pub fn records(&self) -> u64 {
        self.tcp_records + self.udp_records + self.other_records
    }
}

/// Records of one segment, produced lazily.
///
/// The iterator reads frames until the file is exhausted (or cut short),
/// then flushes every TCP flow that is still open and ends. It is not
/// restartable.
pub struct SegmentRecords {
    segment_index: u64,
    reader: Option<SegmentReader>,
    reassembler: TcpReassembler,
    ready: VecDeque<ReassembledRecord>,
    summary: ParseSummary,
    flushed: bool,
}

impl SegmentRecords {
    pub fn open(segment: &CaptureSegment, options: &ParseOptions) -> Result<Self, SegmentError> {
        let reader = SegmentReader::open(&segment.path)?;
        Ok(Self {
            segment_index: segment.index,
            reader: Some(reader),
            reassembler: TcpReassembler::new(options.max_flow_buffer),
            ready: VecDeque::new(),
            summary: ParseSummary::default(),
            flushed: false,
        })
    }

    pub fn summary(&self) -> ParseSummary {
        let stats = self.reassembler.stats();
        ParseSummary {
            tcp_flows: stats.flows,
            abandoned_flows: stats.abandoned,
            ..self.summary.clone()
        }
    }

    fn ingest(&mut self, frame: RawFrame) {
        self.summary.frames += 1;
        let decoded = match decode_frame(frame.link_type, &frame.data) {
            Ok(decoded) => decoded,
            Err(reason) => {
                trace!(
                    "Segment {} frame {}: {}",
                    self.segment_index,
                    frame.frame_number,
                    reason
                );
                self.summary.skipped_frames += 1;
                return;
            }
        };

        match (decoded.network, decoded.transport) {
            (NetworkLayer::Ipv4, Transport::Tcp(tcp)) => {
                let flow = FlowKey::new(
                    decoded.src_addr,
                    tcp.src_port,
                    decoded.dst_addr,
                    tcp.dst_port,
                    decoded.ip_protocol,
                );
                let segment = TcpSegment {
                    seq: tcp.seq,
                    syn: tcp.syn,
                    fin: tcp.fin,
                    rst: tcp.rst,
                    payload: decoded.payload,
                };
                match self.reassembler.accept(flow, &segment) {
                    Ok(Some(chunk)) => self.push_chunk(chunk),
                    Ok(None) => {}
                    Err(e) => warn!("Segment {}: {}; flow abandoned", self.segment_index, e),
                }
            }
            // empty payloads carry nothing to show
            _ if decoded.payload.is_empty() => {}
            (NetworkLayer::Ipv4, Transport::Udp { src_port, dst_port }) => {
                let flow = FlowKey::new(
                    decoded.src_addr,
                    src_port,
                    decoded.dst_addr,
                    dst_port,
                    decoded.ip_protocol,
                );
                self.summary.udp_records += 1;
                self.ready.push_back(ReassembledRecord::new(
                    self.segment_index,
                    frame.timestamp,
                    flow,
                    ProtocolTag::Udp,
                    decoded.payload.to_vec(),
                ));
            }
            _ => {
                let flow = FlowKey::new(
                    decoded.src_addr,
                    0,
                    decoded.dst_addr,
                    0,
                    decoded.ip_protocol,
                );
                self.summary.other_records += 1;
                self.ready.push_back(ReassembledRecord::new(
                    self.segment_index,
                    frame.timestamp,
                    flow,
                    ProtocolTag::Other,
                    decoded.payload.to_vec(),
                ));
            }
        }
    }

    /// Reassembled bytes are stamped with the time they were delivered.
    fn push_chunk(&mut self, chunk: StreamChunk) {
        self.summary.tcp_records += 1;
        self.ready.push_back(ReassembledRecord::new(
            self.segment_index,
            Utc::now(),
            chunk.flow,
            ProtocolTag::Tcp,
            chunk.bytes,
        ));
    }
}

impl Iterator for SegmentRecords {
    type Item = ReassembledRecord;

    fn next(&mut self) -> Option<ReassembledRecord> {
        loop {
            if let Some(record) = self.ready.pop_front() {
                return Some(record);
            }

            let step = self.reader.as_mut().map(|reader| reader.next_frame());
            match step {
                Some(Ok(Some(frame))) => self.ingest(frame),
                Some(Ok(None)) => self.reader = None,
                Some(Err(e)) => {
                    warn!("Segment {}: {}", self.segment_index, e);
                    self.summary.truncated = true;
                    self.reader = None;
                }
                None if self.flushed => return None,
                None => {
                    self.flushed = true;
                    for chunk in self.reassembler.flush_all() {
                        self.push_chunk(chunk);
                    }
                }
            }
        }
    }
}

/// Parses one finalized segment and sends its records, in production order,
/// into the queue. Blocks while the queue is full; meant to run on the
/// blocking pool.
///
/// Returns early, without error, if the receiving side has gone away.
pub fn parse_segment(
    segment: &CaptureSegment,
    options: &ParseOptions,
    records: &mpsc::Sender<ReassembledRecord>,
) -> Result<ParseSummary, SegmentError> {
    debug!("Parsing segment {} ({})", segment.index, segment.path.display());
    let mut stream = SegmentRecords::open(segment, options)?;

    for record in stream.by_ref() {
        if records.blocking_send(record).is_err() {
            warn!(
                "Record queue closed while parsing segment {}, stopping",
                segment.index
            );
            break;
        }
    }

    let summary = stream.summary();
    info!(
        "Segment {}: {} frames, {} records (tcp={}, udp={}, other={}), {} tcp flows, {} skipped frames{}",
        segment.index,
        summary.frames,
        summary.records(),
        summary.tcp_records,
        summary.udp_records,
        summary.other_records,
        summary.tcp_flows,
        summary.skipped_frames,
        if summary.truncated { ", truncated" } else { "" }
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_capture::test_support::*;
    use std::path::Path;
    use tempfile::TempDir;

    const CLIENT: [u8; 4] = [192, 168, 0, 10];
    const SERVER: [u8; 4] = [93, 184, 216, 34];

    fn segment_at(dir: &Path, index: u64) -> CaptureSegment {
        CaptureSegment::new(dir, index)
    }

    fn collect(segment: &CaptureSegment) -> (Vec<ReassembledRecord>, ParseSummary) {
        let mut stream = SegmentRecords::open(segment, &ParseOptions::default()).unwrap();
        let records: Vec<_> = stream.by_ref().collect();
        (records, stream.summary())
    }

    #[test]
    fn out_of_order_tcp_is_one_contiguous_record() {
        let dir = TempDir::new().unwrap();
        let segment = segment_at(dir.path(), 1);
        PcapNgBuilder::new(LINKTYPE_ETHERNET)
            .packet(1_000, &tcp_frame(CLIENT, 40000, SERVER, 80, 999, SYN, b""))
            .packet(2_000, &tcp_frame(CLIENT, 40000, SERVER, 80, 1006, 0, b"world"))
            .packet(3_000, &tcp_frame(CLIENT, 40000, SERVER, 80, 1000, 0, b"hello "))
            .write_to(&segment.path);

        let (records, summary) = collect(&segment);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.protocol, ProtocolTag::Tcp);
        assert_eq!(record.payload, b"hello world");
        assert_eq!(record.length, 11);
        assert_eq!(record.segment_index, 1);
        assert_eq!(record.flow.src_port, 40000);
        assert_eq!(record.flow.dst_port, 80);
        assert_eq!(summary.tcp_flows, 1);
        assert!(!summary.truncated);
    }

    #[test]
    fn udp_datagrams_keep_frame_timestamps_and_skip_empty_ones() {
        let dir = TempDir::new().unwrap();
        let segment = segment_at(dir.path(), 2);
        PcapNgBuilder::new(LINKTYPE_ETHERNET)
            .packet(1_700_000_000_000_000, &udp_frame(CLIENT, 5000, SERVER, 53, b""))
            .packet(1_700_000_000_500_000, &udp_frame(CLIENT, 5000, SERVER, 53, b"query"))
            .write_to(&segment.path);

        let (records, summary) = collect(&segment);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].protocol, ProtocolTag::Udp);
        assert_eq!(records[0].payload, b"query");
        assert_eq!(records[0].timestamp.timestamp(), 1_700_000_000);
        assert_eq!(records[0].timestamp.timestamp_subsec_millis(), 500);
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.udp_records, 1);
    }

    #[test]
    fn non_tcp_udp_traffic_is_reported_as_other() {
        let dir = TempDir::new().unwrap();
        let segment = segment_at(dir.path(), 3);
        let mut src = [0u8; 16];
        src[15] = 1;
        PcapNgBuilder::new(LINKTYPE_ETHERNET)
            .packet(1, &icmp_frame(CLIENT, SERVER, b"ping"))
            .packet(2, &udp6_frame(src, 1000, src, 2000, b"v6"))
            .write_to(&segment.path);

        let (records, _) = collect(&segment);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.protocol == ProtocolTag::Other));
        assert_eq!(records[0].payload, b"ping");
        assert_eq!(records[0].flow.src_port, 0);
        assert_eq!(records[1].payload, b"v6");
    }

    #[test]
    fn empty_non_tcp_payloads_produce_no_record() {
        let dir = TempDir::new().unwrap();
        let segment = segment_at(dir.path(), 9);
        let mut src = [0u8; 16];
        src[15] = 1;
        PcapNgBuilder::new(LINKTYPE_ETHERNET)
            .packet(1, &icmp_frame(CLIENT, SERVER, b""))
            .packet(2, &udp6_frame(src, 1000, src, 2000, b""))
            .write_to(&segment.path);

        let (records, summary) = collect(&segment);
        assert!(records.is_empty());
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.skipped_frames, 0);
    }

    #[test]
    fn open_flows_are_flushed_at_end_of_file() {
        let dir = TempDir::new().unwrap();
        let segment = segment_at(dir.path(), 4);
        PcapNgBuilder::new(LINKTYPE_ETHERNET)
            .packet(1, &tcp_frame(CLIENT, 40001, SERVER, 443, 0, SYN, b""))
            .packet(2, &tcp_frame(CLIENT, 40001, SERVER, 443, 21, 0, b"after a gap"))
            .write_to(&segment.path);

        let (records, _) = collect(&segment);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, b"after a gap");
    }

    #[test]
    fn truncated_file_still_yields_earlier_records() {
        let dir = TempDir::new().unwrap();
        let segment = segment_at(dir.path(), 5);
        let capture = PcapNgBuilder::new(LINKTYPE_ETHERNET)
            .packet(1, &udp_frame(CLIENT, 1, SERVER, 2, b"kept"))
            .packet(2, &udp_frame(CLIENT, 1, SERVER, 2, b"lost in the cut"));
        let bytes = capture.bytes();
        std::fs::write(&segment.path, &bytes[..bytes.len() - 10]).unwrap();

        let (records, summary) = collect(&segment);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, b"kept");
        assert!(summary.truncated);
    }

    #[test]
    fn unopenable_segment_is_an_error() {
        let dir = TempDir::new().unwrap();
        let segment = segment_at(dir.path(), 6);
        assert!(matches!(
            SegmentRecords::open(&segment, &ParseOptions::default()),
            Err(SegmentError::OpenFailed(_, _))
        ));
    }

    #[test]
    fn oversized_flow_is_abandoned_without_stopping_the_segment() {
        let dir = TempDir::new().unwrap();
        let segment = segment_at(dir.path(), 7);
        PcapNgBuilder::new(LINKTYPE_ETHERNET)
            .packet(1, &tcp_frame(CLIENT, 40002, SERVER, 80, 0, SYN, b""))
            .packet(2, &tcp_frame(CLIENT, 40002, SERVER, 80, 100, 0, &[b'x'; 64]))
            .packet(3, &udp_frame(CLIENT, 7, SERVER, 7, b"still here"))
            .write_to(&segment.path);

        let options = ParseOptions { max_flow_buffer: 16 };
        let mut stream = SegmentRecords::open(&segment, &options).unwrap();
        let records: Vec<_> = stream.by_ref().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, b"still here");
        assert_eq!(stream.summary().abandoned_flows, 1);
    }

    #[test]
    fn parse_segment_sends_every_record() {
        let dir = TempDir::new().unwrap();
        let segment = segment_at(dir.path(), 8);
        PcapNgBuilder::new(LINKTYPE_ETHERNET)
            .packet(1, &udp_frame(CLIENT, 1, SERVER, 2, b"one"))
            .packet(2, &udp_frame(CLIENT, 1, SERVER, 2, b"two"))
            .write_to(&segment.path);

        let (tx, mut rx) = mpsc::channel(8);
        let summary = parse_segment(&segment, &ParseOptions::default(), &tx).unwrap();
        drop(tx);
        assert_eq!(summary.records(), 2);
        assert_eq!(rx.blocking_recv().unwrap().payload, b"one");
        assert_eq!(rx.blocking_recv().unwrap().payload, b"two");
        assert!(rx.blocking_recv().is_none());
    }
}
