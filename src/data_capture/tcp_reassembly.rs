use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};

use log::{debug, trace};

use super::types::FlowKey;
use crate::error_handling::types::StreamError;

/// The parts of one TCP segment that drive reassembly.
#[derive(Debug, Clone, Copy)]
pub struct TcpSegment<'a> {
    pub seq: u32,
    pub syn: bool,
    pub fin: bool,
    pub rst: bool,
    pub payload: &'a [u8],
}

/// Contiguous bytes of one flow direction, in sequence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub flow: FlowKey,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReassemblyStats {
    /// Flow directions seen.
    pub flows: usize,
    /// Flow directions that ended with FIN or RST.
    pub closed: usize,
    /// Flow directions dropped for exceeding the buffer limit.
    pub abandoned: usize,
    /// Sequence space skipped over when flushing across gaps.
    pub gap_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlowState {
    Open,
    Closed,
    Abandoned,
}

/// Reassembly state of one flow direction.
#[derive(Debug)]
struct FlowBuffer {
    /// Sequence number of the next byte to deliver; unknown until a SYN or
    /// the first data segment is seen.
    expected_seq: Option<u32>,
    /// Stream offset of `expected_seq`.
    delivered: u64,
    /// Out-of-order data keyed by stream offset.
    pending: BTreeMap<u64, Vec<u8>>,
    pending_bytes: usize,
    /// Stream offset just past the last byte before the FIN.
    fin_offset: Option<u64>,
    state: FlowState,
}

impl FlowBuffer {
    fn new() -> Self {
        Self {
            expected_seq: None,
            delivered: 0,
            pending: BTreeMap::new(),
            pending_bytes: 0,
            fin_offset: None,
            state: FlowState::Open,
        }
    }

    /// Applies one segment and returns the bytes that became contiguous.
    fn accept(&mut self, segment: &TcpSegment<'_>) -> Vec<u8> {
        let mut out = Vec::new();
        let mut data_seq = segment.seq;
        if segment.syn {
            // SYN consumes one sequence number
            data_seq = segment.seq.wrapping_add(1);
            if self.expected_seq.is_none() {
                self.expected_seq = Some(data_seq);
            }
        }
        let expected = if segment.payload.is_empty() {
            self.expected_seq
        } else {
            Some(*self.expected_seq.get_or_insert(data_seq))
        };
        if segment.fin {
            let end_seq = data_seq.wrapping_add(segment.payload.len() as u32);
            self.fin_offset = Some(self.stream_offset(expected, end_seq));
        }
        if let (Some(expected), false) = (expected, segment.payload.is_empty()) {
            self.insert(expected, data_seq, segment.payload, &mut out);
        }
        out
    }

    /// Stream offset of `seq`, never before what was already delivered.
    fn stream_offset(&self, expected: Option<u32>, seq: u32) -> u64 {
        match expected {
            Some(expected) => {
                let diff = seq.wrapping_sub(expected) as i32;
                self.delivered + u64::from(diff.max(0).unsigned_abs())
            }
            None => self.delivered,
        }
    }

    fn insert(&mut self, expected: u32, seq: u32, payload: &[u8], out: &mut Vec<u8>) {
        let diff = seq.wrapping_sub(expected) as i32;
        if diff < 0 {
            let overlap = diff.unsigned_abs() as usize;
            if overlap >= payload.len() {
                trace!("Dropping retransmitted segment at seq {}", seq);
                return;
            }
            self.deliver(&payload[overlap..], out);
        } else if diff == 0 {
            self.deliver(payload, out);
        } else {
            let offset = self.delivered + diff as u64;
            let replaced = match self.pending.get(&offset) {
                Some(existing) if existing.len() >= payload.len() => return,
                Some(existing) => existing.len(),
                None => 0,
            };
            self.pending.insert(offset, payload.to_vec());
            self.pending_bytes = self.pending_bytes + payload.len() - replaced;
            return;
        }
        self.drain_pending(out);
    }

    fn deliver(&mut self, bytes: &[u8], out: &mut Vec<u8>) {
        out.extend_from_slice(bytes);
        self.skip(bytes.len() as u64);
    }

    fn skip(&mut self, len: u64) {
        self.delivered += len;
        self.expected_seq = self.expected_seq.map(|seq| seq.wrapping_add(len as u32));
    }

    /// Delivers pending data that now starts at or before the expected offset.
    fn drain_pending(&mut self, out: &mut Vec<u8>) {
        while let Some(entry) = self.pending.first_entry() {
            let offset = *entry.key();
            if offset > self.delivered {
                break;
            }
            let data = entry.remove();
            self.pending_bytes -= data.len();
            let already = (self.delivered - offset) as usize;
            if already < data.len() {
                self.deliver(&data[already..], out);
            }
        }
    }

    /// Delivers everything still pending, skipping over holes. Returns the
    /// number of sequence bytes that were skipped.
    fn flush(&mut self, out: &mut Vec<u8>) -> u64 {
        let mut skipped = 0;
        while let Some(&offset) = self.pending.keys().next() {
            if offset > self.delivered {
                let hole = offset - self.delivered;
                skipped += hole;
                self.skip(hole);
            }
            self.drain_pending(out);
        }
        skipped
    }

    /// Every byte up to the FIN has been delivered.
    fn is_complete(&self) -> bool {
        self.fin_offset.is_some_and(|end| self.delivered >= end)
    }

    fn close(&mut self, state: FlowState) {
        self.pending.clear();
        self.pending_bytes = 0;
        self.state = state;
    }
}

/// Per-flow TCP stream reassembly for one segment file.
///
/// Each direction of a connection is reassembled independently. Contiguous
/// bytes are handed back as soon as they are available; data that arrives
/// ahead of a hole is buffered until the hole is filled, the flow closes, or
/// [`flush_all`](Self::flush_all) is called at the end of the segment.
pub struct TcpReassembler {
    flows: HashMap<FlowKey, FlowBuffer>,
    max_buffered: usize,
    stats: ReassemblyStats,
}

impl TcpReassembler {
    /// `max_buffered` bounds the out-of-order bytes a single flow direction
    /// may hold.
    pub fn new(max_buffered: usize) -> Self {
        Self {
            flows: HashMap::new(),
            max_buffered,
            stats: ReassemblyStats::default(),
        }
    }

    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }

    /// Feeds one segment. A flow that goes over the buffer limit is abandoned
    /// and the error is returned once; later segments of it are ignored until
    /// a new SYN reopens it.
    pub fn accept(
        &mut self,
        flow: FlowKey,
        segment: &TcpSegment<'_>,
    ) -> Result<Option<StreamChunk>, StreamError> {
        let buffer = match self.flows.entry(flow) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                self.stats.flows += 1;
                trace!("New flow {}", flow);
                entry.insert(FlowBuffer::new())
            }
        };

        if buffer.state != FlowState::Open {
            if !segment.syn {
                return Ok(None);
            }
            debug!("Flow {} reopened by SYN", flow);
            *buffer = FlowBuffer::new();
        }

        let mut bytes = buffer.accept(segment);

        if buffer.pending_bytes > self.max_buffered {
            let buffered = buffer.pending_bytes;
            buffer.close(FlowState::Abandoned);
            self.stats.abandoned += 1;
            return Err(StreamError::BufferLimitExceeded {
                flow: flow.to_string(),
                buffered,
                limit: self.max_buffered,
            });
        }

        if segment.rst {
            let skipped = buffer.flush(&mut bytes);
            self.stats.gap_bytes += skipped;
            buffer.close(FlowState::Closed);
            self.stats.closed += 1;
            trace!("Flow {} reset", flow);
        } else if buffer.is_complete() {
            buffer.close(FlowState::Closed);
            self.stats.closed += 1;
            trace!("Flow {} finished", flow);
        }

        Ok((!bytes.is_empty()).then_some(StreamChunk { flow, bytes }))
    }

    /// Ends every open flow, delivering buffered data across any holes.
    /// Chunks come out ordered by flow key.
    pub fn flush_all(&mut self) -> Vec<StreamChunk> {
        let mut keys: Vec<FlowKey> = self
            .flows
            .iter()
            .filter(|(_, buffer)| buffer.state == FlowState::Open)
            .map(|(key, _)| *key)
            .collect();
        keys.sort();

        let mut chunks = Vec::new();
        for flow in keys {
            let Some(buffer) = self.flows.get_mut(&flow) else {
                continue;
            };
            let mut bytes = Vec::new();
            let skipped = buffer.flush(&mut bytes);
            if skipped > 0 {
                debug!("Flow {}: skipped a {} byte gap at end of segment", flow, skipped);
                self.stats.gap_bytes += skipped;
            }
            buffer.close(FlowState::Closed);
            if !bytes.is_empty() {
                chunks.push(StreamChunk { flow, bytes });
            }
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn flow() -> FlowKey {
        FlowKey::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            40000,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            80,
            6,
        )
    }

    fn syn(seq: u32) -> TcpSegment<'static> {
        TcpSegment {
            seq,
            syn: true,
            fin: false,
            rst: false,
            payload: b"",
        }
    }

    fn data(seq: u32, payload: &[u8]) -> TcpSegment<'_> {
        TcpSegment {
            seq,
            syn: false,
            fin: false,
            rst: false,
            payload,
        }
    }

    fn bytes(result: Result<Option<StreamChunk>, StreamError>) -> Option<Vec<u8>> {
        result.unwrap().map(|chunk| chunk.bytes)
    }

    #[test]
    fn in_order_data_is_delivered_immediately() {
        let mut r = TcpReassembler::new(1024);
        assert_eq!(bytes(r.accept(flow(), &syn(100))), None);
        assert_eq!(bytes(r.accept(flow(), &data(101, b"hello"))), Some(b"hello".to_vec()));
        assert_eq!(bytes(r.accept(flow(), &data(106, b" world"))), Some(b" world".to_vec()));
    }

    #[test]
    fn out_of_order_segments_are_concatenated_in_sequence() {
        let mut r = TcpReassembler::new(1024);
        r.accept(flow(), &syn(1000)).unwrap();
        assert_eq!(bytes(r.accept(flow(), &data(1006, b"world"))), None);
        assert_eq!(
            bytes(r.accept(flow(), &data(1001, b"hello"))),
            Some(b"helloworld".to_vec())
        );
        assert!(r.flush_all().is_empty());
    }

    #[test]
    fn retransmissions_and_overlaps_are_trimmed() {
        let mut r = TcpReassembler::new(1024);
        r.accept(flow(), &syn(1000)).unwrap();
        r.accept(flow(), &data(1001, b"hello")).unwrap();
        assert_eq!(bytes(r.accept(flow(), &data(1001, b"hello"))), None);
        assert_eq!(bytes(r.accept(flow(), &data(1004, b"loXYZ"))), Some(b"XYZ".to_vec()));
    }

    #[test]
    fn without_syn_first_data_sets_the_origin() {
        let mut r = TcpReassembler::new(1024);
        assert_eq!(bytes(r.accept(flow(), &data(5000, b"abc"))), Some(b"abc".to_vec()));
        // entirely before the origin
        assert_eq!(bytes(r.accept(flow(), &data(4990, b"0123456789"))), None);
        assert_eq!(bytes(r.accept(flow(), &data(4998, b"xxabcd"))), Some(b"d".to_vec()));
    }

    #[test]
    fn fin_closes_the_flow() {
        let mut r = TcpReassembler::new(1024);
        r.accept(flow(), &syn(0)).unwrap();
        let fin = TcpSegment {
            fin: true,
            ..data(1, b"bye")
        };
        assert_eq!(bytes(r.accept(flow(), &fin)), Some(b"bye".to_vec()));
        assert_eq!(bytes(r.accept(flow(), &data(4, b"late"))), None);
        assert!(r.flush_all().is_empty());
        assert_eq!(r.stats().closed, 1);

        // a new SYN on the same tuple starts over
        r.accept(flow(), &syn(500)).unwrap();
        assert_eq!(bytes(r.accept(flow(), &data(501, b"again"))), Some(b"again".to_vec()));
    }

    #[test]
    fn early_fin_waits_for_the_missing_data() {
        let mut r = TcpReassembler::new(1024);
        r.accept(flow(), &syn(0)).unwrap();
        assert_eq!(bytes(r.accept(flow(), &data(1, b"hello "))), Some(b"hello ".to_vec()));
        let fin = TcpSegment {
            fin: true,
            ..data(12, b"")
        };
        assert_eq!(bytes(r.accept(flow(), &fin)), None);
        assert_eq!(r.stats().closed, 0);

        assert_eq!(bytes(r.accept(flow(), &data(7, b"world"))), Some(b"world".to_vec()));
        assert_eq!(r.stats().closed, 1);
        assert!(r.flush_all().is_empty());
    }

    #[test]
    fn end_of_segment_flush_crosses_holes() {
        let mut r = TcpReassembler::new(1024);
        r.accept(flow(), &syn(0)).unwrap();
        assert_eq!(bytes(r.accept(flow(), &data(11, b"later"))), None);

        let chunks = r.flush_all();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].flow, flow());
        assert_eq!(chunks[0].bytes, b"later");
        assert_eq!(r.stats().gap_bytes, 10);
    }

    #[test]
    fn reset_flushes_pending_data() {
        let mut r = TcpReassembler::new(1024);
        r.accept(flow(), &syn(0)).unwrap();
        r.accept(flow(), &data(5, b"tail")).unwrap();
        let rst = TcpSegment {
            rst: true,
            ..data(1, b"ab")
        };
        assert_eq!(bytes(r.accept(flow(), &rst)), Some(b"abtail".to_vec()));
        assert_eq!(r.stats().gap_bytes, 2);
    }

    #[test]
    fn buffer_limit_abandons_the_flow() {
        let mut r = TcpReassembler::new(8);
        r.accept(flow(), &syn(0)).unwrap();
        match r.accept(flow(), &data(100, b"0123456789")) {
            Err(StreamError::BufferLimitExceeded {
                buffered, limit, ..
            }) => {
                assert_eq!(buffered, 10);
                assert_eq!(limit, 8);
            }
            other => panic!("expected BufferLimitExceeded, got {:?}", other),
        }
        assert_eq!(bytes(r.accept(flow(), &data(1, b"in order"))), None);
        assert!(r.flush_all().is_empty());
        assert_eq!(r.stats().abandoned, 1);
    }

    #[test]
    fn sequence_numbers_wrap() {
        let mut r = TcpReassembler::new(1024);
        r.accept(flow(), &syn(u32::MAX - 2)).unwrap();
        assert_eq!(bytes(r.accept(flow(), &data(2, b"ef"))), None);
        assert_eq!(
            bytes(r.accept(flow(), &data(u32::MAX - 1, b"abcd"))),
            Some(b"abcdef".to_vec())
        );
    }

    #[test]
    fn directions_are_independent() {
        let mut r = TcpReassembler::new(1024);
        r.accept(flow(), &syn(0)).unwrap();
        r.accept(flow().reversed(), &syn(9000)).unwrap();
        let reply = r.accept(flow().reversed(), &data(9001, b"pong")).unwrap().unwrap();
        assert_eq!(reply.flow, flow().reversed());
        assert_eq!(bytes(r.accept(flow(), &data(1, b"ping"))), Some(b"ping".to_vec()));
        assert_eq!(r.stats().flows, 2);
    }
}
