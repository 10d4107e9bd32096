//! Segment parsing and stream reassembly.
//!
//! A finalized segment flows through these pieces:
//!
//! ```text
//! segment file ──▶ SegmentReader ──▶ frame_decoder ──┬─ IPv4/TCP ──▶ TcpReassembler ─┐
//!  (pcapng/pcap)    (raw frames)     (IP + transport) ├─ IPv4/UDP ─────────────────────┼──▶ ReassembledRecord
//!                                                     └─ other ────────────────────────┘
//! ```
//!
//! [`SegmentRecords`] drives the whole chain as a finite iterator and flushes
//! every TCP flow once the file is exhausted. [`SegmentDispatcher`] runs one
//! iterator per finalized segment on the blocking pool, behind a fixed-size
//! worker gate, and feeds the bounded record queue.

pub mod dispatcher;
pub mod frame_decoder;
pub mod segment_parser;
pub mod segment_reader;
pub mod tcp_reassembly;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use dispatcher::{SegmentDispatcher, SegmentSink};
pub use segment_parser::{parse_segment, ParseOptions, ParseSummary, SegmentRecords};
pub use segment_reader::SegmentReader;
pub use tcp_reassembly::TcpReassembler;
pub use types::{FlowKey, ProtocolTag, RawFrame, ReassembledRecord};
