//! Common data types used across the data_capture subsystem.

use chrono::{DateTime, Utc};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

/// Transport classification carried by every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolTag {
    /// Bytes delivered by TCP stream reassembly.
    Tcp,
    /// Payload of a single UDP datagram.
    Udp,
    /// Any other network/transport combination.
    Other,
}

impl ProtocolTag {
    /// Whether endpoints of this protocol carry meaningful ports.
    pub fn has_ports(self) -> bool {
        matches!(self, ProtocolTag::Tcp | ProtocolTag::Udp)
    }
}

impl fmt::Display for ProtocolTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolTag::Tcp => write!(f, "TCP"),
            ProtocolTag::Udp => write!(f, "UDP"),
            ProtocolTag::Other => write!(f, "Other"),
        }
    }
}

/// One direction of a transport conversation.
///
/// Used as the reassembly grouping key: the two halves of a TCP connection
/// are two distinct keys, see [`FlowKey::reversed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowKey {
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    /// IP protocol number (6 for TCP, 17 for UDP, ...).
    pub ip_protocol: u8,
}

impl FlowKey {
    pub fn new(
        src_addr: IpAddr,
        src_port: u16,
        dst_addr: IpAddr,
        dst_port: u16,
        ip_protocol: u8,
    ) -> Self {
        Self {
            src_addr,
            dst_addr,
            src_port,
            dst_port,
            ip_protocol,
        }
    }

    /// The opposite half of the same conversation.
    pub fn reversed(&self) -> Self {
        Self {
            src_addr: self.dst_addr,
            dst_addr: self.src_addr,
            src_port: self.dst_port,
            dst_port: self.src_port,
            ip_protocol: self.ip_protocol,
        }
    }
}

impl Default for FlowKey {
    fn default() -> Self {
        Self::new(
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            0,
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            0,
            0,
        )
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}",
            SocketDisplay(self.src_addr, self.src_port),
            SocketDisplay(self.dst_addr, self.dst_port)
        )
    }
}

/// `ip:port`, bracketing IPv6 addresses.
struct SocketDisplay(IpAddr, u16);

impl fmt::Display for SocketDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            IpAddr::V4(addr) => write!(f, "{}:{}", addr, self.1),
            IpAddr::V6(addr) => write!(f, "[{}]:{}", addr, self.1),
        }
    }
}

/// A frame as read from a segment file, before any layer decoding.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// 1-based position in the segment.
    pub frame_number: u64,
    /// Capture timestamp.
    pub timestamp: DateTime<Utc>,
    /// Link-layer type of the interface the frame was captured on.
    pub link_type: u16,
    /// Captured bytes, starting at the link-layer header.
    pub data: Vec<u8>,
}

/// Application-layer bytes handed from the parser to the renderer.
///
/// Ownership moves into the queue on send and to the renderer on receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassembledRecord {
    /// Index of the segment the bytes were read from.
    pub segment_index: u64,
    /// Frame timestamp for UDP/Other, delivery time for TCP.
    pub timestamp: DateTime<Utc>,
    pub flow: FlowKey,
    pub protocol: ProtocolTag,
    /// Length of `payload`.
    pub length: usize,
    pub payload: Vec<u8>,
}

impl ReassembledRecord {
    pub fn new(
        segment_index: u64,
        timestamp: DateTime<Utc>,
        flow: FlowKey,
        protocol: ProtocolTag,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            segment_index,
            timestamp,
            flow,
            protocol,
            length: payload.len(),
            payload,
        }
    }
}
