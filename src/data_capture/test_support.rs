//! Builders for synthetic segment files used by the tests.

use etherparse::PacketBuilder;
use std::path::Path;

pub(crate) const LINKTYPE_ETHERNET: u16 = 1;
pub(crate) const LINKTYPE_RAW: u16 = 101;

pub(crate) const SYN: u8 = 0b001;
pub(crate) const FIN: u8 = 0b010;
pub(crate) const RST: u8 = 0b100;

const CLIENT_MAC: [u8; 6] = [0x02, 0, 0, 0, 0, 0x01];
const SERVER_MAC: [u8; 6] = [0x02, 0, 0, 0, 0, 0x02];

/// Ethernet + IPv4 + TCP frame.
pub(crate) fn tcp_frame(
    src: [u8; 4],
    src_port: u16,
    dst: [u8; 4],
    dst_port: u16,
    seq: u32,
    flags: u8,
    payload: &[u8],
) -> Vec<u8> {
    let mut builder = PacketBuilder::ethernet2(CLIENT_MAC, SERVER_MAC)
        .ipv4(src, dst, 64)
        .tcp(src_port, dst_port, seq, 65535);
    if flags & SYN != 0 {
        builder = builder.syn();
    }
    if flags & FIN != 0 {
        builder = builder.fin();
    }
    if flags & RST != 0 {
        builder = builder.rst();
    }
    let mut out = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut out, payload).unwrap();
    out
}

/// Ethernet + IPv4 + UDP frame.
pub(crate) fn udp_frame(
    src: [u8; 4],
    src_port: u16,
    dst: [u8; 4],
    dst_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2(CLIENT_MAC, SERVER_MAC)
        .ipv4(src, dst, 64)
        .udp(src_port, dst_port);
    let mut out = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut out, payload).unwrap();
    out
}

/// Ethernet + IPv4 + ICMP echo request.
pub(crate) fn icmp_frame(src: [u8; 4], dst: [u8; 4], payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2(CLIENT_MAC, SERVER_MAC)
        .ipv4(src, dst, 64)
        .icmpv4_echo_request(7, 1);
    let mut out = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut out, payload).unwrap();
    out
}

/// Ethernet + IPv6 + UDP frame.
pub(crate) fn udp6_frame(
    src: [u8; 16],
    src_port: u16,
    dst: [u8; 16],
    dst_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2(CLIENT_MAC, SERVER_MAC)
        .ipv6(src, dst, 64)
        .udp(src_port, dst_port);
    let mut out = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut out, payload).unwrap();
    out
}

/// Little-endian pcapng writer: one section, one interface.
pub(crate) struct PcapNgBuilder {
    bytes: Vec<u8>,
}

impl PcapNgBuilder {
    pub(crate) fn new(link_type: u16) -> Self {
        Self::with_tsresol(link_type, None)
    }

    pub(crate) fn with_tsresol(link_type: u16, tsresol: Option<u8>) -> Self {
        let mut bytes = Vec::new();

        // section header block
        push_u32(&mut bytes, 0x0A0D_0D0A);
        push_u32(&mut bytes, 28);
        push_u32(&mut bytes, 0x1A2B_3C4D);
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&(-1i64).to_le_bytes());
        push_u32(&mut bytes, 28);

        // interface description block
        let total: u32 = if tsresol.is_some() { 32 } else { 20 };
        push_u32(&mut bytes, 0x0000_0001);
        push_u32(&mut bytes, total);
        bytes.extend_from_slice(&link_type.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        push_u32(&mut bytes, 262_144);
        if let Some(resolution) = tsresol {
            bytes.extend_from_slice(&9u16.to_le_bytes());
            bytes.extend_from_slice(&1u16.to_le_bytes());
            bytes.extend_from_slice(&[resolution, 0, 0, 0]);
            bytes.extend_from_slice(&0u16.to_le_bytes());
            bytes.extend_from_slice(&0u16.to_le_bytes());
        }
        push_u32(&mut bytes, total);

        Self { bytes }
    }

    /// Appends an enhanced packet block; `ts` is in interface units
    /// (microseconds unless a resolution was given).
    pub(crate) fn packet(mut self, ts: u64, data: &[u8]) -> Self {
        let padded = (data.len() + 3) & !3;
        let total = (32 + padded) as u32;
        push_u32(&mut self.bytes, 0x0000_0006);
        push_u32(&mut self.bytes, total);
        push_u32(&mut self.bytes, 0);
        push_u32(&mut self.bytes, (ts >> 32) as u32);
        push_u32(&mut self.bytes, ts as u32);
        push_u32(&mut self.bytes, data.len() as u32);
        push_u32(&mut self.bytes, data.len() as u32);
        self.bytes.extend_from_slice(data);
        self.bytes.resize(self.bytes.len() + padded - data.len(), 0);
        push_u32(&mut self.bytes, total);
        self
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn write_to(&self, path: &Path) {
        std::fs::write(path, &self.bytes).unwrap();
    }
}

/// Little-endian, microsecond legacy pcap file.
pub(crate) fn legacy_pcap(link_type: u32, packets: &[(u32, u32, &[u8])]) -> Vec<u8> {
    let mut bytes = Vec::new();
    push_u32(&mut bytes, 0xA1B2_C3D4);
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&4u16.to_le_bytes());
    push_u32(&mut bytes, 0);
    push_u32(&mut bytes, 0);
    push_u32(&mut bytes, 65_535);
    push_u32(&mut bytes, link_type);
    for (ts_sec, ts_usec, data) in packets {
        push_u32(&mut bytes, *ts_sec);
        push_u32(&mut bytes, *ts_usec);
        push_u32(&mut bytes, data.len() as u32);
        push_u32(&mut bytes, data.len() as u32);
        bytes.extend_from_slice(data);
    }
    bytes
}

fn push_u32(bytes: &mut Vec<u8>, value: u32) {
    bytes.extend_from_slice(&value.to_le_bytes());
}
