//! Link, network and transport decoding of one captured frame.
//!
//! Only what the parser needs is extracted: the addresses, the transport
//! ports and TCP control bits, and a borrowed slice of the application
//! payload. Trailing link-layer padding is cut off using the IP length
//! fields.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use etherparse::{
    Ethernet2HeaderSlice, Ipv4HeaderSlice, Ipv6HeaderSlice, TcpHeaderSlice, UdpHeaderSlice,
};

pub mod link_type {
    pub const NULL: u16 = 0;
    pub const ETHERNET: u16 = 1;
    pub const RAW: u16 = 101;
    pub const LOOP: u16 = 108;
    pub const LINUX_SLL: u16 = 113;
    pub const IPV4: u16 = 228;
    pub const IPV6: u16 = 229;
    pub const LINUX_SLL2: u16 = 276;
}

mod ether_type {
    pub const IPV4: u16 = 0x0800;
    pub const IPV6: u16 = 0x86DD;
    pub const VLAN: u16 = 0x8100;
    pub const QINQ: u16 = 0x88A8;
}

pub mod ip_protocol {
    pub const HOP_BY_HOP: u8 = 0;
    pub const ICMP: u8 = 1;
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
    pub const ROUTING: u8 = 43;
    pub const FRAGMENT: u8 = 44;
    pub const ICMPV6: u8 = 58;
    pub const DESTINATION: u8 = 60;
}

const ETHERNET_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;
const NULL_HEADER_LEN: usize = 4;
const SLL_HEADER_LEN: usize = 16;
const SLL2_HEADER_LEN: usize = 20;
const ICMP_HEADER_LEN: usize = 8;
const UDP_HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkLayer {
    Ipv4,
    Ipv6,
}

/// TCP fields the reassembler needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpMeta {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub syn: bool,
    pub fin: bool,
    pub rst: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp(TcpMeta),
    Udp { src_port: u16, dst_port: u16 },
    /// ICMP, non-first fragments, or a protocol that is not decoded.
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame<'a> {
    pub network: NetworkLayer,
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub ip_protocol: u8,
    pub transport: Transport,
    pub payload: &'a [u8],
}

/// Why a frame yields no [`DecodedFrame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    UnsupportedLinkType(u16),
    /// ARP, LLDP and other link payloads without an IP header.
    NotIp,
    Malformed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnsupportedLinkType(lt) => write!(f, "unsupported link type {}", lt),
            SkipReason::NotIp => write!(f, "not an IP packet"),
            SkipReason::Malformed(e) => write!(f, "malformed: {}", e),
        }
    }
}

pub fn decode_frame(link: u16, data: &[u8]) -> Result<DecodedFrame<'_>, SkipReason> {
    let ip = strip_link_layer(link, data)?;
    decode_ip(ip)
}

/// Returns the bytes starting at the IP header.
fn strip_link_layer(link: u16, data: &[u8]) -> Result<&[u8], SkipReason> {
    match link {
        link_type::ETHERNET => {
            let eth = Ethernet2HeaderSlice::from_slice(data)
                .map_err(|e| SkipReason::Malformed(format!("ethernet: {}", e)))?;
            let mut kind = eth.ether_type().0;
            let mut offset = ETHERNET_HEADER_LEN;
            while kind == ether_type::VLAN || kind == ether_type::QINQ {
                let tag = data
                    .get(offset..offset + VLAN_TAG_LEN)
                    .ok_or_else(|| SkipReason::Malformed("short vlan tag".to_string()))?;
                kind = u16::from_be_bytes([tag[2], tag[3]]);
                offset += VLAN_TAG_LEN;
            }
            by_ether_type(kind, &data[offset..])
        }
        link_type::LINUX_SLL => {
            let header = data
                .get(..SLL_HEADER_LEN)
                .ok_or_else(|| SkipReason::Malformed("short SLL header".to_string()))?;
            by_ether_type(u16::from_be_bytes([header[14], header[15]]), &data[SLL_HEADER_LEN..])
        }
        link_type::LINUX_SLL2 => {
            let header = data
                .get(..SLL2_HEADER_LEN)
                .ok_or_else(|| SkipReason::Malformed("short SLL2 header".to_string()))?;
            by_ether_type(u16::from_be_bytes([header[0], header[1]]), &data[SLL2_HEADER_LEN..])
        }
        // the NULL family field is host-endian, so go by the IP version nibble
        link_type::NULL | link_type::LOOP => data
            .get(NULL_HEADER_LEN..)
            .ok_or_else(|| SkipReason::Malformed("short loopback header".to_string())),
        link_type::RAW | link_type::IPV4 | link_type::IPV6 => Ok(data),
        other => Err(SkipReason::UnsupportedLinkType(other)),
    }
}

fn by_ether_type(kind: u16, payload: &[u8]) -> Result<&[u8], SkipReason> {
    match kind {
        ether_type::IPV4 | ether_type::IPV6 => Ok(payload),
        _ => Err(SkipReason::NotIp),
    }
}

fn decode_ip(data: &[u8]) -> Result<DecodedFrame<'_>, SkipReason> {
    match data.first().map(|b| b >> 4) {
        Some(4) => decode_ipv4(data),
        Some(6) => decode_ipv6(data),
        _ => Err(SkipReason::NotIp),
    }
}

fn decode_ipv4(data: &[u8]) -> Result<DecodedFrame<'_>, SkipReason> {
    let ipv4 = Ipv4HeaderSlice::from_slice(data)
        .map_err(|e| SkipReason::Malformed(format!("ipv4: {}", e)))?;
    let header_len = ipv4.slice().len();
    let total_len = usize::from(ipv4.total_len());
    // a zero total length shows up with segmentation offload
    let end = if total_len == 0 {
        data.len()
    } else if total_len < header_len {
        return Err(SkipReason::Malformed(format!(
            "ipv4 total length {} below header length {}",
            total_len, header_len
        )));
    } else {
        total_len.min(data.len())
    };
    let protocol = ipv4.protocol().0;
    let first_fragment = ipv4.fragments_offset().value() == 0;

    let (transport, payload) = decode_transport(protocol, &data[header_len..end], first_fragment)?;
    Ok(DecodedFrame {
        network: NetworkLayer::Ipv4,
        src_addr: IpAddr::V4(Ipv4Addr::from(ipv4.source())),
        dst_addr: IpAddr::V4(Ipv4Addr::from(ipv4.destination())),
        ip_protocol: protocol,
        transport,
        payload,
    })
}

fn decode_ipv6(data: &[u8]) -> Result<DecodedFrame<'_>, SkipReason> {
    let ipv6 = Ipv6HeaderSlice::from_slice(data)
        .map_err(|e| SkipReason::Malformed(format!("ipv6: {}", e)))?;
    let header_len = ipv6.slice().len();
    let payload_len = usize::from(ipv6.payload_length());
    let end = if payload_len == 0 {
        data.len()
    } else {
        (header_len + payload_len).min(data.len())
    };

    let mut next_header = ipv6.next_header().0;
    let mut offset = header_len;
    let mut first_fragment = true;
    loop {
        match next_header {
            ip_protocol::HOP_BY_HOP | ip_protocol::ROUTING | ip_protocol::DESTINATION => {
                let ext = data
                    .get(offset..offset + 2)
                    .filter(|_| offset + 2 <= end)
                    .ok_or_else(|| SkipReason::Malformed("short ipv6 extension".to_string()))?;
                next_header = ext[0];
                offset += (usize::from(ext[1]) + 1) * 8;
            }
            ip_protocol::FRAGMENT => {
                let ext = data
                    .get(offset..offset + 8)
                    .filter(|_| offset + 8 <= end)
                    .ok_or_else(|| SkipReason::Malformed("short ipv6 fragment".to_string()))?;
                next_header = ext[0];
                first_fragment = u16::from_be_bytes([ext[2], ext[3]]) >> 3 == 0;
                offset += 8;
            }
            _ => break,
        }
        if offset > end {
            return Err(SkipReason::Malformed("ipv6 extension overruns packet".to_string()));
        }
    }

    let (transport, payload) = decode_transport(next_header, &data[offset..end], first_fragment)?;
    Ok(DecodedFrame {
        network: NetworkLayer::Ipv6,
        src_addr: IpAddr::V6(Ipv6Addr::from(ipv6.source())),
        dst_addr: IpAddr::V6(Ipv6Addr::from(ipv6.destination())),
        ip_protocol: next_header,
        transport,
        payload,
    })
}

fn decode_transport(
    protocol: u8,
    data: &[u8],
    first_fragment: bool,
) -> Result<(Transport, &[u8]), SkipReason> {
    if !first_fragment {
        return Ok((Transport::Other, data));
    }
    match protocol {
        ip_protocol::TCP => {
            let tcp = TcpHeaderSlice::from_slice(data)
                .map_err(|e| SkipReason::Malformed(format!("tcp: {}", e)))?;
            let meta = TcpMeta {
                src_port: tcp.source_port(),
                dst_port: tcp.destination_port(),
                seq: tcp.sequence_number(),
                syn: tcp.syn(),
                fin: tcp.fin(),
                rst: tcp.rst(),
            };
            Ok((Transport::Tcp(meta), &data[tcp.slice().len()..]))
        }
        ip_protocol::UDP => {
            let udp = UdpHeaderSlice::from_slice(data)
                .map_err(|e| SkipReason::Malformed(format!("udp: {}", e)))?;
            let length = usize::from(udp.length());
            let end = if length < UDP_HEADER_LEN {
                data.len()
            } else {
                length.min(data.len())
            };
            let transport = Transport::Udp {
                src_port: udp.source_port(),
                dst_port: udp.destination_port(),
            };
            Ok((transport, &data[UDP_HEADER_LEN..end]))
        }
        ip_protocol::ICMP | ip_protocol::ICMPV6 => {
            Ok((Transport::Other, data.get(ICMP_HEADER_LEN..).unwrap_or_default()))
        }
        _ => Ok((Transport::Other, data)),
    }
}
