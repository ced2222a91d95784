//! Frame inspection and rewriting using smoltcp
//!
//! Only the Ethernet header and the fixed part of the IPv4 header are looked
//! at. VLAN tags and IPv4 options are not interpreted.

use std::net::Ipv4Addr;

use smoltcp::wire::{EthernetAddress, EthernetFrame, EthernetProtocol, Ipv4Packet};

/// Ethernet header size
pub const ETHERNET_HDR_LEN: usize = 14;

/// IPv4 header size (without options)
pub const IPV4_HDR_LEN: usize = 20;

/// Destination MAC written into forwarded frames unless configured otherwise
pub const DEFAULT_DST_MAC: [u8; 6] = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];

/// What the forwarding path needs to know about a received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// IPv4 frame with its source address in host order
    Ipv4 { src: Ipv4Addr },
    /// Any other EtherType
    NonIpv4,
    /// Too short for the headers it claims to carry
    Truncated,
}

/// Classify a frame without reading past its end.
pub fn classify(frame: &[u8]) -> FrameKind {
    let Ok(eth) = EthernetFrame::new_checked(frame) else {
        return FrameKind::Truncated;
    };

    if eth.ethertype() != EthernetProtocol::Ipv4 {
        return FrameKind::NonIpv4;
    }

    let payload = eth.payload();
    if payload.len() < IPV4_HDR_LEN {
        return FrameKind::Truncated;
    }

    let ip = Ipv4Packet::new_unchecked(payload);
    FrameKind::Ipv4 {
        src: Ipv4Addr::from(ip.src_addr()),
    }
}

/// Overwrite the destination MAC of a frame.
///
/// Frames shorter than an Ethernet header are left untouched.
pub fn rewrite_dst_mac(frame: &mut [u8], mac: EthernetAddress) {
    if frame.len() < ETHERNET_HDR_LEN {
        return;
    }
    EthernetFrame::new_unchecked(frame).set_dst_addr(mac);
}

/// Parse MAC address from string
pub fn parse_mac(s: &str) -> Option<[u8; 6]> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 6 {
        return None;
    }

    let mut mac = [0u8; 6];
    for (i, part) in parts.iter().enumerate() {
        if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        mac[i] = u8::from_str_radix(part, 16).ok()?;
    }
    Some(mac)
}
