//! Frame builders for tests
//!
//! Uses smoltcp for frame construction, matching what the workers parse.

use std::net::Ipv4Addr;

use smoltcp::phy::ChecksumCapabilities;
use smoltcp::wire::{
    ArpOperation, ArpPacket, ArpRepr, EthernetAddress, EthernetFrame, EthernetProtocol,
    EthernetRepr, IpProtocol, Ipv4Packet, Ipv4Repr,
};

use crate::dataplane::packet::{ETHERNET_HDR_LEN, IPV4_HDR_LEN};

/// Source MAC used by all built frames
pub const SRC_MAC: [u8; 6] = [0x52, 0x54, 0x00, 0x12, 0x34, 0x56];

/// Destination MAC used by all built frames
pub const ORIG_DST_MAC: [u8; 6] = [0x52, 0x54, 0x00, 0xab, 0xcd, 0xef];

/// Broadcast MAC address
pub const BROADCAST_MAC: [u8; 6] = [0xff, 0xff, 0xff, 0xff, 0xff, 0xff];

fn ethernet_frame(dst: [u8; 6], ethertype: EthernetProtocol, payload: &[u8]) -> Vec<u8> {
    let repr = EthernetRepr {
        src_addr: EthernetAddress(SRC_MAC),
        dst_addr: EthernetAddress(dst),
        ethertype,
    };

    let mut buffer = vec![0u8; repr.buffer_len() + payload.len()];
    let mut frame = EthernetFrame::new_unchecked(&mut buffer);
    repr.emit(&mut frame);
    frame.payload_mut().copy_from_slice(payload);
    buffer
}

/// Build an IPv4 frame from `src` to `dst` carrying `payload_len` zero bytes.
pub fn ipv4_frame(src: Ipv4Addr, dst: Ipv4Addr, payload_len: usize) -> Vec<u8> {
    let repr = Ipv4Repr {
        src_addr: src.into(),
        dst_addr: dst.into(),
        next_header: IpProtocol::Udp,
        payload_len,
        hop_limit: 64,
    };

    let mut ip = vec![0u8; repr.buffer_len() + payload_len];
    let mut packet = Ipv4Packet::new_unchecked(&mut ip);
    repr.emit(&mut packet, &ChecksumCapabilities::default());

    ethernet_frame(ORIG_DST_MAC, EthernetProtocol::Ipv4, &ip)
}

/// Build an ARP request frame (a non-IPv4 frame).
pub fn arp_request(sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Vec<u8> {
    let repr = ArpRepr::EthernetIpv4 {
        operation: ArpOperation::Request,
        source_hardware_addr: EthernetAddress(SRC_MAC),
        source_protocol_addr: sender_ip.into(),
        target_hardware_addr: EthernetAddress([0; 6]),
        target_protocol_addr: target_ip.into(),
    };

    let mut arp = vec![0u8; repr.buffer_len()];
    let mut packet = ArpPacket::new_unchecked(&mut arp);
    repr.emit(&mut packet);

    ethernet_frame(BROADCAST_MAC, EthernetProtocol::Arp, &arp)
}

/// An IPv4-typed frame cut off inside the IP header.
pub fn truncated_ipv4_frame(src: Ipv4Addr) -> Vec<u8> {
    let mut frame = ipv4_frame(src, Ipv4Addr::new(192, 0, 2, 1), 0);
    frame.truncate(ETHERNET_HDR_LEN + IPV4_HDR_LEN - 4);
    frame
}
