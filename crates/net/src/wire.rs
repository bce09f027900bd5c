//! Wire-format helpers: Ethernet, IPv4/IPv6, ARP, and ICMPv6 neighbor
//! discovery. Frames are plain byte slices; builders produce complete
//! frames ready for a TX queue.

use crate::{Error, FlowKey};
use bytes::{BufMut, BytesMut};
use std::net::{Ipv4Addr, Ipv6Addr};

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_IPV6: u16 = 0x86DD;

pub const ETHER_HDR_LEN: usize = 14;
pub const IPV4_HDR_LEN: usize = 20;
pub const IPV6_HDR_LEN: usize = 40;
pub const ARP_BODY_LEN: usize = 28;

pub const IPPROTO_IPIP: u8 = 4;
pub const IPPROTO_IPV6: u8 = 41;
pub const IPPROTO_ICMPV6: u8 = 58;

pub const ND_NEIGHBOR_SOLICIT: u8 = 135;
pub const ND_NEIGHBOR_ADVERT: u8 = 136;

/// Shortest frame that can carry a neighbor solicit or advert:
/// Ethernet + IPv6 + 24-byte ICMPv6 neighbor message, no options.
pub const ND_NEIGH_PKT_MIN_LEN: usize = ETHER_HDR_LEN + IPV6_HDR_LEN + 24;

pub const ARP_OP_REQUEST: u16 = 1;
pub const ARP_OP_REPLY: u16 = 2;

/// An Ethernet hardware address.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Mac(pub [u8; 6]);

impl Mac {
    pub const BROADCAST: Mac = Mac([0xff; 6]);
    pub const ZERO: Mac = Mac([0; 6]);

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn is_multicast(&self) -> bool {
        self.0[0] & 1 != 0
    }
}

impl From<[u8; 6]> for Mac {
    fn from(octets: [u8; 6]) -> Self {
        Mac(octets)
    }
}

impl std::fmt::Display for Mac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

/// Solicited-node multicast group of an IPv6 address (RFC 4291 §2.7.1).
pub fn solicited_node_multicast(ip: &Ipv6Addr) -> Ipv6Addr {
    let o = ip.octets();
    Ipv6Addr::new(
        0xff02,
        0,
        0,
        0,
        0,
        1,
        0xff00 | o[13] as u16,
        ((o[14] as u16) << 8) | o[15] as u16,
    )
}

/// Ethernet multicast address of an IPv6 multicast group (RFC 2464 §7).
pub fn ipv6_multicast_mac(ip: &Ipv6Addr) -> Mac {
    let o = ip.octets();
    Mac([0x33, 0x33, o[12], o[13], o[14], o[15]])
}

fn need(frame: &[u8], n: usize) -> Result<(), Error> {
    if frame.len() < n {
        return Err(Error::Truncated {
            len: frame.len(),
            need: n,
        });
    }
    Ok(())
}

pub fn ether_dst(frame: &[u8]) -> Mac {
    Mac(frame[0..6].try_into().unwrap())
}

pub fn ether_src(frame: &[u8]) -> Mac {
    Mac(frame[6..12].try_into().unwrap())
}

pub fn ether_type(frame: &[u8]) -> u16 {
    u16::from_be_bytes([frame[12], frame[13]])
}

/// The L3 summary of a received frame: its flow key, the upper-layer
/// protocol, and the offset of the IP header within the frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Ipacket {
    pub flow: FlowKey,
    pub next_proto: u8,
    pub l3: usize,
}

/// Extract flow and protocol information from an Ethernet frame.
/// Non-IP or truncated frames fail with `Error::NotIp` / `Truncated`;
/// both are hot-path drops.
pub fn extract_packet_info(frame: &[u8]) -> Result<Ipacket, Error> {
    need(frame, ETHER_HDR_LEN)?;

    match ether_type(frame) {
        ETHERTYPE_IPV4 => {
            need(frame, ETHER_HDR_LEN + IPV4_HDR_LEN)?;
            let l3 = ETHER_HDR_LEN;
            if frame[l3] >> 4 != 4 {
                return Err(Error::NotIp);
            }
            let src = Ipv4Addr::from(<[u8; 4]>::try_from(&frame[l3 + 12..l3 + 16]).unwrap());
            let dst = Ipv4Addr::from(<[u8; 4]>::try_from(&frame[l3 + 16..l3 + 20]).unwrap());
            let proto = frame[l3 + 9];
            Ok(Ipacket {
                flow: FlowKey::V4 { src, dst, proto },
                next_proto: proto,
                l3,
            })
        }
        ETHERTYPE_IPV6 => {
            need(frame, ETHER_HDR_LEN + IPV6_HDR_LEN)?;
            let l3 = ETHER_HDR_LEN;
            if frame[l3] >> 4 != 6 {
                return Err(Error::NotIp);
            }
            let src = Ipv6Addr::from(<[u8; 16]>::try_from(&frame[l3 + 8..l3 + 24]).unwrap());
            let dst = Ipv6Addr::from(<[u8; 16]>::try_from(&frame[l3 + 24..l3 + 40]).unwrap());
            let proto = frame[l3 + 6];
            Ok(Ipacket {
                flow: FlowKey::V6 { src, dst, proto },
                next_proto: proto,
                l3,
            })
        }
        _ => Err(Error::NotIp),
    }
}

/// Streaming ones'-complement checksum (RFC 1071), fed from potentially
/// odd-length chunks.
#[derive(Default)]
pub struct Checksum {
    sum: u32,
    // A pending high byte from an odd-length update.
    pending: Option<u8>,
}

impl Checksum {
    pub fn update(&mut self, mut data: &[u8]) {
        if let Some(hi) = self.pending.take() {
            if let Some((&lo, rest)) = data.split_first() {
                self.sum += u32::from(u16::from_be_bytes([hi, lo]));
                data = rest;
            } else {
                self.pending = Some(hi);
                return;
            }
        }
        let mut chunks = data.chunks_exact(2);
        for pair in &mut chunks {
            self.sum += u32::from(u16::from_be_bytes([pair[0], pair[1]]));
        }
        if let [hi] = chunks.remainder() {
            self.pending = Some(*hi);
        }
    }

    pub fn finish(mut self) -> u16 {
        if let Some(hi) = self.pending {
            self.sum += u32::from(u16::from_be_bytes([hi, 0]));
        }
        while self.sum > 0xffff {
            self.sum = (self.sum & 0xffff) + (self.sum >> 16);
        }
        !(self.sum as u16)
    }
}

/// ICMPv6 checksum: the IPv6 pseudo-header followed by the ICMPv6 message.
pub fn icmpv6_checksum(src: &Ipv6Addr, dst: &Ipv6Addr, message: &[u8]) -> u16 {
    let mut ck = Checksum::default();
    ck.update(&src.octets());
    ck.update(&dst.octets());
    ck.update(&(message.len() as u32).to_be_bytes());
    ck.update(&[0, 0, 0, IPPROTO_ICMPV6]);
    ck.update(message);
    ck.finish()
}

/// Write an IPv4 header with the given DSCP into `out`. The header
/// checksum is computed over the fixed 20 bytes.
pub fn put_ipv4_header(
    out: &mut BytesMut,
    dscp: u8,
    payload_len: usize,
    proto: u8,
    src: &Ipv4Addr,
    dst: &Ipv4Addr,
) {
    let mut hdr = [0u8; IPV4_HDR_LEN];
    hdr[0] = 0x45;
    hdr[1] = dscp << 2;
    let total = (IPV4_HDR_LEN + payload_len) as u16;
    hdr[2..4].copy_from_slice(&total.to_be_bytes());
    hdr[8] = 64; // TTL
    hdr[9] = proto;
    hdr[12..16].copy_from_slice(&src.octets());
    hdr[16..20].copy_from_slice(&dst.octets());

    let mut ck = Checksum::default();
    ck.update(&hdr);
    hdr[10..12].copy_from_slice(&ck.finish().to_be_bytes());

    out.put_slice(&hdr);
}

/// Write an IPv6 header with the given DSCP in the traffic class.
pub fn put_ipv6_header(
    out: &mut BytesMut,
    dscp: u8,
    payload_len: usize,
    next: u8,
    hops: u8,
    src: &Ipv6Addr,
    dst: &Ipv6Addr,
) {
    let tc = (dscp as u32) << 2;
    out.put_u32(0x6000_0000 | tc << 20);
    out.put_u16(payload_len as u16);
    out.put_u8(next);
    out.put_u8(hops);
    out.put_slice(&src.octets());
    out.put_slice(&dst.octets());
}

/// A parsed ARP message (Ethernet/IPv4 only).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Arp {
    pub op: u16,
    pub sha: Mac,
    pub spa: Ipv4Addr,
    pub tha: Mac,
    pub tpa: Ipv4Addr,
}

pub fn parse_arp(frame: &[u8]) -> Result<Arp, Error> {
    need(frame, ETHER_HDR_LEN + ARP_BODY_LEN)?;
    let b = &frame[ETHER_HDR_LEN..];

    // Hardware type Ethernet, protocol type IPv4, 6/4 address lengths.
    if b[0..2] != [0, 1] || b[2..4] != 0x0800u16.to_be_bytes() || b[4] != 6 || b[5] != 4 {
        return Err(Error::NotIp);
    }
    Ok(Arp {
        op: u16::from_be_bytes([b[6], b[7]]),
        sha: Mac(b[8..14].try_into().unwrap()),
        spa: Ipv4Addr::from(<[u8; 4]>::try_from(&b[14..18]).unwrap()),
        tha: Mac(b[18..24].try_into().unwrap()),
        tpa: Ipv4Addr::from(<[u8; 4]>::try_from(&b[24..28]).unwrap()),
    })
}

/// Build a complete ARP frame.
pub fn build_arp(eth_dst: Mac, eth_src: Mac, arp: &Arp) -> BytesMut {
    let mut out = BytesMut::with_capacity(ETHER_HDR_LEN + ARP_BODY_LEN);
    out.put_slice(&eth_dst.octets());
    out.put_slice(&eth_src.octets());
    out.put_u16(ETHERTYPE_ARP);

    out.put_u16(1); // Ethernet
    out.put_u16(0x0800);
    out.put_u8(6);
    out.put_u8(4);
    out.put_u16(arp.op);
    out.put_slice(&arp.sha.octets());
    out.put_slice(&arp.spa.octets());
    out.put_slice(&arp.tha.octets());
    out.put_slice(&arp.tpa.octets());
    out
}

/// A parsed ICMPv6 neighbor solicit or advert.
#[derive(Debug, Copy, Clone)]
pub struct NeighborMsg {
    /// ND_NEIGHBOR_SOLICIT or ND_NEIGHBOR_ADVERT.
    pub kind: u8,
    pub src_ip: Ipv6Addr,
    pub dst_ip: Ipv6Addr,
    pub target: Ipv6Addr,
    /// Source link-layer option (solicit) or target link-layer option
    /// (advert), when present.
    pub ll_addr: Option<Mac>,
}

/// Parse an already-validated IPv6/ICMPv6 frame as a neighbor message.
pub fn parse_nd(frame: &[u8]) -> Result<NeighborMsg, Error> {
    need(frame, ND_NEIGH_PKT_MIN_LEN)?;
    let l3 = ETHER_HDR_LEN;
    let l4 = l3 + IPV6_HDR_LEN;

    let kind = frame[l4];
    if kind != ND_NEIGHBOR_SOLICIT && kind != ND_NEIGHBOR_ADVERT {
        return Err(Error::NotIp);
    }
    let src_ip = Ipv6Addr::from(<[u8; 16]>::try_from(&frame[l3 + 8..l3 + 24]).unwrap());
    let dst_ip = Ipv6Addr::from(<[u8; 16]>::try_from(&frame[l3 + 24..l3 + 40]).unwrap());
    let target = Ipv6Addr::from(<[u8; 16]>::try_from(&frame[l4 + 8..l4 + 24]).unwrap());

    // Walk options for the link-layer address: type 1 (source) in a
    // solicit, type 2 (target) in an advert.
    let want = if kind == ND_NEIGHBOR_SOLICIT { 1 } else { 2 };
    let mut ll_addr = None;
    let mut off = l4 + 24;
    while off + 8 <= frame.len() {
        let (ty, words) = (frame[off], frame[off + 1] as usize);
        if words == 0 {
            break;
        }
        if ty == want && off + 8 <= frame.len() {
            ll_addr = Some(Mac(frame[off + 2..off + 8].try_into().unwrap()));
            break;
        }
        off += words * 8;
    }

    Ok(NeighborMsg {
        kind,
        src_ip,
        dst_ip,
        target,
        ll_addr,
    })
}

fn put_nd_frame(
    eth_dst: Mac,
    eth_src: Mac,
    src_ip: &Ipv6Addr,
    dst_ip: &Ipv6Addr,
    body: &mut [u8],
) -> BytesMut {
    let ck = icmpv6_checksum(src_ip, dst_ip, body);
    body[2..4].copy_from_slice(&ck.to_be_bytes());

    let mut out = BytesMut::with_capacity(ETHER_HDR_LEN + IPV6_HDR_LEN + body.len());
    out.put_slice(&eth_dst.octets());
    out.put_slice(&eth_src.octets());
    out.put_u16(ETHERTYPE_IPV6);
    // Hop limit 255 is required of neighbor-discovery senders.
    put_ipv6_header(&mut out, 0, body.len(), IPPROTO_ICMPV6, 255, src_ip, dst_ip);
    out.put_slice(body);
    out
}

/// Build a neighbor solicitation for `target`, sent to its solicited-node
/// multicast group with our source link-layer option.
pub fn build_neighbor_solicit(src_mac: Mac, src_ip: &Ipv6Addr, target: &Ipv6Addr) -> BytesMut {
    let dst_ip = solicited_node_multicast(target);
    let dst_mac = ipv6_multicast_mac(&dst_ip);

    let mut body = [0u8; 32];
    body[0] = ND_NEIGHBOR_SOLICIT;
    body[8..24].copy_from_slice(&target.octets());
    body[24] = 1; // source link-layer address
    body[25] = 1;
    body[26..32].copy_from_slice(&src_mac.octets());

    put_nd_frame(dst_mac, src_mac, src_ip, &dst_ip, &mut body)
}

/// Build a solicited neighbor advertisement for `target`, answering a
/// solicitation from `dst_ip`/`dst_mac`.
pub fn build_neighbor_advert(
    src_mac: Mac,
    target: &Ipv6Addr,
    dst_mac: Mac,
    dst_ip: &Ipv6Addr,
) -> BytesMut {
    let mut body = [0u8; 32];
    body[0] = ND_NEIGHBOR_ADVERT;
    body[4] = 0x60; // solicited + override
    body[8..24].copy_from_slice(&target.octets());
    body[24] = 2; // target link-layer address
    body[25] = 1;
    body[26..32].copy_from_slice(&src_mac.octets());

    put_nd_frame(dst_mac, src_mac, target, dst_ip, &mut body)
}
