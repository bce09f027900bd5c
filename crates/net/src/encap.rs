//! IP-in-IP encapsulation. The dataplane wraps every forwarded packet in
//! an outer IP header addressed to the grantor's tunnel endpoint; the
//! outer DSCP carries the packet's priority class.

use crate::wire::{self, Mac};
use crate::{Error, Packet};
use bytes::{BufMut, BytesMut};
use std::net::{Ipv4Addr, Ipv6Addr};

/// Outer endpoints of the tunnel toward a grantor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Endpoints {
    V4 { local: Ipv4Addr, remote: Ipv4Addr },
    V6 { local: Ipv6Addr, remote: Ipv6Addr },
}

/// Everything needed to build the outer frame: L2 addresses for the back
/// interface's next hop, and the tunnel's IP endpoints.
///
/// TODO The tunnel for a flow should come from the FIB's grantor entry;
/// until the LPM lookup lands, callers pass the interface's static tunnel.
#[derive(Debug, Copy, Clone)]
pub struct TunnelInfo {
    pub src_mac: Mac,
    pub dst_mac: Mac,
    pub endpoints: Endpoints,
}

impl Default for TunnelInfo {
    fn default() -> Self {
        Self {
            src_mac: Mac::ZERO,
            dst_mac: Mac::ZERO,
            endpoints: Endpoints::V4 {
                local: Ipv4Addr::UNSPECIFIED,
                remote: Ipv4Addr::UNSPECIFIED,
            },
        }
    }
}

/// Rebuild `packet` as an IP-in-IP frame with the given outer DSCP.
/// The inner IP packet (everything past the Ethernet header) is carried
/// unmodified as the outer payload.
pub fn encapsulate(
    packet: &mut Packet,
    l3: usize,
    dscp: u8,
    tunnel: &TunnelInfo,
) -> Result<(), Error> {
    let inner_len = packet.len().saturating_sub(l3);
    if inner_len == 0 {
        return Err(Error::Encap("empty inner packet"));
    }
    let inner_proto = match wire::ether_type(packet.as_slice()) {
        wire::ETHERTYPE_IPV4 => wire::IPPROTO_IPIP,
        wire::ETHERTYPE_IPV6 => wire::IPPROTO_IPV6,
        _ => return Err(Error::Encap("inner packet is not IP")),
    };

    let mut out = BytesMut::with_capacity(
        wire::ETHER_HDR_LEN + wire::IPV6_HDR_LEN + inner_len,
    );
    out.put_slice(&tunnel.dst_mac.octets());
    out.put_slice(&tunnel.src_mac.octets());

    match &tunnel.endpoints {
        Endpoints::V4 { local, remote } => {
            if inner_len + wire::IPV4_HDR_LEN > u16::MAX as usize {
                return Err(Error::Encap("inner packet exceeds outer v4 length"));
            }
            out.put_u16(wire::ETHERTYPE_IPV4);
            wire::put_ipv4_header(&mut out, dscp, inner_len, inner_proto, local, remote);
        }
        Endpoints::V6 { local, remote } => {
            if inner_len > u16::MAX as usize {
                return Err(Error::Encap("inner packet exceeds outer v6 length"));
            }
            out.put_u16(wire::ETHERTYPE_IPV6);
            wire::put_ipv6_header(&mut out, dscp, inner_len, inner_proto, 64, local, remote);
        }
    }

    let old = packet.replace(BytesMut::new());
    out.put_slice(&old[l3..]);
    packet.replace(out);
    Ok(())
}

/// Read the DSCP of a frame's (outer) IP header. Used by tests and
/// diagnostics; returns None for non-IP frames.
pub fn frame_dscp(frame: &[u8]) -> Option<u8> {
    if frame.len() < wire::ETHER_HDR_LEN + wire::IPV4_HDR_LEN {
        return None;
    }
    match wire::ether_type(frame) {
        wire::ETHERTYPE_IPV4 => Some(frame[wire::ETHER_HDR_LEN + 1] >> 2),
        wire::ETHERTYPE_IPV6 => {
            let word = u32::from_be_bytes(
                frame[wire::ETHER_HDR_LEN..wire::ETHER_HDR_LEN + 4]
                    .try_into()
                    .unwrap(),
            );
            Some(((word >> 22) & 0x3f) as u8)
        }
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::wire::{extract_packet_info, ETHER_HDR_LEN, IPV4_HDR_LEN};

    fn v4_packet(src: [u8; 4], dst: [u8; 4], payload: &[u8]) -> Packet {
        let mut frame = vec![0u8; ETHER_HDR_LEN + IPV4_HDR_LEN];
        frame[12..14].copy_from_slice(&wire::ETHERTYPE_IPV4.to_be_bytes());
        frame[14] = 0x45;
        frame[23] = 17;
        frame[26..30].copy_from_slice(&src);
        frame[30..34].copy_from_slice(&dst);
        frame.extend_from_slice(payload);
        Packet::from_slice(&frame)
    }

    #[test]
    fn test_encapsulate_v4_in_v4() {
        let mut packet = v4_packet([10, 0, 0, 1], [192, 168, 0, 9], b"hello");
        let inner = packet.as_slice()[ETHER_HDR_LEN..].to_vec();

        let tunnel = TunnelInfo {
            src_mac: Mac([2, 0, 0, 0, 0, 1]),
            dst_mac: Mac([2, 0, 0, 0, 0, 2]),
            endpoints: Endpoints::V4 {
                local: "172.16.0.1".parse().unwrap(),
                remote: "172.16.0.2".parse().unwrap(),
            },
        };
        encapsulate(&mut packet, ETHER_HDR_LEN, 41, &tunnel).unwrap();

        assert_eq!(frame_dscp(packet.as_slice()), Some(41));

        let outer = extract_packet_info(packet.as_slice()).unwrap();
        assert_eq!(outer.next_proto, wire::IPPROTO_IPIP);
        assert_eq!(
            outer.flow,
            crate::FlowKey::V4 {
                src: "172.16.0.1".parse().unwrap(),
                dst: "172.16.0.2".parse().unwrap(),
                proto: wire::IPPROTO_IPIP,
            }
        );

        // Inner packet rides unmodified after the outer header.
        let off = ETHER_HDR_LEN + IPV4_HDR_LEN;
        assert_eq!(&packet.as_slice()[off..], &inner[..]);
    }

    #[test]
    fn test_encapsulate_rejects_non_ip_inner() {
        let mut packet = Packet::from_slice(&[0u8; 60]);
        let err = encapsulate(&mut packet, ETHER_HDR_LEN, 1, &TunnelInfo::default());
        assert!(matches!(err, Err(Error::Encap(_))));
    }
}
