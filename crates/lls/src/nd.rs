//! IPv6 neighbor discovery: the ND face of the neighbor cache.

use crate::cache::{NeighborCache, NeighborProto};
use bytes::BytesMut;
use net::wire::{self, ipv6_multicast_mac};
use net::{Iface, IfaceSide, NetConfig};
use std::net::Ipv6Addr;

pub struct NdProto;

impl NeighborProto for NdProto {
    type Key = Ipv6Addr;
    const NAME: &'static str = "nd";

    fn iface_enabled(iface: &Iface) -> bool {
        iface.nd_enabled()
    }

    fn in_subnet(iface: &Iface, key: &Ipv6Addr) -> bool {
        // Link-local neighbors are always on-link.
        (key.segments()[0] & 0xffc0) == 0xfe80 || iface.ipv6_in_subnet(key)
    }

    fn build_probe(iface: &Iface, key: &Ipv6Addr) -> BytesMut {
        let src = iface
            .ipv6
            .or(iface.ll_ipv6)
            .unwrap_or(Ipv6Addr::UNSPECIFIED);
        wire::build_neighbor_solicit(iface.mac, &src, key)
    }
}

pub type NdCache = NeighborCache<NdProto>;

/// Handle a received neighbor solicit or advert: learn the sender's
/// link-layer mapping, and answer solicits that target one of the
/// interface's unicast addresses. Returns the advert to transmit, if one
/// is owed.
pub fn process_nd(
    cache: &mut NdCache,
    net: &NetConfig,
    side: IfaceSide,
    now: u64,
    frame: &[u8],
) -> Option<BytesMut> {
    let iface = net.iface(side);
    let msg = wire::parse_nd(frame).ok()?;

    match msg.kind {
        wire::ND_NEIGHBOR_SOLICIT => {
            if !msg.src_ip.is_unspecified() {
                if let Some(ll) = msg.ll_addr {
                    cache.learn(now, side, msg.src_ip, ll);
                }
            }
            if iface.ipv6 != Some(msg.target) && iface.ll_ipv6 != Some(msg.target) {
                return None;
            }
            // Duplicate-address detection solicits come from the
            // unspecified address; the advert goes to all-nodes.
            let (dst_ip, dst_mac) = if msg.src_ip.is_unspecified() {
                let all_nodes: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);
                (all_nodes, ipv6_multicast_mac(&all_nodes))
            } else {
                (msg.src_ip, msg.ll_addr.unwrap_or(wire::ether_src(frame)))
            };
            Some(wire::build_neighbor_advert(
                iface.mac,
                &msg.target,
                dst_mac,
                &dst_ip,
            ))
        }
        wire::ND_NEIGHBOR_ADVERT => {
            let ll = msg.ll_addr.unwrap_or(wire::ether_src(frame));
            cache.learn(now, side, msg.target, ll);
            None
        }
        _ => None,
    }
}
